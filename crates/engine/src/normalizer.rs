use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use common::models::{CurrencyCode, Price};
use regex::Regex;
use rust_decimal::Decimal;

use crate::config::EngineConfig;
use crate::error::{NormalizationError, NormalizationFailure};

/// Three uppercase letters touching a digit, with an optional space between.
/// Lowercase words ("ron", "try") are prose, not currency codes.
static ADJACENT_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z]{3})\s?[-−]?\d|\d\s?([A-Z]{3})\b").expect("valid ISO code pattern")
});

/// How a fragment writes its numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Notation {
    /// Human text: separators depend on the site's locale.
    #[default]
    Locale,
    /// Structured metadata: a plain `123.45` is already a decimal.
    Machine,
}

/// The numeric run of a fragment, before separators are resolved.
struct Token<'f> {
    text: &'f str,
    negative: bool,
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    config: Arc<EngineConfig>,
    /// Symbol lexicon, longest first.
    symbols: Vec<(String, CurrencyCode)>,
}

impl Normalizer {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        let mut symbols = config.currency_symbols.clone();
        symbols.sort_by_key(|(symbol, _)| std::cmp::Reverse(symbol.chars().count()));
        Self { config, symbols }
    }

    pub fn normalize(&self, fragment: &str) -> Result<Price, NormalizationError> {
        self.normalize_with(fragment, None, Notation::Locale)
    }

    pub fn normalize_with(
        &self,
        fragment: &str,
        currency_hint: Option<&CurrencyCode>,
        notation: Notation,
    ) -> Result<Price, NormalizationError> {
        let fail = |reason| NormalizationError {
            fragment: fragment.to_string(),
            reason,
        };

        let token = self
            .numeric_token(fragment)
            .ok_or_else(|| fail(NormalizationFailure::NoDigits))?;
        if token.negative {
            return Err(fail(NormalizationFailure::Negative));
        }

        let amount = match notation {
            Notation::Machine if is_plain_decimal(token.text) => Decimal::from_str(token.text)
                .map_err(|_| NormalizationFailure::Unparseable(token.text.to_string())),
            _ => resolve_separators(token.text),
        }
        .map_err(fail)?;

        if amount.is_zero() {
            return Err(fail(NormalizationFailure::Zero));
        }
        if amount > self.config.max_amount {
            return Err(fail(NormalizationFailure::AboveCeiling(self.config.max_amount)));
        }

        let currency = self
            .adjacent_code(fragment)
            .or_else(|| self.symbol_currency(fragment))
            .or_else(|| currency_hint.cloned())
            .unwrap_or_else(|| self.config.fallback_currency.clone());

        Ok(Price::new(amount, currency))
    }

    /// First run of digits and separators. Spaces only count as separators in
    /// front of a three-digit group.
    fn numeric_token<'f>(&self, fragment: &'f str) -> Option<Token<'f>> {
        let chars: Vec<(usize, char)> = fragment.char_indices().collect();
        let first = chars.iter().position(|(_, c)| c.is_ascii_digit())?;

        let mut end = first;
        while end < chars.len() {
            let c = chars[end].1;
            if c.is_ascii_digit() || matches!(c, '.' | ',' | '\'') {
                end += 1;
            } else if is_group_space(c) && starts_group(&chars[end + 1..]) {
                end += 1;
            } else {
                break;
            }
        }
        while !chars[end - 1].1.is_ascii_digit() {
            end -= 1;
        }

        let start = chars[first].0;
        let stop = chars.get(end).map_or(fragment.len(), |(index, _)| *index);
        Some(Token {
            text: &fragment[start..stop],
            negative: self.has_minus_sign(&fragment[..start]),
        })
    }

    /// A sign counts only when it touches the number or its leading symbol,
    /// so "In stock - $5" stays positive.
    fn has_minus_sign(&self, before: &str) -> bool {
        let is_minus = |s: &str| s.ends_with('-') || s.ends_with('−');
        if is_minus(before) {
            return true;
        }

        let trimmed = before.trim_end();
        let without_symbol = self
            .symbols
            .iter()
            .map(|(symbol, _)| symbol.as_str())
            .chain(self.config.currency_codes.iter().map(CurrencyCode::as_str))
            .find_map(|symbol| strip_suffix_ignore_case(trimmed, symbol));

        without_symbol.is_some_and(is_minus)
    }

    fn adjacent_code(&self, fragment: &str) -> Option<CurrencyCode> {
        ADJACENT_CODE
            .captures_iter(fragment)
            .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
            .map(|code| code.as_str())
            .find(|code| self.config.is_known_code(code))
            .and_then(|code| CurrencyCode::parse(code).ok())
    }

    fn symbol_currency(&self, fragment: &str) -> Option<CurrencyCode> {
        self.symbols
            .iter()
            .find(|(symbol, _)| contains_symbol(fragment, symbol))
            .map(|(_, code)| code.clone())
    }
}

fn is_group_space(c: char) -> bool {
    matches!(c, ' ' | '\u{00A0}' | '\u{202F}')
}

fn starts_group(rest: &[(usize, char)]) -> bool {
    let digits = rest.iter().take_while(|(_, c)| c.is_ascii_digit()).count();
    digits == 3
}

fn is_plain_decimal(text: &str) -> bool {
    match text.split_once('.') {
        Some((int, frac)) => is_digits(int) && is_digits(frac),
        None => is_digits(text),
    }
}

fn is_digits(text: &str) -> bool {
    !text.is_empty() && text.chars().all(|c| c.is_ascii_digit())
}

/// Word-like symbols ("lei", "zł") must stand apart from surrounding letters.
fn contains_symbol(haystack: &str, symbol: &str) -> bool {
    let haystack_lower = haystack.to_lowercase();
    let symbol_lower = symbol.to_lowercase();
    let starts_alpha = symbol.chars().next().is_some_and(char::is_alphabetic);
    let ends_alpha = symbol.chars().last().is_some_and(char::is_alphabetic);

    haystack_lower.match_indices(&symbol_lower).any(|(index, found)| {
        let before = haystack_lower[..index].chars().next_back();
        let after = haystack_lower[index + found.len()..].chars().next();
        !(starts_alpha && before.is_some_and(char::is_alphabetic))
            && !(ends_alpha && after.is_some_and(char::is_alphabetic))
    })
}

fn strip_suffix_ignore_case<'a>(text: &'a str, suffix: &str) -> Option<&'a str> {
    let split = text.len().checked_sub(suffix.len())?;
    if !text.is_char_boundary(split) || !text[split..].eq_ignore_ascii_case(suffix) {
        return None;
    }
    Some(&text[..split])
}

/// Decides which of `.` and `,` is the decimal mark and drops the rest.
fn resolve_separators(token: &str) -> Result<Decimal, NormalizationFailure> {
    let cleaned: String = token
        .chars()
        .filter(|c| !is_group_space(*c) && *c != '\'')
        .collect();

    let is_separator = |c: char| c == '.' || c == ',';
    let doubled = cleaned
        .chars()
        .zip(cleaned.chars().skip(1))
        .any(|(a, b)| is_separator(a) && is_separator(b));
    if doubled {
        return Err(NormalizationFailure::AmbiguousSeparators);
    }

    let dots = cleaned.matches('.').count();
    let commas = cleaned.matches(',').count();

    let decimal_mark = match (dots, commas) {
        (0, 0) => None,
        (_, 0) => judge_last(&cleaned, '.'),
        (0, _) => judge_last(&cleaned, ','),
        _ => {
            let (mark, count) = if cleaned.rfind('.') > cleaned.rfind(',') {
                ('.', dots)
            } else {
                (',', commas)
            };
            if count > 1 {
                return Err(NormalizationFailure::AmbiguousSeparators);
            }
            Some(mark)
        }
    };

    let number = match decimal_mark.and_then(|mark| cleaned.rfind(mark)) {
        Some(index) => {
            let int: String = cleaned[..index].chars().filter(char::is_ascii_digit).collect();
            format!("{}.{}", int, &cleaned[index + 1..])
        }
        None => cleaned.chars().filter(char::is_ascii_digit).collect(),
    };

    Decimal::from_str(&number).map_err(|_| NormalizationFailure::Unparseable(token.to_string()))
}

/// Earlier occurrences of a repeated separator group thousands. The last one
/// is the decimal mark only when exactly two digits follow it.
fn judge_last(cleaned: &str, separator: char) -> Option<char> {
    let index = cleaned.rfind(separator)?;
    let trailing = cleaned[index + 1..].chars().count();
    (trailing == 2).then_some(separator)
}
