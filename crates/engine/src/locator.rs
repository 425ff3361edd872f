//! Finds a price on a page that came without a selector.
//!
//! Strategies run in trust order and the first one producing candidates
//! wins. Within a strategy the candidate with the shortest enclosing text is
//! the most specific one; ties keep document order.

use std::sync::LazyLock;

use common::models::CurrencyCode;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::NoMatchError;
use crate::normalizer::Notation;
use crate::text::{collapse_whitespace, element_text, is_invisible};

const LEXICON: &[&str] = &["price", "amount", "cost", "sale", "offer"];
const MAX_CANDIDATE_CHARS: usize = 120;

static JSON_LD: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"script[type="application/ld+json"]"#).expect("valid JSON-LD selector")
});

static PRICE_META: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [
        r#"meta[property="product:price:amount"]"#,
        r#"meta[property="og:price:amount"]"#,
        r#"meta[property="og:price:standard_amount"]"#,
        r#"[itemprop="price"][content]"#,
        r#"meta[name="twitter:data1"]"#,
    ]
    .iter()
    .map(|css| Selector::parse(css).expect("valid price meta selector"))
    .collect()
});

static CURRENCY_META: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    [
        r#"meta[property="product:price:currency"]"#,
        r#"meta[property="og:price:currency"]"#,
        r#"[itemprop="priceCurrency"][content]"#,
    ]
    .iter()
    .map(|css| Selector::parse(css).expect("valid currency meta selector"))
    .collect()
});


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorStrategy {
    StructuredMetadata,
    Lexicon,
    FreeText,
}

impl LocatorStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StructuredMetadata => "structured-metadata",
            Self::Lexicon => "lexicon",
            Self::FreeText => "free-text",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub text: String,
    /// Length in characters of the text of the element the candidate sits in.
    pub enclosing_len: usize,
    pub notation: Notation,
    pub currency_hint: Option<CurrencyCode>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub fragment: String,
    pub strategy: LocatorStrategy,
    pub notation: Notation,
    pub currency_hint: Option<CurrencyCode>,
}

pub type Strategy = fn(&Locator, &Html) -> Vec<Candidate>;

pub const STRATEGIES: &[(LocatorStrategy, Strategy)] = &[
    (LocatorStrategy::StructuredMetadata, structured_metadata),
    (LocatorStrategy::Lexicon, lexicon),
    (LocatorStrategy::FreeText, free_text),
];

/// The auto-locator, with its free-text pattern compiled from the same
/// currency lexicon the normalizer reads.
#[derive(Debug, Clone)]
pub struct Locator {
    /// A number with a currency symbol or uppercase ISO code right next to it.
    currency_amount: Regex,
}

impl Locator {
    pub fn new(config: &EngineConfig) -> Self {
        let mut symbols: Vec<&str> = config
            .currency_symbols
            .iter()
            .map(|(symbol, _)| symbol.as_str())
            .collect();
        // Alternation is leftmost-first, so "CA$" has to be tried before "$".
        symbols.sort_by_key(|symbol| std::cmp::Reverse(symbol.chars().count()));
        let symbols = symbols
            .into_iter()
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join("|");
        let codes = config
            .currency_codes
            .iter()
            .map(CurrencyCode::as_str)
            .collect::<Vec<_>>()
            .join("|");

        let number = r"\d(?:[\d.,'\x{A0}\x{202F} ]*\d)?";
        let pattern = format!(
            r"(?i:{symbols})\s?-?{number}|\b(?:{codes})\s?-?{number}|{number}\s?(?:(?i:{symbols})|(?:{codes})\b)"
        );
        let currency_amount =
            Regex::new(&pattern).expect("escaped symbols and three-letter codes form a valid pattern");

        Self { currency_amount }
    }

    pub fn locate(&self, document: &Html) -> Result<Located, NoMatchError> {
        for (strategy, find) in STRATEGIES {
            let candidates = find(self, document);
            let found = candidates.len();

            if let Some(best) = most_specific(candidates) {
                debug!(
                    strategy = strategy.as_str(),
                    candidates = found,
                    fragment = %best.text,
                    "located price candidate"
                );
                return Ok(Located {
                    fragment: best.text,
                    strategy: *strategy,
                    notation: best.notation,
                    currency_hint: best.currency_hint,
                });
            }
        }

        Err(NoMatchError::NoPriceFound)
    }
}

fn most_specific(candidates: Vec<Candidate>) -> Option<Candidate> {
    candidates
        .into_iter()
        .enumerate()
        .min_by_key(|(index, candidate)| (candidate.enclosing_len, *index))
        .map(|(_, candidate)| candidate)
}

/// Currency declared by the page's metadata, if any.
pub fn currency_hint(document: &Html) -> Option<CurrencyCode> {
    json_ld_blocks(document)
        .iter()
        .find_map(|block| json_ld_currency(block))
        .or_else(|| {
            CURRENCY_META
                .iter()
                .flat_map(|selector| document.select(selector))
                .filter_map(|meta| meta.value().attr("content"))
                .find_map(|code| CurrencyCode::parse(code.trim()).ok())
        })
}

/// JSON-LD offers first, then price meta tags. Neither has rendered text,
/// so discovery order alone decides between them.
pub fn structured_metadata(_: &Locator, document: &Html) -> Vec<Candidate> {
    let page_hint = currency_hint(document);
    let mut candidates = Vec::new();

    for block in json_ld_blocks(document) {
        if let Some((price, currency)) = json_ld_price(&block, None) {
            let currency_hint = currency
                .and_then(|code| CurrencyCode::parse(code).ok())
                .or_else(|| page_hint.clone());
            candidates.push(Candidate {
                text: price,
                enclosing_len: 0,
                notation: Notation::Machine,
                currency_hint,
            });
        }
    }

    for selector in PRICE_META.iter() {
        for meta in document.select(selector) {
            let Some(content) = meta.value().attr("content") else {
                continue;
            };
            let text = collapse_whitespace(content);
            if text.is_empty() {
                continue;
            }
            candidates.push(Candidate {
                text,
                enclosing_len: 0,
                notation: Notation::Machine,
                currency_hint: page_hint.clone(),
            });
        }
    }

    candidates
}

/// Elements whose class or id mentions a price word.
pub fn lexicon(_: &Locator, document: &Html) -> Vec<Candidate> {
    let page_hint = currency_hint(document);

    document
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|element| mentions_price(element) && !is_invisible(element))
        .filter_map(|element| {
            let text = element_text(&element);
            let len = text.chars().count();
            let plausible = len <= MAX_CANDIDATE_CHARS && text.chars().any(|c| c.is_ascii_digit());
            plausible.then(|| Candidate {
                text,
                enclosing_len: len,
                notation: Notation::Locale,
                currency_hint: page_hint.clone(),
            })
        })
        .collect()
}

/// Currency-adjacent numbers anywhere in visible text.
pub fn free_text(locator: &Locator, document: &Html) -> Vec<Candidate> {
    let page_hint = currency_hint(document);
    let mut candidates = Vec::new();

    for node in document.tree.root().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let Some(parent) = node.parent().and_then(ElementRef::wrap) else {
            continue;
        };
        if is_invisible(&parent) {
            continue;
        }

        let enclosing_len = element_text(&parent).chars().count();
        for found in locator.currency_amount.find_iter(text) {
            candidates.push(Candidate {
                text: collapse_whitespace(found.as_str()),
                enclosing_len,
                notation: Notation::Locale,
                currency_hint: page_hint.clone(),
            });
        }
    }

    candidates
}

fn mentions_price(element: &ElementRef<'_>) -> bool {
    ["class", "id"].iter().any(|name| {
        element.value().attr(name).is_some_and(|value| {
            let value = value.to_lowercase();
            LEXICON.iter().any(|word| value.contains(word))
        })
    })
}

fn json_ld_blocks(document: &Html) -> Vec<Value> {
    document
        .select(&JSON_LD)
        .filter_map(|script| {
            let raw = script.text().collect::<String>();
            if raw.trim().is_empty() {
                return None;
            }
            match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    debug!(error = %e, "skipping unparseable JSON-LD block");
                    None
                }
            }
        })
        .collect()
}

/// First price in the block, with the `priceCurrency` in scope where it was found.
fn json_ld_price<'v>(node: &'v Value, inherited: Option<&'v str>) -> Option<(String, Option<&'v str>)> {
    match node {
        Value::Object(map) => {
            let currency = map
                .get("priceCurrency")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|code| !code.is_empty())
                .or(inherited);

            for key in ["price", "lowPrice", "highPrice"] {
                if let Some(price) = map.get(key).and_then(scalar_text) {
                    return Some((price, currency));
                }
            }
            for key in ["offers", "mainEntity", "itemOffered"] {
                if let Some(found) = map.get(key).and_then(|nested| json_ld_price(nested, currency)) {
                    return Some(found);
                }
            }
            map.values().find_map(|nested| json_ld_price(nested, currency))
        }
        Value::Array(items) => items.iter().find_map(|item| json_ld_price(item, inherited)),
        _ => None,
    }
}

fn json_ld_currency(node: &Value) -> Option<CurrencyCode> {
    match node {
        Value::Object(map) => map
            .get("priceCurrency")
            .and_then(Value::as_str)
            .and_then(|code| CurrencyCode::parse(code.trim()).ok())
            .or_else(|| map.values().find_map(json_ld_currency)),
        Value::Array(items) => items.iter().find_map(json_ld_currency),
        _ => None,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator() -> Locator {
        Locator::new(&EngineConfig::default())
    }

    fn page(head: &str, body: &str) -> Html {
        Html::parse_document(&format!(
            "<html><head>{head}</head><body>{body}</body></html>"
        ))
    }

    #[test]
    fn json_ld_offer_wins_over_page_text() {
        let document = page(
            r#"<script type="application/ld+json">
                {"@context": "https://schema.org", "@type": "Product", "name": "Kettle",
                 "offers": {"@type": "Offer", "price": "1299.00", "priceCurrency": "EUR"}}
            </script>"#,
            r#"<span class="price">€1.399,00</span>"#,
        );

        let located = locator().locate(&document).unwrap();
        assert_eq!(located.strategy, LocatorStrategy::StructuredMetadata);
        assert_eq!(located.fragment, "1299.00");
        assert_eq!(located.notation, Notation::Machine);
        assert_eq!(located.currency_hint.unwrap().as_str(), "EUR");
    }

    #[test]
    fn json_ld_walks_graphs_and_numbers() {
        let document = page(
            r#"<script type="application/ld+json">
                {"@graph": [{"@type": "WebPage"},
                            {"@type": "Product", "offers": [{"lowPrice": 24.5}]}]}
            </script>"#,
            "",
        );

        let located = locator().locate(&document).unwrap();
        assert_eq!(located.fragment, "24.5");
        assert!(located.currency_hint.is_none());
    }

    #[test]
    fn broken_json_ld_falls_through_to_meta_tags() {
        let document = page(
            r#"<script type="application/ld+json">{"offers": </script>
               <meta property="product:price:amount" content="19.95">
               <meta property="product:price:currency" content="gbp">"#,
            "<p>Nothing else</p>",
        );

        let located = locator().locate(&document).unwrap();
        assert_eq!(located.strategy, LocatorStrategy::StructuredMetadata);
        assert_eq!(located.fragment, "19.95");
        assert_eq!(located.currency_hint.unwrap().as_str(), "GBP");
    }

    #[test]
    fn lexicon_prefers_the_most_specific_element() {
        let document = page(
            "",
            r#"<div class="price-box">Our price today <span class="sale-price">$18.00</span>
                 <s class="old-price">$24.00</s></div>"#,
        );

        let located = locator().locate(&document).unwrap();
        assert_eq!(located.strategy, LocatorStrategy::Lexicon);
        assert_eq!(located.fragment, "$18.00");
        assert_eq!(located.notation, Notation::Locale);
    }

    #[test]
    fn lexicon_ties_keep_document_order() {
        let document = page(
            "",
            r#"<b id="Amount-A">$11.00</b><b id="amount-b">$22.00</b>"#,
        );
        assert_eq!(locator().locate(&document).unwrap().fragment, "$11.00");
    }

    #[test]
    fn lexicon_skips_digitless_and_long_text() {
        let long = format!("<div class=\"price-notes\">{} 5</div>", "lorem ipsum ".repeat(20));
        let document = page("", &format!(r#"<div class="price">Call us</div>{long}"#));
        assert!(lexicon(&locator(), &document).is_empty());
    }

    #[test]
    fn free_text_finds_currency_adjacent_tokens() {
        let document = page(
            "",
            r#"<script>var p = "$1.00";</script>
               <p>Only <b>24,99 €</b> this week, was EUR 30</p>"#,
        );

        let located = locator().locate(&document).unwrap();
        assert_eq!(located.strategy, LocatorStrategy::FreeText);
        assert_eq!(located.fragment, "24,99 €");
    }

    #[test]
    fn free_text_ignores_bare_numbers() {
        let document = page("", "<p>Order 3 items within 24 hours</p>");
        assert!(free_text(&locator(), &document).is_empty());
        assert_eq!(locator().locate(&document).unwrap_err(), NoMatchError::NoPriceFound);
    }

    #[test]
    fn page_currency_hint_reaches_other_strategies() {
        let document = page(
            r#"<meta itemprop="priceCurrency" content="CAD">"#,
            r#"<span id="price">12.50</span>"#,
        );

        let located = locator().locate(&document).unwrap();
        assert_eq!(located.strategy, LocatorStrategy::Lexicon);
        assert_eq!(located.currency_hint.unwrap().as_str(), "CAD");
    }

    #[test]
    fn free_text_follows_the_configured_lexicon() {
        let document = page("", "<p>Only 249 kr today</p>");
        assert_eq!(locator().locate(&document).unwrap_err(), NoMatchError::NoPriceFound);

        let mut config = EngineConfig::default();
        config
            .currency_symbols
            .push(("kr".to_string(), CurrencyCode::parse("SEK").unwrap()));
        let located = Locator::new(&config).locate(&document).unwrap();
        assert_eq!(located.strategy, LocatorStrategy::FreeText);
        assert_eq!(located.fragment, "249 kr");

        let normalizer = crate::normalizer::Normalizer::new(std::sync::Arc::new(config));
        let price = normalizer
            .normalize_with(&located.fragment, located.currency_hint.as_ref(), located.notation)
            .unwrap();
        assert_eq!(price.currency.as_str(), "SEK");
    }

    #[test]
    fn lowercase_words_do_not_count_as_codes() {
        let document = page("", "<p>Pick 3 usd cables or try 2 ron</p>");
        assert!(free_text(&locator(), &document).is_empty());

        let upper = page("", "<p>Now 15 USD</p>");
        assert_eq!(locator().locate(&upper).unwrap().fragment, "15 USD");
    }
}
