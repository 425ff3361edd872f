use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use common::models::CurrencyCode;
use rust_decimal::Decimal;

use crate::error::ConfigError;

/// ISO codes recognised next to digits in a fragment.
pub const KNOWN_CURRENCY_CODES: &[&str] = &[
    "USD", "EUR", "GBP", "JPY", "CNY", "INR", "CAD", "AUD", "CHF", "SEK", "NOK", "DKK", "PLN",
    "CZK", "HUF", "RON", "TRY", "BRL", "MXN", "ZAR", "AED", "SAR", "ILS", "KRW", "RUB", "HKD",
    "NZD", "SGD", "UAH", "VND", "NGN", "PHP",
];

/// Symbols checked in order, so multi-character symbols come before the
/// single characters they contain.
pub const CURRENCY_SYMBOLS: &[(&str, &str)] = &[
    ("US$", "USD"),
    ("CA$", "CAD"),
    ("AU$", "AUD"),
    ("HK$", "HKD"),
    ("NZ$", "NZD"),
    ("R$", "BRL"),
    ("C$", "CAD"),
    ("A$", "AUD"),
    ("zł", "PLN"),
    ("lei", "RON"),
    ("€", "EUR"),
    ("£", "GBP"),
    ("$", "USD"),
    ("¥", "JPY"),
    ("₩", "KRW"),
    ("₹", "INR"),
    ("₽", "RUB"),
    ("₺", "TRY"),
    ("₴", "UAH"),
    ("₫", "VND"),
    ("₦", "NGN"),
    ("₪", "ILS"),
    ("₱", "PHP"),
];

/// Read-only settings shared by every check.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub fallback_currency: CurrencyCode,
    pub max_amount: Decimal,
    pub fetch_timeout: Duration,
    pub history_limit: usize,
    pub currency_codes: Vec<CurrencyCode>,
    pub currency_symbols: Vec<(String, CurrencyCode)>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fallback_currency: builtin_code("USD"),
            max_amount: Decimal::from(10_000_000),
            fetch_timeout: Duration::from_secs(20),
            history_limit: 5,
            currency_codes: KNOWN_CURRENCY_CODES.iter().map(|c| builtin_code(c)).collect(),
            currency_symbols: CURRENCY_SYMBOLS
                .iter()
                .map(|(symbol, code)| (symbol.to_string(), builtin_code(code)))
                .collect(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(code) = parse_var::<CurrencyCode>(&lookup, "PRICE_FALLBACK_CURRENCY")? {
            config.fallback_currency = code;
        }
        if let Some(max) = parse_var::<Decimal>(&lookup, "PRICE_MAX_AMOUNT")? {
            if max <= Decimal::ZERO {
                return Err(ConfigError::Invalid {
                    key: "PRICE_MAX_AMOUNT",
                    value: max.to_string(),
                    reason: "the ceiling must be positive".to_string(),
                });
            }
            config.max_amount = max;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "FETCH_TIMEOUT_SECS")? {
            config.fetch_timeout = Duration::from_secs(secs);
        }
        if let Some(limit) = parse_var::<usize>(&lookup, "HISTORY_LIMIT")? {
            config.history_limit = limit.max(1);
        }

        Ok(config)
    }

    pub fn is_known_code(&self, code: &str) -> bool {
        self.currency_codes
            .iter()
            .any(|known| known.as_str().eq_ignore_ascii_case(code))
    }
}

fn builtin_code(code: &str) -> CurrencyCode {
    CurrencyCode::parse(code).expect("built-in currency codes are valid")
}

/// Reads `key` through `lookup`; unset or blank values are `None`.
pub fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    let value = value.trim().to_string();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<T>()
        .map(Some)
        .map_err(|e| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = EngineConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.fallback_currency.as_str(), "USD");
        assert_eq!(config.max_amount, Decimal::from(10_000_000));
        assert_eq!(config.fetch_timeout, Duration::from_secs(20));
        assert_eq!(config.history_limit, 5);
    }

    #[test]
    fn reads_overrides() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("PRICE_FALLBACK_CURRENCY", "eur"),
            ("PRICE_MAX_AMOUNT", "5000"),
            ("FETCH_TIMEOUT_SECS", "3"),
            ("HISTORY_LIMIT", "2"),
        ]))
        .unwrap();

        assert_eq!(config.fallback_currency.as_str(), "EUR");
        assert_eq!(config.max_amount, Decimal::from(5000));
        assert_eq!(config.fetch_timeout, Duration::from_secs(3));
        assert_eq!(config.history_limit, 2);
    }

    #[test]
    fn rejects_bad_values() {
        let err = EngineConfig::from_lookup(lookup_from(&[("FETCH_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("FETCH_TIMEOUT_SECS"));

        assert!(
            EngineConfig::from_lookup(lookup_from(&[("PRICE_FALLBACK_CURRENCY", "$")])).is_err()
        );
    }

    #[test]
    fn ceiling_must_be_positive() {
        for value in ["0", "-100", "0.00"] {
            let err = EngineConfig::from_lookup(lookup_from(&[("PRICE_MAX_AMOUNT", value)]))
                .unwrap_err();
            assert!(err.to_string().contains("PRICE_MAX_AMOUNT"), "{value}");
            assert!(err.to_string().contains("must be positive"), "{value}");
        }
    }

    #[test]
    fn multi_char_symbols_precede_their_suffixes() {
        let position = |needle: &str| {
            CURRENCY_SYMBOLS
                .iter()
                .position(|(symbol, _)| *symbol == needle)
                .unwrap()
        };
        assert!(position("CA$") < position("A$"));
        assert!(position("US$") < position("$"));
        assert!(position("R$") < position("$"));
    }
}
