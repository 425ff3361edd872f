use std::time::Duration;

use common::models::FailureKind;
use rust_decimal::Decimal;
use thiserror::Error;

pub use common::models::CurrencyMismatchError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("HTTP error: server answered {status}")]
    Status { status: u16 },
    #[error("unsupported content type '{0}' (expected an HTML page)")]
    UnsupportedContentType(String),
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("HTTP error: {0}")]
    Transport(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid selector '{expression}': {reason}")]
pub struct SelectorSyntaxError {
    pub expression: String,
    pub reason: String,
}

impl SelectorSyntaxError {
    pub fn new(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NoMatchError {
    #[error("no match: selector '{0}' matched nothing")]
    SelectorMatchedNothing(String),
    #[error("no match: could not automatically detect a price, add a selector for better accuracy")]
    NoPriceFound,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizationFailure {
    #[error("no digits found")]
    NoDigits,
    #[error("separators are ambiguous")]
    AmbiguousSeparators,
    #[error("amount is negative")]
    Negative,
    #[error("amount is zero")]
    Zero,
    #[error("amount exceeds the sanity ceiling of {0}")]
    AboveCeiling(Decimal),
    #[error("'{0}' is not a number")]
    Unparseable(String),
}

/// Carries the matched fragment so the failure can be diagnosed later.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("could not parse a price from '{fragment}': {reason}")]
pub struct NormalizationError {
    pub fragment: String,
    pub reason: NormalizationFailure,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    SelectorSyntax(#[from] SelectorSyntaxError),
    #[error(transparent)]
    NoMatch(#[from] NoMatchError),
    #[error(transparent)]
    Normalization(#[from] NormalizationError),
}

impl CheckError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Fetch(_) => FailureKind::Fetch,
            Self::SelectorSyntax(_) => FailureKind::SelectorSyntax,
            Self::NoMatch(_) => FailureKind::NoMatch,
            Self::Normalization(_) => FailureKind::Normalization,
        }
    }

    /// Only normalization failures had a fragment in hand.
    pub fn raw_fragment(&self) -> Option<&str> {
        match self {
            Self::Normalization(err) => Some(&err.fragment),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{key} has an invalid value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_displayable() {
        let err = CheckError::from(FetchError::Timeout(Duration::from_secs(20)));
        assert_eq!(err.to_string(), "request timed out after 20s");
        assert_eq!(err.kind(), FailureKind::Fetch);

        let err = CheckError::from(NoMatchError::SelectorMatchedNothing(".price".into()));
        assert!(err.to_string().starts_with("no match"));
        assert_eq!(err.kind(), FailureKind::NoMatch);
    }

    #[test]
    fn normalization_keeps_fragment() {
        let err = CheckError::from(NormalizationError {
            fragment: "-5.00".into(),
            reason: NormalizationFailure::Negative,
        });
        assert_eq!(err.raw_fragment(), Some("-5.00"));
        assert_eq!(
            err.to_string(),
            "could not parse a price from '-5.00': amount is negative"
        );
    }
}
