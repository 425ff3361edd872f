use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{CurrencyCode, Price};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    First,
    Unchanged,
    Increased,
    Decreased,
    /// Amounts in different currencies are never compared.
    CurrencyChanged,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::First => "first",
            Self::Unchanged => "unchanged",
            Self::Increased => "increased",
            Self::Decreased => "decreased",
            Self::CurrencyChanged => "currency-changed",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("currency changed from {previous} to {current}; amounts were not compared")]
pub struct CurrencyMismatchError {
    pub previous: CurrencyCode,
    pub current: CurrencyCode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub previous: Option<Price>,
    pub current: Price,
    pub direction: Direction,
}

impl ChangeSummary {
    pub fn is_notifiable(&self) -> bool {
        matches!(
            self.direction,
            Direction::Increased | Direction::Decreased | Direction::CurrencyChanged
        )
    }

    pub fn currency_mismatch(&self) -> Option<CurrencyMismatchError> {
        match (&self.previous, self.direction) {
            (Some(previous), Direction::CurrencyChanged) => Some(CurrencyMismatchError {
                previous: previous.currency.clone(),
                current: self.current.currency.clone(),
            }),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.previous {
            Some(previous) => write!(f, "{} -> {} ({})", previous, self.current, self.direction),
            None => write!(f, "{} ({})", self.current, self.direction),
        }
    }
}
