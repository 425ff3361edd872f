use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ModelError, Price};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationStatus {
    Success,
    Failure,
}

impl ObservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

impl FromStr for ObservationStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            other => Err(ModelError::UnknownStatus(other.to_string())),
        }
    }
}

/// Which stage of a check produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    Fetch,
    SelectorSyntax,
    NoMatch,
    Normalization,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::SelectorSyntax => "selector-syntax",
            Self::NoMatch => "no-match",
            Self::Normalization => "normalization",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fetch" => Ok(Self::Fetch),
            "selector-syntax" => Ok(Self::SelectorSyntax),
            "no-match" => Ok(Self::NoMatch),
            "normalization" => Ok(Self::Normalization),
            other => Err(ModelError::UnknownFailureKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(Price),
    Failure { kind: FailureKind, detail: String },
}

/// One check attempt. Price exists iff success, error detail iff failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub target_id: i64,
    pub checked_at: DateTime<Utc>,
    /// Matched text, kept even when it could not be normalized.
    pub raw_text: Option<String>,
    pub outcome: Outcome,
}

impl Observation {
    pub fn success(
        target_id: i64,
        checked_at: DateTime<Utc>,
        price: Price,
        raw_text: impl Into<String>,
    ) -> Self {
        Self {
            target_id,
            checked_at,
            raw_text: Some(raw_text.into()),
            outcome: Outcome::Success(price),
        }
    }

    pub fn failure(
        target_id: i64,
        checked_at: DateTime<Utc>,
        kind: FailureKind,
        detail: impl Into<String>,
        raw_text: Option<String>,
    ) -> Self {
        Self {
            target_id,
            checked_at,
            raw_text,
            outcome: Outcome::Failure {
                kind,
                detail: detail.into(),
            },
        }
    }

    pub fn status(&self) -> ObservationStatus {
        match self.outcome {
            Outcome::Success(_) => ObservationStatus::Success,
            Outcome::Failure { .. } => ObservationStatus::Failure,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success(_))
    }

    pub fn price(&self) -> Option<&Price> {
        match &self.outcome {
            Outcome::Success(price) => Some(price),
            Outcome::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Success(_) => None,
            Outcome::Failure { detail, .. } => Some(detail),
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.outcome {
            Outcome::Success(_) => None,
            Outcome::Failure { kind, .. } => Some(*kind),
        }
    }
}
