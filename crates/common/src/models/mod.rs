use thiserror::Error;

pub mod change;
pub mod observation;
pub mod price;
pub mod target;

pub use change::{ChangeSummary, CurrencyMismatchError, Direction};
pub use observation::{FailureKind, Observation, ObservationStatus, Outcome};
pub use price::{CurrencyCode, Price};
pub use target::{SelectorKind, Target, TargetSelector};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("selector expression must not be empty")]
    EmptySelector,
    #[error("unknown selector kind '{0}' (expected structural-path or declarative-query)")]
    UnknownSelectorKind(String),
    #[error("'{0}' is not a 3-letter currency code")]
    InvalidCurrency(String),
    #[error("unknown observation status '{0}'")]
    UnknownStatus(String),
    #[error("unknown failure kind '{0}'")]
    UnknownFailureKind(String),
}
