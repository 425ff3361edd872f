//! Price extraction and change detection.
//!
//! `Checker::check_one` drives a single target through fetch, selection (or
//! auto-location), normalization and comparison. Everything it needs from the
//! outside world comes through the `Fetcher` trait and the history slice the
//! caller passes in.

pub mod config;
pub mod detector;
pub mod error;
pub mod locator;
pub mod naming;
pub mod normalizer;
pub mod orchestrator;
pub mod selector;
pub mod traits;

mod text;

pub use config::EngineConfig;
pub use error::{
    CheckError, ConfigError, FetchError, NoMatchError, NormalizationError, NormalizationFailure,
    SelectorSyntaxError,
};
pub use orchestrator::{CheckOutcome, CheckStage, Checker};
pub use traits::{FetchedDocument, Fetcher, HistoryLookup};
