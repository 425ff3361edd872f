//! SQLite persistence for targets and their observation history.

pub mod db;
pub mod error;
pub mod history;
pub mod repositories;

pub use error::StorageError;
pub use history::SqliteHistory;
