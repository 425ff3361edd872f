use common::models::ModelError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("stored value does not map onto the model: {0}")]
    Model(#[from] ModelError),
    #[error("row {id} is corrupt: {reason}")]
    Corrupt { id: i64, reason: String },
}
