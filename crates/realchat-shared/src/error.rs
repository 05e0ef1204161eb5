use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Invalid row: {0}")]
    InvalidRow(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
