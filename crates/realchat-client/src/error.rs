use thiserror::Error;

use realchat_backend::BackendError;

/// Invalid or missing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set (set REALCHAT_OFFLINE=1 to run without a backend)")]
    Missing(&'static str),

    #[error("Invalid backend settings: {0}")]
    Backend(#[from] BackendError),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Terminal I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
