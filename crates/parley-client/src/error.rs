use thiserror::Error;

use parley_shared::error::{RemoteError, ValidationError};

/// Errors produced by the sync engine and its handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    /// The engine task is no longer running.
    #[error("Sync engine has shut down")]
    EngineClosed,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;
