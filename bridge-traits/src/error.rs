use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Remote request failed with status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Session is stale and needs a credential refresh: {0}")]
    StaleSession(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether the remote side answered with a 5xx-class status.
    pub fn is_server_error(&self) -> bool {
        matches!(self, BridgeError::Http { status, .. } if *status >= 500)
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
