use bridge_traits::BridgeError;
use core_library::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Invalid sync intent: {0}")]
    InvalidIntent(String),

    #[error("Sync intent rejected: {0}")]
    Rejected(String),

    #[error("Playlist {local_id} not found for user {user_id}")]
    PlaylistNotFound { user_id: String, local_id: String },

    #[error("Remote playlist {0} no longer exists")]
    RemotePlaylistMissing(String),

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Session is stale: {0}")]
    StaleSession(String),

    #[error("Remote request failed with status {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("Remote service unavailable: {0}")]
    Transport(String),

    #[error("Malformed remote response: {0}")]
    MalformedResponse(String),

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),
}

/// How the sync manager reacts to a failed intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network hiccup; the next trigger retries
    Transient,
    /// Credentials revoked; the user is deauthenticated
    Unauthorized,
    /// Credentials need a refresh through the host
    StaleSession,
    /// 5xx-class answer; the manager enters backoff
    ServerFailure,
    /// Retrying cannot help; dropped with a diagnostic
    Invalid,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Unauthorized => "unauthorized",
            ErrorClass::StaleSession => "stale_session",
            ErrorClass::ServerFailure => "server_failure",
            ErrorClass::Invalid => "invalid",
        }
    }
}

impl SyncError {
    pub fn classify(&self) -> ErrorClass {
        match self {
            SyncError::Remote { status, .. } if *status >= 500 => ErrorClass::ServerFailure,
            SyncError::Remote { status: 401, .. } => ErrorClass::Unauthorized,
            SyncError::Remote {
                status: 408 | 429, ..
            } => ErrorClass::Transient,
            SyncError::Remote { .. } => ErrorClass::Invalid,
            SyncError::Unauthorized(_) => ErrorClass::Unauthorized,
            SyncError::StaleSession(_) => ErrorClass::StaleSession,
            SyncError::Transport(_) | SyncError::MalformedResponse(_) => ErrorClass::Transient,
            SyncError::Library(LibraryError::Database(_)) => ErrorClass::Transient,
            SyncError::Library(_)
            | SyncError::InvalidIntent(_)
            | SyncError::Rejected(_)
            | SyncError::PlaylistNotFound { .. }
            | SyncError::RemotePlaylistMissing(_) => ErrorClass::Invalid,
        }
    }

    /// The remote answered that the addressed object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::Remote { status: 404, .. })
    }

    /// Whether the same intent may succeed when triggered again.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self.classify(),
            ErrorClass::Invalid | ErrorClass::Unauthorized
        )
    }
}

impl From<BridgeError> for SyncError {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Http { status, message } => SyncError::Remote { status, message },
            BridgeError::Unauthorized(message) => SyncError::Unauthorized(message),
            BridgeError::StaleSession(message) => SyncError::StaleSession(message),
            other => SyncError::Transport(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
