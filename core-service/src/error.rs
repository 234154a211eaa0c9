use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Sync error: {0}")]
    Sync(#[from] core_sync::SyncError),

    #[error("Library error: {0}")]
    Library(#[from] core_library::LibraryError),

    #[error("Playlist {local_id} not found for user {user_id}")]
    PlaylistNotFound { user_id: String, local_id: String },

    #[error("Service is not running; call start() first")]
    NotRunning,

    #[error("Service has been shut down")]
    ShutDown,
}

pub type Result<T> = std::result::Result<T, CoreError>;
