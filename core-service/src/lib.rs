//! Smart playlist service façade.
//!
//! This crate wires host-provided collaborators (the remote playlist API,
//! the track delta feed, an auth provider) into a running sync engine.
//! Hosts build a [`CoreConfig`](core_runtime::config::CoreConfig), hand it
//! to [`SmartPlaylistService::new`] together with [`CoreDependencies`], then
//! call [`start`](SmartPlaylistService::start) and
//! [`register_user`](SmartPlaylistService::register_user) for every signed
//! in user.
//!
//! Logging is left to the host: call
//! `core_runtime::logging::init_logging` once at startup.
//!
//! ```no_run
//! # async fn example(
//! #     config: core_runtime::config::CoreConfig,
//! #     deps: core_service::CoreDependencies,
//! # ) -> core_service::Result<()> {
//! use core_library::{Operator, Rule, RuleValue};
//! use core_service::{PlaylistDraft, SmartPlaylistService};
//!
//! let service = SmartPlaylistService::new(config, deps).await?;
//! service.start().await?;
//! service.register_user("user-1").await?;
//!
//! let rules = Rule::condition("genre", Operator::Eq, RuleValue::Text("Jazz".into()));
//! service
//!     .create_playlist("user-1", PlaylistDraft::new("Jazz", rules))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod service;

pub use error::{CoreError, Result};
pub use service::{PlaylistDraft, ServiceStatus, SmartPlaylistService};

use std::sync::Arc;

use core_library::repositories::{MemoryTrackStore, TrackStore};
use core_sync::{RemotePlaylistApi, TrackChangesApi};

/// Aggregated handle to the host collaborators the engine requires.
#[derive(Clone)]
pub struct CoreDependencies {
    pub remote: Arc<dyn RemotePlaylistApi>,
    pub track_changes: Arc<dyn TrackChangesApi>,
    pub tracks: Arc<dyn TrackStore>,
}

impl CoreDependencies {
    /// Dependencies with the default in-memory track cache.
    pub fn new(
        remote: Arc<dyn RemotePlaylistApi>,
        track_changes: Arc<dyn TrackChangesApi>,
    ) -> Self {
        Self {
            remote,
            track_changes,
            tracks: Arc::new(MemoryTrackStore::new()),
        }
    }

    pub fn with_track_store(mut self, tracks: Arc<dyn TrackStore>) -> Self {
        self.tracks = tracks;
        self
    }
}
