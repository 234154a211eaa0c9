//! # Smart Playlist Sync Engine
//!
//! Keeps rule-based playlists in step with their copies on the remote
//! playlist service.
//!
//! ## Overview
//!
//! Triggers (storage changes, a periodic timer, explicit requests) enqueue
//! sync intents. The manager drains them one at a time; each intent
//! refreshes the caches, evaluates playlist rules against the track cache
//! and sends the smallest mutation batch that turns the remote entry list
//! into the desired order.
//!
//! ## Components
//!
//! - **Remote contracts** (`remote`): playlist and track feed APIs, mutation wire types
//! - **Intents** (`intent`): raw and validated sync requests
//! - **Remote playlist cache** (`splaylists`): snapshots keyed by remote id, reference pruning
//! - **Membership** (`membership`): resolves `playlist` rules, recursively
//! - **Reconciliation** (`reconcile`): diff plus longest increasing subsequence
//! - **Track refresh** (`tracks`): applies the remote delta feed
//! - **Coordinator** (`coordinator`): executes one intent
//! - **Manager** (`manager`): FIFO queue, single worker, backoff on server failure
//! - **Triggers** (`triggers`): playlist change stream to intents

pub mod coordinator;
pub mod error;
pub mod intent;
pub mod manager;
pub mod membership;
pub mod reconcile;
pub mod remote;
pub mod splaylists;
pub mod tracks;
pub mod triggers;

pub use coordinator::{IntentOutcome, SyncCoordinator, SyncDependencies};
pub use error::{ErrorClass, Result, SyncError};
pub use intent::{Intent, SyncAction, SyncIntent};
pub use manager::{SyncManager, SyncState};
pub use reconcile::{reconcile, ReconcilePlan};
pub use remote::{
    EntryMutation, EntryPlacement, MutationResponse, PlaylistFields, PlaylistMutation,
    RemoteAuth, RemoteEntry, RemotePlaylist, RemotePlaylistApi, TrackChanges, TrackChangesApi,
};
pub use splaylists::{Splaylist, SplaylistCache};
pub use triggers::{intent_for_change, spawn_change_listener};
