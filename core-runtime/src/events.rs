//! # Event Bus System
//!
//! Typed events broadcast over `tokio::sync::broadcast` so hosts and
//! internal components can observe the sync engine without coupling to it.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     emit      ┌───────────┐
//! │ Sync Manager ├──────────────>│           │     subscribe    ┌────────────┐
//! └──────────────┘               │ EventBus  ├─────────────────>│ Host UI    │
//! ┌──────────────┐     emit      │ (broadcast│                  └────────────┘
//! │ Coordinator  ├──────────────>│  channel) │     subscribe    ┌────────────┐
//! └──────────────┘               │           ├─────────────────>│ Telemetry  │
//!                                └───────────┘                  └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Sync(SyncEvent::BackoffCleared)).ok();
//! assert_eq!(rx.recv().await.unwrap(), CoreEvent::Sync(SyncEvent::BackoffCleared));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber fell `n` events behind and
//!   should resynchronize (e.g. by reading `SyncManager::state`).
//! - **`RecvError::Closed`**: the bus was dropped.
//!
//! `emit` returns an error when nobody is subscribed; publishers ignore it.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast::{self, error::RecvError, error::SendError};

pub use tokio::sync::broadcast::Receiver;

pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Auth(AuthEvent),
    Sync(SyncEvent),
    Library(LibraryEvent),
}

impl CoreEvent {
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Auth(e) => e.description(),
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Library(e) => e.description(),
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::Failed {
                recoverable: false, ..
            }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::Failed { .. })
            | CoreEvent::Sync(SyncEvent::BackoffEntered { .. })
            | CoreEvent::Sync(SyncEvent::IntentRejected { .. })
            | CoreEvent::Auth(AuthEvent::Deauthenticated { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::Completed { .. })
            | CoreEvent::Library(LibraryEvent::PlaylistSynced { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Authentication Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    /// Remote reported the user as unauthenticated; all cached state for the
    /// user was dropped.
    Deauthenticated { user_id: String },
    /// A stale session was detected and the host was asked to refresh it.
    SessionRefreshRequested { user_id: String },
}

impl AuthEvent {
    fn description(&self) -> &str {
        match self {
            AuthEvent::Deauthenticated { .. } => "User deauthenticated",
            AuthEvent::SessionRefreshRequested { .. } => "Session refresh requested",
        }
    }
}

// ============================================================================
// Sync Events
// ============================================================================

/// Events emitted by the sync queue manager.
///
/// `action` is one of `update-all`, `update`, `delete`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    IntentQueued {
        user_id: String,
        action: String,
        queue_len: usize,
    },
    /// Intent refused at enqueue (malformed, or `update-all` during backoff).
    IntentRejected {
        user_id: Option<String>,
        action: Option<String>,
        reason: String,
    },
    Started {
        user_id: String,
        action: String,
    },
    Completed {
        user_id: String,
        action: String,
        /// Mutations sent to the remote while handling the intent.
        mutations: u64,
        duration_ms: u64,
    },
    Failed {
        user_id: String,
        action: String,
        message: String,
        /// False when retrying the same intent cannot succeed.
        recoverable: bool,
    },
    BackoffEntered {
        /// Unix epoch milliseconds.
        until: i64,
    },
    BackoffCleared,
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::IntentQueued { .. } => "Sync intent queued",
            SyncEvent::IntentRejected { .. } => "Sync intent rejected",
            SyncEvent::Started { .. } => "Sync started",
            SyncEvent::Completed { .. } => "Sync completed successfully",
            SyncEvent::Failed { .. } => "Sync failed",
            SyncEvent::BackoffEntered { .. } => "Sync backoff entered",
            SyncEvent::BackoffCleared => "Sync backoff cleared",
        }
    }
}

// ============================================================================
// Library Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum LibraryEvent {
    /// Track cache refreshed from the remote delta feed.
    TracksChanged {
        user_id: String,
        upserted: u64,
        deleted: u64,
    },
    /// One smart playlist reconciled against its remote copy.
    PlaylistSynced {
        user_id: String,
        local_id: String,
        remote_id: String,
        deletes: u64,
        appends: u64,
        reorders: u64,
        mixed_reorders: u64,
    },
    /// Rules referencing deleted playlists were rewritten.
    ReferencesPruned {
        user_id: String,
        playlist_ids: Vec<String>,
    },
}

impl LibraryEvent {
    fn description(&self) -> &str {
        match self {
            LibraryEvent::TracksChanged { .. } => "Track cache updated",
            LibraryEvent::PlaylistSynced { .. } => "Playlist synced",
            LibraryEvent::ReferencesPruned { .. } => "Playlist references pruned",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel. Cheap to clone; clones share the channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event, returning how many subscribers received it.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// New independent receiver. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional predicate.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(16);
/// let sync_only = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Sync(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv); `None` when nothing is pending.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
