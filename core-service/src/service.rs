//! # Service lifecycle
//!
//! ```text
//!   new() ──▶ Created ──start()──▶ Running ──shutdown()──▶ ShutDown
//! ```
//!
//! While running the service owns three kinds of background work:
//! - the change listener turning playlist store notifications into intents
//! - one periodic `update-all` timer per registered user
//! - the sync worker spawned by the [`SyncManager`] on demand
//!
//! Playlist CRUD only persists; syncing follows from the change stream.

use crate::error::{CoreError, Result};
use crate::CoreDependencies;
use chrono::{DateTime, Utc};
use core_library::db::{create_pool, DatabaseConfig};
use core_library::repositories::{PlaylistStore, SqlitePlaylistStore};
use core_library::{LibraryError, Playlist, Rule, SortSpec};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus};
use core_sync::{
    spawn_change_listener, SyncCoordinator, SyncDependencies, SyncIntent, SyncManager, SyncState,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

/// User-editable part of a playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistDraft {
    pub title: String,
    pub rules: Rule,
    #[serde(default)]
    pub sorts: Vec<SortSpec>,
    pub limit: Option<u32>,
}

impl PlaylistDraft {
    pub fn new(title: impl Into<String>, rules: Rule) -> Self {
        Self {
            title: title.into(),
            rules,
            sorts: Vec::new(),
            limit: None,
        }
    }

    pub fn with_sorts(mut self, sorts: Vec<SortSpec>) -> Self {
        self.sorts = sorts;
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Snapshot for host status displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub running: bool,
    pub sync_state: SyncState,
    pub queued: usize,
    pub backoff_until: Option<DateTime<Utc>>,
    pub registered_users: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    ShutDown,
}

struct PollTimer {
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

struct Tasks {
    lifecycle: Lifecycle,
    listener: Option<JoinHandle<()>>,
    /// Registered users; `None` when periodic polling is disabled
    users: HashMap<String, Option<PollTimer>>,
}

struct ServiceInner {
    config: CoreConfig,
    playlists: Arc<dyn PlaylistStore>,
    manager: SyncManager,
    event_bus: EventBus,
    last_local_id: AtomicI64,
    tasks: Mutex<Tasks>,
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct SmartPlaylistService {
    inner: Arc<ServiceInner>,
}

impl SmartPlaylistService {
    /// Open the playlist database and assemble the engine.
    ///
    /// Nothing runs in the background until [`start`](Self::start).
    pub async fn new(config: CoreConfig, deps: CoreDependencies) -> Result<Self> {
        config.validate()?;

        let pool = create_pool(DatabaseConfig::new(&config.database_path))
            .await
            .map_err(|e| CoreError::InitializationFailed(e.to_string()))?;
        let playlists: Arc<dyn PlaylistStore> = Arc::new(SqlitePlaylistStore::new(pool));
        let event_bus = EventBus::new(config.event_buffer_size);

        let coordinator = SyncCoordinator::new(
            SyncDependencies {
                remote: deps.remote,
                track_changes: deps.track_changes,
                tracks: deps.tracks,
                playlists: Arc::clone(&playlists),
            },
            &config,
            event_bus.clone(),
        );
        let manager = SyncManager::new(coordinator, &config, event_bus.clone());

        info!(
            database = %config.database_path.display(),
            poll_interval = ?config.poll_interval,
            "Smart playlist service created"
        );

        Ok(Self {
            inner: Arc::new(ServiceInner {
                config,
                playlists,
                manager,
                event_bus,
                last_local_id: AtomicI64::new(0),
                tasks: Mutex::new(Tasks {
                    lifecycle: Lifecycle::Created,
                    listener: None,
                    users: HashMap::new(),
                }),
            }),
        })
    }

    /// Start listening to playlist changes. Calling it again is a no-op.
    pub async fn start(&self) -> Result<()> {
        let mut tasks = self.inner.tasks.lock().await;
        match tasks.lifecycle {
            Lifecycle::Running => return Ok(()),
            Lifecycle::ShutDown => return Err(CoreError::ShutDown),
            Lifecycle::Created => {}
        }

        tasks.listener = Some(spawn_change_listener(
            self.inner.playlists.subscribe(),
            self.inner.manager.clone(),
        ));
        tasks.lifecycle = Lifecycle::Running;
        info!("Smart playlist service started");
        Ok(())
    }

    /// Begin periodic `update-all` syncs for `user_id`, starting with one
    /// right away.
    #[instrument(skip(self))]
    pub async fn register_user(&self, user_id: &str) -> Result<()> {
        require_user(user_id)?;
        let mut tasks = self.inner.tasks.lock().await;
        match tasks.lifecycle {
            Lifecycle::Running => {}
            Lifecycle::Created => return Err(CoreError::NotRunning),
            Lifecycle::ShutDown => return Err(CoreError::ShutDown),
        }
        if tasks.users.contains_key(user_id) {
            debug!("User already registered");
            return Ok(());
        }

        let timer = match self.inner.config.poll_interval {
            Some(period) => Some(spawn_poll_timer(
                self.inner.manager.clone(),
                user_id.to_string(),
                period,
            )),
            None => {
                self.inner
                    .manager
                    .enqueue(SyncIntent::update_all(user_id))
                    .await?;
                None
            }
        };
        tasks.users.insert(user_id.to_string(), timer);
        info!("User registered for sync");
        Ok(())
    }

    /// Persist a new playlist. Its remote copy is created by the sync that
    /// the store notification triggers.
    #[instrument(skip(self, draft), fields(title = %draft.title))]
    pub async fn create_playlist(&self, user_id: &str, draft: PlaylistDraft) -> Result<Playlist> {
        self.ensure_open().await?;

        let playlist = Playlist {
            local_id: self.next_local_id(),
            remote_id: None,
            title: draft.title,
            rules: draft.rules,
            sorts: draft.sorts,
            limit: draft.limit,
            user_id: user_id.to_string(),
        };
        let stored = self.inner.playlists.save(&playlist).await?;
        info!(local_id = %stored.local_id, "Playlist created");
        Ok(stored)
    }

    /// Replace the editable fields of an existing playlist.
    #[instrument(skip(self, playlist), fields(user_id = %playlist.user_id, local_id = %playlist.local_id))]
    pub async fn update_playlist(&self, playlist: &Playlist) -> Result<Playlist> {
        self.ensure_open().await?;

        if self
            .inner
            .playlists
            .get(&playlist.user_id, &playlist.local_id)
            .await?
            .is_none()
        {
            return Err(CoreError::PlaylistNotFound {
                user_id: playlist.user_id.clone(),
                local_id: playlist.local_id.clone(),
            });
        }
        Ok(self.inner.playlists.save(playlist).await?)
    }

    /// Delete a playlist locally; the remote copy follows.
    #[instrument(skip(self))]
    pub async fn delete_playlist(&self, user_id: &str, local_id: &str) -> Result<Playlist> {
        self.ensure_open().await?;

        self.inner
            .playlists
            .delete(user_id, local_id)
            .await?
            .ok_or_else(|| CoreError::PlaylistNotFound {
                user_id: user_id.to_string(),
                local_id: local_id.to_string(),
            })
    }

    pub async fn list_playlists(&self, user_id: &str) -> Result<Vec<Playlist>> {
        Ok(self.inner.playlists.list(user_id).await?)
    }

    /// Queue an `update-all` for `user_id` now.
    ///
    /// # Errors
    ///
    /// Fails with a rejected intent while the engine is backing off after
    /// a remote server failure.
    pub async fn request_full_sync(&self, user_id: &str) -> Result<()> {
        self.ensure_open().await?;
        self.inner
            .manager
            .enqueue(SyncIntent::update_all(user_id))
            .await?;
        Ok(())
    }

    pub async fn status(&self) -> ServiceStatus {
        let (running, mut registered_users) = {
            let tasks = self.inner.tasks.lock().await;
            (
                tasks.lifecycle == Lifecycle::Running,
                tasks.users.keys().cloned().collect::<Vec<_>>(),
            )
        };
        registered_users.sort();

        let manager = &self.inner.manager;
        ServiceStatus {
            running,
            sync_state: manager.state().await,
            queued: manager.queued_len().await,
            backoff_until: manager.backoff_until().await,
            registered_users,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CoreEvent> {
        self.inner.event_bus.subscribe()
    }

    /// Resolves once no sync work is queued or in flight.
    pub async fn wait_idle(&self) {
        self.inner.manager.wait_idle().await;
    }

    /// Stop timers and the change listener, then let queued intents finish.
    pub async fn shutdown(&self) -> Result<()> {
        let (listener, users) = {
            let mut tasks = self.inner.tasks.lock().await;
            if tasks.lifecycle == Lifecycle::ShutDown {
                return Ok(());
            }
            tasks.lifecycle = Lifecycle::ShutDown;
            (tasks.listener.take(), std::mem::take(&mut tasks.users))
        };

        for (user_id, timer) in users {
            let Some(timer) = timer else { continue };
            let _ = timer.cancel.send(());
            if let Err(err) = timer.handle.await {
                warn!(user_id = %user_id, error = %err, "Periodic sync task ended abnormally");
            }
        }

        if let Some(listener) = listener {
            listener.abort();
            // Cancellation is the expected outcome here.
            let _ = listener.await;
        }

        self.inner.manager.wait_idle().await;
        info!("Smart playlist service shut down");
        Ok(())
    }

    async fn ensure_open(&self) -> Result<()> {
        if self.inner.tasks.lock().await.lifecycle == Lifecycle::ShutDown {
            return Err(CoreError::ShutDown);
        }
        Ok(())
    }

    /// Milliseconds since the epoch, bumped past the previous id on collision.
    fn next_local_id(&self) -> String {
        let now = self.inner.config.clock.now().timestamp_millis();
        let previous = self
            .inner
            .last_local_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(previous + 1).to_string()
    }
}

fn require_user(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(LibraryError::InvalidInput {
            field: "user_id".to_string(),
            message: "user id cannot be empty".to_string(),
        }
        .into());
    }
    Ok(())
}

fn spawn_poll_timer(manager: SyncManager, user_id: String, period: Duration) -> PollTimer {
    let (cancel, mut cancel_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = &mut cancel_rx => break,
                _ = ticker.tick() => {
                    if let Err(err) = manager.enqueue(SyncIntent::update_all(&user_id)).await {
                        debug!(user_id = %user_id, error = %err, "Periodic sync not queued");
                    }
                }
            }
        }
        debug!(user_id = %user_id, "Periodic sync stopped");
    });
    PollTimer { cancel, handle }
}
