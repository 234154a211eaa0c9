//! # Sync Queue Manager
//!
//! Serializes sync intents through a FIFO drained by a single worker task.
//!
//! ## States
//!
//! ```text
//!           enqueue               queue empty
//!   Idle ───────────▶ Syncing ───────────────▶ Idle
//!     │                  │
//!     │   5xx failure    │
//!     └──────▶ Backoff ◀─┘
//!                │
//!                └── window elapsed (checked on next enqueue/dequeue) ──▶ Idle
//! ```
//!
//! While in backoff `update-all` intents are refused, both at enqueue and
//! at dequeue. Targeted `update`/`delete` intents are still processed.
//! Only one intent is in flight at a time; concurrent `enqueue` calls just
//! append to the queue. Each intent runs on its own task, so a panic while
//! executing one is reported as a failure and the worker moves on.

use crate::coordinator::SyncCoordinator;
use crate::error::{ErrorClass, Result, SyncError};
use crate::intent::{Intent, SyncAction, SyncIntent};
use bridge_traits::{Clock, ErrorReport, ErrorReporter};
use chrono::{DateTime, Utc};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinError;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    Syncing,
    Backoff,
}

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<Intent>,
    syncing: bool,
    backoff_since: Option<DateTime<Utc>>,
}

struct Inner {
    coordinator: SyncCoordinator,
    state: Mutex<QueueState>,
    clock: Arc<dyn Clock>,
    backoff_window: Duration,
    reporter: Arc<dyn ErrorReporter>,
    event_bus: EventBus,
    idle: watch::Sender<bool>,
}

/// Handle to the sync queue. Clones share the queue.
#[derive(Clone)]
pub struct SyncManager {
    inner: Arc<Inner>,
}

impl SyncManager {
    pub fn new(coordinator: SyncCoordinator, config: &CoreConfig, event_bus: EventBus) -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            inner: Arc::new(Inner {
                coordinator,
                state: Mutex::new(QueueState::default()),
                clock: config.clock.clone(),
                backoff_window: config.backoff_window,
                reporter: config.error_reporter.clone(),
                event_bus,
                idle,
            }),
        }
    }

    /// Validate and queue `intent`, starting the worker if it is idle.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidIntent`] when a required field is missing
    /// - [`SyncError::Rejected`] for `update-all` during backoff
    #[instrument(skip(self, intent), fields(action = ?intent.action, user_id = ?intent.user_id))]
    pub async fn enqueue(&self, intent: SyncIntent) -> Result<()> {
        let inner = &self.inner;
        let raw_user = intent.user_id.clone();
        let raw_action = intent.action;

        let intent = match intent.validate() {
            Ok(intent) => intent,
            Err(err) => {
                warn!(error = %err, "Rejected malformed sync intent");
                inner.emit(SyncEvent::IntentRejected {
                    user_id: raw_user,
                    action: raw_action.map(|a| a.as_str().to_string()),
                    reason: err.to_string(),
                });
                return Err(err);
            }
        };

        let mut state = inner.state.lock().await;
        inner.clear_expired_backoff(&mut state);

        if intent.action() == SyncAction::UpdateAll && state.backoff_since.is_some() {
            let reason = "remote is failing, full sync suspended during backoff".to_string();
            info!("Refusing update-all during backoff");
            inner.emit(SyncEvent::IntentRejected {
                user_id: Some(intent.user_id().to_string()),
                action: Some(intent.action().as_str().to_string()),
                reason: reason.clone(),
            });
            return Err(SyncError::Rejected(reason));
        }

        inner.emit(SyncEvent::IntentQueued {
            user_id: intent.user_id().to_string(),
            action: intent.action().as_str().to_string(),
            queue_len: state.queue.len() + 1,
        });
        state.queue.push_back(intent);
        debug!(queue_len = state.queue.len(), "Sync intent queued");

        if !state.syncing {
            state.syncing = true;
            inner.idle.send_replace(false);
            tokio::spawn(Arc::clone(inner).drain());
        }
        Ok(())
    }

    pub async fn state(&self) -> SyncState {
        let mut state = self.inner.state.lock().await;
        self.inner.clear_expired_backoff(&mut state);
        if state.backoff_since.is_some() {
            SyncState::Backoff
        } else if state.syncing {
            SyncState::Syncing
        } else {
            SyncState::Idle
        }
    }

    /// Intents waiting behind the one in flight.
    pub async fn queued_len(&self) -> usize {
        self.inner.state.lock().await.queue.len()
    }

    /// End of the current backoff window, if any.
    pub async fn backoff_until(&self) -> Option<DateTime<Utc>> {
        let mut state = self.inner.state.lock().await;
        self.inner.clear_expired_backoff(&mut state);
        let since = state.backoff_since?;
        chrono::Duration::from_std(self.inner.backoff_window)
            .ok()
            .map(|window| since + window)
    }

    /// Resolves once the queue is drained and no intent is in flight.
    pub async fn wait_idle(&self) {
        let mut idle = self.inner.idle.subscribe();
        // The sender lives as long as `self`.
        let _ = idle.wait_for(|idle| *idle).await;
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.inner.coordinator
    }
}

impl Inner {
    async fn drain(self: Arc<Self>) {
        loop {
            let intent = {
                let mut state = self.state.lock().await;
                self.clear_expired_backoff(&mut state);
                let Some(intent) = state.queue.pop_front() else {
                    state.syncing = false;
                    self.idle.send_replace(true);
                    debug!("Sync queue drained");
                    return;
                };

                if intent.action() == SyncAction::UpdateAll && state.backoff_since.is_some() {
                    info!(user_id = intent.user_id(), "Dropping queued update-all during backoff");
                    self.emit(SyncEvent::IntentRejected {
                        user_id: Some(intent.user_id().to_string()),
                        action: Some(intent.action().as_str().to_string()),
                        reason: "backoff entered while queued".to_string(),
                    });
                    continue;
                }
                intent
            };

            // A panicking intent must not leave the queue marked as syncing.
            let worker = Arc::clone(&self);
            let job = intent.clone();
            if let Err(err) = tokio::spawn(async move { worker.run(&job).await }).await {
                self.handle_crash(&intent, err);
            }
            tokio::task::yield_now().await;
        }
    }

    fn handle_crash(&self, intent: &Intent, err: JoinError) {
        let message = if err.is_panic() {
            "sync worker panicked".to_string()
        } else {
            format!("sync worker stopped: {err}")
        };
        error!(
            user_id = intent.user_id(),
            action = %intent.action(),
            reason = %message,
            "Sync intent crashed"
        );
        self.reporter.report_error(
            ErrorReport::new("sync", message.clone())
                .with_user(intent.user_id())
                .with_field("action", intent.action().as_str())
                .with_field("class", "crash"),
        );
        self.emit(SyncEvent::Failed {
            user_id: intent.user_id().to_string(),
            action: intent.action().as_str().to_string(),
            message,
            recoverable: true,
        });
    }

    async fn run(&self, intent: &Intent) {
        let user_id = intent.user_id().to_string();
        let action = intent.action().as_str().to_string();
        self.emit(SyncEvent::Started {
            user_id: user_id.clone(),
            action: action.clone(),
        });

        let started = Instant::now();
        match self.coordinator.execute(intent).await {
            Ok(outcome) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                info!(
                    user_id = %user_id,
                    action = %action,
                    mutations = outcome.mutations,
                    duration_ms,
                    "Sync intent completed"
                );
                self.reporter
                    .record_metric("sync.mutations", outcome.mutations as f64);
                self.emit(SyncEvent::Completed {
                    user_id,
                    action,
                    mutations: outcome.mutations as u64,
                    duration_ms,
                });
            }
            Err(err) => self.handle_failure(intent, err).await,
        }
    }

    async fn handle_failure(&self, intent: &Intent, err: SyncError) {
        let class = err.classify();
        let user_id = intent.user_id();
        error!(
            user_id,
            action = %intent.action(),
            class = class.as_str(),
            error = %err,
            "Sync intent failed"
        );

        let mut report = ErrorReport::new("sync", err.to_string())
            .with_user(user_id)
            .with_field("action", intent.action().as_str())
            .with_field("class", class.as_str());
        if let Some(local_id) = intent.local_id() {
            report = report.with_field("local_id", local_id);
        }
        self.reporter.report_error(report);

        self.emit(SyncEvent::Failed {
            user_id: user_id.to_string(),
            action: intent.action().as_str().to_string(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
        });

        let follow_up = match class {
            ErrorClass::ServerFailure => {
                self.enter_backoff().await;
                Ok(())
            }
            ErrorClass::Unauthorized => self.coordinator.deauthenticate(user_id).await,
            ErrorClass::StaleSession => self.coordinator.request_session_refresh(user_id).await,
            ErrorClass::Transient => {
                debug!("Leaving retry to the next trigger");
                Ok(())
            }
            ErrorClass::Invalid => {
                warn!(error = %err, "Dropping unprocessable intent");
                Ok(())
            }
        };
        if let Err(follow_up) = follow_up {
            warn!(error = %follow_up, "Failure handling did not complete");
        }
    }

    async fn enter_backoff(&self) {
        let now = self.clock.now();
        self.state.lock().await.backoff_since = Some(now);
        let until = chrono::Duration::from_std(self.backoff_window)
            .map(|window| now + window)
            .unwrap_or(now);
        warn!(until = %until, "Remote server failure, entering backoff");
        self.emit(SyncEvent::BackoffEntered {
            until: until.timestamp_millis(),
        });
    }

    fn clear_expired_backoff(&self, state: &mut QueueState) {
        let Some(since) = state.backoff_since else {
            return;
        };
        let elapsed = (self.clock.now() - since).to_std().unwrap_or_default();
        if elapsed >= self.backoff_window {
            state.backoff_since = None;
            info!("Backoff window elapsed");
            self.emit(SyncEvent::BackoffCleared);
        }
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.event_bus.emit(CoreEvent::Sync(event));
    }
}
