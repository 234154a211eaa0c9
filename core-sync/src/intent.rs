//! Sync intents
//!
//! Triggers produce loosely typed [`SyncIntent`]s. The manager validates
//! them into [`Intent`] before queueing, so a malformed request never
//! reaches the worker.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncAction {
    UpdateAll,
    Update,
    Delete,
}

impl SyncAction {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncAction::UpdateAll => "update-all",
            SyncAction::Update => "update",
            SyncAction::Delete => "delete",
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sync request as handed over by a trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncIntent {
    pub action: Option<SyncAction>,
    pub user_id: Option<String>,
    pub local_id: Option<String>,
    pub remote_id: Option<String>,
}

impl SyncIntent {
    pub fn update_all(user_id: impl Into<String>) -> Self {
        Self {
            action: Some(SyncAction::UpdateAll),
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    pub fn update(user_id: impl Into<String>, local_id: impl Into<String>) -> Self {
        Self {
            action: Some(SyncAction::Update),
            user_id: Some(user_id.into()),
            local_id: Some(local_id.into()),
            remote_id: None,
        }
    }

    /// `remote_id` is `None` when the playlist never reached the remote.
    pub fn delete(
        user_id: impl Into<String>,
        local_id: impl Into<String>,
        remote_id: Option<String>,
    ) -> Self {
        Self {
            action: Some(SyncAction::Delete),
            user_id: Some(user_id.into()),
            local_id: Some(local_id.into()),
            remote_id,
        }
    }

    /// Check required fields.
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidIntent`] naming the first missing field.
    pub fn validate(self) -> Result<Intent> {
        let action = self.action.ok_or_else(|| missing("action"))?;
        let user_id = non_empty(self.user_id).ok_or_else(|| missing("userId"))?;

        match action {
            SyncAction::UpdateAll => Ok(Intent::UpdateAll { user_id }),
            SyncAction::Update => Ok(Intent::Update {
                user_id,
                local_id: non_empty(self.local_id).ok_or_else(|| missing("localId"))?,
            }),
            SyncAction::Delete => Ok(Intent::Delete {
                user_id,
                local_id: non_empty(self.local_id).ok_or_else(|| missing("localId"))?,
                remote_id: non_empty(self.remote_id),
            }),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn missing(field: &str) -> SyncError {
    SyncError::InvalidIntent(format!("{field} is required"))
}

/// Validated intent, ready for the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Reconcile every playlist of the user
    UpdateAll { user_id: String },
    /// Create or reconcile one playlist
    Update { user_id: String, local_id: String },
    /// Delete the remote copy and prune references to it
    Delete {
        user_id: String,
        local_id: String,
        remote_id: Option<String>,
    },
}

impl Intent {
    pub fn user_id(&self) -> &str {
        match self {
            Intent::UpdateAll { user_id }
            | Intent::Update { user_id, .. }
            | Intent::Delete { user_id, .. } => user_id,
        }
    }

    pub fn action(&self) -> SyncAction {
        match self {
            Intent::UpdateAll { .. } => SyncAction::UpdateAll,
            Intent::Update { .. } => SyncAction::Update,
            Intent::Delete { .. } => SyncAction::Delete,
        }
    }

    pub fn local_id(&self) -> Option<&str> {
        match self {
            Intent::UpdateAll { .. } => None,
            Intent::Update { local_id, .. } | Intent::Delete { local_id, .. } => Some(local_id),
        }
    }
}
