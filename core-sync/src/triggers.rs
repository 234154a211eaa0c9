//! Storage change trigger
//!
//! Turns committed playlist changes into sync intents:
//! - `Added` becomes `update`
//! - `Updated` becomes `update` when title, rules, sorts or limit changed;
//!   filling in the remote id alone is not a change
//! - `Deleted` becomes `delete` carrying the old remote id

use crate::intent::SyncIntent;
use crate::manager::SyncManager;
use core_library::repositories::PlaylistChange;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub fn intent_for_change(change: &PlaylistChange) -> Option<SyncIntent> {
    match change {
        PlaylistChange::Added(playlist) => {
            Some(SyncIntent::update(&playlist.user_id, &playlist.local_id))
        }
        PlaylistChange::Updated { old, new } if old.sync_relevant_change(new) => {
            Some(SyncIntent::update(&new.user_id, &new.local_id))
        }
        PlaylistChange::Updated { .. } => None,
        PlaylistChange::Deleted(playlist) => Some(SyncIntent::delete(
            &playlist.user_id,
            &playlist.local_id,
            playlist.remote_id.clone(),
        )),
    }
}

/// Forward `changes` to `manager` until the channel closes.
pub fn spawn_change_listener(
    mut changes: broadcast::Receiver<PlaylistChange>,
    manager: SyncManager,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) => {
                    let Some(intent) = intent_for_change(&change) else {
                        continue;
                    };
                    if let Err(err) = manager.enqueue(intent).await {
                        debug!(error = %err, "Change did not produce a queued sync");
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    // Affected users are unknown; their next update-all covers it.
                    warn!(missed, "Playlist change listener lagged");
                }
                Err(RecvError::Closed) => {
                    info!("Playlist change stream closed");
                    break;
                }
            }
        }
    })
}
