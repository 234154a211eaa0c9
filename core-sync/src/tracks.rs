//! Track cache refresh from the remote delta feed.

use crate::error::{Result, SyncError};
use crate::remote::{RemoteAuth, TrackChanges, TrackChangesApi};
use core_library::repositories::TrackStore;
use tracing::{debug, info, instrument, warn};

/// What a refresh changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackRefresh {
    pub upserted: usize,
    pub deleted: usize,
    /// The cache was (re)built from timestamp 0
    pub initialized: bool,
}

impl TrackRefresh {
    pub fn is_empty(&self) -> bool {
        self.upserted == 0 && self.deleted == 0
    }
}

/// Apply the changes since the last stored timestamp.
///
/// A user without a timestamp is initialized from 0. When the remote asks
/// for a reload the user's tracks are dropped and fetched again, once.
///
/// # Errors
///
/// [`SyncError::Unauthorized`] when the remote rejects the credentials.
#[instrument(skip(api, store, auth), fields(user_id = %auth.user_id))]
pub async fn refresh_tracks(
    api: &dyn TrackChangesApi,
    store: &dyn TrackStore,
    auth: &RemoteAuth,
) -> Result<TrackRefresh> {
    let user_id = auth.user_id.as_str();
    let mut refresh = TrackRefresh::default();
    let mut since = match store.last_sync_timestamp(user_id).await? {
        Some(timestamp) => timestamp,
        None => {
            info!("Track cache missing, initializing");
            refresh.initialized = true;
            0
        }
    };
    let mut reloaded = false;

    loop {
        match api.get_track_changes(auth, since).await? {
            TrackChanges::Success {
                new_timestamp,
                upserted,
                deleted_ids,
            } => {
                refresh.upserted += store.upsert_tracks(user_id, upserted).await?;
                refresh.deleted += store.delete_tracks(user_id, &deleted_ids).await?;
                store
                    .set_last_sync_timestamp(user_id, new_timestamp.unwrap_or(since))
                    .await?;
                debug!(
                    upserted = refresh.upserted,
                    deleted = refresh.deleted,
                    "Track changes applied"
                );
                return Ok(refresh);
            }
            TrackChanges::Unauthed => {
                return Err(SyncError::Unauthorized(format!(
                    "track feed rejected credentials of user {user_id}"
                )));
            }
            TrackChanges::ReloadRequired if !reloaded => {
                warn!("Remote requested a full track reload");
                store.clear(user_id).await?;
                refresh.initialized = true;
                since = 0;
                reloaded = true;
            }
            TrackChanges::ReloadRequired => {
                return Err(SyncError::MalformedResponse(
                    "track feed requested a reload twice".to_string(),
                ));
            }
        }
    }
}
