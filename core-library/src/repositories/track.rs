//! Track store trait and in-memory implementation

use crate::error::Result;
use crate::models::{Playlist, SortSpec, Track};
use crate::query::{order_tracks, query};
use crate::rules::EvalContext;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Per-user cache of library tracks
///
/// Filled from the remote delta feed. Every operation is scoped to one user.
#[async_trait]
pub trait TrackStore: Send + Sync {
    /// Insert or wholesale replace tracks by id
    async fn upsert_tracks(&self, user_id: &str, tracks: Vec<Track>) -> Result<usize>;

    /// Remove tracks by id
    ///
    /// # Returns
    /// Number of tracks actually removed
    async fn delete_tracks(&self, user_id: &str, ids: &[String]) -> Result<usize>;

    /// Drop every track and the sync timestamp of a user
    async fn clear(&self, user_id: &str) -> Result<()>;

    /// Timestamp (microseconds) of the last applied delta, `None` if never initialized
    async fn last_sync_timestamp(&self, user_id: &str) -> Result<Option<i64>>;

    async fn set_last_sync_timestamp(&self, user_id: &str, timestamp: i64) -> Result<()>;

    /// Desired track ids of `playlist`, see [`crate::query::query`]
    async fn query(
        &self,
        playlist: &Playlist,
        ctx: &EvalContext<'_>,
        max_entries: usize,
    ) -> Result<Vec<String>>;

    /// `ids` reordered by `sorts`; ids without a cached track are dropped
    async fn order(&self, user_id: &str, ids: &[String], sorts: &[SortSpec]) -> Result<Vec<String>>;

    async fn count(&self, user_id: &str) -> Result<usize>;
}

#[derive(Debug, Default)]
struct UserTracks {
    tracks: HashMap<String, Track>,
    last_sync: Option<i64>,
}

/// In-memory `TrackStore`
#[derive(Debug, Default)]
pub struct MemoryTrackStore {
    users: RwLock<HashMap<String, UserTracks>>,
}

impl MemoryTrackStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrackStore for MemoryTrackStore {
    async fn upsert_tracks(&self, user_id: &str, tracks: Vec<Track>) -> Result<usize> {
        let mut users = self.users.write().await;
        let entry = users.entry(user_id.to_string()).or_default();
        let count = tracks.len();
        for track in tracks {
            entry.tracks.insert(track.id.clone(), track);
        }
        debug!(user_id, count, "Upserted tracks");
        Ok(count)
    }

    async fn delete_tracks(&self, user_id: &str, ids: &[String]) -> Result<usize> {
        let mut users = self.users.write().await;
        let Some(entry) = users.get_mut(user_id) else {
            return Ok(0);
        };
        let removed = ids
            .iter()
            .filter(|id| entry.tracks.remove(id.as_str()).is_some())
            .count();
        debug!(user_id, removed, "Deleted tracks");
        Ok(removed)
    }

    async fn clear(&self, user_id: &str) -> Result<()> {
        self.users.write().await.remove(user_id);
        Ok(())
    }

    async fn last_sync_timestamp(&self, user_id: &str) -> Result<Option<i64>> {
        Ok(self
            .users
            .read()
            .await
            .get(user_id)
            .and_then(|entry| entry.last_sync))
    }

    async fn set_last_sync_timestamp(&self, user_id: &str, timestamp: i64) -> Result<()> {
        let mut users = self.users.write().await;
        users.entry(user_id.to_string()).or_default().last_sync = Some(timestamp);
        Ok(())
    }

    async fn query(
        &self,
        playlist: &Playlist,
        ctx: &EvalContext<'_>,
        max_entries: usize,
    ) -> Result<Vec<String>> {
        let users = self.users.read().await;
        let Some(entry) = users.get(&playlist.user_id) else {
            return Ok(Vec::new());
        };
        let selected = query(entry.tracks.values(), playlist, ctx, max_entries)?;
        Ok(selected.into_iter().map(|track| track.id.clone()).collect())
    }

    async fn order(&self, user_id: &str, ids: &[String], sorts: &[SortSpec]) -> Result<Vec<String>> {
        let users = self.users.read().await;
        let Some(entry) = users.get(user_id) else {
            return Ok(Vec::new());
        };
        let known = ids.iter().filter_map(|id| entry.tracks.get(id));
        Ok(order_tracks(known, sorts)
            .into_iter()
            .map(|track| track.id.clone())
            .collect())
    }

    async fn count(&self, user_id: &str) -> Result<usize> {
        Ok(self
            .users
            .read()
            .await
            .get(user_id)
            .map_or(0, |entry| entry.tracks.len()))
    }
}
