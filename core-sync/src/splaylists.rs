//! # Remote Playlist Cache
//!
//! Last known snapshot of every remote playlist of a user, keyed by remote
//! id. A sync lists the remote playlists, re-fetches entries only for
//! playlists that are new or whose `last_modified` advanced, and drops
//! snapshots that disappeared. The dropped ids are reported so rules
//! referencing them can be pruned through
//! [`PlaylistStore::prune_references`](core_library::repositories::PlaylistStore::prune_references).

use crate::error::Result;
use crate::remote::{order_entries, RemoteAuth, RemoteEntry, RemotePlaylist, RemotePlaylistApi};
use core_library::PlaylistRef;
use std::collections::{HashMap, HashSet};
use tracing::{debug, instrument};

/// Cached remote playlist with its entries in list order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Splaylist {
    pub id: String,
    pub title: String,
    pub description: String,
    pub last_modified: i64,
    pub entries: Vec<RemoteEntry>,
}

impl Splaylist {
    pub fn track_ids(&self) -> HashSet<String> {
        self.entries.iter().map(|e| e.track_id.clone()).collect()
    }
}

/// Outcome of [`SplaylistCache::sync`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplaylistSyncReport {
    /// Ids whose entries were (re)fetched
    pub refreshed: Vec<String>,
    /// Ids no longer present remotely
    pub deleted: Vec<String>,
}

#[derive(Debug, Default)]
pub struct SplaylistCache {
    playlists: HashMap<String, Splaylist>,
}

impl SplaylistCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Splaylist> {
        self.playlists.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.playlists.contains_key(id)
    }

    /// Cached entries of `id`, empty when unknown.
    pub fn entries(&self, id: &str) -> &[RemoteEntry] {
        self.playlists
            .get(id)
            .map_or(&[][..], |playlist| playlist.entries.as_slice())
    }

    pub fn len(&self) -> usize {
        self.playlists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.playlists.is_empty()
    }

    pub fn insert(&mut self, playlist: Splaylist) {
        self.playlists.insert(playlist.id.clone(), playlist);
    }

    /// Replace the cached entries of `id` after a successful mutation.
    ///
    /// `last_modified` is left alone so the next sync re-fetches the
    /// authoritative list.
    pub fn set_entries(&mut self, id: &str, entries: Vec<RemoteEntry>) {
        if let Some(playlist) = self.playlists.get_mut(id) {
            playlist.entries = entries;
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Splaylist> {
        self.playlists.remove(id)
    }

    /// Track ids of every cached playlist, keyed as remote references.
    pub fn memberships(&self) -> HashMap<PlaylistRef, HashSet<String>> {
        self.playlists
            .values()
            .map(|p| (PlaylistRef::Remote(p.id.clone()), p.track_ids()))
            .collect()
    }

    /// Bring the cache in line with the remote listing.
    #[instrument(skip(self, api, auth), fields(user_id = %auth.user_id))]
    pub async fn sync(
        &mut self,
        api: &dyn RemotePlaylistApi,
        auth: &RemoteAuth,
    ) -> Result<SplaylistSyncReport> {
        let listing = api.list_playlists(auth).await?;
        let mut report = SplaylistSyncReport::default();

        let live: HashSet<&str> = listing.iter().map(|p| p.id.as_str()).collect();
        let mut gone: Vec<String> = self
            .playlists
            .keys()
            .filter(|id| !live.contains(id.as_str()))
            .cloned()
            .collect();
        gone.sort();
        for id in &gone {
            self.playlists.remove(id);
        }
        report.deleted = gone;

        for remote in listing {
            let stale = self
                .playlists
                .get(&remote.id)
                .map_or(true, |cached| remote.last_modified > cached.last_modified);

            if stale {
                let entries = order_entries(api.list_entries(auth, &remote.id).await?);
                report.refreshed.push(remote.id.clone());
                self.insert(snapshot(remote, entries));
            } else if let Some(cached) = self.playlists.get_mut(&remote.id) {
                cached.title = remote.title;
                cached.description = remote.description;
            }
        }

        debug!(
            cached = self.playlists.len(),
            refreshed = report.refreshed.len(),
            deleted = report.deleted.len(),
            "Remote playlist cache synced"
        );
        Ok(report)
    }
}

fn snapshot(remote: RemotePlaylist, entries: Vec<RemoteEntry>) -> Splaylist {
    Splaylist {
        id: remote.id,
        title: remote.title,
        description: remote.description,
        last_modified: remote.last_modified,
        entries,
    }
}
