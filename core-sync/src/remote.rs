//! # Remote Service Contracts
//!
//! The remote playlist service only understands batched mutations shaped as
//! `{"create": {...}}`, `{"update": {...}}` or `{"delete": ...}`. Entries of a
//! remote playlist form a doubly linked list through
//! `precedingEntryId`/`followingEntryId`; [`order_entries`] rebuilds the
//! list order from those links.
//!
//! Transport, paging and authentication headers are the host's business.

use async_trait::async_trait;
use bridge_traits::error::Result;
use core_library::Track;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::warn;

/// Credentials for one remote call.
#[derive(Clone)]
pub struct RemoteAuth {
    pub user_id: String,
    pub token: String,
}

impl RemoteAuth {
    pub fn new(user_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token: token.into(),
        }
    }
}

impl fmt::Debug for RemoteAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteAuth")
            .field("user_id", &self.user_id)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Listing row of a remote playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePlaylist {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Microseconds; advances on every change to the playlist or its entries
    pub last_modified: i64,
}

/// One slot of a remote playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntry {
    pub id: String,
    pub track_id: String,
    #[serde(default)]
    pub preceding_entry_id: Option<String>,
    #[serde(default)]
    pub following_entry_id: Option<String>,
}

impl RemoteEntry {
    pub fn new(id: impl Into<String>, track_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            track_id: track_id.into(),
            preceding_entry_id: None,
            following_entry_id: None,
        }
    }
}

/// Playlist metadata sent on create and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistFields {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaylistMutation {
    Create(PlaylistFields),
    Update {
        id: String,
        #[serde(flatten)]
        fields: PlaylistFields,
    },
    Delete(String),
}

/// Position of an entry expressed through its neighbours.
///
/// Neighbour ids are either remote entry ids or client ids of entries
/// created earlier in the same batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPlacement {
    pub playlist_id: String,
    pub track_id: String,
    pub preceding_entry_id: Option<String>,
    pub following_entry_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryMutation {
    /// Append a new entry. `client_id` lets later mutations in the batch
    /// refer to it before the remote assigns an id.
    Create {
        #[serde(rename = "clientId")]
        client_id: String,
        #[serde(flatten)]
        placement: EntryPlacement,
    },
    /// Move an existing entry
    Update {
        id: String,
        #[serde(flatten)]
        placement: EntryPlacement,
    },
    Delete(String),
}

impl EntryMutation {
    pub fn placement(&self) -> Option<&EntryPlacement> {
        match self {
            EntryMutation::Create { placement, .. } | EntryMutation::Update { placement, .. } => {
                Some(placement)
            }
            EntryMutation::Delete(_) => None,
        }
    }
}

/// Per-mutation answer, in request order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationResponse {
    /// Id of the created or touched object
    pub id: String,
    #[serde(default)]
    pub client_id: Option<String>,
}

#[async_trait]
pub trait RemotePlaylistApi: Send + Sync {
    /// Every playlist of the authenticated user
    async fn list_playlists(&self, auth: &RemoteAuth) -> Result<Vec<RemotePlaylist>>;

    /// Entries of one playlist, in any order
    async fn list_entries(&self, auth: &RemoteAuth, playlist_id: &str) -> Result<Vec<RemoteEntry>>;

    async fn mutate_playlists(
        &self,
        auth: &RemoteAuth,
        mutations: Vec<PlaylistMutation>,
    ) -> Result<Vec<MutationResponse>>;

    /// Applied atomically per call
    async fn mutate_entries(
        &self,
        auth: &RemoteAuth,
        mutations: Vec<EntryMutation>,
    ) -> Result<Vec<MutationResponse>>;
}

/// Answer of the track delta feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum TrackChanges {
    #[serde(rename_all = "camelCase")]
    Success {
        /// Microseconds; `None` keeps the previous timestamp
        new_timestamp: Option<i64>,
        upserted: Vec<Track>,
        deleted_ids: Vec<String>,
    },
    /// The remote no longer accepts the user's credentials
    Unauthed,
    /// The delta window expired; the cache must be rebuilt from scratch
    ReloadRequired,
}

#[async_trait]
pub trait TrackChangesApi: Send + Sync {
    /// Library changes since `since` (microseconds, 0 for everything)
    async fn get_track_changes(&self, auth: &RemoteAuth, since: i64) -> Result<TrackChanges>;
}

/// Rebuild list order from the neighbour links.
///
/// Entries that cannot be reached from the head are appended in listing
/// order.
pub fn order_entries(entries: Vec<RemoteEntry>) -> Vec<RemoteEntry> {
    let ids: HashSet<&str> = entries.iter().map(|e| e.id.as_str()).collect();
    let head = entries.iter().position(|entry| {
        entry
            .preceding_entry_id
            .as_deref()
            .map_or(true, |prev| !ids.contains(prev))
    });

    let index: HashMap<&str, usize> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| (e.id.as_str(), i))
        .collect();

    let mut order = Vec::with_capacity(entries.len());
    let mut visited = vec![false; entries.len()];
    let mut cursor = head;
    while let Some(i) = cursor {
        if visited[i] {
            break;
        }
        visited[i] = true;
        order.push(i);
        cursor = entries[i]
            .following_entry_id
            .as_deref()
            .and_then(|next| index.get(next).copied());
    }

    let unreachable = visited.iter().filter(|v| !**v).count();
    if unreachable > 0 {
        warn!(unreachable, "Remote entry links are broken, appending unlinked entries");
        order.extend((0..entries.len()).filter(|&i| !visited[i]));
    }

    let mut slots: Vec<Option<RemoteEntry>> = entries.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i| slots[i].take()).collect()
}
