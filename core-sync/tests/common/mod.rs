//! Shared fixtures: an in-memory remote service and a wired-up engine.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{
    BridgeError, Clock, ErrorReporter, ManualClock, NoopErrorReporter, StaticTokenProvider,
};
use chrono::{TimeZone, Utc};
use core_library::db::create_test_pool;
use core_library::repositories::{MemoryTrackStore, PlaylistStore, SqlitePlaylistStore};
use core_library::Track;
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use core_sync::{
    spawn_change_listener, EntryMutation, MutationResponse, PlaylistMutation, RemoteAuth,
    RemoteEntry, RemotePlaylist, RemotePlaylistApi, SyncCoordinator, SyncDependencies,
    SyncIntent, SyncManager, TrackChanges, TrackChangesApi,
};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

// ============================================================================
// Fake remote service
// ============================================================================

#[derive(Debug, Clone)]
struct FakePlaylist {
    title: String,
    description: String,
    last_modified: i64,
    /// (entry id, track id) in list order
    entries: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct FakeState {
    playlists: BTreeMap<String, FakePlaylist>,
    tracks: HashMap<String, (Track, i64)>,
    deleted_tracks: Vec<(String, i64)>,
    tick: i64,
    next_id: u64,
    failures: VecDeque<BridgeError>,
    unauthed: bool,
    panic_next: bool,
    entry_batches: Vec<Vec<EntryMutation>>,
    playlist_batches: Vec<Vec<PlaylistMutation>>,
}

impl FakeState {
    fn tick(&mut self) -> i64 {
        self.tick += 1;
        self.tick
    }

    fn fresh_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn take_failure(&mut self) -> BridgeResult<()> {
        match self.failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Remote playlist service and track feed held in memory.
///
/// Entry batches are applied one mutation at a time: a placed entry goes
/// right after its preceding neighbour, to the front without one, before
/// its following neighbour when the preceding id is unknown, else last.
#[derive(Debug, Default)]
pub struct FakeRemote {
    state: Mutex<FakeState>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn add_tracks(&self, tracks: Vec<Track>) {
        let mut state = self.state();
        for track in tracks {
            let at = state.tick();
            state.tracks.insert(track.id.clone(), (track, at));
        }
    }

    pub fn remove_track(&self, id: &str) {
        let mut state = self.state();
        let at = state.tick();
        state.tracks.remove(id);
        state.deleted_tracks.push((id.to_string(), at));
    }

    /// Remote playlist created outside the engine.
    pub fn seed_playlist(&self, title: &str, track_ids: &[&str]) -> String {
        let mut state = self.state();
        let id = state.fresh_id("pl");
        let mut entries = Vec::new();
        for track_id in track_ids {
            entries.push((state.fresh_id("entry"), track_id.to_string()));
        }
        let last_modified = state.tick();
        state.playlists.insert(
            id.clone(),
            FakePlaylist {
                title: title.to_string(),
                description: String::new(),
                last_modified,
                entries,
            },
        );
        id
    }

    pub fn delete_playlist(&self, id: &str) {
        self.state().playlists.remove(id);
    }

    pub fn has_playlist(&self, id: &str) -> bool {
        self.state().playlists.contains_key(id)
    }

    pub fn playlist_count(&self) -> usize {
        self.state().playlists.len()
    }

    pub fn title(&self, id: &str) -> Option<String> {
        self.state().playlists.get(id).map(|p| p.title.clone())
    }

    pub fn description(&self, id: &str) -> Option<String> {
        self.state().playlists.get(id).map(|p| p.description.clone())
    }

    /// Track ids of a playlist in list order.
    pub fn tracks_of(&self, id: &str) -> Vec<String> {
        self.state()
            .playlists
            .get(id)
            .map(|p| p.entries.iter().map(|(_, t)| t.clone()).collect())
            .unwrap_or_default()
    }

    pub fn entry_id_of(&self, playlist_id: &str, track_id: &str) -> Option<String> {
        self.state().playlists.get(playlist_id).and_then(|p| {
            p.entries
                .iter()
                .find(|(_, t)| t == track_id)
                .map(|(e, _)| e.clone())
        })
    }

    /// The next remote calls fail with `status`, in order.
    pub fn fail_next_with(&self, status: u16) {
        self.state().failures.push_back(BridgeError::Http {
            status,
            message: format!("injected {status}"),
        });
    }

    /// The next playlist listing panics, like a buggy client would.
    pub fn panic_next_listing(&self) {
        self.state().panic_next = true;
    }

    pub fn set_unauthed(&self, unauthed: bool) {
        self.state().unauthed = unauthed;
    }

    pub fn entry_batches(&self) -> Vec<Vec<EntryMutation>> {
        self.state().entry_batches.clone()
    }

    pub fn playlist_batches(&self) -> Vec<Vec<PlaylistMutation>> {
        self.state().playlist_batches.clone()
    }
}

fn find_index(entries: &[(String, String)], id: &str) -> Option<usize> {
    entries.iter().position(|(entry_id, _)| entry_id == id)
}

#[async_trait]
impl RemotePlaylistApi for FakeRemote {
    async fn list_playlists(&self, _auth: &RemoteAuth) -> BridgeResult<Vec<RemotePlaylist>> {
        let mut state = self.state();
        if std::mem::take(&mut state.panic_next) {
            // Release the lock first so later calls still work.
            drop(state);
            panic!("remote client bug");
        }
        state.take_failure()?;
        Ok(state
            .playlists
            .iter()
            .map(|(id, p)| RemotePlaylist {
                id: id.clone(),
                title: p.title.clone(),
                description: p.description.clone(),
                last_modified: p.last_modified,
            })
            .collect())
    }

    async fn list_entries(&self, _auth: &RemoteAuth, playlist_id: &str) -> BridgeResult<Vec<RemoteEntry>> {
        let mut state = self.state();
        state.take_failure()?;
        let playlist = state.playlists.get(playlist_id).ok_or_else(|| BridgeError::Http {
            status: 404,
            message: format!("no playlist {playlist_id}"),
        })?;

        let ids: Vec<&String> = playlist.entries.iter().map(|(e, _)| e).collect();
        let mut listed: Vec<RemoteEntry> = playlist
            .entries
            .iter()
            .enumerate()
            .map(|(i, (entry_id, track_id))| RemoteEntry {
                id: entry_id.clone(),
                track_id: track_id.clone(),
                preceding_entry_id: i.checked_sub(1).map(|p| ids[p].clone()),
                following_entry_id: ids.get(i + 1).map(|n| (*n).clone()),
            })
            .collect();
        // The real service does not list in order either.
        listed.reverse();
        Ok(listed)
    }

    async fn mutate_playlists(
        &self,
        _auth: &RemoteAuth,
        mutations: Vec<PlaylistMutation>,
    ) -> BridgeResult<Vec<MutationResponse>> {
        let mut state = self.state();
        state.take_failure()?;
        state.playlist_batches.push(mutations.clone());

        let mut responses = Vec::new();
        for mutation in mutations {
            let id = match mutation {
                PlaylistMutation::Create(fields) => {
                    let id = state.fresh_id("pl");
                    let last_modified = state.tick();
                    state.playlists.insert(
                        id.clone(),
                        FakePlaylist {
                            title: fields.title,
                            description: fields.description,
                            last_modified,
                            entries: Vec::new(),
                        },
                    );
                    id
                }
                PlaylistMutation::Update { id, fields } => {
                    let at = state.tick();
                    let playlist = state.playlists.get_mut(&id).ok_or_else(|| BridgeError::Http {
                        status: 404,
                        message: format!("no playlist {id}"),
                    })?;
                    playlist.title = fields.title;
                    playlist.description = fields.description;
                    playlist.last_modified = at;
                    id
                }
                PlaylistMutation::Delete(id) => {
                    state.playlists.remove(&id).ok_or_else(|| BridgeError::Http {
                        status: 404,
                        message: format!("no playlist {id}"),
                    })?;
                    id
                }
            };
            responses.push(MutationResponse {
                id,
                client_id: None,
            });
        }
        Ok(responses)
    }

    async fn mutate_entries(
        &self,
        _auth: &RemoteAuth,
        mutations: Vec<EntryMutation>,
    ) -> BridgeResult<Vec<MutationResponse>> {
        let mut state = self.state();
        state.take_failure()?;
        state.entry_batches.push(mutations.clone());

        let mut assigned: HashMap<String, String> = HashMap::new();
        let mut responses = Vec::new();
        for mutation in mutations {
            match mutation {
                EntryMutation::Delete(entry_id) => {
                    let at = state.tick();
                    for playlist in state.playlists.values_mut() {
                        if let Some(i) = find_index(&playlist.entries, &entry_id) {
                            playlist.entries.remove(i);
                            playlist.last_modified = at;
                        }
                    }
                    responses.push(MutationResponse {
                        id: entry_id,
                        client_id: None,
                    });
                }
                EntryMutation::Create {
                    client_id,
                    placement,
                } => {
                    let entry_id = state.fresh_id("entry");
                    assigned.insert(client_id.clone(), entry_id.clone());
                    let at = state.tick();
                    let playlist = state
                        .playlists
                        .get_mut(&placement.playlist_id)
                        .ok_or_else(|| BridgeError::Http {
                            status: 404,
                            message: "no playlist".to_string(),
                        })?;
                    let index = position(&playlist.entries, &placement, &assigned);
                    playlist
                        .entries
                        .insert(index, (entry_id.clone(), placement.track_id.clone()));
                    playlist.last_modified = at;
                    responses.push(MutationResponse {
                        id: entry_id,
                        client_id: Some(client_id),
                    });
                }
                EntryMutation::Update { id, placement } => {
                    let at = state.tick();
                    let playlist = state
                        .playlists
                        .get_mut(&placement.playlist_id)
                        .ok_or_else(|| BridgeError::Http {
                            status: 404,
                            message: "no playlist".to_string(),
                        })?;
                    let current = find_index(&playlist.entries, &id).ok_or_else(|| {
                        BridgeError::Http {
                            status: 404,
                            message: format!("no entry {id}"),
                        }
                    })?;
                    let moved = playlist.entries.remove(current);
                    let index = position(&playlist.entries, &placement, &assigned);
                    playlist.entries.insert(index, moved);
                    playlist.last_modified = at;
                    responses.push(MutationResponse {
                        id,
                        client_id: None,
                    });
                }
            }
        }
        Ok(responses)
    }
}

fn position(
    entries: &[(String, String)],
    placement: &core_sync::EntryPlacement,
    assigned: &HashMap<String, String>,
) -> usize {
    let resolve = |id: &String| {
        let id = assigned.get(id).unwrap_or(id);
        find_index(entries, id)
    };
    match &placement.preceding_entry_id {
        None => 0,
        Some(prev) => match resolve(prev) {
            Some(i) => i + 1,
            None => placement
                .following_entry_id
                .as_ref()
                .and_then(resolve)
                .unwrap_or(entries.len()),
        },
    }
}

#[async_trait]
impl TrackChangesApi for FakeRemote {
    async fn get_track_changes(&self, _auth: &RemoteAuth, since: i64) -> BridgeResult<TrackChanges> {
        let mut state = self.state();
        state.take_failure()?;
        if state.unauthed {
            return Ok(TrackChanges::Unauthed);
        }
        let upserted = state
            .tracks
            .values()
            .filter(|(_, at)| *at > since)
            .map(|(track, _)| track.clone())
            .collect();
        let deleted_ids = state
            .deleted_tracks
            .iter()
            .filter(|(_, at)| *at > since)
            .map(|(id, _)| id.clone())
            .collect();
        Ok(TrackChanges::Success {
            new_timestamp: Some(state.tick),
            upserted,
            deleted_ids,
        })
    }
}

// ============================================================================
// Engine harness
// ============================================================================

pub fn track(id: &str, genre: &str, track_number: i64) -> Track {
    Track {
        id: id.to_string(),
        title: format!("Song {id}"),
        genre: genre.to_string(),
        track_number,
        ..Default::default()
    }
}

pub struct Harness {
    pub remote: Arc<FakeRemote>,
    pub tracks: Arc<MemoryTrackStore>,
    pub playlists: Arc<SqlitePlaylistStore>,
    pub clock: Arc<ManualClock>,
    pub auth: Arc<StaticTokenProvider>,
    pub event_bus: EventBus,
    pub manager: SyncManager,
    pub listener: JoinHandle<()>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_reporter(Arc::new(NoopErrorReporter)).await
    }

    pub async fn with_reporter(reporter: Arc<dyn ErrorReporter>) -> Self {
        let remote = Arc::new(FakeRemote::new());
        let tracks = Arc::new(MemoryTrackStore::new());
        let playlists = Arc::new(SqlitePlaylistStore::new(create_test_pool().await.unwrap()));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        let auth = Arc::new(StaticTokenProvider::new(Some("token".to_string())));

        let config = CoreConfig::builder()
            .database_path(":memory:")
            .auth_provider(auth.clone())
            .clock(clock.clone() as Arc<dyn Clock>)
            .error_reporter(reporter)
            .disable_polling()
            .event_buffer_size(1024)
            .build()
            .unwrap();
        let event_bus = EventBus::new(config.event_buffer_size);

        let deps = SyncDependencies {
            remote: remote.clone(),
            track_changes: remote.clone(),
            tracks: tracks.clone(),
            playlists: playlists.clone(),
        };
        let coordinator = SyncCoordinator::new(deps, &config, event_bus.clone());
        let manager = SyncManager::new(coordinator, &config, event_bus.clone());
        let listener = spawn_change_listener(playlists.subscribe(), manager.clone());

        Self {
            remote,
            tracks,
            playlists,
            clock,
            auth,
            event_bus,
            manager,
            listener,
        }
    }

    pub fn events(&self) -> broadcast::Receiver<CoreEvent> {
        self.event_bus.subscribe()
    }

    /// Let the change listener pick up pending notifications, then wait for
    /// the queue to drain.
    pub async fn settle(&self) {
        // Syncs save playlists, which may queue follow-up intents.
        for _ in 0..3 {
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
            self.manager.wait_idle().await;
        }
    }

    pub async fn run(&self, intent: SyncIntent) {
        self.manager.enqueue(intent).await.unwrap();
        self.manager.wait_idle().await;
    }
}

/// Every event received so far.
pub fn drain(events: &mut broadcast::Receiver<CoreEvent>) -> Vec<CoreEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

pub fn sync_events(events: &[CoreEvent]) -> Vec<&SyncEvent> {
    events
        .iter()
        .filter_map(|event| match event {
            CoreEvent::Sync(sync) => Some(sync),
            _ => None,
        })
        .collect()
}
