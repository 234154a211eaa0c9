//! User edits committed while a sync is working on the same playlist.

mod common;

use async_trait::async_trait;
use bridge_traits::{Clock, ManualClock, StaticTokenProvider};
use chrono::{TimeZone, Utc};
use common::{track, FakeRemote};
use core_library::db::create_test_pool;
use core_library::repositories::{
    MemoryTrackStore, PlaylistChange, PlaylistStore, SqlitePlaylistStore,
};
use core_library::{Operator, Playlist, PlaylistRef, Rule, RuleValue};
use core_runtime::config::CoreConfig;
use core_runtime::events::EventBus;
use core_sync::{SyncCoordinator, SyncDependencies, SyncIntent};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

type LibraryResult<T> = core_library::Result<T>;

/// Store that commits a pending user edit right after the next read.
struct EditAfterRead {
    inner: SqlitePlaylistStore,
    edit: Mutex<Option<Playlist>>,
}

impl EditAfterRead {
    async fn new() -> Self {
        Self {
            inner: SqlitePlaylistStore::new(create_test_pool().await.unwrap()),
            edit: Mutex::new(None),
        }
    }

    fn edit_after_next_read(&self, playlist: Playlist) {
        *self.edit.lock().unwrap() = Some(playlist);
    }

    async fn commit_edit(&self) -> LibraryResult<()> {
        let edit = self.edit.lock().unwrap().take();
        if let Some(edit) = edit {
            self.inner.save(&edit).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl PlaylistStore for EditAfterRead {
    async fn get(&self, user_id: &str, local_id: &str) -> LibraryResult<Option<Playlist>> {
        let found = self.inner.get(user_id, local_id).await?;
        self.commit_edit().await?;
        Ok(found)
    }

    async fn save(&self, playlist: &Playlist) -> LibraryResult<Playlist> {
        self.inner.save(playlist).await
    }

    async fn delete(&self, user_id: &str, local_id: &str) -> LibraryResult<Option<Playlist>> {
        self.inner.delete(user_id, local_id).await
    }

    async fn list(&self, user_id: &str) -> LibraryResult<Vec<Playlist>> {
        let all = self.inner.list(user_id).await?;
        self.commit_edit().await?;
        Ok(all)
    }

    async fn set_remote_id(
        &self,
        user_id: &str,
        local_id: &str,
        remote_id: &str,
    ) -> LibraryResult<Option<Playlist>> {
        self.inner.set_remote_id(user_id, local_id, remote_id).await
    }

    async fn prune_references(
        &self,
        user_id: &str,
        gone: &[PlaylistRef],
    ) -> LibraryResult<Vec<Playlist>> {
        self.inner.prune_references(user_id, gone).await
    }

    fn subscribe(&self) -> broadcast::Receiver<PlaylistChange> {
        self.inner.subscribe()
    }
}

fn genre_is(genre: &str) -> Rule {
    Rule::condition("genre", Operator::Eq, RuleValue::Text(genre.to_string()))
}

fn coordinator(remote: Arc<FakeRemote>, store: Arc<EditAfterRead>) -> SyncCoordinator {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
    ));
    let config = CoreConfig::builder()
        .database_path(":memory:")
        .auth_provider(Arc::new(StaticTokenProvider::new(Some("token".to_string()))))
        .clock(clock as Arc<dyn Clock>)
        .disable_polling()
        .build()
        .unwrap();

    let deps = SyncDependencies {
        remote: remote.clone(),
        track_changes: remote,
        tracks: Arc::new(MemoryTrackStore::new()),
        playlists: store,
    };
    SyncCoordinator::new(deps, &config, EventBus::new(config.event_buffer_size))
}

#[tokio::test]
async fn test_edit_during_remote_create_is_kept() {
    let remote = Arc::new(FakeRemote::new());
    remote.add_tracks(vec![track("a", "rock", 1), track("c", "jazz", 2)]);
    let store = Arc::new(EditAfterRead::new().await);
    store
        .save(&Playlist::new("u1", "1", "Rock", genre_is("rock")))
        .await
        .unwrap();
    store.edit_after_next_read(Playlist::new("u1", "1", "User Edit", genre_is("jazz")));

    let coordinator = coordinator(remote.clone(), store.clone());
    let intent = SyncIntent::update("u1", "1").validate().unwrap();
    coordinator.execute(&intent).await.unwrap();

    let stored = store.get("u1", "1").await.unwrap().unwrap();
    assert_eq!(stored.title, "User Edit");
    assert_eq!(stored.rules, genre_is("jazz"));

    // Entries follow the edited rules; the title catches up on the next sync.
    let remote_id = stored.remote_id.expect("bound to its remote copy");
    assert_eq!(remote.tracks_of(&remote_id), vec!["c"]);
}
