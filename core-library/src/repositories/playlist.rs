//! Playlist store trait and SQLite implementation

use crate::error::{LibraryError, Result};
use crate::models::{Playlist, PlaylistRef, Rule, SortSpec};
use std::collections::HashSet;
use async_trait::async_trait;
use sqlx::{query, query_as, FromRow, SqlitePool};
use tokio::sync::broadcast;
use tracing::{debug, warn};

const CHANGE_BUFFER: usize = 256;

/// Notification emitted after a playlist write commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistChange {
    Added(Playlist),
    Updated { old: Playlist, new: Playlist },
    Deleted(Playlist),
}

impl PlaylistChange {
    pub fn user_id(&self) -> &str {
        match self {
            PlaylistChange::Added(p) | PlaylistChange::Deleted(p) => &p.user_id,
            PlaylistChange::Updated { new, .. } => &new.user_id,
        }
    }
}

/// User-scoped persistent playlist storage
#[async_trait]
pub trait PlaylistStore: Send + Sync {
    /// Find a playlist by `(user_id, local_id)`
    ///
    /// # Returns
    /// - `Ok(Some(playlist))` if found
    /// - `Ok(None)` if not found
    async fn get(&self, user_id: &str, local_id: &str) -> Result<Option<Playlist>>;

    /// Insert or update a playlist
    ///
    /// A stored `remote_id` is never cleared or replaced: saving `None` keeps
    /// the stored id, saving a different id fails.
    ///
    /// # Returns
    /// The playlist as stored
    async fn save(&self, playlist: &Playlist) -> Result<Playlist>;

    /// Delete a playlist
    ///
    /// # Returns
    /// The deleted playlist, or `None` if it did not exist
    async fn delete(&self, user_id: &str, local_id: &str) -> Result<Option<Playlist>>;

    /// All playlists of a user ordered by local id
    async fn list(&self, user_id: &str) -> Result<Vec<Playlist>>;

    /// Bind a playlist to its remote copy without touching any other field
    ///
    /// Binding to the id already stored is a no-op; binding to a different
    /// one fails like [`save`](Self::save) does.
    ///
    /// # Returns
    /// - `Ok(Some(playlist))` with the stored state after binding
    /// - `Ok(None)` if the playlist no longer exists
    async fn set_remote_id(
        &self,
        user_id: &str,
        local_id: &str,
        remote_id: &str,
    ) -> Result<Option<Playlist>>;

    /// Drop every rule leaf of the user's playlists that references one of
    /// `gone`, reading and rewriting the rules in a single transaction
    ///
    /// # Returns
    /// The playlists whose rules changed, as stored
    async fn prune_references(
        &self,
        user_id: &str,
        gone: &[PlaylistRef],
    ) -> Result<Vec<Playlist>>;

    /// Stream of committed changes
    fn subscribe(&self) -> broadcast::Receiver<PlaylistChange>;
}

#[derive(FromRow)]
struct PlaylistRow {
    user_id: String,
    local_id: String,
    remote_id: Option<String>,
    title: String,
    rules: String,
    sorts: String,
    limit_count: Option<i64>,
}

impl TryFrom<PlaylistRow> for Playlist {
    type Error = LibraryError;

    fn try_from(row: PlaylistRow) -> Result<Self> {
        let rules: Rule = serde_json::from_str(&row.rules)?;
        let sorts: Vec<SortSpec> = serde_json::from_str(&row.sorts)?;
        let limit = row
            .limit_count
            .map(u32::try_from)
            .transpose()
            .map_err(|_| LibraryError::InvalidInput {
                field: "limit".to_string(),
                message: format!("stored limit out of range for playlist {}", row.local_id),
            })?;

        Ok(Playlist {
            local_id: row.local_id,
            remote_id: row.remote_id,
            title: row.title,
            rules,
            sorts,
            limit,
            user_id: row.user_id,
        })
    }
}

/// SQLite implementation of PlaylistStore
pub struct SqlitePlaylistStore {
    pool: SqlitePool,
    changes: broadcast::Sender<PlaylistChange>,
}

impl SqlitePlaylistStore {
    /// Create a store over a pool that already has the schema applied
    /// (see [`crate::db::create_pool`]).
    pub fn new(pool: SqlitePool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self { pool, changes }
    }

    fn already_bound(local_id: &str, remote_id: &str) -> LibraryError {
        LibraryError::InvalidInput {
            field: "remote_id".to_string(),
            message: format!(
                "playlist {} is already bound to remote playlist {}",
                local_id, remote_id
            ),
        }
    }

    fn notify(&self, change: PlaylistChange) {
        // Nobody listening is fine.
        let _ = self.changes.send(change);
    }
}

#[async_trait]
impl PlaylistStore for SqlitePlaylistStore {
    async fn get(&self, user_id: &str, local_id: &str) -> Result<Option<Playlist>> {
        let row = query_as::<_, PlaylistRow>(
            "SELECT * FROM smart_playlists WHERE user_id = ? AND local_id = ?",
        )
        .bind(user_id)
        .bind(local_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Playlist::try_from).transpose()
    }

    async fn save(&self, playlist: &Playlist) -> Result<Playlist> {
        playlist
            .validate()
            .map_err(|e| LibraryError::InvalidInput {
                field: "Playlist".to_string(),
                message: e,
            })?;

        let mut tx = self.pool.begin().await?;

        let existing = query_as::<_, PlaylistRow>(
            "SELECT * FROM smart_playlists WHERE user_id = ? AND local_id = ?",
        )
        .bind(&playlist.user_id)
        .bind(&playlist.local_id)
        .fetch_optional(&mut *tx)
        .await?
        .map(Playlist::try_from)
        .transpose()?;

        let mut stored = playlist.clone();
        if let Some(old) = &existing {
            match (&old.remote_id, &playlist.remote_id) {
                (Some(old_id), Some(new_id)) if old_id != new_id => {
                    warn!(
                        local_id = %playlist.local_id,
                        old_remote_id = %old_id,
                        new_remote_id = %new_id,
                        "Refusing to replace remote id"
                    );
                    return Err(Self::already_bound(&playlist.local_id, old_id));
                }
                (Some(old_id), None) => stored.remote_id = Some(old_id.clone()),
                _ => {}
            }
        }

        query(
            r#"
            INSERT INTO smart_playlists (
                user_id, local_id, remote_id, title, rules, sorts, limit_count
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, local_id) DO UPDATE SET
                remote_id = excluded.remote_id,
                title = excluded.title,
                rules = excluded.rules,
                sorts = excluded.sorts,
                limit_count = excluded.limit_count
            "#,
        )
        .bind(&stored.user_id)
        .bind(&stored.local_id)
        .bind(&stored.remote_id)
        .bind(&stored.title)
        .bind(serde_json::to_string(&stored.rules)?)
        .bind(serde_json::to_string(&stored.sorts)?)
        .bind(stored.limit.map(i64::from))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            user_id = %stored.user_id,
            local_id = %stored.local_id,
            created = existing.is_none(),
            "Saved playlist"
        );

        match existing {
            None => self.notify(PlaylistChange::Added(stored.clone())),
            Some(old) if old != stored => self.notify(PlaylistChange::Updated {
                old,
                new: stored.clone(),
            }),
            Some(_) => {}
        }

        Ok(stored)
    }

    async fn delete(&self, user_id: &str, local_id: &str) -> Result<Option<Playlist>> {
        let mut tx = self.pool.begin().await?;

        let existing = query_as::<_, PlaylistRow>(
            "SELECT * FROM smart_playlists WHERE user_id = ? AND local_id = ?",
        )
        .bind(user_id)
        .bind(local_id)
        .fetch_optional(&mut *tx)
        .await?
        .map(Playlist::try_from)
        .transpose()?;

        if existing.is_none() {
            return Ok(None);
        }

        query("DELETE FROM smart_playlists WHERE user_id = ? AND local_id = ?")
            .bind(user_id)
            .bind(local_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        if let Some(deleted) = &existing {
            self.notify(PlaylistChange::Deleted(deleted.clone()));
        }

        Ok(existing)
    }

    async fn list(&self, user_id: &str) -> Result<Vec<Playlist>> {
        let rows = query_as::<_, PlaylistRow>(
            "SELECT * FROM smart_playlists WHERE user_id = ? ORDER BY local_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Playlist::try_from).collect()
    }

    async fn set_remote_id(
        &self,
        user_id: &str,
        local_id: &str,
        remote_id: &str,
    ) -> Result<Option<Playlist>> {
        let mut tx = self.pool.begin().await?;

        let existing = query_as::<_, PlaylistRow>(
            "SELECT * FROM smart_playlists WHERE user_id = ? AND local_id = ?",
        )
        .bind(user_id)
        .bind(local_id)
        .fetch_optional(&mut *tx)
        .await?
        .map(Playlist::try_from)
        .transpose()?;

        let Some(old) = existing else {
            return Ok(None);
        };
        match old.remote_id.as_deref() {
            Some(bound) if bound == remote_id => return Ok(Some(old)),
            Some(bound) => return Err(Self::already_bound(local_id, bound)),
            None => {}
        }

        query(
            "UPDATE smart_playlists SET remote_id = ? \
             WHERE user_id = ? AND local_id = ? AND remote_id IS NULL",
        )
        .bind(remote_id)
        .bind(user_id)
        .bind(local_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let new = Playlist {
            remote_id: Some(remote_id.to_string()),
            ..old.clone()
        };
        debug!(user_id, local_id, remote_id, "Bound playlist to remote copy");
        self.notify(PlaylistChange::Updated {
            old,
            new: new.clone(),
        });

        Ok(Some(new))
    }

    async fn prune_references(
        &self,
        user_id: &str,
        gone: &[PlaylistRef],
    ) -> Result<Vec<Playlist>> {
        if gone.is_empty() {
            return Ok(Vec::new());
        }
        let gone: HashSet<&PlaylistRef> = gone.iter().collect();

        // Rows are re-read inside the write transaction so a concurrent
        // save either lands first and is kept, or aborts this one.
        let mut tx = self.pool.begin().await?;

        let rows = query_as::<_, PlaylistRow>(
            "SELECT * FROM smart_playlists WHERE user_id = ? ORDER BY local_id",
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;

        let mut changes = Vec::new();
        for row in rows {
            let old = Playlist::try_from(row)?;
            let Some(rules) = old
                .rules
                .without_references(&|reference: &PlaylistRef| gone.contains(reference))
            else {
                continue;
            };

            query("UPDATE smart_playlists SET rules = ? WHERE user_id = ? AND local_id = ?")
                .bind(serde_json::to_string(&rules)?)
                .bind(user_id)
                .bind(&old.local_id)
                .execute(&mut *tx)
                .await?;

            let new = Playlist {
                rules,
                ..old.clone()
            };
            changes.push((old, new));
        }

        tx.commit().await?;

        let mut rewritten = Vec::with_capacity(changes.len());
        for (old, new) in changes {
            debug!(user_id, local_id = %new.local_id, "Pruned playlist references");
            rewritten.push(new.clone());
            self.notify(PlaylistChange::Updated { old, new });
        }

        Ok(rewritten)
    }

    fn subscribe(&self) -> broadcast::Receiver<PlaylistChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::{Operator, RuleValue};

    async fn setup_store() -> SqlitePlaylistStore {
        SqlitePlaylistStore::new(create_test_pool().await.unwrap())
    }

    fn jazz(local_id: &str) -> Playlist {
        Playlist::new(
            "u1",
            local_id,
            "Jazz",
            Rule::condition("genre", Operator::Eq, RuleValue::Text("Jazz".to_string())),
        )
        .with_sorts(vec![SortSpec::desc("rating")])
        .with_limit(50)
    }

    #[tokio::test]
    async fn test_save_and_get_round_trip() {
        let store = setup_store().await;
        let playlist = jazz("100");

        store.save(&playlist).await.unwrap();

        let found = store.get("u1", "100").await.unwrap();
        assert_eq!(found, Some(playlist));
        assert!(store.get("u2", "100").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_change_notifications() {
        let store = setup_store().await;
        let mut changes = store.subscribe();

        let playlist = jazz("100");
        store.save(&playlist).await.unwrap();
        assert_eq!(
            changes.recv().await.unwrap(),
            PlaylistChange::Added(playlist.clone())
        );

        let renamed = Playlist {
            title: "Cool Jazz".to_string(),
            ..playlist.clone()
        };
        store.save(&renamed).await.unwrap();
        assert_eq!(
            changes.recv().await.unwrap(),
            PlaylistChange::Updated {
                old: playlist,
                new: renamed.clone()
            }
        );

        // Identical save is silent.
        store.save(&renamed).await.unwrap();

        store.delete("u1", "100").await.unwrap();
        assert_eq!(
            changes.recv().await.unwrap(),
            PlaylistChange::Deleted(renamed)
        );
    }

    #[tokio::test]
    async fn test_remote_id_is_sticky() {
        let store = setup_store().await;
        store.save(&jazz("100").with_remote_id("r1")).await.unwrap();

        let stale_copy = jazz("100");
        let stored = store.save(&stale_copy).await.unwrap();
        assert_eq!(stored.remote_id.as_deref(), Some("r1"));

        let rebind = store.save(&jazz("100").with_remote_id("r2")).await;
        assert!(matches!(
            rebind,
            Err(LibraryError::InvalidInput { ref field, .. }) if field == "remote_id"
        ));
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let store = setup_store().await;
        store.save(&jazz("2")).await.unwrap();
        store.save(&jazz("1")).await.unwrap();
        store
            .save(&Playlist::new("u2", "3", "Other", Rule::default()))
            .await
            .unwrap();

        let ids: Vec<String> = store
            .list("u1")
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.local_id)
            .collect();
        assert_eq!(ids, vec!["1", "2"]);

        assert!(store.delete("u1", "1").await.unwrap().is_some());
        assert!(store.delete("u1", "1").await.unwrap().is_none());
        assert_eq!(store.list("u1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_save_rejects_invalid_playlist() {
        let store = setup_store().await;
        let bad = Playlist::new(
            "u1",
            "1",
            "Bad",
            Rule::condition("mood", Operator::Eq, RuleValue::Text("x".to_string())),
        );

        assert!(matches!(
            store.save(&bad).await,
            Err(LibraryError::InvalidInput { .. })
        ));
    }

    #[tokio::test]
    async fn test_set_remote_id_keeps_concurrent_edits() {
        let store = setup_store().await;
        store.save(&jazz("100")).await.unwrap();

        // A user edit committed after the sync engine read the row.
        let edited = Playlist {
            title: "User Edit".to_string(),
            ..jazz("100")
        };
        store.save(&edited).await.unwrap();

        let mut changes = store.subscribe();
        let bound = store.set_remote_id("u1", "100", "r1").await.unwrap().unwrap();
        assert_eq!(bound.title, "User Edit");
        assert_eq!(bound.remote_id.as_deref(), Some("r1"));
        assert_eq!(store.get("u1", "100").await.unwrap(), Some(bound.clone()));
        assert_eq!(
            changes.recv().await.unwrap(),
            PlaylistChange::Updated {
                old: edited,
                new: bound.clone()
            }
        );

        // Same id again is a no-op, a different one is refused.
        assert_eq!(
            store.set_remote_id("u1", "100", "r1").await.unwrap(),
            Some(bound)
        );
        assert!(matches!(
            store.set_remote_id("u1", "100", "r2").await,
            Err(LibraryError::InvalidInput { ref field, .. }) if field == "remote_id"
        ));
        assert!(store.set_remote_id("u1", "gone", "r3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prune_references_rewrites_only_rules() {
        let store = setup_store().await;
        let linked = Rule::all(vec![
            Rule::condition("playlist", Operator::Eq, RuleValue::Text("remote:r1".into())),
            Rule::condition("rating", Operator::Gte, RuleValue::Number(4)),
        ]);
        store
            .save(&Playlist::new("u1", "1", "Linked", linked))
            .await
            .unwrap();
        store
            .save(&Playlist::new("u1", "2", "Plain", Rule::default()))
            .await
            .unwrap();
        store
            .save(&Playlist::new(
                "u1",
                "3",
                "Only link",
                Rule::condition("playlist", Operator::Neq, RuleValue::Text("local:9".into())),
            ))
            .await
            .unwrap();

        // Renamed after the reference went away but before pruning ran.
        let renamed = Playlist {
            title: "Renamed".to_string(),
            ..store.get("u1", "1").await.unwrap().unwrap()
        };
        store.save(&renamed).await.unwrap();

        let rewritten = store
            .prune_references(
                "u1",
                &[
                    PlaylistRef::Remote("r1".to_string()),
                    PlaylistRef::Local("9".to_string()),
                ],
            )
            .await
            .unwrap();

        let ids: Vec<&str> = rewritten.iter().map(|p| p.local_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);

        let first = store.get("u1", "1").await.unwrap().unwrap();
        assert_eq!(first.title, "Renamed");
        assert_eq!(
            first.rules,
            Rule::all(vec![Rule::condition(
                "rating",
                Operator::Gte,
                RuleValue::Number(4)
            )])
        );
        assert_eq!(store.get("u1", "3").await.unwrap().unwrap().rules, Rule::default());

        assert!(store
            .prune_references("u1", &[PlaylistRef::Remote("r1".to_string())])
            .await
            .unwrap()
            .is_empty());
        assert!(store.prune_references("u1", &[]).await.unwrap().is_empty());
    }
}
