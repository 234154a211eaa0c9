//! # Sync Coordinator
//!
//! Executes one validated [`Intent`] from start to finish.
//!
//! ## Workflow
//!
//! A `delete` first does its local half, which needs neither credentials
//! nor the remote: the local id is tombstoned, rules referencing it are
//! pruned and its remote copy is queued for deletion.
//!
//! Every intent, whatever its action, then:
//! 1. Acquire a token from the host `AuthProvider`
//! 2. Sync the remote playlist cache; prune rules referencing playlists
//!    that disappeared remotely
//! 3. Apply the track delta feed (full initialization when the cache is
//!    missing)
//! 4. Delete queued remote copies; one already gone counts as deleted.
//!    A failed deletion stays queued for the next intent of the user
//!
//! Then per action:
//! - `update-all`: reconcile every playlist of the user
//! - `update`: create the remote copy if needed, then reconcile
//!
//! ## Per-user state
//!
//! The remote playlist cache, the set of deleted local ids and the queued
//! remote deletions live in a
//! session context per user, owned by the coordinator and only touched by
//! the sync worker. Deauthentication drops the context.
//!
//! Persisted playlists are re-read at the start of each intent; nothing
//! captured when the intent was queued is trusted.

use crate::error::{ErrorClass, Result, SyncError};
use crate::intent::Intent;
use crate::membership::MembershipResolver;
use crate::reconcile::{apply_mutations, reconcile};
use crate::remote::{
    PlaylistFields, PlaylistMutation, RemoteAuth, RemotePlaylistApi, TrackChangesApi,
};
use crate::splaylists::{Splaylist, SplaylistCache};
use crate::tracks::refresh_tracks;
use bridge_traits::{AuthProvider, Clock};
use core_library::repositories::{PlaylistStore, TrackStore};
use core_library::{EvalContext, Playlist, PlaylistRef};
use core_runtime::config::CoreConfig;
use core_runtime::events::{AuthEvent, CoreEvent, EventBus, LibraryEvent};
use core_runtime::logging::redact_if_sensitive;
use futures::future::try_join;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Host collaborators the coordinator works against.
#[derive(Clone)]
pub struct SyncDependencies {
    pub remote: Arc<dyn RemotePlaylistApi>,
    pub track_changes: Arc<dyn TrackChangesApi>,
    pub tracks: Arc<dyn TrackStore>,
    pub playlists: Arc<dyn PlaylistStore>,
}

#[derive(Debug, Default)]
struct SessionContext {
    splaylists: SplaylistCache,
    /// Local ids deleted during this session
    tombstones: HashSet<String>,
    /// Remote copies of deleted playlists not yet deleted remotely
    pending_deletes: BTreeSet<String>,
}

/// Summary of one executed intent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntentOutcome {
    pub playlists_synced: usize,
    /// Remote mutations sent
    pub mutations: usize,
    /// Playlists left out because they cannot be synced as they are
    pub skipped: usize,
}

pub struct SyncCoordinator {
    remote: Arc<dyn RemotePlaylistApi>,
    track_changes: Arc<dyn TrackChangesApi>,
    tracks: Arc<dyn TrackStore>,
    playlists: Arc<dyn PlaylistStore>,
    auth: Arc<dyn AuthProvider>,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
    max_entries: usize,
    sessions: Mutex<HashMap<String, SessionContext>>,
}

impl SyncCoordinator {
    pub fn new(deps: SyncDependencies, config: &CoreConfig, event_bus: EventBus) -> Self {
        Self {
            remote: deps.remote,
            track_changes: deps.track_changes,
            tracks: deps.tracks,
            playlists: deps.playlists,
            auth: config.auth_provider.clone(),
            clock: config.clock.clone(),
            event_bus,
            max_entries: config.max_playlist_entries,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Run `intent` to completion.
    ///
    /// # Errors
    ///
    /// Any failure aborts the intent; see [`SyncError::classify`] for how
    /// the caller should react.
    #[instrument(skip(self), fields(user_id = %intent.user_id(), action = %intent.action()))]
    pub async fn execute(&self, intent: &Intent) -> Result<IntentOutcome> {
        if let Intent::Delete {
            local_id,
            remote_id,
            ..
        } = intent
        {
            self.forget(intent.user_id(), local_id, remote_id.as_deref())
                .await?;
        }

        let auth = self.authenticate(intent.user_id()).await?;

        let mut sessions = self.sessions.lock().await;
        let session = sessions.entry(auth.user_id.clone()).or_default();

        self.refresh_caches(session, &auth).await?;
        let deleted = self.flush_pending_deletes(session, &auth).await?;

        let mut outcome = match intent {
            Intent::UpdateAll { .. } => self.update_all(session, &auth).await?,
            Intent::Update { local_id, .. } => self.update_one(session, &auth, local_id).await?,
            Intent::Delete { .. } => IntentOutcome::default(),
        };
        outcome.mutations += deleted;
        Ok(outcome)
    }

    /// Drop everything cached for `user_id`.
    pub async fn deauthenticate(&self, user_id: &str) -> Result<()> {
        self.sessions.lock().await.remove(user_id);
        self.tracks.clear(user_id).await?;
        warn!(user_id, "User deauthenticated, cached state dropped");
        self.emit(CoreEvent::Auth(AuthEvent::Deauthenticated {
            user_id: user_id.to_string(),
        }));
        Ok(())
    }

    /// Ask the host for fresh credentials.
    pub async fn request_session_refresh(&self, user_id: &str) -> Result<()> {
        self.auth.request_session_refresh(user_id).await?;
        info!(user_id, "Requested session refresh");
        self.emit(CoreEvent::Auth(AuthEvent::SessionRefreshRequested {
            user_id: user_id.to_string(),
        }));
        Ok(())
    }

    pub async fn has_session(&self, user_id: &str) -> bool {
        self.sessions.lock().await.contains_key(user_id)
    }

    async fn authenticate(&self, user_id: &str) -> Result<RemoteAuth> {
        match self.auth.get_token(false, "playlist sync").await? {
            Some(token) => {
                debug!(token = %redact_if_sensitive("token", &token), "Access token acquired");
                Ok(RemoteAuth::new(user_id, token))
            }
            None => Err(SyncError::Unauthorized(format!(
                "no access token for user {user_id}"
            ))),
        }
    }

    async fn refresh_caches(&self, session: &mut SessionContext, auth: &RemoteAuth) -> Result<()> {
        let report = session.splaylists.sync(self.remote.as_ref(), auth).await?;
        if !report.deleted.is_empty() {
            let gone: Vec<PlaylistRef> = report
                .deleted
                .iter()
                .map(|id| PlaylistRef::Remote(id.clone()))
                .collect();
            self.prune_references(&auth.user_id, &gone).await?;
        }

        let refresh =
            refresh_tracks(self.track_changes.as_ref(), self.tracks.as_ref(), auth).await?;
        if !refresh.is_empty() {
            self.emit(CoreEvent::Library(LibraryEvent::TracksChanged {
                user_id: auth.user_id.clone(),
                upserted: refresh.upserted as u64,
                deleted: refresh.deleted as u64,
            }));
        }
        Ok(())
    }

    async fn update_all(
        &self,
        session: &mut SessionContext,
        auth: &RemoteAuth,
    ) -> Result<IntentOutcome> {
        let playlists = self.playlists.list(&auth.user_id).await?;
        let mut outcome = IntentOutcome::default();

        for playlist in &playlists {
            if session.tombstones.contains(&playlist.local_id) {
                continue;
            }
            match self
                .sync_playlist(session, auth, playlist.clone(), &playlists)
                .await
            {
                Ok(mutations) => {
                    outcome.playlists_synced += 1;
                    outcome.mutations += mutations;
                }
                Err(err) if err.classify() == ErrorClass::Invalid => {
                    warn!(
                        local_id = %playlist.local_id,
                        error = %err,
                        "Skipping playlist"
                    );
                    outcome.skipped += 1;
                }
                Err(err) => return Err(err),
            }
        }

        info!(
            synced = outcome.playlists_synced,
            skipped = outcome.skipped,
            mutations = outcome.mutations,
            "Full library reconciliation finished"
        );
        Ok(outcome)
    }

    async fn update_one(
        &self,
        session: &mut SessionContext,
        auth: &RemoteAuth,
        local_id: &str,
    ) -> Result<IntentOutcome> {
        if session.tombstones.contains(local_id) {
            debug!(local_id, "Playlist was deleted, not reconciling");
            return Ok(IntentOutcome::default());
        }

        let playlists = self.playlists.list(&auth.user_id).await?;
        let playlist = playlists
            .iter()
            .find(|p| p.local_id == local_id)
            .cloned()
            .ok_or_else(|| SyncError::PlaylistNotFound {
                user_id: auth.user_id.clone(),
                local_id: local_id.to_string(),
            })?;

        let mutations = self.sync_playlist(session, auth, playlist, &playlists).await?;
        Ok(IntentOutcome {
            playlists_synced: 1,
            mutations,
            skipped: 0,
        })
    }

    async fn forget(&self, user_id: &str, local_id: &str, remote_id: Option<&str>) -> Result<()> {
        {
            let mut sessions = self.sessions.lock().await;
            let session = sessions.entry(user_id.to_string()).or_default();
            session.tombstones.insert(local_id.to_string());
            if let Some(remote_id) = remote_id {
                session.pending_deletes.insert(remote_id.to_string());
            }
        }
        self.prune_references(user_id, &[PlaylistRef::Local(local_id.to_string())])
            .await
    }

    /// Delete queued remote copies. Returns the number of deletions sent.
    async fn flush_pending_deletes(
        &self,
        session: &mut SessionContext,
        auth: &RemoteAuth,
    ) -> Result<usize> {
        let pending: Vec<String> = session.pending_deletes.iter().cloned().collect();
        let mut sent = 0;

        for remote_id in pending {
            let result = self
                .remote
                .mutate_playlists(auth, vec![PlaylistMutation::Delete(remote_id.clone())])
                .await
                .map_err(SyncError::from);
            match result {
                Ok(_) => {
                    sent += 1;
                    info!(remote_id = %remote_id, "Deleted remote playlist");
                }
                Err(err) if err.is_not_found() => {
                    debug!(remote_id = %remote_id, "Remote playlist already gone");
                }
                Err(err) => {
                    warn!(remote_id = %remote_id, error = %err, "Remote delete failed, kept queued");
                    return Err(err);
                }
            }

            session.pending_deletes.remove(&remote_id);
            session.splaylists.remove(&remote_id);
            self.prune_references(&auth.user_id, &[PlaylistRef::Remote(remote_id)])
                .await?;
        }
        Ok(sent)
    }

    /// Create-or-reconcile one playlist. Returns the number of mutations sent.
    #[instrument(skip_all, fields(local_id = %playlist.local_id))]
    async fn sync_playlist(
        &self,
        session: &mut SessionContext,
        auth: &RemoteAuth,
        playlist: Playlist,
        all: &[Playlist],
    ) -> Result<usize> {
        let fields = PlaylistFields {
            title: playlist.title.clone(),
            description: playlist.rules.describe(),
        };
        let mut mutations = 0;

        let (playlist, metadata_update) = match playlist.remote_id.clone() {
            Some(remote_id) => {
                let cached = session
                    .splaylists
                    .get(&remote_id)
                    .ok_or_else(|| SyncError::RemotePlaylistMissing(remote_id.clone()))?;
                let update = (cached.title != fields.title
                    || cached.description != fields.description)
                    .then(|| PlaylistMutation::Update {
                        id: remote_id.clone(),
                        fields,
                    });
                (playlist, update)
            }
            None => {
                let remote_id = self.create_remote(auth, fields.clone()).await?;
                mutations += 1;

                // Persist the id before anything may reference the remote copy.
                // Only the id column is written so concurrent edits survive.
                let Some(stored) = self
                    .playlists
                    .set_remote_id(&playlist.user_id, &playlist.local_id, &remote_id)
                    .await?
                else {
                    warn!(remote_id = %remote_id, "Playlist deleted while creating its remote copy");
                    self.remote
                        .mutate_playlists(auth, vec![PlaylistMutation::Delete(remote_id)])
                        .await?;
                    return Ok(mutations + 1);
                };
                session.splaylists.insert(Splaylist {
                    id: remote_id,
                    title: fields.title,
                    description: fields.description,
                    last_modified: 0,
                    entries: Vec::new(),
                });
                (stored, None)
            }
        };

        let remote_id = playlist
            .remote_id
            .clone()
            .ok_or_else(|| SyncError::RemotePlaylistMissing(playlist.local_id.clone()))?;

        let now = self.clock.now();
        let memberships = MembershipResolver::new(
            self.tracks.as_ref(),
            all,
            &session.splaylists,
            now,
            self.max_entries,
        )
        .resolve(&playlist)
        .await?;
        let ctx = EvalContext::new(now, &memberships);
        let desired = self.tracks.query(&playlist, &ctx, self.max_entries).await?;
        let ordered = self
            .tracks
            .order(&playlist.user_id, &desired, &playlist.sorts)
            .await?;

        let current = session.splaylists.entries(&remote_id).to_vec();
        let plan = reconcile(&remote_id, &ordered, &current);

        let metadata = async {
            match metadata_update {
                Some(update) => self.remote.mutate_playlists(auth, vec![update]).await.map(|r| r.len()),
                None => Ok(0),
            }
        };
        let entries = async {
            if plan.is_empty() {
                Ok(Vec::new())
            } else {
                self.remote.mutate_entries(auth, plan.mutations.clone()).await
            }
        };
        let (metadata_mutations, responses) = try_join(metadata, entries).await?;

        if !plan.is_empty() {
            let applied = apply_mutations(&current, &plan.mutations, &responses)?;
            session.splaylists.set_entries(&remote_id, applied);
        }
        if plan.mixed_reorders > 0 {
            warn!(
                remote_id = %remote_id,
                mixed_reorders = plan.mixed_reorders,
                "Reorders anchored on pending appends, next sync will settle them"
            );
        }

        mutations += metadata_mutations + plan.mutations.len();
        self.emit(CoreEvent::Library(LibraryEvent::PlaylistSynced {
            user_id: playlist.user_id.clone(),
            local_id: playlist.local_id.clone(),
            remote_id,
            deletes: plan.deletes as u64,
            appends: plan.appends as u64,
            reorders: plan.reorders as u64,
            mixed_reorders: plan.mixed_reorders as u64,
        }));

        Ok(mutations)
    }

    async fn create_remote(&self, auth: &RemoteAuth, fields: PlaylistFields) -> Result<String> {
        let responses = self
            .remote
            .mutate_playlists(auth, vec![PlaylistMutation::Create(fields)])
            .await?;
        let remote_id = responses
            .into_iter()
            .next()
            .map(|response| response.id)
            .ok_or_else(|| {
                SyncError::MalformedResponse("playlist create returned no id".to_string())
            })?;
        info!(remote_id = %remote_id, "Created remote playlist");
        Ok(remote_id)
    }

    async fn prune_references(&self, user_id: &str, gone: &[PlaylistRef]) -> Result<()> {
        let rewritten = self.playlists.prune_references(user_id, gone).await?;
        if rewritten.is_empty() {
            return Ok(());
        }

        let playlist_ids: Vec<String> = rewritten.into_iter().map(|p| p.local_id).collect();
        info!(user_id, pruned = ?playlist_ids, "Pruned references to deleted playlists");
        self.emit(CoreEvent::Library(LibraryEvent::ReferencesPruned {
            user_id: user_id.to_string(),
            playlist_ids,
        }));
        Ok(())
    }

    fn emit(&self, event: CoreEvent) {
        // No subscribers is fine.
        let _ = self.event_bus.emit(event);
    }
}
