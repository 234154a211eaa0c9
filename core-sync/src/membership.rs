//! Membership resolution for `playlist` rules
//!
//! A `local:` reference resolves to the desired track list of the
//! referenced smart playlist, computed recursively. A `remote:` reference
//! resolves to the cached entries of the remote playlist. A reference back
//! into the chain being resolved is a cycle and contributes no tracks.

use crate::error::Result;
use crate::splaylists::SplaylistCache;
use chrono::{DateTime, Utc};
use core_library::repositories::TrackStore;
use core_library::{EvalContext, Playlist, PlaylistRef};
use futures::future::{BoxFuture, FutureExt};
use std::collections::{HashMap, HashSet};
use tracing::warn;

pub type Memberships = HashMap<PlaylistRef, HashSet<String>>;

pub struct MembershipResolver<'a> {
    tracks: &'a dyn TrackStore,
    playlists: &'a [Playlist],
    splaylists: &'a SplaylistCache,
    now: DateTime<Utc>,
    max_entries: usize,
}

impl<'a> MembershipResolver<'a> {
    /// `playlists` are the smart playlists of the same user.
    pub fn new(
        tracks: &'a dyn TrackStore,
        playlists: &'a [Playlist],
        splaylists: &'a SplaylistCache,
        now: DateTime<Utc>,
        max_entries: usize,
    ) -> Self {
        Self {
            tracks,
            playlists,
            splaylists,
            now,
            max_entries,
        }
    }

    /// Track sets of every playlist `playlist` references, directly or
    /// through other smart playlists.
    pub async fn resolve(&self, playlist: &Playlist) -> Result<Memberships> {
        let mut out = Memberships::new();
        let mut chain = vec![playlist.local_id.clone()];
        for reference in playlist.rules.references() {
            self.resolve_ref(reference, &mut chain, &mut out).await?;
        }
        Ok(out)
    }

    fn resolve_ref<'b>(
        &'b self,
        reference: PlaylistRef,
        chain: &'b mut Vec<String>,
        out: &'b mut Memberships,
    ) -> BoxFuture<'b, Result<()>> {
        async move {
            if out.contains_key(&reference) {
                return Ok(());
            }

            let local_id = match &reference {
                PlaylistRef::Remote(id) => {
                    if let Some(remote) = self.splaylists.get(id) {
                        out.insert(reference.clone(), remote.track_ids());
                    }
                    return Ok(());
                }
                PlaylistRef::Local(id) => id.clone(),
            };

            if chain.contains(&local_id) {
                warn!(
                    local_id = %local_id,
                    chain = ?chain,
                    "Playlist reference cycle, treating as empty"
                );
                return Ok(());
            }

            let Some(target) = self.playlists.iter().find(|p| p.local_id == local_id) else {
                return Ok(());
            };

            chain.push(local_id);
            for nested in target.rules.references() {
                self.resolve_ref(nested, chain, out).await?;
            }
            chain.pop();

            let ids = {
                let ctx = EvalContext::new(self.now, &*out);
                self.tracks.query(target, &ctx, self.max_entries).await?
            };
            out.insert(reference, ids.into_iter().collect());
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::repositories::MemoryTrackStore;
    use core_library::{Operator, Rule, RuleValue, Track};

    fn track(id: &str, genre: &str) -> Track {
        Track {
            id: id.to_string(),
            genre: genre.to_string(),
            ..Default::default()
        }
    }

    fn member_of(reference: &str) -> Rule {
        Rule::condition(
            "playlist",
            Operator::Eq,
            RuleValue::Text(reference.to_string()),
        )
    }

    async fn store() -> MemoryTrackStore {
        let store = MemoryTrackStore::new();
        store
            .upsert_tracks(
                "u1",
                vec![track("a", "Jazz"), track("b", "Jazz"), track("c", "Rock")],
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_resolves_nested_local_references() {
        let tracks = store().await;
        let playlists = vec![
            Playlist::new(
                "u1",
                "jazz",
                "Jazz",
                Rule::condition("genre", Operator::Eq, RuleValue::Text("Jazz".into())),
            ),
            Playlist::new("u1", "wrapper", "Wrapper", member_of("local:jazz")),
            Playlist::new("u1", "top", "Top", member_of("local:wrapper")),
        ];
        let cache = SplaylistCache::new();
        let resolver = MembershipResolver::new(&tracks, &playlists, &cache, Utc::now(), 1000);

        let resolved = resolver.resolve(&playlists[2]).await.unwrap();

        let wrapper = &resolved[&PlaylistRef::Local("wrapper".to_string())];
        assert_eq!(wrapper.len(), 2);
        assert!(wrapper.contains("a") && wrapper.contains("b"));
        assert!(resolved.contains_key(&PlaylistRef::Local("jazz".to_string())));
    }

    #[tokio::test]
    async fn test_cycle_resolves_to_empty() {
        let tracks = store().await;
        let playlists = vec![
            Playlist::new("u1", "x", "X", member_of("local:y")),
            Playlist::new("u1", "y", "Y", member_of("local:x")),
        ];
        let cache = SplaylistCache::new();
        let resolver = MembershipResolver::new(&tracks, &playlists, &cache, Utc::now(), 1000);

        let resolved = resolver.resolve(&playlists[0]).await.unwrap();
        assert!(resolved[&PlaylistRef::Local("y".to_string())].is_empty());
    }

    #[tokio::test]
    async fn test_unknown_references_are_absent() {
        let tracks = store().await;
        let playlists = vec![Playlist::new(
            "u1",
            "1",
            "Orphan",
            Rule::any(vec![member_of("local:missing"), member_of("remote:gone")]),
        )];
        let cache = SplaylistCache::new();
        let resolver = MembershipResolver::new(&tracks, &playlists, &cache, Utc::now(), 1000);

        assert!(resolver.resolve(&playlists[0]).await.unwrap().is_empty());
    }
}
