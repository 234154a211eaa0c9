//! Track query engine.
//!
//! Turns a playlist definition into its desired, ordered track list:
//! filter by the compiled rule tree, sort by the playlist's sort keys, then
//! truncate to the playlist limit (never more than the remote maximum).
//!
//! Ties are always broken by track id so results do not depend on the order
//! tracks were stored in.

use crate::error::Result;
use crate::models::{FieldKind, Playlist, SortOrder, SortSpec, Track, TrackField, RANDOM_SORT};
use crate::rules::{compile, EvalContext};
use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

/// Largest list the remote playlist service stores.
pub const MAX_PLAYLIST_SIZE: usize = 1000;

/// Tracks selected by `playlist`, sorted and truncated to
/// `min(limit, max_entries, MAX_PLAYLIST_SIZE)`.
pub fn query<'t, I>(
    tracks: I,
    playlist: &Playlist,
    ctx: &EvalContext<'_>,
    max_entries: usize,
) -> Result<Vec<&'t Track>>
where
    I: IntoIterator<Item = &'t Track>,
{
    let predicate = compile(&playlist.rules, ctx)?;
    let selected: Vec<&Track> = match predicate {
        Some(predicate) => tracks.into_iter().filter(|&track| predicate(track)).collect(),
        None => tracks.into_iter().collect(),
    };

    let mut ordered = order_tracks(selected, &playlist.sorts);
    ordered.truncate(playlist.effective_limit(max_entries.min(MAX_PLAYLIST_SIZE)));
    Ok(ordered)
}

/// Sort an explicit set of tracks by `sorts`, ignoring any rules.
pub fn order_tracks<'t, I>(tracks: I, sorts: &[SortSpec]) -> Vec<&'t Track>
where
    I: IntoIterator<Item = &'t Track>,
{
    let keys: Vec<SortKey> = sorts.iter().filter_map(SortKey::from_spec).collect();
    let mut ordered: Vec<&Track> = tracks.into_iter().collect();
    ordered.sort_by(|a, b| compare(a, b, &keys));
    ordered
}

enum SortField {
    Field(TrackField),
    Random,
}

struct SortKey {
    field: SortField,
    order: SortOrder,
}

impl SortKey {
    fn from_spec(spec: &SortSpec) -> Option<Self> {
        let field = if spec.sort_by == RANDOM_SORT {
            SortField::Random
        } else {
            SortField::Field(spec.sort_by.parse().ok()?)
        };
        Some(Self {
            field,
            order: spec.order,
        })
    }
}

fn compare(a: &Track, b: &Track, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let ordering = match key.field {
            SortField::Random => random_rank(&a.id).cmp(&random_rank(&b.id)),
            SortField::Field(field) => match field.kind() {
                FieldKind::String => cmp_ignore_case(a.text(field), b.text(field)),
                _ => a.number(field).cmp(&b.number(field)),
            },
        };
        let ordering = match key.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.id.cmp(&b.id)
}

fn cmp_ignore_case(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
        .then_with(|| a.cmp(b))
}

fn session_seed() -> u64 {
    static SEED: OnceLock<u64> = OnceLock::new();
    *SEED.get_or_init(rand::random)
}

/// Position of `id` in the process-wide random order.
///
/// Stable for the lifetime of the process, different between runs.
pub fn random_rank(id: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    session_seed().hash(&mut hasher);
    id.hash(&mut hasher);
    hasher.finish()
}
