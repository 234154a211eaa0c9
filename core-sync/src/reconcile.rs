//! # Entry Reconciliation
//!
//! Computes the mutation batch turning a remote playlist's current entries
//! into the desired track order.
//!
//! 1. Current entries whose track is still desired are kept (first
//!    occurrence only), everything else is deleted.
//! 2. Desired tracks without a kept entry are appended, each under a fresh
//!    client id so neighbours can point at it before the remote assigns an
//!    entry id.
//! 3. Kept entries are numbered by their desired position, in current
//!    order. Entries on a longest increasing subsequence of those numbers
//!    are already correctly ordered relative to each other and stay put.
//! 4. Every other kept entry is reordered, and every append is placed,
//!    between its desired neighbours.
//!
//! Mutations are emitted deletes first, then in desired order, so applying
//! them one by one (each placed right after its preceding neighbour)
//! produces the desired list. The number of reorders is
//! `kept - lis_len`.

use crate::error::{Result, SyncError};
use crate::remote::{EntryMutation, EntryPlacement, MutationResponse, RemoteEntry};
use std::collections::{HashMap, HashSet};
use tracing::debug;
use uuid::Uuid;

/// Mutation batch for one remote playlist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub mutations: Vec<EntryMutation>,
    pub deletes: usize,
    pub appends: usize,
    pub reorders: usize,
    /// Reorders anchored between an existing entry and a pending append
    pub mixed_reorders: usize,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

enum Slot<'a> {
    Kept(&'a RemoteEntry),
    Added(String),
}

impl Slot<'_> {
    fn id(&self) -> &str {
        match self {
            Slot::Kept(entry) => &entry.id,
            Slot::Added(client_id) => client_id,
        }
    }

    fn is_pending(&self) -> bool {
        matches!(self, Slot::Added(_))
    }
}

/// Plan the mutations turning `current` into `desired`.
///
/// `desired` is the ordered track id list; duplicate ids after the first
/// are ignored. `current` must already be in list order.
pub fn reconcile(playlist_id: &str, desired: &[String], current: &[RemoteEntry]) -> ReconcilePlan {
    let mut positions: HashMap<&str, usize> = HashMap::with_capacity(desired.len());
    let mut order: Vec<&str> = Vec::with_capacity(desired.len());
    for track_id in desired {
        if !positions.contains_key(track_id.as_str()) {
            positions.insert(track_id, order.len());
            order.push(track_id);
        }
    }

    let mut slots: Vec<Option<Slot>> = (0..order.len()).map(|_| None).collect();
    let mut kept_positions = Vec::new();
    let mut deleted = Vec::new();
    for entry in current {
        match positions.get(entry.track_id.as_str()) {
            Some(&pos) if slots[pos].is_none() => {
                slots[pos] = Some(Slot::Kept(entry));
                kept_positions.push(pos);
            }
            _ => deleted.push(entry),
        }
    }

    let slots: Vec<Slot> = slots
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| Slot::Added(Uuid::new_v4().to_string())))
        .collect();

    let anchored: HashSet<usize> = longest_increasing_subsequence(&kept_positions)
        .into_iter()
        .map(|i| kept_positions[i])
        .collect();

    let mut plan = ReconcilePlan::default();
    for entry in deleted {
        plan.mutations.push(EntryMutation::Delete(entry.id.clone()));
        plan.deletes += 1;
    }

    for (pos, slot) in slots.iter().enumerate() {
        let preceding = pos.checked_sub(1).map(|p| &slots[p]);
        let following = slots.get(pos + 1);
        let placement = EntryPlacement {
            playlist_id: playlist_id.to_string(),
            track_id: order[pos].to_string(),
            preceding_entry_id: preceding.map(|s| s.id().to_string()),
            following_entry_id: following.map(|s| s.id().to_string()),
        };

        match slot {
            Slot::Added(client_id) => {
                plan.mutations.push(EntryMutation::Create {
                    client_id: client_id.clone(),
                    placement,
                });
                plan.appends += 1;
            }
            Slot::Kept(entry) if !anchored.contains(&pos) => {
                if let (Some(prev), Some(next)) = (preceding, following) {
                    if prev.is_pending() != next.is_pending() {
                        plan.mixed_reorders += 1;
                    }
                }
                plan.mutations.push(EntryMutation::Update {
                    id: entry.id.clone(),
                    placement,
                });
                plan.reorders += 1;
            }
            Slot::Kept(_) => {}
        }
    }

    debug!(
        playlist_id,
        kept = kept_positions.len(),
        anchored = anchored.len(),
        deletes = plan.deletes,
        appends = plan.appends,
        reorders = plan.reorders,
        mixed_reorders = plan.mixed_reorders,
        "Planned entry mutations"
    );

    plan
}

/// Indices into `seq` of one longest strictly increasing subsequence.
pub fn longest_increasing_subsequence(seq: &[usize]) -> Vec<usize> {
    // tails[k]: index of the smallest tail of an increasing run of length k + 1
    let mut tails: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; seq.len()];

    for (i, &value) in seq.iter().enumerate() {
        let k = tails.partition_point(|&t| seq[t] < value);
        if k > 0 {
            prev[i] = Some(tails[k - 1]);
        }
        if k == tails.len() {
            tails.push(i);
        } else {
            tails[k] = i;
        }
    }

    let mut out = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        out.push(i);
        cursor = prev[i];
    }
    out.reverse();
    out
}

/// Apply an acknowledged batch to a local copy of the entries.
///
/// `responses` pair up with `mutations` by position; created entries take
/// the id the remote assigned. Mutations run in order, each placed right
/// after its preceding neighbour, at the front when it has none, before its
/// following neighbour when the preceding one is unknown, else at the end.
///
/// # Errors
///
/// [`SyncError::MalformedResponse`] when the response count does not match.
pub fn apply_mutations(
    current: &[RemoteEntry],
    mutations: &[EntryMutation],
    responses: &[MutationResponse],
) -> Result<Vec<RemoteEntry>> {
    if responses.len() != mutations.len() {
        return Err(SyncError::MalformedResponse(format!(
            "expected {} mutation responses, got {}",
            mutations.len(),
            responses.len()
        )));
    }

    let mut assigned: HashMap<&str, &str> = HashMap::new();
    let mut entries: Vec<RemoteEntry> = current.to_vec();

    for (mutation, response) in mutations.iter().zip(responses) {
        match mutation {
            EntryMutation::Delete(id) => entries.retain(|e| &e.id != id),
            EntryMutation::Create {
                client_id,
                placement,
            } => {
                assigned.insert(client_id, &response.id);
                let entry = RemoteEntry::new(response.id.clone(), placement.track_id.clone());
                place(&mut entries, entry, placement, &assigned);
            }
            EntryMutation::Update { id, placement } => {
                let Some(index) = entries.iter().position(|e| &e.id == id) else {
                    continue;
                };
                let entry = entries.remove(index);
                place(&mut entries, entry, placement, &assigned);
            }
        }
    }

    relink(&mut entries);
    Ok(entries)
}

fn place(
    entries: &mut Vec<RemoteEntry>,
    entry: RemoteEntry,
    placement: &EntryPlacement,
    assigned: &HashMap<&str, &str>,
) {
    let locate = |id: &str| {
        let id = assigned.get(id).copied().unwrap_or(id);
        entries.iter().position(|e| e.id == id)
    };

    let index = match placement.preceding_entry_id.as_deref() {
        None => 0,
        Some(prev) => match locate(prev) {
            Some(i) => i + 1,
            None => placement
                .following_entry_id
                .as_deref()
                .and_then(locate)
                .unwrap_or(entries.len()),
        },
    };
    entries.insert(index, entry);
}

fn relink(entries: &mut [RemoteEntry]) {
    let ids: Vec<String> = entries.iter().map(|e| e.id.clone()).collect();
    for (i, entry) in entries.iter_mut().enumerate() {
        entry.preceding_entry_id = i.checked_sub(1).map(|p| ids[p].clone());
        entry.following_entry_id = ids.get(i + 1).cloned();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(tracks: &[&str]) -> Vec<RemoteEntry> {
        let mut out: Vec<RemoteEntry> = tracks
            .iter()
            .map(|t| RemoteEntry::new(format!("e-{t}"), *t))
            .collect();
        relink(&mut out);
        out
    }

    fn desired(tracks: &[&str]) -> Vec<String> {
        tracks.iter().map(|t| t.to_string()).collect()
    }

    fn acknowledge(plan: &ReconcilePlan) -> Vec<MutationResponse> {
        plan.mutations
            .iter()
            .map(|m| match m {
                EntryMutation::Create { client_id, .. } => MutationResponse {
                    id: format!("new-{client_id}"),
                    client_id: Some(client_id.clone()),
                },
                EntryMutation::Update { id, .. } | EntryMutation::Delete(id) => MutationResponse {
                    id: id.clone(),
                    client_id: None,
                },
            })
            .collect()
    }

    fn tracks(entries: &[RemoteEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.track_id.as_str()).collect()
    }

    #[test]
    fn test_lis_indices() {
        assert_eq!(longest_increasing_subsequence(&[]), Vec::<usize>::new());
        assert_eq!(longest_increasing_subsequence(&[2, 0, 1]), vec![1, 2]);
        assert_eq!(longest_increasing_subsequence(&[3, 2, 1, 0]).len(), 1);
        assert_eq!(
            longest_increasing_subsequence(&[0, 8, 4, 12, 2, 10, 6, 14, 1, 9]).len(),
            4
        );
    }

    #[test]
    fn test_reorder_scenario() {
        let current = entries(&["A", "B", "C", "D"]);
        let plan = reconcile("p", &desired(&["B", "D", "A", "E"]), &current);

        assert_eq!(plan.deletes, 1);
        assert_eq!(plan.mutations[0], EntryMutation::Delete("e-C".to_string()));
        assert_eq!(plan.appends, 1);
        // B and D keep their relative order, only A moves.
        assert_eq!(plan.reorders, 1);
        assert!(plan.mutations.iter().any(|m| matches!(
            m,
            EntryMutation::Update { id, placement }
                if id == "e-A" && placement.preceding_entry_id.as_deref() == Some("e-D")
        )));

        let applied = apply_mutations(&current, &plan.mutations, &acknowledge(&plan)).unwrap();
        assert_eq!(tracks(&applied), vec!["B", "D", "A", "E"]);
    }

    #[test]
    fn test_empty_current_only_appends() {
        let plan = reconcile("p", &desired(&["x", "y", "z"]), &[]);
        assert_eq!((plan.deletes, plan.appends, plan.reorders), (0, 3, 0));

        let applied = apply_mutations(&[], &plan.mutations, &acknowledge(&plan)).unwrap();
        assert_eq!(tracks(&applied), vec!["x", "y", "z"]);
        assert_eq!(applied[1].preceding_entry_id, Some(applied[0].id.clone()));
    }

    #[test]
    fn test_second_pass_is_empty() {
        let current = entries(&["a", "b", "c", "d", "e"]);
        let target = desired(&["e", "c", "a", "f"]);

        let first = reconcile("p", &target, &current);
        let applied = apply_mutations(&current, &first.mutations, &acknowledge(&first)).unwrap();
        let second = reconcile("p", &target, &applied);

        assert!(second.is_empty());
        assert_eq!(second, ReconcilePlan::default());
    }

    #[test]
    fn test_duplicate_entries_are_deleted() {
        let mut current = vec![
            RemoteEntry::new("e1", "a"),
            RemoteEntry::new("e2", "b"),
            RemoteEntry::new("e3", "a"),
        ];
        relink(&mut current);
        let plan = reconcile("p", &desired(&["a", "b"]), &current);

        assert_eq!(plan.mutations, vec![EntryMutation::Delete("e3".to_string())]);
        let applied = apply_mutations(&current, &plan.mutations, &acknowledge(&plan)).unwrap();
        assert_eq!(tracks(&applied), vec!["a", "b"]);
    }

    #[test]
    fn test_mixed_reorders_are_counted() {
        // a and b anchor the order; c lands between the new x and b.
        let current = entries(&["c", "a", "b"]);
        let plan = reconcile("p", &desired(&["a", "x", "c", "b"]), &current);
        assert_eq!((plan.appends, plan.reorders), (1, 1));
        assert_eq!(plan.mixed_reorders, 1);

        let applied = apply_mutations(&current, &plan.mutations, &acknowledge(&plan)).unwrap();
        assert_eq!(tracks(&applied), vec!["a", "x", "c", "b"]);
    }

    #[test]
    fn test_apply_rejects_short_response() {
        let plan = reconcile("p", &desired(&["x"]), &[]);
        assert!(matches!(
            apply_mutations(&[], &plan.mutations, &[]),
            Err(SyncError::MalformedResponse(_))
        ));
    }
}
