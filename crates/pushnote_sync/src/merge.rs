//! Representable merge engine.
//!
//! Pure functions combining remote snippets and local services into one
//! ordered list with at most one representable per id.

use pushnote_protocol::{LocalService, Representable, ServiceId, ServiceLike, Snippet};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Sort order of the merged list: name ascending (ordinal, case-sensitive),
/// ties broken by id ascending.
pub fn compare_services<A: ServiceLike + ?Sized, B: ServiceLike + ?Sized>(a: &A, b: &B) -> Ordering {
    a.name()
        .cmp(b.name())
        .then_with(|| a.id().cmp(b.id()))
}

/// Index at which `item` belongs in a sorted `list`.
pub fn sorted_position<T: ServiceLike>(list: &[Representable], item: &T) -> usize {
    list.partition_point(|existing| compare_services(existing, item) == Ordering::Less)
}

/// Index of the representable with `id`.
pub fn position_of(list: &[Representable], id: &ServiceId) -> Option<usize> {
    list.iter().position(|item| item.id() == id)
}

/// Output of [`merge_to_representables`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutput {
    /// Merged representables, in the order of the remote snippets.
    pub items: Vec<Representable>,
    /// Local services that absorbed remote changes and must be written back
    /// in a single transaction.
    pub write_back: Vec<LocalService>,
}

/// Merges remote snippets with the local services that share their ids.
///
/// A local service supersedes the snippet with the same id; remote changes
/// to its name or images are copied into it and flagged for write-back.
/// Duplicate ids within `remote` keep their first occurrence.
pub fn merge_to_representables(remote: &[Snippet], local: &[LocalService]) -> MergeOutput {
    let local_by_id: HashMap<&ServiceId, &LocalService> =
        local.iter().map(|service| (&service.id, service)).collect();
    let mut seen = HashSet::with_capacity(remote.len());
    let mut output = MergeOutput::default();

    for snippet in remote {
        if !seen.insert(&snippet.id) {
            continue;
        }
        match local_by_id.get(&snippet.id) {
            Some(existing) => {
                let mut service = (*existing).clone();
                if service.absorb_snippet(snippet) {
                    output.write_back.push(service.clone());
                }
                output.items.push(Representable::Full(service));
            }
            None => output.items.push(Representable::Snippet(snippet.clone())),
        }
    }

    output
}

/// Unions the current list with every local service not already present,
/// then sorts the result.
///
/// Used for offline/online transitions. A local service also replaces a
/// snippet with the same id.
pub fn merge_representables_and_local(
    representables: &[Representable],
    all_local: &[LocalService],
) -> Vec<Representable> {
    let local_by_id: HashMap<&ServiceId, &LocalService> =
        all_local.iter().map(|service| (&service.id, service)).collect();
    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(representables.len() + all_local.len());

    for item in representables {
        if !seen.insert(item.id().clone()) {
            continue;
        }
        match (item, local_by_id.get(item.id())) {
            (Representable::Snippet(_), Some(local)) => {
                merged.push(Representable::Full((*local).clone()))
            }
            _ => merged.push(item.clone()),
        }
    }
    for service in all_local {
        if seen.insert(service.id.clone()) {
            merged.push(Representable::Full(service.clone()));
        }
    }

    merged.sort_by(|a, b| compare_services(a, b));
    merged
}

/// True if no id appears twice in `list`.
pub fn has_unique_ids(list: &[Representable]) -> bool {
    let mut seen = HashSet::with_capacity(list.len());
    list.iter().all(|item| seen.insert(item.id()))
}
