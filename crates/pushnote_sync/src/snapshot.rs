//! Thread-safe, point-in-time projections of the merged list.
//!
//! Local services are owned by the store. A snapshot never carries them
//! across the queue boundary: it freezes the list into snippets and service
//! ids, and the consuming operation re-resolves the ids against the store.

use crate::error::{SyncError, SyncResult};
use crate::store::LocalStore;
use pushnote_protocol::{Representable, ServiceId, ServiceLike, Snippet};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
enum SnapshotEntry {
    Snippet(Snippet),
    Local(ServiceId),
}

/// Immutable id-projection of an ordered representable list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListSnapshot {
    entries: Arc<[SnapshotEntry]>,
}

impl ListSnapshot {
    /// Freezes a list.
    pub fn freeze(list: &[Representable]) -> Self {
        let entries: Vec<SnapshotEntry> = list
            .iter()
            .map(|item| match item {
                Representable::Snippet(snippet) => SnapshotEntry::Snippet(snippet.clone()),
                Representable::Full(service) => SnapshotEntry::Local(service.id.clone()),
            })
            .collect();
        Self {
            entries: entries.into(),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids in list order.
    pub fn ids(&self) -> Vec<ServiceId> {
        self.entries
            .iter()
            .map(|entry| match entry {
                SnapshotEntry::Snippet(snippet) => snippet.id().clone(),
                SnapshotEntry::Local(id) => id.clone(),
            })
            .collect()
    }

    /// Re-resolves the snapshot into live representables.
    ///
    /// Fails if a local service has vanished from the store since the
    /// snapshot was taken.
    pub fn resolve(&self, store: &dyn LocalStore) -> SyncResult<Vec<Representable>> {
        self.entries
            .iter()
            .map(|entry| match entry {
                SnapshotEntry::Snippet(snippet) => Ok(Representable::Snippet(snippet.clone())),
                SnapshotEntry::Local(id) => store
                    .service(id)
                    .map(Representable::Full)
                    .ok_or_else(|| SyncError::UnresolvedEntity(id.clone())),
            })
            .collect()
    }

    /// Like [`Self::resolve`], but drops local services that have vanished.
    pub fn resolve_lossy(&self, store: &dyn LocalStore) -> Vec<Representable> {
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                SnapshotEntry::Snippet(snippet) => Some(Representable::Snippet(snippet.clone())),
                SnapshotEntry::Local(id) => {
                    let service = store.service(id);
                    if service.is_none() {
                        warn!(service_id = %id, "dropping vanished service from snapshot");
                    }
                    service.map(Representable::Full)
                }
            })
            .collect()
    }
}
