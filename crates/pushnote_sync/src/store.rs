//! Local store adapter.
//!
//! The persistence engine is an external collaborator. The sync engine only
//! needs the capabilities captured by [`LocalStore`]: a name-sorted,
//! filterable view of local services, primary-key lookup, atomic
//! transactions, and change observation. [`MemoryStore`] is the in-process
//! implementation used by the CLI and tests.

use crate::error::{SyncError, SyncResult};
use crate::merge::compare_services;
use parking_lot::{Mutex, RwLock};
use pushnote_protocol::{LocalService, Notification, ServiceId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

/// Identifies a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverToken(u64);

/// Predicate selecting the services an observer is interested in.
pub type ServiceFilter = Arc<dyn Fn(&LocalService) -> bool + Send + Sync>;

/// A change notification delivered to an observer.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    /// Current contents at registration time.
    Initial(Vec<LocalService>),
    /// Contents changed. Deletions and modifications index the previous
    /// contents; insertions index the new contents.
    Update {
        /// New contents.
        services: Vec<LocalService>,
        /// Removed indices.
        deletions: Vec<usize>,
        /// Inserted indices.
        insertions: Vec<usize>,
        /// Modified indices.
        modifications: Vec<usize>,
    },
    /// The store failed; the observation is over.
    Error(String),
}

/// A single mutation inside a write transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    /// Insert or replace a service.
    PutService(LocalService),
    /// Delete a service together with its notifications.
    DeleteService(ServiceId),
    /// Insert or replace a notification.
    PutNotification(Notification),
    /// Set the read flag of a notification.
    SetNotificationRead {
        /// Notification id.
        id: u64,
        /// New read flag.
        read: bool,
    },
    /// Delete a notification.
    DeleteNotification(u64),
}

/// Capabilities the sync engine consumes from the persistence layer.
pub trait LocalStore: Send + Sync {
    /// All local services, sorted by name then id.
    fn services(&self) -> Vec<LocalService>;

    /// Looks up a service by primary key.
    fn service(&self, id: &ServiceId) -> Option<LocalService>;

    /// Notifications owned by a service, newest first.
    fn notifications(&self, service_id: &ServiceId) -> Vec<Notification>;

    /// Applies `ops` atomically. Observers listed in `skip` are not notified.
    fn write(&self, ops: Vec<StoreOp>, skip: &[ObserverToken]) -> SyncResult<()>;

    /// Observes the (optionally filtered) sorted collection of services.
    fn observe(&self, filter: Option<ServiceFilter>) -> (ObserverToken, Receiver<StoreChange>);

    /// Stops an observation.
    fn unobserve(&self, token: ObserverToken);

    /// Observes a single service.
    fn observe_service(&self, id: &ServiceId) -> (ObserverToken, Receiver<StoreChange>) {
        let id = id.clone();
        self.observe(Some(Arc::new(move |service: &LocalService| service.id == id)))
    }
}

#[derive(Debug, Clone, Default)]
struct StoreData {
    services: HashMap<ServiceId, LocalService>,
    notifications: BTreeMap<u64, Notification>,
}

impl StoreData {
    fn apply(&mut self, op: StoreOp) -> SyncResult<()> {
        match op {
            StoreOp::PutService(service) => {
                self.services.insert(service.id.clone(), service);
            }
            StoreOp::DeleteService(id) => {
                self.services.remove(&id);
                self.notifications.retain(|_, n| n.service_id != id);
            }
            StoreOp::PutNotification(notification) => {
                self.notifications.insert(notification.id, notification);
            }
            StoreOp::SetNotificationRead { id, read } => {
                let notification = self
                    .notifications
                    .get_mut(&id)
                    .ok_or_else(|| SyncError::Store(format!("notification {} not found", id)))?;
                notification.read = read;
            }
            StoreOp::DeleteNotification(id) => {
                if self.notifications.remove(&id).is_none() {
                    return Err(SyncError::Store(format!("notification {} not found", id)));
                }
            }
        }
        Ok(())
    }

    fn sorted(&self, filter: Option<&ServiceFilter>) -> Vec<LocalService> {
        let mut services: Vec<LocalService> = self
            .services
            .values()
            .filter(|s| filter.map_or(true, |f| f(*s)))
            .cloned()
            .collect();
        services.sort_by(|a, b| compare_services(a, b));
        services
    }
}

fn filtered(sorted: &[LocalService], filter: Option<&ServiceFilter>) -> Vec<LocalService> {
    match filter {
        Some(keep) => sorted.iter().filter(|s| keep(*s)).cloned().collect(),
        None => sorted.to_vec(),
    }
}

struct Observer {
    token: ObserverToken,
    filter: Option<ServiceFilter>,
    sender: Sender<StoreChange>,
}

/// An in-memory [`LocalStore`].
pub struct MemoryStore {
    data: RwLock<StoreData>,
    observers: Mutex<Vec<Observer>>,
    next_token: AtomicU64,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            data: RwLock::new(StoreData::default()),
            observers: Mutex::new(Vec::new()),
            next_token: AtomicU64::new(1),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Creates a store pre-populated with services.
    pub fn with_services(services: impl IntoIterator<Item = LocalService>) -> Self {
        let store = Self::new();
        {
            let mut data = store.data.write();
            for service in services {
                data.services.insert(service.id.clone(), service);
            }
        }
        store
    }

    /// Makes every subsequent write fail, to exercise error paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored notifications.
    pub fn notification_count(&self) -> usize {
        self.data.read().notifications.len()
    }

    /// Must run under the data write lock so no observer registers between
    /// the write and its notification.
    fn notify(&self, before: &StoreData, after: &StoreData, skip: &[ObserverToken]) {
        let mut observers = self.observers.lock();
        if observers.iter().all(|observer| skip.contains(&observer.token)) {
            return;
        }
        let old_all = before.sorted(None);
        let new_all = after.sorted(None);
        if old_all == new_all {
            return;
        }
        observers.retain(|observer| {
            if skip.contains(&observer.token) {
                return true;
            }
            let old = filtered(&old_all, observer.filter.as_ref());
            let new = filtered(&new_all, observer.filter.as_ref());
            if old == new {
                return true;
            }
            let change = collection_diff(&old, new);
            // A dropped receiver ends the observation.
            observer.sender.send(change).is_ok()
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn collection_diff(old: &[LocalService], new: Vec<LocalService>) -> StoreChange {
    let new_ids: HashSet<&ServiceId> = new.iter().map(|s| &s.id).collect();
    let old_by_id: HashMap<&ServiceId, &LocalService> = old.iter().map(|s| (&s.id, s)).collect();

    let deletions = old
        .iter()
        .enumerate()
        .filter(|(_, s)| !new_ids.contains(&s.id))
        .map(|(i, _)| i)
        .collect();
    let insertions = new
        .iter()
        .enumerate()
        .filter(|(_, s)| !old_by_id.contains_key(&s.id))
        .map(|(i, _)| i)
        .collect();
    let changed: HashSet<&ServiceId> = new
        .iter()
        .filter(|s| old_by_id.get(&s.id).is_some_and(|before| *before != *s))
        .map(|s| &s.id)
        .collect();
    let modifications = old
        .iter()
        .enumerate()
        .filter(|(_, s)| changed.contains(&s.id))
        .map(|(i, _)| i)
        .collect();

    StoreChange::Update {
        services: new,
        deletions,
        insertions,
        modifications,
    }
}

impl LocalStore for MemoryStore {
    fn services(&self) -> Vec<LocalService> {
        self.data.read().sorted(None)
    }

    fn service(&self, id: &ServiceId) -> Option<LocalService> {
        self.data.read().services.get(id).cloned()
    }

    fn notifications(&self, service_id: &ServiceId) -> Vec<Notification> {
        let mut notifications: Vec<Notification> = self
            .data
            .read()
            .notifications
            .values()
            .filter(|n| &n.service_id == service_id)
            .cloned()
            .collect();
        notifications.sort_by(|a, b| b.arrived_at.cmp(&a.arrived_at).then(b.id.cmp(&a.id)));
        notifications
    }

    fn write(&self, ops: Vec<StoreOp>, skip: &[ObserverToken]) -> SyncResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::Store("writes are disabled".into()));
        }
        if ops.is_empty() {
            return Ok(());
        }

        let mut data = self.data.write();
        let mut staged = data.clone();
        for op in ops {
            staged.apply(op)?;
        }
        let before = std::mem::replace(&mut *data, staged);
        self.notify(&before, &data, skip);
        Ok(())
    }

    fn observe(&self, filter: Option<ServiceFilter>) -> (ObserverToken, Receiver<StoreChange>) {
        let token = ObserverToken(self.next_token.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = mpsc::channel();
        // Same lock order as `write`: data, then observers.
        let data = self.data.read();
        let mut observers = self.observers.lock();
        let _ = sender.send(StoreChange::Initial(data.sorted(filter.as_ref())));
        observers.push(Observer {
            token,
            filter,
            sender,
        });
        (token, receiver)
    }

    fn unobserve(&self, token: ObserverToken) {
        self.observers.lock().retain(|observer| observer.token != token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pushnote_protocol::NotificationLevel;

    fn note(id: u64, service: i64) -> Notification {
        Notification::new(id, service, NotificationLevel::Info, "hello", id as i64)
    }

    #[test]
    fn services_are_sorted_by_name_then_id() {
        let store = MemoryStore::with_services(vec![
            LocalService::new(3, "beta"),
            LocalService::new(2, "Alpha"),
            LocalService::new(1, "beta"),
        ]);
        let ids: Vec<ServiceId> = store.services().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![ServiceId::Int(2), ServiceId::Int(1), ServiceId::Int(3)]);
    }

    #[test]
    fn delete_service_cascades_to_notifications() {
        let store = MemoryStore::with_services(vec![
            LocalService::new(1, "a"),
            LocalService::new(2, "b"),
        ]);
        store
            .write(
                vec![
                    StoreOp::PutNotification(note(10, 1)),
                    StoreOp::PutNotification(note(11, 1)),
                    StoreOp::PutNotification(note(12, 2)),
                ],
                &[],
            )
            .unwrap();
        assert_eq!(store.notifications(&ServiceId::Int(1)).len(), 2);

        store
            .write(vec![StoreOp::DeleteService(ServiceId::Int(1))], &[])
            .unwrap();
        assert!(store.service(&ServiceId::Int(1)).is_none());
        assert!(store.notifications(&ServiceId::Int(1)).is_empty());
        assert_eq!(store.notification_count(), 1);
    }

    #[test]
    fn failed_transaction_commits_nothing() {
        let store = MemoryStore::new();
        let result = store.write(
            vec![
                StoreOp::PutService(LocalService::new(1, "a")),
                StoreOp::SetNotificationRead { id: 99, read: true },
            ],
            &[],
        );
        assert!(result.is_err());
        assert!(store.services().is_empty());
    }

    #[test]
    fn mark_notification_read() {
        let store = MemoryStore::new();
        store
            .write(vec![StoreOp::PutNotification(note(1, 5))], &[])
            .unwrap();
        store
            .write(vec![StoreOp::SetNotificationRead { id: 1, read: true }], &[])
            .unwrap();
        assert!(store.notifications(&ServiceId::Int(5))[0].read);

        store
            .write(vec![StoreOp::DeleteNotification(1)], &[])
            .unwrap();
        assert_eq!(store.notification_count(), 0);
    }

    #[test]
    fn observers_receive_initial_and_updates() {
        let store = MemoryStore::with_services(vec![LocalService::new(1, "b")]);
        let (_token, changes) = store.observe(None);
        assert_eq!(
            changes.try_recv().unwrap(),
            StoreChange::Initial(vec![LocalService::new(1, "b")])
        );

        store
            .write(vec![StoreOp::PutService(LocalService::new(2, "a"))], &[])
            .unwrap();
        match changes.try_recv().unwrap() {
            StoreChange::Update {
                insertions,
                deletions,
                modifications,
                services,
            } => {
                assert_eq!(insertions, vec![0]);
                assert!(deletions.is_empty());
                assert!(modifications.is_empty());
                assert_eq!(services.len(), 2);
            }
            other => panic!("unexpected change {:?}", other),
        }
    }

    #[test]
    fn skipped_observer_is_not_notified() {
        let store = MemoryStore::new();
        let (token, changes) = store.observe(None);
        let _ = changes.try_recv();

        store
            .write(vec![StoreOp::PutService(LocalService::new(1, "a"))], &[token])
            .unwrap();
        assert!(changes.try_recv().is_err());
    }

    #[test]
    fn single_service_observation() {
        let store = MemoryStore::with_services(vec![
            LocalService::new(1, "a"),
            LocalService::new(2, "b"),
        ]);
        let (_token, changes) = store.observe_service(&ServiceId::Int(1));
        assert!(matches!(changes.try_recv().unwrap(), StoreChange::Initial(s) if s.len() == 1));

        // Unrelated writes are not reported.
        store
            .write(vec![StoreOp::PutService(LocalService::new(2, "c"))], &[])
            .unwrap();
        assert!(changes.try_recv().is_err());

        store
            .write(vec![StoreOp::PutService(LocalService::new(1, "z"))], &[])
            .unwrap();
        assert!(matches!(
            changes.try_recv().unwrap(),
            StoreChange::Update { modifications, .. } if modifications == vec![0]
        ));
    }

    #[test]
    fn observation_started_during_writes_misses_nothing() {
        let store = Arc::new(MemoryStore::new());
        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..200i64 {
                    let op = StoreOp::PutService(LocalService::new(i, format!("s{:03}", i)));
                    store.write(vec![op], &[]).unwrap();
                }
            })
        };
        std::thread::yield_now();
        let (_token, changes) = store.observe(None);
        writer.join().unwrap();

        let mut seen = match changes.try_recv().unwrap() {
            StoreChange::Initial(services) => services,
            other => panic!("unexpected change {:?}", other),
        };
        while let Ok(change) = changes.try_recv() {
            match change {
                StoreChange::Update {
                    services,
                    deletions,
                    insertions,
                    ..
                } => {
                    assert_eq!(seen.len() - deletions.len() + insertions.len(), services.len());
                    seen = services;
                }
                other => panic!("unexpected change {:?}", other),
            }
        }
        assert_eq!(seen, store.services());
    }

    #[test]
    fn filtered_observers_share_one_sort() {
        let store = MemoryStore::with_services(vec![
            LocalService::new(1, "c"),
            LocalService::new(2, "a"),
        ]);
        let (_all, all_changes) = store.observe(None);
        let (_one, one_changes) = store.observe_service(&ServiceId::Int(3));
        let _ = all_changes.try_recv();
        let _ = one_changes.try_recv();

        store
            .write(vec![StoreOp::PutService(LocalService::new(3, "b"))], &[])
            .unwrap();
        assert!(matches!(
            all_changes.try_recv().unwrap(),
            StoreChange::Update { insertions, .. } if insertions == vec![1]
        ));
        assert!(matches!(
            one_changes.try_recv().unwrap(),
            StoreChange::Update { services, insertions, .. }
                if insertions == vec![0] && services == vec![LocalService::new(3, "b")]
        ));
    }

    #[test]
    fn failing_writes() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        assert!(matches!(
            store.write(vec![StoreOp::DeleteNotification(1)], &[]),
            Err(SyncError::Store(_))
        ));
    }
}
