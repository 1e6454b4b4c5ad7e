//! Synchronization orchestrator.
//!
//! The orchestrator owns the authoritative ordered list. All list mutations
//! happen on a [`SerialQueue`]; the queue state is never touched from the
//! public side. Completions are marshalled back through a channel and turned
//! into [`ViewEvent`]s by [`SyncOrchestrator::next_event`], which is the only
//! place public state changes.
//!
//! ## Flows
//!
//! - **Reconciliation**: all local services are summarized in chunks and sent
//!   to the server; the returned changes are applied as one
//!   `ChangeMultiple`. Runs on the first authorization of the session and
//!   is followed by the first page fetch.
//! - **Paging**: fetch, adapter, update. A failed fetch cancels the other two.
//! - **Push**: each change received from the push channel becomes one update
//!   operation, in arrival order.
//! - **Offline/online**: losing connectivity freezes the list and replaces it
//!   with the union of the list and every local service; the next
//!   authorization restores the frozen list.

use crate::api::ServicesApi;
use crate::changes::RepresentableChanges;
use crate::config::SyncConfig;
use crate::connection::{ConnectionEvent, ConnectionState, DisconnectReason};
use crate::error::{SyncError, SyncResult};
use crate::merge::merge_representables_and_local;
use crate::operations::{apply_event, UpdateContext};
use crate::pagination::{PaginationState, PaginationTracker};
use crate::push::PushConnection;
use crate::queue::{slot, CancelFlag, QueueOperation, SerialQueue, Slot};
use crate::snapshot::ListSnapshot;
use crate::store::{LocalStore, ObserverToken, StoreChange, StoreOp};
use async_trait::async_trait;
use pushnote_protocol::{
    chunk_summaries, ChangeEvent, DisconnectCode, PageRequest, Representable, ServiceId, Snippet,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// State of the list view.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewState {
    /// Not started.
    Idle,
    /// Waiting for the first reconciliation or page.
    Loading,
    /// Content available.
    Loaded,
    /// The last REST request failed; [`SyncOrchestrator::retry`] recovers.
    Error(SyncError),
}

/// Event delivered to the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    /// The published list changed.
    ListChanged(RepresentableChanges),
    /// A page fetch started or finished.
    FetchingChanged(bool),
    /// A REST request failed.
    Error(SyncError),
    /// The service shown in the detail view no longer exists.
    CloseDetail(ServiceId),
    /// The push connection changed state.
    ConnectionChanged(ConnectionState),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Flow {
    Page,
    Reconcile,
    Push,
    Offline,
    Online,
    Detail(ServiceId),
    LocalRefresh,
}

#[derive(Debug)]
enum Outcome {
    Published {
        list: Option<Vec<Representable>>,
        changes: Option<RepresentableChanges>,
    },
    Failed(SyncError),
    ServiceMissing(ServiceId),
}

#[derive(Debug)]
struct Completion {
    flow: Flow,
    pagination: PaginationState,
    outcome: Outcome,
}

/// State owned by the serial queue.
struct QueueState {
    store: Arc<dyn LocalStore>,
    api: Arc<dyn ServicesApi>,
    list: ListSnapshot,
    pagination: PaginationTracker,
    offline_snapshot: Option<ListSnapshot>,
    sync_chunk_size: usize,
    skip_observers: Vec<ObserverToken>,
    completions: mpsc::UnboundedSender<Completion>,
}

impl QueueState {
    fn complete(&self, flow: Flow, outcome: Outcome) {
        let completion = Completion {
            flow,
            pagination: self.pagination.state().clone(),
            outcome,
        };
        if self.completions.send(completion).is_err() {
            trace!("orchestrator gone, dropping completion");
        }
    }

    /// Resolves the snapshot. The flag is true if vanished services were
    /// dropped, in which case incremental diffs are meaningless.
    fn current_list(&self) -> (Vec<Representable>, bool) {
        match self.list.resolve(self.store.as_ref()) {
            Ok(list) => (list, false),
            Err(e) => {
                warn!(error = %e, "list snapshot is stale");
                (self.list.resolve_lossy(self.store.as_ref()), true)
            }
        }
    }

    fn publish(&mut self, flow: Flow, list: Vec<Representable>, changes: RepresentableChanges) {
        self.list = ListSnapshot::freeze(&list);
        self.complete(
            flow,
            Outcome::Published {
                list: Some(list),
                changes: Some(changes),
            },
        );
    }

    fn apply(&mut self, flow: Flow, event: &ChangeEvent) {
        let (current, lossy) = self.current_list();
        let outcome = {
            let ctx = UpdateContext {
                store: self.store.as_ref(),
                pagination_complete: self.pagination.is_fully_paginated(),
                skip_observers: &self.skip_observers,
            };
            apply_event(&current, event, &ctx)
        };

        if outcome.list == current && !lossy {
            self.complete(
                flow,
                Outcome::Published {
                    list: None,
                    changes: None,
                },
            );
            return;
        }

        let changes = match outcome.changes {
            Some(changes) if !lossy => changes,
            _ => RepresentableChanges::Full,
        };
        self.publish(flow, outcome.list, changes);
    }
}

struct FetchPageOp {
    output: Slot<Vec<Snippet>>,
    dependents: CancelFlag,
}

#[async_trait]
impl QueueOperation<QueueState> for FetchPageOp {
    fn name(&self) -> &'static str {
        "fetch_page"
    }

    async fn run(&mut self, state: &mut QueueState) {
        let request = PageRequest {
            limit: state.pagination.limit(),
            after: state.pagination.next_page_cursor().cloned(),
        };
        debug!(query = %request.query_string(), "fetching page");
        match state.api.fetch_services(&request).await {
            Ok(page) => *self.output.lock() = Some(page),
            Err(e) => {
                warn!(error = %e, "page fetch failed");
                self.dependents.cancel();
                state.complete(Flow::Page, Outcome::Failed(e));
            }
        }
    }
}

struct PageAdapterOp {
    input: Slot<Vec<Snippet>>,
    output: Slot<ChangeEvent>,
}

#[async_trait]
impl QueueOperation<QueueState> for PageAdapterOp {
    fn name(&self) -> &'static str {
        "page_adapter"
    }

    async fn run(&mut self, state: &mut QueueState) {
        let page = self.input.lock().take().unwrap_or_default();
        state.pagination.update_state(&page);
        debug!(count = page.len(), state = ?state.pagination.state(), "page received");
        *self.output.lock() = Some(ChangeEvent::Add(page));
    }
}

struct ReconcileFetchOp {
    output: Slot<Vec<ChangeEvent>>,
    dependents: CancelFlag,
}

#[async_trait]
impl QueueOperation<QueueState> for ReconcileFetchOp {
    fn name(&self) -> &'static str {
        "reconcile_fetch"
    }

    async fn run(&mut self, state: &mut QueueState) {
        let locals = state.store.services();
        let chunks = chunk_summaries(&locals, state.sync_chunk_size);
        info!(services = locals.len(), chunks = chunks.len(), "reconciling local services");

        let mut events = Vec::new();
        for chunk in &chunks {
            match state.api.sync_services(chunk).await {
                Ok(changes) => events.extend(changes),
                Err(e) => {
                    warn!(error = %e, "reconciliation failed");
                    self.dependents.cancel();
                    state.complete(Flow::Reconcile, Outcome::Failed(e));
                    return;
                }
            }
        }
        *self.output.lock() = Some(events);
    }
}

struct ReconcileAdapterOp {
    input: Slot<Vec<ChangeEvent>>,
    output: Slot<ChangeEvent>,
}

#[async_trait]
impl QueueOperation<QueueState> for ReconcileAdapterOp {
    fn name(&self) -> &'static str {
        "reconcile_adapter"
    }

    async fn run(&mut self, _state: &mut QueueState) {
        let events = self.input.lock().take().unwrap_or_default();
        debug!(count = events.len(), "reconciliation changes received");
        *self.output.lock() = Some(ChangeEvent::ChangeMultiple(events));
    }
}

enum EventSource {
    Ready(ChangeEvent),
    Pending(Slot<ChangeEvent>),
}

struct UpdateOp {
    flow: Flow,
    source: EventSource,
}

#[async_trait]
impl QueueOperation<QueueState> for UpdateOp {
    fn name(&self) -> &'static str {
        "update"
    }

    async fn run(&mut self, state: &mut QueueState) {
        let event = match &self.source {
            EventSource::Ready(event) => Some(event.clone()),
            EventSource::Pending(input) => input.lock().take(),
        };
        match event {
            Some(event) => state.apply(self.flow.clone(), &event),
            None => {
                debug!(flow = ?self.flow, "update ran without an event");
                state.complete(
                    self.flow.clone(),
                    Outcome::Published {
                        list: None,
                        changes: None,
                    },
                );
            }
        }
    }
}

struct GoOfflineOp;

#[async_trait]
impl QueueOperation<QueueState> for GoOfflineOp {
    fn name(&self) -> &'static str {
        "go_offline"
    }

    async fn run(&mut self, state: &mut QueueState) {
        let (current, _) = state.current_list();
        if state.offline_snapshot.is_none() {
            state.offline_snapshot = Some(state.list.clone());
        }
        let merged = merge_representables_and_local(&current, &state.store.services());
        info!(count = merged.len(), "switched to offline list");
        state.publish(Flow::Offline, merged, RepresentableChanges::Full);
    }
}

struct RestoreOnlineOp;

#[async_trait]
impl QueueOperation<QueueState> for RestoreOnlineOp {
    fn name(&self) -> &'static str {
        "restore_online"
    }

    async fn run(&mut self, state: &mut QueueState) {
        match state.offline_snapshot.take() {
            Some(snapshot) => {
                let restored = snapshot.resolve_lossy(state.store.as_ref());
                info!(count = restored.len(), "restored online list");
                state.publish(Flow::Online, restored, RepresentableChanges::Full);
            }
            None => state.complete(
                Flow::Online,
                Outcome::Published {
                    list: None,
                    changes: None,
                },
            ),
        }
    }
}

struct FetchServiceOp {
    id: ServiceId,
}

#[async_trait]
impl QueueOperation<QueueState> for FetchServiceOp {
    fn name(&self) -> &'static str {
        "fetch_service"
    }

    async fn run(&mut self, state: &mut QueueState) {
        let flow = Flow::Detail(self.id.clone());
        match state.api.fetch_service(&self.id).await {
            Ok(payload) => {
                // A viewed service is kept locally, so the upsert finds it
                // in the store and surfaces it as full.
                let service = payload.resolve(state.store.service(&self.id));
                let stored = state
                    .store
                    .write(vec![StoreOp::PutService(service)], &state.skip_observers);
                if let Err(e) = stored {
                    warn!(error = %e, service_id = %self.id, "could not store viewed service");
                }
                state.apply(flow, &ChangeEvent::Upsert(payload));
            }
            Err(SyncError::NotFound(id)) => {
                info!(service_id = %id, "service no longer exists");
                state.complete(flow, Outcome::ServiceMissing(id));
            }
            Err(e) => {
                warn!(error = %e, service_id = %self.id, "service fetch failed");
                state.complete(flow, Outcome::Failed(e));
            }
        }
    }
}

struct LocalRefreshOp;

#[async_trait]
impl QueueOperation<QueueState> for LocalRefreshOp {
    fn name(&self) -> &'static str {
        "local_refresh"
    }

    async fn run(&mut self, state: &mut QueueState) {
        let (current, _) = state.current_list();
        state.publish(Flow::LocalRefresh, current, RepresentableChanges::Full);
    }
}

fn forward_store_changes(
    receiver: std::sync::mpsc::Receiver<StoreChange>,
    sender: mpsc::UnboundedSender<StoreChange>,
) {
    let spawned = std::thread::Builder::new()
        .name("pushnote-store-observer".into())
        .spawn(move || {
            while let Ok(change) = receiver.recv() {
                if sender.send(change).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "store observation unavailable");
    }
}

async fn recv_optional<T>(receiver: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

/// Coordinates pagination, reconciliation, push updates and offline mode
/// around a single serial queue.
pub struct SyncOrchestrator {
    store: Arc<dyn LocalStore>,
    queue: Option<SerialQueue<QueueState>>,
    completions: mpsc::UnboundedReceiver<Completion>,
    connection: Option<PushConnection>,
    connection_events: Option<mpsc::UnboundedReceiver<ConnectionEvent>>,
    store_changes: Option<mpsc::UnboundedReceiver<StoreChange>>,
    observer: ObserverToken,

    list: Vec<Representable>,
    pagination: PaginationState,
    is_fetching: bool,
    synchronized: bool,
    reconciling: bool,
    offline_mode: bool,
    refresh_pending: bool,
    view_state: ViewState,
    connection_state: ConnectionState,
    open_service: Option<ServiceId>,
    pending: VecDeque<ViewEvent>,
}

impl SyncOrchestrator {
    /// Creates an orchestrator and spawns its queue. Must be called inside a
    /// tokio runtime.
    pub fn new(config: &SyncConfig, api: Arc<dyn ServicesApi>, store: Arc<dyn LocalStore>) -> Self {
        let (observer, store_rx) = store.observe(None);
        let (store_tx, store_changes) = mpsc::unbounded_channel();
        forward_store_changes(store_rx, store_tx);

        let (completion_tx, completions) = mpsc::unbounded_channel();
        let queue = SerialQueue::spawn(QueueState {
            store: Arc::clone(&store),
            api,
            list: ListSnapshot::default(),
            pagination: PaginationTracker::new(config.page_limit),
            offline_snapshot: None,
            sync_chunk_size: config.sync_chunk_size,
            skip_observers: vec![observer],
            completions: completion_tx,
        });

        Self {
            store,
            queue: Some(queue),
            completions,
            connection: None,
            connection_events: None,
            store_changes: Some(store_changes),
            observer,
            list: Vec::new(),
            pagination: PaginationState::Initial,
            is_fetching: false,
            synchronized: false,
            reconciling: false,
            offline_mode: false,
            refresh_pending: false,
            view_state: ViewState::Idle,
            connection_state: ConnectionState::Disconnected(DisconnectReason::Initial),
            open_service: None,
            pending: VecDeque::new(),
        }
    }

    /// Attaches a push connection and its event stream.
    pub fn attach_push(
        &mut self,
        connection: PushConnection,
        events: mpsc::UnboundedReceiver<ConnectionEvent>,
    ) {
        self.connection = Some(connection);
        self.connection_events = Some(events);
    }

    /// Starts the session.
    ///
    /// With a push connection attached, reconciliation waits for the first
    /// authorization. Without one, it starts immediately.
    pub fn start(&mut self) -> SyncResult<()> {
        self.view_state = ViewState::Loading;
        match &self.connection {
            Some(connection) => connection.connect(),
            None => {
                self.enqueue_reconcile();
                Ok(())
            }
        }
    }

    /// Published list.
    pub fn list(&self) -> &[Representable] {
        &self.list
    }

    /// Pagination state as of the last completed operation.
    pub fn pagination(&self) -> &PaginationState {
        &self.pagination
    }

    /// True while a page fetch is in flight.
    pub fn is_fetching(&self) -> bool {
        self.is_fetching
    }

    /// True once reconciliation succeeded this session.
    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    /// True while the push channel reports no connectivity.
    pub fn is_offline(&self) -> bool {
        self.offline_mode
    }

    /// View state.
    pub fn view_state(&self) -> &ViewState {
        &self.view_state
    }

    /// Last known push connection state.
    pub fn connection_state(&self) -> &ConnectionState {
        &self.connection_state
    }

    /// Service shown in the detail view.
    pub fn open_service_id(&self) -> Option<&ServiceId> {
        self.open_service.as_ref()
    }

    /// The local store.
    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    fn enqueue<O>(&self, op: O) -> SyncResult<CancelFlag>
    where
        O: QueueOperation<QueueState> + 'static,
    {
        self.queue.as_ref().ok_or(SyncError::QueueClosed)?.enqueue(op)
    }

    fn enqueue_with<O>(&self, op: O, cancel: CancelFlag) -> SyncResult<()>
    where
        O: QueueOperation<QueueState> + 'static,
    {
        self.queue
            .as_ref()
            .ok_or(SyncError::QueueClosed)?
            .enqueue_with(op, cancel)
    }

    /// Fetches the next page if pagination allows it, no fetch is in flight
    /// and the session is synchronized. Returns true if a fetch started.
    pub fn fetch_next_page(&mut self) -> bool {
        if !self.pagination.allows_pagination(self.offline_mode)
            || self.is_fetching
            || !self.synchronized
        {
            return false;
        }

        let fetched = slot();
        let event = slot();
        let dependents = CancelFlag::new();
        let enqueued = self
            .enqueue(FetchPageOp {
                output: fetched.clone(),
                dependents: dependents.clone(),
            })
            .and_then(|_| {
                self.enqueue_with(
                    PageAdapterOp {
                        input: fetched,
                        output: event.clone(),
                    },
                    dependents.clone(),
                )
            })
            .and_then(|_| {
                self.enqueue_with(
                    UpdateOp {
                        flow: Flow::Page,
                        source: EventSource::Pending(event),
                    },
                    dependents,
                )
            });
        if let Err(e) = enqueued {
            warn!(error = %e, "could not enqueue page fetch");
            return false;
        }

        self.is_fetching = true;
        self.pending.push_back(ViewEvent::FetchingChanged(true));
        true
    }

    fn enqueue_reconcile(&mut self) {
        let fetched = slot();
        let event = slot();
        let dependents = CancelFlag::new();
        let enqueued = self
            .enqueue(ReconcileFetchOp {
                output: fetched.clone(),
                dependents: dependents.clone(),
            })
            .and_then(|_| {
                self.enqueue_with(
                    ReconcileAdapterOp {
                        input: fetched,
                        output: event.clone(),
                    },
                    dependents.clone(),
                )
            })
            .and_then(|_| {
                self.enqueue_with(
                    UpdateOp {
                        flow: Flow::Reconcile,
                        source: EventSource::Pending(event),
                    },
                    dependents,
                )
            });
        match enqueued {
            Ok(()) => self.reconciling = true,
            Err(e) => warn!(error = %e, "could not enqueue reconciliation"),
        }
    }

    /// Re-runs the flow that failed: reconciliation if the session is not
    /// synchronized yet, otherwise the next page fetch.
    pub fn retry(&mut self) -> bool {
        if !self.synchronized {
            if self.reconciling {
                return false;
            }
            self.view_state = ViewState::Loading;
            self.enqueue_reconcile();
            return self.reconciling;
        }
        self.fetch_next_page()
    }

    /// Fetches a service for the detail view. If the server no longer knows
    /// it, a [`ViewEvent::CloseDetail`] follows.
    pub fn open_service(&mut self, id: ServiceId) -> SyncResult<()> {
        self.open_service = Some(id.clone());
        self.enqueue(FetchServiceOp { id })?;
        Ok(())
    }

    /// Closes the detail view.
    pub fn close_service(&mut self) {
        self.open_service = None;
    }

    fn close_detail_if_open(&mut self, id: &ServiceId) {
        if self.open_service.as_ref() == Some(id) {
            self.open_service = None;
            self.pending.push_back(ViewEvent::CloseDetail(id.clone()));
        }
    }

    /// Handles an event from the push connection.
    pub fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::StateChanged(state) => {
                self.connection_state = state.clone();
                self.pending
                    .push_back(ViewEvent::ConnectionChanged(state.clone()));
                match state {
                    ConnectionState::Authorized { .. } => self.on_authorized(),
                    ConnectionState::Disconnected(DisconnectReason::Disconnect(
                        DisconnectCode::NoConnectivity,
                    )) => self.go_offline(),
                    _ => {}
                }
            }
            ConnectionEvent::Change(change) => {
                if let ChangeEvent::Delete(id) = &change {
                    self.close_detail_if_open(id);
                }
                let op = UpdateOp {
                    flow: Flow::Push,
                    source: EventSource::Ready(change),
                };
                if let Err(e) = self.enqueue(op) {
                    warn!(error = %e, "dropping push change");
                }
            }
        }
    }

    fn on_authorized(&mut self) {
        if self.offline_mode {
            self.offline_mode = false;
            if let Err(e) = self.enqueue(RestoreOnlineOp) {
                warn!(error = %e, "could not enqueue online restore");
            }
            if self.synchronized && self.pagination == PaginationState::Initial {
                self.synchronized = false;
            }
        }
        if !self.synchronized && !self.reconciling {
            self.enqueue_reconcile();
        }
    }

    fn go_offline(&mut self) {
        if self.offline_mode {
            return;
        }
        info!("push channel reports no connectivity, entering offline mode");
        self.offline_mode = true;
        if let Err(e) = self.enqueue(GoOfflineOp) {
            warn!(error = %e, "could not enqueue offline switch");
        }
    }

    fn handle_store_change(&mut self, change: StoreChange) {
        match change {
            StoreChange::Initial(_) => {}
            StoreChange::Update { .. } => {
                if self.refresh_pending {
                    return;
                }
                match self.enqueue(LocalRefreshOp) {
                    Ok(_) => self.refresh_pending = true,
                    Err(e) => debug!(error = %e, "skipping local refresh"),
                }
            }
            StoreChange::Error(message) => {
                warn!(error = %message, "store observation failed");
                self.store_changes = None;
            }
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        let Completion {
            flow,
            pagination,
            outcome,
        } = completion;
        self.pagination = pagination;
        trace!(?flow, "operation completed");

        match outcome {
            Outcome::Published { list, changes } => {
                if let Some(list) = list {
                    if list != self.list {
                        self.list = list;
                        self.pending.push_back(ViewEvent::ListChanged(
                            changes.unwrap_or(RepresentableChanges::Full),
                        ));
                    }
                }
                match flow {
                    Flow::Page => {
                        self.finish_fetching();
                        self.view_state = ViewState::Loaded;
                    }
                    Flow::Reconcile => {
                        info!("session synchronized");
                        self.reconciling = false;
                        self.synchronized = true;
                        self.view_state = ViewState::Loaded;
                        self.fetch_next_page();
                    }
                    Flow::LocalRefresh => self.refresh_pending = false,
                    Flow::Push | Flow::Offline | Flow::Online | Flow::Detail(_) => {}
                }
            }
            Outcome::Failed(error) => {
                match flow {
                    Flow::Page => self.finish_fetching(),
                    Flow::Reconcile => self.reconciling = false,
                    _ => {}
                }
                if matches!(flow, Flow::Page | Flow::Reconcile) {
                    self.view_state = ViewState::Error(error.clone());
                }
                self.pending.push_back(ViewEvent::Error(error));
            }
            Outcome::ServiceMissing(id) => self.close_detail_if_open(&id),
        }
    }

    fn finish_fetching(&mut self) {
        if self.is_fetching {
            self.is_fetching = false;
            self.pending.push_back(ViewEvent::FetchingChanged(false));
        }
    }

    /// Waits for the next view event. Returns `None` once every source has
    /// closed.
    pub async fn next_event(&mut self) -> Option<ViewEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            tokio::select! {
                Some(completion) = self.completions.recv() => self.handle_completion(completion),
                event = recv_optional(&mut self.connection_events),
                    if self.connection_events.is_some() => match event {
                    Some(event) => self.handle_connection_event(event),
                    None => self.connection_events = None,
                },
                change = recv_optional(&mut self.store_changes),
                    if self.store_changes.is_some() => match change {
                    Some(change) => self.handle_store_change(change),
                    None => self.store_changes = None,
                },
                else => return None,
            }
        }
    }

    /// Shuts down the push connection and drains the queue.
    pub async fn shutdown(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.shutdown();
        }
        self.store.unobserve(self.observer);
        if let Some(queue) = self.queue.take() {
            if let Err(e) = queue.close().await {
                warn!(error = %e, "queue did not shut down cleanly");
            }
        }
        // Flush completions produced while draining.
        while let Ok(completion) = self.completions.try_recv() {
            self.handle_completion(completion);
        }
        info!("orchestrator stopped");
    }
}

impl Drop for SyncOrchestrator {
    fn drop(&mut self) {
        self.store.unobserve(self.observer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockServicesApi;
    use crate::store::MemoryStore;
    use pushnote_protocol::LocalService;
    use std::time::Duration;
    use tokio::time::timeout;

    fn catalog(n: i64) -> Vec<Snippet> {
        (0..n).map(|i| Snippet::new(i, format!("svc {i:03}"))).collect()
    }

    async fn next(orchestrator: &mut SyncOrchestrator) -> ViewEvent {
        timeout(Duration::from_secs(5), orchestrator.next_event())
            .await
            .expect("timed out waiting for view event")
            .expect("event sources closed")
    }

    async fn wait_for<F: Fn(&ViewEvent) -> bool>(
        orchestrator: &mut SyncOrchestrator,
        predicate: F,
    ) -> ViewEvent {
        loop {
            let event = next(orchestrator).await;
            if predicate(&event) {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn start_without_push_reconciles_then_fetches_first_page() {
        let api = Arc::new(MockServicesApi::with_catalog(catalog(30)));
        let store = Arc::new(MemoryStore::new());
        let mut orchestrator = SyncOrchestrator::new(&SyncConfig::default(), api.clone(), store);

        orchestrator.start().unwrap();
        assert_eq!(next(&mut orchestrator).await, ViewEvent::FetchingChanged(true));
        assert_eq!(
            next(&mut orchestrator).await,
            ViewEvent::ListChanged(RepresentableChanges::insertions(0..25))
        );
        assert_eq!(next(&mut orchestrator).await, ViewEvent::FetchingChanged(false));
        assert!(orchestrator.is_synchronized());
        assert_eq!(orchestrator.list().len(), 25);
        assert!(matches!(
            orchestrator.pagination(),
            PaginationState::PartiallyPaginated { .. }
        ));

        assert!(orchestrator.fetch_next_page());
        assert!(!orchestrator.fetch_next_page());
        wait_for(&mut orchestrator, |e| *e == ViewEvent::FetchingChanged(false)).await;
        assert_eq!(orchestrator.list().len(), 30);
        assert_eq!(orchestrator.pagination(), &PaginationState::Paginated);
        assert!(!orchestrator.fetch_next_page());
    }

    #[tokio::test]
    async fn failed_page_fetch_surfaces_error_and_retries() {
        let api = Arc::new(MockServicesApi::with_catalog(catalog(3)));
        let store = Arc::new(MemoryStore::new());
        let mut orchestrator = SyncOrchestrator::new(&SyncConfig::default(), api.clone(), store);

        api.push_sync_response(Vec::new());
        orchestrator.start().unwrap();
        // Reconciliation consumes the first call; the page fetch fails.
        let failure = SyncError::Api {
            status: 500,
            message: "boom".into(),
        };
        wait_for(&mut orchestrator, |e| *e == ViewEvent::FetchingChanged(true)).await;
        api.fail_next(failure.clone());

        let event = wait_for(&mut orchestrator, |e| matches!(e, ViewEvent::Error(_))).await;
        assert_eq!(event, ViewEvent::Error(failure.clone()));
        assert!(!orchestrator.is_fetching());
        assert!(orchestrator.list().is_empty());
        assert_eq!(orchestrator.view_state(), &ViewState::Error(failure));

        assert!(orchestrator.retry());
        wait_for(&mut orchestrator, |e| *e == ViewEvent::FetchingChanged(false)).await;
        assert_eq!(orchestrator.list().len(), 3);
        assert_eq!(orchestrator.view_state(), &ViewState::Loaded);
    }

    #[tokio::test]
    async fn missing_service_closes_detail() {
        let api = Arc::new(MockServicesApi::new());
        let store = Arc::new(MemoryStore::new());
        let mut orchestrator = SyncOrchestrator::new(&SyncConfig::default(), api.clone(), store);

        orchestrator.open_service(ServiceId::Int(4)).unwrap();
        assert_eq!(
            next(&mut orchestrator).await,
            ViewEvent::CloseDetail(ServiceId::Int(4))
        );
        assert!(orchestrator.open_service_id().is_none());
    }

    #[tokio::test]
    async fn opening_service_materializes_it_locally() {
        let api = Arc::new(MockServicesApi::new());
        api.set_detail(&LocalService::new(4, "Four"));
        let store = Arc::new(MemoryStore::new());
        let mut orchestrator =
            SyncOrchestrator::new(&SyncConfig::default(), api.clone(), store.clone());

        orchestrator.open_service(ServiceId::Int(4)).unwrap();
        orchestrator.shutdown().await;
        assert!(store.service(&ServiceId::Int(4)).is_some());
    }

    #[tokio::test]
    async fn out_of_band_local_edits_refresh_the_list() {
        let api = Arc::new(MockServicesApi::with_catalog(vec![Snippet::new(1, "one")]));
        let store = Arc::new(MemoryStore::with_services(vec![LocalService::new(1, "one")]));
        let mut orchestrator =
            SyncOrchestrator::new(&SyncConfig::default(), api.clone(), store.clone());

        orchestrator.start().unwrap();
        wait_for(&mut orchestrator, |e| *e == ViewEvent::FetchingChanged(false)).await;

        let mut edited = LocalService::new(1, "one");
        edited.api_key = "rotated".into();
        store
            .write(vec![crate::store::StoreOp::PutService(edited)], &[])
            .unwrap();

        assert_eq!(
            next(&mut orchestrator).await,
            ViewEvent::ListChanged(RepresentableChanges::Full)
        );
        assert_eq!(
            orchestrator.list()[0].as_full().map(|s| s.api_key.as_str()),
            Some("rotated")
        );
    }
}
