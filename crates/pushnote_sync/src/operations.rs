//! Event-sourced update operations.
//!
//! Each operation consumes the current ordered list and one [`ChangeEvent`]
//! and produces the next list plus a diff. Operations persist through the
//! [`LocalStore`] but never mutate the input list. A `None` diff means
//! "reload fully"; failed operations also return `None` and leave the list
//! unchanged.

use crate::changes::RepresentableChanges;
use crate::error::SyncError;
use crate::merge::{merge_to_representables, position_of, sorted_position};
use crate::store::{LocalStore, ObserverToken, StoreOp};
use pushnote_protocol::{
    ChangeEvent, LocalService, Representable, ServiceLike, ServicePayload, Snippet,
};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Inputs shared by every update operation.
pub struct UpdateContext<'a> {
    /// Store used for lookups and persistence.
    pub store: &'a dyn LocalStore,
    /// True once the last page of the remote list has been fetched.
    pub pagination_complete: bool,
    /// Observers that must not be notified of writes made here.
    pub skip_observers: &'a [ObserverToken],
}

impl<'a> UpdateContext<'a> {
    /// Creates a context that notifies every observer.
    pub fn new(store: &'a dyn LocalStore, pagination_complete: bool) -> Self {
        Self {
            store,
            pagination_complete,
            skip_observers: &[],
        }
    }

    /// Best-effort write: failures are logged, never propagated.
    fn persist(&self, ops: Vec<StoreOp>) {
        if let Err(e) = self.store.write(ops, self.skip_observers) {
            warn!(error = %e, "local write failed");
        }
    }
}

/// Result of an update operation.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    /// The next list.
    pub list: Vec<Representable>,
    /// Diff against the input list; `None` asks for a full reload.
    pub changes: Option<RepresentableChanges>,
}

impl UpdateOutcome {
    fn unchanged(list: &[Representable]) -> Self {
        Self {
            list: list.to_vec(),
            changes: None,
        }
    }

    fn partial(list: Vec<Representable>, changes: RepresentableChanges) -> Self {
        Self {
            list,
            changes: Some(changes),
        }
    }
}

/// Applies one change event to `list`.
pub fn apply_event(
    list: &[Representable],
    event: &ChangeEvent,
    ctx: &UpdateContext<'_>,
) -> UpdateOutcome {
    debug!(kind = event.kind(), len = list.len(), "applying change event");
    match event {
        ChangeEvent::Add(batch) => add(list, batch, ctx),
        ChangeEvent::Create(payload) => create(list, payload, ctx),
        ChangeEvent::Update(payload) => update(list, payload, ctx),
        ChangeEvent::Upsert(payload) => upsert(list, payload, ctx),
        ChangeEvent::Delete(id) => delete(list, id, ctx),
        ChangeEvent::ChangeMultiple(events) => change_multiple(list, events, ctx),
    }
}

fn add(list: &[Representable], batch: &[Snippet], ctx: &UpdateContext<'_>) -> UpdateOutcome {
    let locals: Vec<LocalService> = batch
        .iter()
        .filter_map(|snippet| ctx.store.service(&snippet.id))
        .collect();
    let merged = merge_to_representables(batch, &locals);
    if !merged.write_back.is_empty() {
        ctx.persist(
            merged
                .write_back
                .into_iter()
                .map(StoreOp::PutService)
                .collect(),
        );
    }

    let mut present: HashSet<_> = list.iter().map(|item| item.id().clone()).collect();
    let mut next = list.to_vec();
    let start = next.len();
    for item in merged.items {
        if present.insert(item.id().clone()) {
            next.push(item);
        } else {
            debug!(service_id = %item.id(), "skipping already surfaced service");
        }
    }

    let end = next.len();
    UpdateOutcome::partial(next, RepresentableChanges::insertions(start..end))
}

fn create(list: &[Representable], payload: &ServicePayload, ctx: &UpdateContext<'_>) -> UpdateOutcome {
    if position_of(list, &payload.id).is_some() {
        debug!(service_id = %payload.id, "create for surfaced service, updating instead");
        return update(list, payload, ctx);
    }

    let service = payload.resolve(ctx.store.service(&payload.id));
    ctx.persist(vec![StoreOp::PutService(service.clone())]);

    let position = sorted_position(list, &service);
    if position == list.len() && !ctx.pagination_complete {
        // Belongs past the fetched tail; a later page will surface it.
        return UpdateOutcome::unchanged(list);
    }

    let mut next = list.to_vec();
    next.insert(position, Representable::Full(service));
    UpdateOutcome::partial(next, RepresentableChanges::insertion(position))
}

fn update(list: &[Representable], payload: &ServicePayload, ctx: &UpdateContext<'_>) -> UpdateOutcome {
    let Some(index) = position_of(list, &payload.id) else {
        return update_unsurfaced(list, payload, ctx);
    };

    let stored = match &list[index] {
        Representable::Full(service) => Ok(service.clone()),
        Representable::Snippet(snippet) => ctx.store.service(&payload.id).ok_or(snippet),
    };
    let replacement = match stored {
        Ok(stored) => {
            let service = payload.resolve(Some(stored));
            ctx.persist(vec![StoreOp::PutService(service.clone())]);
            Representable::Full(service)
        }
        Err(snippet) => Representable::Snippet(payload.patch_snippet(snippet)),
    };

    let mut next = list.to_vec();
    if list[index].name() == replacement.name() {
        next[index] = replacement;
        return UpdateOutcome::partial(next, RepresentableChanges::modification(index));
    }

    next.remove(index);
    let position = sorted_position(&next, &replacement);
    if position == next.len() && !ctx.pagination_complete {
        // The last slot is ambiguous while pages remain; drop the item and
        // let the next page re-insert it.
        return UpdateOutcome::partial(next, RepresentableChanges::deletion(index));
    }

    next.insert(position, replacement);
    UpdateOutcome::partial(next, RepresentableChanges::moved(index, position))
}

fn update_unsurfaced(
    list: &[Representable],
    payload: &ServicePayload,
    ctx: &UpdateContext<'_>,
) -> UpdateOutcome {
    let Some(stored) = ctx.store.service(&payload.id) else {
        warn!(
            error = %SyncError::UnresolvedEntity(payload.id.clone()),
            "update for unknown service"
        );
        return UpdateOutcome::unchanged(list);
    };

    let service = payload.resolve(Some(stored));
    ctx.persist(vec![StoreOp::PutService(service.clone())]);

    let position = sorted_position(list, &service);
    if position < list.len() || ctx.pagination_complete {
        let mut next = list.to_vec();
        next.insert(position, Representable::Full(service));
        return UpdateOutcome::partial(next, RepresentableChanges::insertion(position));
    }

    UpdateOutcome::unchanged(list)
}

fn upsert(list: &[Representable], payload: &ServicePayload, ctx: &UpdateContext<'_>) -> UpdateOutcome {
    let exists =
        position_of(list, &payload.id).is_some() || ctx.store.service(&payload.id).is_some();
    if exists {
        update(list, payload, ctx)
    } else {
        create(list, payload, ctx)
    }
}

fn delete(
    list: &[Representable],
    id: &pushnote_protocol::ServiceId,
    ctx: &UpdateContext<'_>,
) -> UpdateOutcome {
    // Cascades to the service's notifications in the same transaction.
    ctx.persist(vec![StoreOp::DeleteService(id.clone())]);

    match position_of(list, id) {
        Some(index) => {
            let mut next = list.to_vec();
            next.remove(index);
            UpdateOutcome::partial(next, RepresentableChanges::deletion(index))
        }
        None => UpdateOutcome::unchanged(list),
    }
}

fn change_multiple(
    list: &[Representable],
    events: &[ChangeEvent],
    ctx: &UpdateContext<'_>,
) -> UpdateOutcome {
    let mut accumulator = list.to_vec();
    for event in events {
        accumulator = apply_event(&accumulator, event, ctx).list;
    }
    UpdateOutcome {
        list: accumulator,
        changes: None,
    }
}
