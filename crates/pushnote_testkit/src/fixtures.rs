//! Test fixtures for services, catalogs and push frames.
//!
//! Frame builders produce the exact JSON the push server sends, so tests
//! exercise the real decoder.

use pushnote_protocol::{LocalService, Representable, ServiceChangeKind, ServiceId, ServicePayload, Snippet};
use serde_json::{json, Value};

/// Creates a snippet.
pub fn snippet(id: i64, name: &str) -> Snippet {
    Snippet::new(id, name)
}

/// Creates a local service with every notification level enabled.
pub fn local(id: i64, name: &str) -> LocalService {
    LocalService::new(id, name)
}

/// Name of the `index`-th catalog entry. Zero-padded so that name order
/// matches index order.
pub fn catalog_name(index: i64) -> String {
    format!("service-{:04}", index)
}

/// A remote catalog of `count` snippets with ids `0..count`, sorted by name.
pub fn catalog(count: i64) -> Vec<Snippet> {
    (0..count).map(|i| Snippet::new(i, catalog_name(i))).collect()
}

/// Local copies of the catalog entries with the given ids.
pub fn catalog_locals(ids: impl IntoIterator<Item = i64>) -> Vec<LocalService> {
    ids.into_iter()
        .map(|i| LocalService::new(i, catalog_name(i)))
        .collect()
}

/// Wraps snippets as representables.
pub fn snippet_list(snippets: &[Snippet]) -> Vec<Representable> {
    snippets.iter().cloned().map(Representable::Snippet).collect()
}

/// Ids of a list, in order.
pub fn ids_of(list: &[Representable]) -> Vec<ServiceId> {
    list.iter()
        .map(|item| match item {
            Representable::Snippet(snippet) => snippet.id.clone(),
            Representable::Full(service) => service.id.clone(),
        })
        .collect()
}

/// `ready` frame.
pub fn ready_frame(session_id: &str, timestamp: i64) -> String {
    json!({
        "type": "ready",
        "data": { "sessionId": session_id, "timestamp": timestamp }
    })
    .to_string()
}

fn change_value(kind: ServiceChangeKind, service: &LocalService, timestamp: i64) -> Value {
    let mut payload = ServicePayload::from(service);
    payload.updated_at = Some(timestamp);
    json!({
        "serviceChangeData": kind,
        "service": payload,
    })
}

/// `service` frame carrying one change.
pub fn service_frame(kind: ServiceChangeKind, service: &LocalService, timestamp: i64) -> String {
    json!({
        "type": "service",
        "data": change_value(kind, service, timestamp),
    })
    .to_string()
}

/// `service` frame deleting a service.
pub fn delete_frame(id: i64, timestamp: i64) -> String {
    json!({
        "type": "service",
        "data": {
            "serviceChangeData": "delete",
            "service": { "id": id, "updatedAt": timestamp }
        }
    })
    .to_string()
}

/// `replay` frame carrying changes in order.
pub fn replay_frame(changes: &[(ServiceChangeKind, LocalService, i64)]) -> String {
    let data: Vec<Value> = changes
        .iter()
        .map(|(kind, service, timestamp)| change_value(*kind, service, *timestamp))
        .collect();
    json!({ "type": "replay", "data": data }).to_string()
}
