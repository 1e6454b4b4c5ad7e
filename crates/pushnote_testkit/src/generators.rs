//! Property-based test generators using proptest.
//!
//! Ids are drawn from a small range so generated events collide with
//! generated lists often enough to exercise the update paths.

use pushnote_protocol::{ChangeEvent, LocalService, ServiceId, Snippet};
use proptest::prelude::*;
use std::collections::HashSet;

/// Upper bound (exclusive) of generated integer ids.
pub const MAX_ID: i64 = 40;

/// Strategy for generating service ids.
pub fn service_id_strategy() -> impl Strategy<Value = ServiceId> {
    (0..MAX_ID).prop_map(ServiceId::Int)
}

/// Strategy for generating display names, mixing cases so that ordinal
/// ordering matters.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Ca-c]{1,3}").expect("Invalid regex")
}

/// Strategy for generating snippets.
pub fn snippet_strategy() -> impl Strategy<Value = Snippet> {
    (service_id_strategy(), name_strategy()).prop_map(|(id, name)| Snippet::new(id, name))
}

/// Strategy for generating local services.
pub fn local_service_strategy() -> impl Strategy<Value = LocalService> {
    (
        service_id_strategy(),
        name_strategy(),
        any::<bool>(),
        prop::option::of(0i64..1_000_000),
    )
        .prop_map(|(id, name, error, updated_at)| {
            let mut service = LocalService::new(id, name);
            service.error = error;
            service.updated_at = updated_at;
            service
        })
}

/// Strategy for generating snippet batches, possibly with duplicate ids.
pub fn snippet_batch_strategy(max_len: usize) -> impl Strategy<Value = Vec<Snippet>> {
    prop::collection::vec(snippet_strategy(), 0..=max_len)
}

/// Strategy for generating local services with unique ids.
pub fn unique_locals_strategy(max_len: usize) -> impl Strategy<Value = Vec<LocalService>> {
    prop::collection::vec(local_service_strategy(), 0..=max_len).prop_map(|services| {
        let mut seen = HashSet::new();
        services
            .into_iter()
            .filter(|service| seen.insert(service.id.clone()))
            .collect()
    })
}

/// Strategy for generating single-service change events and small `Add`
/// batches.
pub fn change_event_strategy() -> impl Strategy<Value = ChangeEvent> {
    prop_oneof![
        snippet_batch_strategy(5).prop_map(ChangeEvent::Add),
        local_service_strategy().prop_map(|service| ChangeEvent::Create(service.into())),
        local_service_strategy().prop_map(|service| ChangeEvent::Update(service.into())),
        local_service_strategy().prop_map(|service| ChangeEvent::Upsert(service.into())),
        service_id_strategy().prop_map(ChangeEvent::Delete),
    ]
}

/// Strategy for generating sequences of change events, occasionally grouped
/// into a `ChangeMultiple`.
pub fn change_sequence_strategy(max_len: usize) -> impl Strategy<Value = Vec<ChangeEvent>> {
    prop::collection::vec(
        prop_oneof![
            4 => change_event_strategy(),
            1 => prop::collection::vec(change_event_strategy(), 0..4)
                .prop_map(ChangeEvent::ChangeMultiple),
        ],
        0..=max_len,
    )
}

/// Strategy for generating page sizes up to `limit`.
pub fn page_sizes_strategy(limit: u32, max_pages: usize) -> impl Strategy<Value = Vec<u32>> {
    prop::collection::vec(0..=limit, 0..=max_pages)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_ids_are_in_range(id in service_id_strategy()) {
            match id {
                ServiceId::Int(value) => prop_assert!((0..MAX_ID).contains(&value)),
                ServiceId::Text(_) => prop_assert!(false),
            }
        }

        #[test]
        fn unique_locals_have_unique_ids(locals in unique_locals_strategy(20)) {
            let ids: HashSet<_> = locals.iter().map(|s| s.id.clone()).collect();
            prop_assert_eq!(ids.len(), locals.len());
        }
    }
}
