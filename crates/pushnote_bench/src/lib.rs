//! Benchmark workloads for the Pushnote sync engine.

use pushnote_protocol::{LocalService, Representable, Snippet};
use pushnote_sync::compare_services;
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Generate a random display name of the specified length.
pub fn random_name(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generate a remote catalog of `count` snippets with ids `0..count`,
/// sorted the way the server returns it.
pub fn random_catalog(count: usize) -> Vec<Snippet> {
    let mut catalog: Vec<Snippet> = (0..count as i64)
        .map(|id| Snippet::new(id, random_name(12)))
        .collect();
    catalog.sort_by(|a, b| compare_services(a, b));
    catalog
}

/// Local copies of every `stride`-th catalog entry.
pub fn locals_for(catalog: &[Snippet], stride: usize) -> Vec<LocalService> {
    catalog
        .iter()
        .step_by(stride.max(1))
        .map(|snippet| LocalService::new(snippet.id.clone(), snippet.name.clone()))
        .collect()
}

/// Wraps snippets as representables.
pub fn as_list(catalog: &[Snippet]) -> Vec<Representable> {
    catalog.iter().cloned().map(Representable::Snippet).collect()
}
