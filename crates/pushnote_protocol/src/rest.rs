//! REST request payloads.

use crate::service::{LocalService, ServiceId};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

/// Characters escaped in a URL path segment or query value: everything
/// except RFC 3986 unreserved characters.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encodes an id for use as a single URL path segment or query value.
pub fn encode_component(id: &ServiceId) -> String {
    utf8_percent_encode(&id.to_string(), COMPONENT).to_string()
}

/// Query for one page of `GET services`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Maximum number of snippets to return.
    pub limit: u32,
    /// Cursor: return services after this id.
    pub after: Option<ServiceId>,
}

impl PageRequest {
    /// Creates a request for the first page.
    pub fn first(limit: u32) -> Self {
        Self { limit, after: None }
    }

    /// Renders the request as a query string (without the leading `?`).
    pub fn query_string(&self) -> String {
        match &self.after {
            Some(after) => format!("limit={}&after={}", self.limit, encode_component(after)),
            None => format!("limit={}", self.limit),
        }
    }
}

/// Summary of a local service sent to `POST services/sync`.
///
/// The server answers each chunk with the change events needed to bring the
/// local copy up to date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    /// Service identifier.
    pub id: ServiceId,
    /// Local last-update time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl From<&LocalService> for SyncSummary {
    fn from(service: &LocalService) -> Self {
        Self {
            id: service.id.clone(),
            updated_at: service.updated_at,
        }
    }
}

/// Splits local services into sync summaries of at most `chunk_size`.
///
/// An empty input still yields one empty chunk so the server can report
/// services the client has never seen.
pub fn chunk_summaries(services: &[LocalService], chunk_size: usize) -> Vec<Vec<SyncSummary>> {
    if services.is_empty() {
        return vec![Vec::new()];
    }
    services
        .chunks(chunk_size.max(1))
        .map(|chunk| chunk.iter().map(SyncSummary::from).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_query_string() {
        assert_eq!(PageRequest::first(25).query_string(), "limit=25");
        let next = PageRequest {
            limit: 25,
            after: Some(ServiceId::from("svc-25")),
        };
        assert_eq!(next.query_string(), "limit=25&after=svc-25");
    }

    #[test]
    fn cursor_with_reserved_characters_is_escaped() {
        let next = PageRequest {
            limit: 25,
            after: Some(ServiceId::from("a&limit=1000 #x")),
        };
        assert_eq!(next.query_string(), "limit=25&after=a%26limit%3D1000%20%23x");
    }

    #[test]
    fn path_segments_cannot_traverse() {
        assert_eq!(
            encode_component(&ServiceId::from("x/../admin?y")),
            "x%2F..%2Fadmin%3Fy"
        );
        assert_eq!(encode_component(&ServiceId::from("naïve~1")), "na%C3%AFve~1");
        assert_eq!(encode_component(&ServiceId::Int(42)), "42");
    }

    #[test]
    fn chunking() {
        let services: Vec<LocalService> = (0..5i64)
            .map(|i| LocalService::new(i, format!("s{}", i)))
            .collect();
        let chunks = chunk_summaries(&services, 2);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].len(), 1);
        assert_eq!(chunks[2][0].id, ServiceId::Int(4));
    }

    #[test]
    fn empty_input_yields_one_empty_chunk() {
        assert_eq!(chunk_summaries(&[], 100), vec![Vec::new()]);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn chunks_cover_input_in_order(count in 1usize..300, size in 1usize..120) {
                let services: Vec<LocalService> = (0..count as i64)
                    .map(|i| LocalService::new(i, format!("s{}", i)))
                    .collect();
                let chunks = chunk_summaries(&services, size);

                prop_assert_eq!(chunks.len(), count.div_ceil(size));
                prop_assert!(chunks.iter().all(|chunk| !chunk.is_empty() && chunk.len() <= size));
                let ids: Vec<ServiceId> = chunks.into_iter().flatten().map(|s| s.id).collect();
                let expected: Vec<ServiceId> = services.into_iter().map(|s| s.id).collect();
                prop_assert_eq!(ids, expected);
            }
        }
    }
}
