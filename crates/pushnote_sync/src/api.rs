//! REST API abstraction for the services endpoints.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use pushnote_protocol::{
    ChangeEvent, LocalService, PageRequest, ServiceId, ServicePayload, Snippet, SyncSummary,
};
use std::collections::{HashMap, VecDeque};

/// The REST endpoints consumed by the sync engine.
#[async_trait]
pub trait ServicesApi: Send + Sync {
    /// Fetches one page of remote snippets.
    async fn fetch_services(&self, page: &PageRequest) -> SyncResult<Vec<Snippet>>;

    /// Fetches the full projection of a single service.
    ///
    /// Returns [`SyncError::NotFound`] if the server does not know the id.
    async fn fetch_service(&self, id: &ServiceId) -> SyncResult<ServicePayload>;

    /// Sends one chunk of local summaries and returns the server's diff.
    async fn sync_services(&self, chunk: &[SyncSummary]) -> SyncResult<Vec<ChangeEvent>>;
}

/// A request recorded by [`MockServicesApi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiRequest {
    /// `GET services`.
    FetchServices(PageRequest),
    /// `GET service/{id}`.
    FetchService(ServiceId),
    /// `POST services/sync` with the chunk's ids.
    SyncServices(Vec<ServiceId>),
}

/// In-memory services API for testing.
#[derive(Debug, Default)]
pub struct MockServicesApi {
    catalog: Mutex<Vec<Snippet>>,
    details: Mutex<HashMap<ServiceId, ServicePayload>>,
    sync_responses: Mutex<VecDeque<Vec<ChangeEvent>>>,
    fail_next: Mutex<Option<SyncError>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl MockServicesApi {
    /// Creates an empty API.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an API serving `catalog` in the given order.
    pub fn with_catalog(catalog: Vec<Snippet>) -> Self {
        let api = Self::new();
        api.set_catalog(catalog);
        api
    }

    /// Replaces the remote catalog.
    pub fn set_catalog(&self, catalog: Vec<Snippet>) {
        *self.catalog.lock() = catalog;
    }

    /// Registers the detail projection of a service.
    pub fn set_detail(&self, service: &LocalService) {
        self.details
            .lock()
            .insert(service.id.clone(), ServicePayload::from(service));
    }

    /// Queues the response of the next `sync_services` call. Calls without a
    /// queued response return no changes.
    pub fn push_sync_response(&self, events: Vec<ChangeEvent>) {
        self.sync_responses.lock().push_back(events);
    }

    /// Makes the next call fail with `error`.
    pub fn fail_next(&self, error: SyncError) {
        *self.fail_next.lock() = Some(error);
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().clone()
    }

    /// Number of `GET services` requests received so far.
    pub fn page_requests(&self) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|request| matches!(request, ApiRequest::FetchServices(_)))
            .count()
    }

    fn record(&self, request: ApiRequest) -> SyncResult<()> {
        self.requests.lock().push(request);
        match self.fail_next.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ServicesApi for MockServicesApi {
    async fn fetch_services(&self, page: &PageRequest) -> SyncResult<Vec<Snippet>> {
        self.record(ApiRequest::FetchServices(page.clone()))?;
        let catalog = self.catalog.lock();
        let start = match &page.after {
            Some(after) => catalog
                .iter()
                .position(|snippet| &snippet.id == after)
                .map_or(catalog.len(), |index| index + 1),
            None => 0,
        };
        Ok(catalog
            .iter()
            .skip(start)
            .take(page.limit as usize)
            .cloned()
            .collect())
    }

    async fn fetch_service(&self, id: &ServiceId) -> SyncResult<ServicePayload> {
        self.record(ApiRequest::FetchService(id.clone()))?;
        self.details
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(id.clone()))
    }

    async fn sync_services(&self, chunk: &[SyncSummary]) -> SyncResult<Vec<ChangeEvent>> {
        self.record(ApiRequest::SyncServices(
            chunk.iter().map(|summary| summary.id.clone()).collect(),
        ))?;
        Ok(self.sync_responses.lock().pop_front().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(n: i64) -> Vec<Snippet> {
        (0..n).map(|i| Snippet::new(i, format!("s{i:03}"))).collect()
    }

    #[tokio::test]
    async fn pages_by_cursor() {
        let api = MockServicesApi::with_catalog(catalog(30));

        let first = api.fetch_services(&PageRequest::first(25)).await.unwrap();
        assert_eq!(first.len(), 25);

        let next = PageRequest {
            limit: 25,
            after: Some(first[24].id.clone()),
        };
        let second = api.fetch_services(&next).await.unwrap();
        assert_eq!(second.len(), 5);
        assert_eq!(second[0].id, ServiceId::Int(25));
        assert_eq!(api.page_requests(), 2);
    }

    #[tokio::test]
    async fn unknown_detail_is_not_found() {
        let api = MockServicesApi::new();
        assert!(matches!(
            api.fetch_service(&ServiceId::Int(3)).await,
            Err(SyncError::NotFound(ServiceId::Int(3)))
        ));

        api.set_detail(&LocalService::new(3, "c"));
        assert_eq!(api.fetch_service(&ServiceId::Int(3)).await.unwrap().name, "c");
    }

    #[tokio::test]
    async fn fail_next_fails_once() {
        let api = MockServicesApi::with_catalog(catalog(3));
        api.fail_next(SyncError::Api {
            status: 503,
            message: "unavailable".into(),
        });
        assert!(api.fetch_services(&PageRequest::first(25)).await.is_err());
        assert_eq!(api.fetch_services(&PageRequest::first(25)).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn sync_responses_are_consumed_in_order() {
        let api = MockServicesApi::new();
        api.push_sync_response(vec![ChangeEvent::Delete(ServiceId::Int(1))]);
        let summaries = vec![SyncSummary {
            id: ServiceId::Int(1),
            updated_at: None,
        }];

        assert_eq!(api.sync_services(&summaries).await.unwrap().len(), 1);
        assert!(api.sync_services(&summaries).await.unwrap().is_empty());
        assert_eq!(
            api.requests()[0],
            ApiRequest::SyncServices(vec![ServiceId::Int(1)])
        );
    }
}
