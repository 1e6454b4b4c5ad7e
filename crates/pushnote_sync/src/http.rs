//! HTTP implementation of [`ServicesApi`].
//!
//! The actual HTTP client is abstracted via a trait so the engine does not
//! depend on a particular HTTP library; the CLI plugs in reqwest.

use crate::api::ServicesApi;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use pushnote_protocol::{
    encode_component, ChangeEvent, PageRequest, ServiceChangeData, ServiceId, ServicePayload,
    Snippet, SyncSummary,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

/// Status and body of an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Raw body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// True for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// Errors are transport failures (no response at all); HTTP error statuses
/// are returned as responses.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a GET request.
    async fn get(&self, url: &str) -> Result<HttpResponse, String>;

    /// Sends a POST request with a JSON body.
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse, String>;
}

#[derive(Serialize)]
struct SyncRequestBody<'a> {
    services: &'a [SyncSummary],
}

/// HTTP-based services API using JSON bodies.
pub struct HttpServicesApi<C: HttpClient> {
    /// Base URL of the API (e.g., "https://api.example.com/v1").
    base_url: String,
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpServicesApi<C> {
    /// Creates a new API client.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn check(&self, response: HttpResponse) -> SyncResult<Vec<u8>> {
        if response.is_success() {
            *self.last_error.write() = None;
            return Ok(response.body);
        }
        let message: String = String::from_utf8_lossy(&response.body)
            .chars()
            .take(200)
            .collect();
        *self.last_error.write() = Some(message.clone());
        Err(match response.status {
            401 | 403 => SyncError::Authorization(message),
            status => SyncError::Api { status, message },
        })
    }

    fn transport_error(&self, err: String) -> SyncError {
        *self.last_error.write() = Some(err.clone());
        SyncError::transport_retryable(err)
    }

    fn decode<T: DeserializeOwned>(body: &[u8]) -> SyncResult<T> {
        serde_json::from_slice(body)
            .map_err(|e| SyncError::Protocol(format!("failed to decode response: {}", e)))
    }
}

#[async_trait]
impl<C: HttpClient> ServicesApi for HttpServicesApi<C> {
    async fn fetch_services(&self, page: &PageRequest) -> SyncResult<Vec<Snippet>> {
        let url = self.url(&format!("services?{}", page.query_string()));
        debug!(%url, "fetching services page");
        let response = self
            .client
            .get(&url)
            .await
            .map_err(|e| self.transport_error(e))?;
        Self::decode(&self.check(response)?)
    }

    async fn fetch_service(&self, id: &ServiceId) -> SyncResult<ServicePayload> {
        let url = self.url(&format!("service/{}", encode_component(id)));
        let response = self
            .client
            .get(&url)
            .await
            .map_err(|e| self.transport_error(e))?;
        if response.status == 404 {
            return Err(SyncError::NotFound(id.clone()));
        }
        Self::decode(&self.check(response)?)
    }

    async fn sync_services(&self, chunk: &[SyncSummary]) -> SyncResult<Vec<ChangeEvent>> {
        let body = serde_json::to_vec(&SyncRequestBody { services: chunk })
            .map_err(|e| SyncError::Protocol(format!("failed to encode request: {}", e)))?;
        let response = self
            .client
            .post(&self.url("services/sync"), body)
            .await
            .map_err(|e| self.transport_error(e))?;
        let changes: Vec<ServiceChangeData> = Self::decode(&self.check(response)?)?;
        Ok(changes.into_iter().map(ChangeEvent::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pushnote_protocol::LocalService;

    #[derive(Default)]
    struct TestClient {
        response: Mutex<Option<HttpResponse>>,
        requests: Mutex<Vec<(String, Option<Vec<u8>>)>>,
    }

    impl TestClient {
        fn respond(&self, status: u16, body: &str) {
            *self.response.lock() = Some(HttpResponse {
                status,
                body: body.as_bytes().to_vec(),
            });
        }

        fn take(&self) -> Result<HttpResponse, String> {
            self.response
                .lock()
                .clone()
                .ok_or_else(|| "connection refused".to_string())
        }
    }

    #[async_trait]
    impl HttpClient for TestClient {
        async fn get(&self, url: &str) -> Result<HttpResponse, String> {
            self.requests.lock().push((url.to_string(), None));
            self.take()
        }

        async fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse, String> {
            self.requests.lock().push((url.to_string(), Some(body)));
            self.take()
        }
    }

    #[tokio::test]
    async fn fetch_services_builds_cursor_query() {
        let api = HttpServicesApi::new("https://api.example.com/", TestClient::default());
        api.client.respond(200, r#"[{"id":26,"name":"Zed"}]"#);

        let page = PageRequest {
            limit: 25,
            after: Some(ServiceId::Int(25)),
        };
        let snippets = api.fetch_services(&page).await.unwrap();
        assert_eq!(snippets, vec![Snippet::new(26, "Zed")]);
        assert_eq!(
            api.client.requests.lock()[0].0,
            "https://api.example.com/services?limit=25&after=25"
        );
    }

    #[tokio::test]
    async fn text_ids_are_escaped_in_urls() {
        let api = HttpServicesApi::new("https://api.example.com", TestClient::default());
        api.client.respond(200, "[]");
        let page = PageRequest {
            limit: 25,
            after: Some(ServiceId::from("a&limit=1000 #x")),
        };
        api.fetch_services(&page).await.unwrap();

        api.client.respond(200, r#"{"id":"x/../admin?y","name":"Odd"}"#);
        let payload = api
            .fetch_service(&ServiceId::from("x/../admin?y"))
            .await
            .unwrap();
        assert_eq!(payload.name, "Odd");

        let requests = api.client.requests.lock();
        assert_eq!(
            requests[0].0,
            "https://api.example.com/services?limit=25&after=a%26limit%3D1000%20%23x"
        );
        assert_eq!(
            requests[1].0,
            "https://api.example.com/service/x%2F..%2Fadmin%3Fy"
        );
    }

    #[tokio::test]
    async fn missing_service_is_not_found() {
        let api = HttpServicesApi::new("https://api.example.com", TestClient::default());
        api.client.respond(404, "no such service");
        assert!(matches!(
            api.fetch_service(&ServiceId::Int(9)).await,
            Err(SyncError::NotFound(ServiceId::Int(9)))
        ));
    }

    #[tokio::test]
    async fn sync_posts_summaries_and_decodes_changes() {
        let api = HttpServicesApi::new("https://api.example.com", TestClient::default());
        api.client.respond(
            200,
            r#"[{"serviceChangeData":"delete","service":{"id":1}},
                {"serviceChangeData":"update","service":{"id":2,"name":"b"}}]"#,
        );

        let summaries = vec![SyncSummary::from(&LocalService::new(1, "a"))];
        let events = api.sync_services(&summaries).await.unwrap();
        assert_eq!(events[0], ChangeEvent::Delete(ServiceId::Int(1)));
        assert!(matches!(&events[1], ChangeEvent::Update(service) if service.name == "b"));

        let requests = api.client.requests.lock();
        let body: serde_json::Value =
            serde_json::from_slice(requests[0].1.as_ref().unwrap()).unwrap();
        assert_eq!(body["services"][0]["id"], 1);
    }

    #[tokio::test]
    async fn server_errors_are_retryable() {
        let api = HttpServicesApi::new("https://api.example.com", TestClient::default());
        api.client.respond(503, "maintenance");
        let err = api.fetch_services(&PageRequest::first(25)).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(api.last_error().as_deref(), Some("maintenance"));
    }

    #[tokio::test]
    async fn transport_failures_are_retryable() {
        let api = HttpServicesApi::new("https://api.example.com", TestClient::default());
        let err = api.fetch_services(&PageRequest::first(25)).await.unwrap_err();
        assert!(matches!(err, SyncError::Transport { retryable: true, .. }));
    }
}
