//! reqwest-backed [`HttpClient`] for the services API.

use async_trait::async_trait;
use pushnote_sync::{HttpClient, HttpResponse};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client sending bearer-authenticated JSON requests.
pub struct ReqwestClient {
    client: reqwest::Client,
    token: Option<String>,
}

impl ReqwestClient {
    /// Creates a client. Requests carry `token` as a bearer token if set.
    pub fn new(token: Option<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("pushnote/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, token })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(request: reqwest::RequestBuilder) -> Result<HttpResponse, String> {
        let resp = request
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;
        let status = resp.status().as_u16();
        let body = resp
            .bytes()
            .await
            .map_err(|e| format!("reading response body failed: {}", e))?;
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str) -> Result<HttpResponse, String> {
        Self::send(self.authorize(self.client.get(url))).await
    }

    async fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse, String> {
        let request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .body(body);
        Self::send(self.authorize(request)).await
    }
}
