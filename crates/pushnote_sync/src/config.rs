//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration for services synchronization.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the REST API (e.g. "https://api.example.com/v1").
    pub api_base_url: String,
    /// URL of the push websocket.
    pub push_url: String,
    /// Page size for `GET services`.
    pub page_limit: u32,
    /// Maximum number of summaries per `POST services/sync` request.
    pub sync_chunk_size: usize,
    /// Reconnect behavior of the push connection.
    pub reconnect: ReconnectConfig,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(api_base_url: impl Into<String>, push_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            push_url: push_url.into(),
            page_limit: 25,
            sync_chunk_size: 100,
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Sets the page size. Zero is raised to one, since a zero-sized page
    /// can never advance the cursor.
    pub fn with_page_limit(mut self, limit: u32) -> Self {
        self.page_limit = limit.max(1);
        self
    }

    /// Sets the reconciliation chunk size.
    pub fn with_sync_chunk_size(mut self, size: usize) -> Self {
        self.sync_chunk_size = size;
        self
    }

    /// Sets the reconnect configuration.
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("", "")
    }
}

/// Fixed-delay retry behavior of the push connection.
///
/// Reconnects are retried indefinitely; at most one is pending at a time.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay between a disconnect and the next connection attempt.
    pub reconnect_delay: Duration,
    /// Delay before retrying a failed token fetch.
    pub token_retry_delay: Duration,
}

impl ReconnectConfig {
    /// Creates a reconnect configuration.
    pub fn new(reconnect_delay: Duration, token_retry_delay: Duration) -> Self {
        Self {
            reconnect_delay,
            token_retry_delay,
        }
    }

    /// Configuration with no delays, for tests.
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(3), Duration::from_secs(2))
    }
}
