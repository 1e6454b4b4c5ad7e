//! Notifications delivered to a service.

use crate::service::{ServiceId, Snippet};
use serde::{Deserialize, Serialize};

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    /// Informational.
    Info,
    /// Warning.
    Warning,
    /// Error.
    Error,
}

/// A notification owned by exactly one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Notification identifier.
    pub id: u64,
    /// Owning service.
    pub service_id: ServiceId,
    /// Snippet of the owning service when it is not materialized locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_snippet: Option<Snippet>,
    /// Whether the user has read it.
    #[serde(default)]
    pub read: bool,
    /// Arrival time, milliseconds since the Unix epoch.
    pub arrived_at: i64,
    /// Body text.
    pub message: String,
    /// Optional extra text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<String>,
    /// Optional link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Severity.
    pub level: NotificationLevel,
}

impl Notification {
    /// Creates an unread notification.
    pub fn new(
        id: u64,
        service_id: impl Into<ServiceId>,
        level: NotificationLevel,
        message: impl Into<String>,
        arrived_at: i64,
    ) -> Self {
        Self {
            id,
            service_id: service_id.into(),
            service_snippet: None,
            read: false,
            arrived_at,
            message: message.into(),
            extra: None,
            url: None,
            level,
        }
    }
}
