//! Service entities and the representable sum type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable, server-assigned service identifier.
///
/// The server hands out either integer or string identifiers. Ordering puts
/// integers (numerically) before strings (ordinally), which gives the merge
/// engine a total order for tie-breaking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServiceId {
    /// Integer identifier.
    Int(i64),
    /// String identifier.
    Text(String),
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceId::Int(id) => write!(f, "{}", id),
            ServiceId::Text(id) => f.write_str(id),
        }
    }
}

impl From<i64> for ServiceId {
    fn from(id: i64) -> Self {
        ServiceId::Int(id)
    }
}

impl From<i32> for ServiceId {
    fn from(id: i32) -> Self {
        ServiceId::Int(i64::from(id))
    }
}

impl From<&str> for ServiceId {
    fn from(id: &str) -> Self {
        ServiceId::Text(id.to_string())
    }
}

impl From<String> for ServiceId {
    fn from(id: String) -> Self {
        ServiceId::Text(id)
    }
}

/// Small, medium and large image URLs for a service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSet {
    /// Small image URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub small_image: Option<String>,
    /// Medium image URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium_image: Option<String>,
    /// Large image URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large_image: Option<String>,
}

/// Capabilities shared by every representable service variant.
pub trait ServiceLike {
    /// Stable identifier.
    fn id(&self) -> &ServiceId;
    /// Display name, the single source of ordering truth.
    fn name(&self) -> &str;
    /// Image URLs.
    fn images(&self) -> &ImageSet;
}

/// Lightweight remote-only projection of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snippet {
    /// Service identifier.
    pub id: ServiceId,
    /// Display name.
    pub name: String,
    /// Image URLs.
    #[serde(flatten)]
    pub images: ImageSet,
}

impl Snippet {
    /// Creates a snippet without images.
    pub fn new(id: impl Into<ServiceId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            images: ImageSet::default(),
        }
    }
}

impl ServiceLike for Snippet {
    fn id(&self) -> &ServiceId {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn images(&self) -> &ImageSet {
        &self.images
    }
}

/// A locally persisted, fully materialized service.
///
/// Notifications owned by a service live in the local store keyed by the
/// service id and are cascade-deleted with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalService {
    /// Service identifier.
    pub id: ServiceId,
    /// Display name.
    pub name: String,
    /// Image URLs.
    #[serde(flatten)]
    pub images: ImageSet,
    /// Deliver info-level notifications.
    pub info: bool,
    /// Deliver warning-level notifications.
    pub warning: bool,
    /// Deliver error-level notifications.
    pub error: bool,
    /// API key used to post notifications to this service.
    pub api_key: String,
    /// Creation time, milliseconds since the Unix epoch.
    #[serde(default)]
    pub created_at: Option<i64>,
    /// Last update time, milliseconds since the Unix epoch.
    #[serde(default)]
    pub updated_at: Option<i64>,
}

impl LocalService {
    /// Creates a service with all notification levels enabled.
    pub fn new(id: impl Into<ServiceId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            images: ImageSet::default(),
            info: true,
            warning: true,
            error: true,
            api_key: String::new(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Copies the remotely mutable fields of a snippet into this service.
    ///
    /// Returns true if anything changed and the service needs a write-back.
    pub fn absorb_snippet(&mut self, snippet: &Snippet) -> bool {
        let mut changed = false;
        if self.name != snippet.name {
            self.name = snippet.name.clone();
            changed = true;
        }
        if self.images != snippet.images {
            self.images = snippet.images.clone();
            changed = true;
        }
        changed
    }

    /// Returns the lightweight projection of this service.
    pub fn to_snippet(&self) -> Snippet {
        Snippet {
            id: self.id.clone(),
            name: self.name.clone(),
            images: self.images.clone(),
        }
    }
}

impl ServiceLike for LocalService {
    fn id(&self) -> &ServiceId {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn images(&self) -> &ImageSet {
        &self.images
    }
}

/// A service as surfaced in the merged list: either a remote snippet or a
/// fully materialized local service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Representable {
    /// Remote-only projection.
    Snippet(Snippet),
    /// Locally persisted service.
    Full(LocalService),
}

impl Representable {
    /// Returns true if this is a fully materialized service.
    pub fn is_full(&self) -> bool {
        matches!(self, Representable::Full(_))
    }

    /// Returns the local service if this is a full entity.
    pub fn as_full(&self) -> Option<&LocalService> {
        match self {
            Representable::Full(service) => Some(service),
            Representable::Snippet(_) => None,
        }
    }
}

impl ServiceLike for Representable {
    fn id(&self) -> &ServiceId {
        match self {
            Representable::Snippet(snippet) => &snippet.id,
            Representable::Full(service) => &service.id,
        }
    }

    fn name(&self) -> &str {
        match self {
            Representable::Snippet(snippet) => &snippet.name,
            Representable::Full(service) => &service.name,
        }
    }

    fn images(&self) -> &ImageSet {
        match self {
            Representable::Snippet(snippet) => &snippet.images,
            Representable::Full(service) => &service.images,
        }
    }
}

impl From<Snippet> for Representable {
    fn from(snippet: Snippet) -> Self {
        Representable::Snippet(snippet)
    }
}

impl From<LocalService> for Representable {
    fn from(service: LocalService) -> Self {
        Representable::Full(service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_id_accepts_integers_and_strings() {
        let ids: Vec<ServiceId> = serde_json::from_str(r#"[7, "abc"]"#).unwrap();
        assert_eq!(ids, vec![ServiceId::Int(7), ServiceId::Text("abc".into())]);
        assert_eq!(serde_json::to_string(&ids).unwrap(), r#"[7,"abc"]"#);
    }

    #[test]
    fn service_id_ordering() {
        assert!(ServiceId::Int(2) < ServiceId::Int(10));
        assert!(ServiceId::Int(i64::MAX) < ServiceId::Text("a".into()));
        assert!(ServiceId::from("a") < ServiceId::from("b"));
    }

    #[test]
    fn snippet_decodes_flattened_images() {
        let snippet: Snippet = serde_json::from_str(
            r#"{"id": 3, "name": "Backups", "smallImage": "https://img/s.png"}"#,
        )
        .unwrap();
        assert_eq!(snippet.id, ServiceId::Int(3));
        assert_eq!(snippet.images.small_image.as_deref(), Some("https://img/s.png"));
        assert!(snippet.images.large_image.is_none());
    }

    #[test]
    fn absorb_snippet_reports_changes() {
        let mut service = LocalService::new(1, "Alpha");
        assert!(!service.absorb_snippet(&Snippet::new(1, "Alpha")));
        assert!(service.absorb_snippet(&Snippet::new(1, "Beta")));
        assert_eq!(service.name, "Beta");
    }

    #[test]
    fn representable_capabilities() {
        let snippet = Representable::from(Snippet::new(1, "Alpha"));
        let full = Representable::from(LocalService::new(2, "Beta"));
        assert_eq!(snippet.name(), "Alpha");
        assert_eq!(full.id(), &ServiceId::Int(2));
        assert!(!snippet.is_full());
        assert!(full.as_full().is_some());
    }
}
