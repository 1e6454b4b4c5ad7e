//! Typed change signals.

use crate::error::ProtocolError;
use crate::service::{ImageSet, LocalService, ServiceId, ServiceLike, Snippet};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single change to the services collection.
///
/// Change events are produced by decoding push frames, replay batches and
/// REST responses. Update operations consume them one at a time.
///
/// Single-service events carry the payload as sent by the server. Fields
/// missing from it keep their stored values when the event is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A page of remote snippets to append.
    Add(Vec<Snippet>),
    /// A service was created.
    Create(ServicePayload),
    /// A service was updated.
    Update(ServicePayload),
    /// A service was created or updated.
    Upsert(ServicePayload),
    /// A service was deleted.
    Delete(ServiceId),
    /// A batch of changes applied without an incremental diff.
    ChangeMultiple(Vec<ChangeEvent>),
}

impl ChangeEvent {
    /// Short name of the event kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::Add(_) => "add",
            ChangeEvent::Create(_) => "create",
            ChangeEvent::Update(_) => "update",
            ChangeEvent::Upsert(_) => "upsert",
            ChangeEvent::Delete(_) => "delete",
            ChangeEvent::ChangeMultiple(_) => "change_multiple",
        }
    }

    /// The service this event targets, for single-service events.
    pub fn service_id(&self) -> Option<&ServiceId> {
        match self {
            ChangeEvent::Create(service)
            | ChangeEvent::Update(service)
            | ChangeEvent::Upsert(service) => Some(&service.id),
            ChangeEvent::Delete(id) => Some(id),
            ChangeEvent::Add(_) | ChangeEvent::ChangeMultiple(_) => None,
        }
    }
}

/// Kind of a server-side service change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceChangeKind {
    /// Service created.
    Create,
    /// Service updated.
    Update,
    /// Service created or updated.
    Upsert,
    /// Service deleted.
    Delete,
}

/// Service object as sent by the server.
///
/// Deletions only carry the id, so every other field is optional on the wire.
/// Creates, updates and upserts must also carry a name; see
/// [`ServiceChangeData`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePayload {
    /// Service identifier.
    pub id: ServiceId,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Image URLs.
    #[serde(flatten)]
    pub images: ImageSet,
    /// Info-level toggle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<bool>,
    /// Warning-level toggle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<bool>,
    /// Error-level toggle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<bool>,
    /// API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Creation time, milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    /// Last update time, milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl ServicePayload {
    /// Materializes the payload as a local service. Missing toggles default
    /// to enabled.
    pub fn into_local(self) -> LocalService {
        LocalService {
            id: self.id,
            name: self.name,
            images: self.images,
            info: self.info.unwrap_or(true),
            warning: self.warning.unwrap_or(true),
            error: self.error.unwrap_or(true),
            api_key: self.api_key.unwrap_or_default(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Overwrites the fields this payload carries, keeping the rest of
    /// `service` as stored.
    pub fn patch(&self, service: &mut LocalService) {
        service.name.clone_from(&self.name);
        self.patch_images(&mut service.images);
        if let Some(info) = self.info {
            service.info = info;
        }
        if let Some(warning) = self.warning {
            service.warning = warning;
        }
        if let Some(error) = self.error {
            service.error = error;
        }
        if let Some(api_key) = &self.api_key {
            service.api_key.clone_from(api_key);
        }
        if self.created_at.is_some() {
            service.created_at = self.created_at;
        }
        if self.updated_at.is_some() {
            service.updated_at = self.updated_at;
        }
    }

    /// Applies the payload on top of `base`, or materializes it when there
    /// is no stored copy.
    pub fn resolve(&self, base: Option<LocalService>) -> LocalService {
        match base {
            Some(mut service) => {
                self.patch(&mut service);
                service
            }
            None => self.clone().into_local(),
        }
    }

    /// Applies the payload to a remote-only snippet.
    pub fn patch_snippet(&self, snippet: &Snippet) -> Snippet {
        let mut images = snippet.images.clone();
        self.patch_images(&mut images);
        Snippet {
            id: snippet.id.clone(),
            name: self.name.clone(),
            images,
        }
    }

    fn patch_images(&self, images: &mut ImageSet) {
        let incoming = &self.images;
        if incoming.small_image.is_some() {
            images.small_image.clone_from(&incoming.small_image);
        }
        if incoming.medium_image.is_some() {
            images.medium_image.clone_from(&incoming.medium_image);
        }
        if incoming.large_image.is_some() {
            images.large_image.clone_from(&incoming.large_image);
        }
    }
}

impl From<LocalService> for ServicePayload {
    fn from(service: LocalService) -> Self {
        Self {
            id: service.id,
            name: service.name,
            images: service.images,
            info: Some(service.info),
            warning: Some(service.warning),
            error: Some(service.error),
            api_key: Some(service.api_key),
            created_at: service.created_at,
            updated_at: service.updated_at,
        }
    }
}

impl From<&LocalService> for ServicePayload {
    fn from(service: &LocalService) -> Self {
        Self {
            id: service.id.clone(),
            name: service.name.clone(),
            images: service.images.clone(),
            info: Some(service.info),
            warning: Some(service.warning),
            error: Some(service.error),
            api_key: Some(service.api_key.clone()),
            created_at: service.created_at,
            updated_at: service.updated_at,
        }
    }
}

impl From<&ServicePayload> for Snippet {
    fn from(payload: &ServicePayload) -> Self {
        Snippet {
            id: payload.id.clone(),
            name: payload.name.clone(),
            images: payload.images.clone(),
        }
    }
}

impl ServiceLike for ServicePayload {
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

/// A service change as carried by push frames and the bulk sync endpoint.
///
/// Decoding fails when a create, update or upsert omits the service name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawServiceChange")]
pub struct ServiceChangeData {
    /// Kind of change.
    pub service_change_data: ServiceChangeKind,
    /// Affected service.
    pub service: ServicePayload,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServiceChange {
    service_change_data: ServiceChangeKind,
    service: Value,
}

impl TryFrom<RawServiceChange> for ServiceChangeData {
    type Error = ProtocolError;

    fn try_from(raw: RawServiceChange) -> Result<Self, Self::Error> {
        let kind = raw.service_change_data;
        let named = raw.service.get("name").is_some_and(Value::is_string);
        if kind != ServiceChangeKind::Delete && !named {
            return Err(ProtocolError::InvalidPayload(format!(
                "{:?} change without a service name",
                kind
            )));
        }
        Ok(Self {
            service_change_data: kind,
            service: serde_json::from_value(raw.service)?,
        })
    }
}

impl ServiceChangeData {
    /// Server timestamp carried by this change, if any.
    pub fn timestamp(&self) -> Option<i64> {
        self.service.updated_at
    }
}

impl From<ServiceChangeData> for ChangeEvent {
    fn from(data: ServiceChangeData) -> Self {
        match data.service_change_data {
            ServiceChangeKind::Create => ChangeEvent::Create(data.service),
            ServiceChangeKind::Update => ChangeEvent::Update(data.service),
            ServiceChangeKind::Upsert => ChangeEvent::Upsert(data.service),
            ServiceChangeKind::Delete => ChangeEvent::Delete(data.service.id),
        }
    }
}
