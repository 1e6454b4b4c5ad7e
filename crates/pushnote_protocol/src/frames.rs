//! Push channel frames.
//!
//! Incoming frames are tagged JSON objects. Decoding tries each known
//! schema in turn until one matches:
//!
//! ```text
//! {"type": "ready",   "data": {"sessionId": "...", "timestamp": 1700000000000}}
//! {"type": "service", "data": {"serviceChangeData": "update", "service": {...}}}
//! {"type": "replay",  "data": [{"serviceChangeData": ..., "service": ...}, ...]}
//! {"type": "error",   ...}
//! ```
//!
//! Outgoing operations are `{"op": "...", "data": {...}}` objects.

use crate::error::{ProtocolError, ProtocolResult};
use crate::event::{ChangeEvent, ServiceChangeData};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload of the `ready` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyData {
    /// Session identifier to use for replay on reconnect.
    pub session_id: String,
    /// Server timestamp at the moment of authorization.
    pub timestamp: i64,
}

/// A decoded frame received from the push server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    /// Handshake accepted.
    Ready(ReadyData),
    /// A single service change.
    ServiceChange(ServiceChangeData),
    /// Changes missed while disconnected, in server order.
    Replay(Vec<ServiceChangeData>),
    /// Server-side error report. Logged only.
    Error(Value),
}

#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(rename = "type")]
    kind: String,
    data: T,
}

fn try_schema<T: DeserializeOwned>(value: &Value, tag: &str) -> Option<T> {
    if value.get("type").and_then(Value::as_str) != Some(tag) {
        return None;
    }
    serde_json::from_value::<Envelope<T>>(value.clone())
        .ok()
        .filter(|envelope| envelope.kind == tag)
        .map(|envelope| envelope.data)
}

impl ServerFrame {
    /// Decodes a text frame.
    pub fn decode(text: &str) -> ProtocolResult<Self> {
        let value: Value = serde_json::from_str(text)?;

        if let Some(ready) = try_schema::<ReadyData>(&value, "ready") {
            return Ok(ServerFrame::Ready(ready));
        }
        if let Some(change) = try_schema::<ServiceChangeData>(&value, "service") {
            return Ok(ServerFrame::ServiceChange(change));
        }
        if let Some(replay) = try_schema::<Vec<ServiceChangeData>>(&value, "replay") {
            return Ok(ServerFrame::Replay(replay));
        }
        if value.get("type").and_then(Value::as_str) == Some("error") {
            return Ok(ServerFrame::Error(value));
        }

        Err(ProtocolError::unknown_frame(text))
    }

    /// Short name of the frame type, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerFrame::Ready(_) => "ready",
            ServerFrame::ServiceChange(_) => "service",
            ServerFrame::Replay(_) => "replay",
            ServerFrame::Error(_) => "error",
        }
    }

    /// Converts a change-carrying frame into ordered change events.
    pub fn into_events(self) -> Vec<ChangeEvent> {
        match self {
            ServerFrame::ServiceChange(change) => vec![change.into()],
            ServerFrame::Replay(changes) => changes.into_iter().map(ChangeEvent::from).collect(),
            ServerFrame::Ready(_) | ServerFrame::Error(_) => Vec::new(),
        }
    }
}

/// An operation sent from the client to the push server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "data")]
pub enum ClientOp {
    /// Fresh identification.
    #[serde(rename = "identify")]
    Identify {
        /// Bearer token.
        token: String,
    },
    /// Resume a session and replay every event since `timestamp_since`.
    #[serde(rename = "identifyReconnect")]
    IdentifyReconnect {
        /// Bearer token.
        token: String,
        /// Session to resume.
        #[serde(rename = "sessionId")]
        session_id: String,
        /// Last server timestamp seen by the client.
        #[serde(rename = "timestampSince")]
        timestamp_since: i64,
    },
}

impl ClientOp {
    /// Encodes the operation as a JSON text frame.
    pub fn encode(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Returns the bearer token carried by the operation.
    pub fn token(&self) -> &str {
        match self {
            ClientOp::Identify { token } | ClientOp::IdentifyReconnect { token, .. } => token,
        }
    }
}

/// Why the push transport closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectCode {
    /// Orderly close.
    Normal,
    /// The server no longer knows the session; identify afresh.
    ExpiredSessionId,
    /// The bearer token was rejected; fetch a new one before the next send.
    InvalidToken,
    /// The device has no network connectivity.
    NoConnectivity,
    /// The connection dropped without a close frame.
    Abnormal,
    /// Any other close code.
    Other(u16),
}

impl DisconnectCode {
    /// Close code for an expired session.
    pub const EXPIRED_SESSION_ID: u16 = 4000;
    /// Close code for an invalid token.
    pub const INVALID_TOKEN: u16 = 4001;

    /// Maps a websocket close code.
    pub fn from_close_code(code: u16) -> Self {
        match code {
            1000 => DisconnectCode::Normal,
            1006 => DisconnectCode::Abnormal,
            Self::EXPIRED_SESSION_ID => DisconnectCode::ExpiredSessionId,
            Self::INVALID_TOKEN => DisconnectCode::InvalidToken,
            other => DisconnectCode::Other(other),
        }
    }

    /// Returns the websocket close code, if this reason has one.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            DisconnectCode::Normal => Some(1000),
            DisconnectCode::Abnormal => Some(1006),
            DisconnectCode::ExpiredSessionId => Some(Self::EXPIRED_SESSION_ID),
            DisconnectCode::InvalidToken => Some(Self::INVALID_TOKEN),
            DisconnectCode::Other(code) => Some(*code),
            DisconnectCode::NoConnectivity => None,
        }
    }
}
