//! Push connection state machine.
//!
//! [`ConnectionManager`] performs no I/O. Every input (transport callbacks,
//! frames, timers, token fetch results) returns a list of
//! [`ConnectionAction`]s for a driver to execute; see
//! [`crate::push::PushConnection`] for the tokio driver.

use crate::config::ReconnectConfig;
use crate::error::SyncError;
use pushnote_protocol::{ChangeEvent, ClientOp, DisconnectCode, ServerFrame};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Why the connection is down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Never connected.
    Initial,
    /// The transport closed.
    Disconnect(DisconnectCode),
    /// The transport failed with an unrecoverable error.
    Error(String),
}

/// Information about the server the transport is connected to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMetadata {
    /// Push endpoint URL.
    pub url: String,
}

/// Connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport.
    Disconnected(DisconnectReason),
    /// Transport is opening.
    Connecting,
    /// Transport open, handshake not yet accepted.
    Connected(ServerMetadata),
    /// Handshake accepted.
    Authorized {
        /// Server-issued session id.
        session_id: String,
    },
}

impl ConnectionState {
    /// True while authorized.
    pub fn is_authorized(&self) -> bool {
        matches!(self, ConnectionState::Authorized { .. })
    }

    /// True while disconnected for any reason.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, ConnectionState::Disconnected(_))
    }
}

/// Event forwarded to the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// A change received from the server, in arrival order.
    Change(ChangeEvent),
}

/// Side effect requested by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionAction {
    /// Open the transport.
    OpenTransport,
    /// Close the transport.
    CloseTransport,
    /// Send an operation over the open transport.
    Send(ClientOp),
    /// Fetch a fresh bearer token.
    FetchToken,
    /// Call [`ConnectionManager::reconnect_elapsed`] after the delay.
    ScheduleReconnect(Duration),
    /// Call [`ConnectionManager::token_retry_elapsed`] after the delay.
    ScheduleTokenRetry(Duration),
    /// Forward an event to the orchestrator.
    Notify(ConnectionEvent),
}

/// Push connection state machine.
#[derive(Debug)]
pub struct ConnectionManager {
    url: String,
    config: ReconnectConfig,
    state: ConnectionState,
    session_id: Option<String>,
    last_timestamp: Option<i64>,
    token: Option<String>,
    token_invalid: bool,
    token_fetch_in_flight: bool,
    reconnect_pending: bool,
    stopped: bool,
}

impl ConnectionManager {
    /// Creates a disconnected manager for `url`.
    pub fn new(url: impl Into<String>, config: ReconnectConfig) -> Self {
        Self {
            url: url.into(),
            config,
            state: ConnectionState::Disconnected(DisconnectReason::Initial),
            session_id: None,
            last_timestamp: None,
            token: None,
            token_invalid: false,
            token_fetch_in_flight: false,
            reconnect_pending: false,
            stopped: false,
        }
    }

    /// Push endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current state.
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Cached session id.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Last server timestamp seen.
    pub fn last_timestamp(&self) -> Option<i64> {
        self.last_timestamp
    }

    /// True if a reconnect is scheduled.
    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    fn transition(&mut self, state: ConnectionState) -> ConnectionAction {
        debug!(from = ?self.state, to = ?state, "connection state change");
        self.state = state.clone();
        ConnectionAction::Notify(ConnectionEvent::StateChanged(state))
    }

    /// Starts connecting. No-op unless disconnected.
    pub fn connect(&mut self) -> Vec<ConnectionAction> {
        self.stopped = false;
        if !self.state.is_disconnected() {
            return Vec::new();
        }
        vec![
            self.transition(ConnectionState::Connecting),
            ConnectionAction::OpenTransport,
        ]
    }

    /// The transport finished opening.
    pub fn transport_opened(&mut self) -> Vec<ConnectionAction> {
        if self.state != ConnectionState::Connecting {
            debug!(state = ?self.state, "ignoring transport open outside connecting");
            return Vec::new();
        }
        let mut actions = vec![self.transition(ConnectionState::Connected(ServerMetadata {
            url: self.url.clone(),
        }))];
        actions.extend(self.identify());
        actions
    }

    fn identify(&mut self) -> Vec<ConnectionAction> {
        if !matches!(self.state, ConnectionState::Connected(_)) {
            return Vec::new();
        }

        let token = match &self.token {
            Some(token) if !self.token_invalid => token.clone(),
            _ => {
                if self.token_fetch_in_flight {
                    return Vec::new();
                }
                self.token_fetch_in_flight = true;
                return vec![ConnectionAction::FetchToken];
            }
        };

        let op = match (&self.session_id, self.last_timestamp) {
            (Some(session_id), Some(timestamp_since)) => ClientOp::IdentifyReconnect {
                token,
                session_id: session_id.clone(),
                timestamp_since,
            },
            _ => ClientOp::Identify { token },
        };
        vec![ConnectionAction::Send(op)]
    }

    /// Result of a [`ConnectionAction::FetchToken`].
    pub fn token_fetched(&mut self, result: Result<String, SyncError>) -> Vec<ConnectionAction> {
        self.token_fetch_in_flight = false;
        match result {
            Ok(token) => {
                self.token = Some(token);
                self.token_invalid = false;
                self.identify()
            }
            Err(e) => {
                warn!(error = %e, "token fetch failed");
                if matches!(self.state, ConnectionState::Connected(_)) {
                    vec![ConnectionAction::ScheduleTokenRetry(
                        self.config.token_retry_delay,
                    )]
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// The token retry delay elapsed.
    pub fn token_retry_elapsed(&mut self) -> Vec<ConnectionAction> {
        self.identify()
    }

    /// A text frame arrived.
    pub fn frame_received(&mut self, text: &str) -> Vec<ConnectionAction> {
        let frame = match ServerFrame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "ignoring unrecognized frame");
                return Vec::new();
            }
        };

        match frame {
            ServerFrame::Ready(ready) => {
                if !matches!(self.state, ConnectionState::Connected(_)) {
                    debug!(state = ?self.state, "ignoring ready frame outside connected");
                    return Vec::new();
                }
                info!(session_id = %ready.session_id, "push session authorized");
                self.session_id = Some(ready.session_id.clone());
                self.last_timestamp = Some(ready.timestamp);
                vec![self.transition(ConnectionState::Authorized {
                    session_id: ready.session_id,
                })]
            }
            ServerFrame::ServiceChange(_) | ServerFrame::Replay(_) => {
                if !self.state.is_authorized() {
                    debug!(kind = frame.kind(), "ignoring change frame before authorization");
                    return Vec::new();
                }
                let changes = match frame {
                    ServerFrame::ServiceChange(change) => vec![change],
                    ServerFrame::Replay(changes) => changes,
                    _ => Vec::new(),
                };
                changes
                    .into_iter()
                    .map(|change| {
                        // Replay entries may be older than the cursor.
                        if let Some(timestamp) = change.timestamp() {
                            self.last_timestamp = self.last_timestamp.max(Some(timestamp));
                        }
                        ConnectionAction::Notify(ConnectionEvent::Change(change.into()))
                    })
                    .collect()
            }
            ServerFrame::Error(value) => {
                warn!(frame = %value, "push server reported an error");
                Vec::new()
            }
        }
    }

    /// The transport closed.
    pub fn transport_closed(&mut self, code: DisconnectCode) -> Vec<ConnectionAction> {
        if self.state.is_disconnected() {
            debug!(?code, "transport closed while already disconnected");
            return Vec::new();
        }

        match code {
            DisconnectCode::ExpiredSessionId => {
                info!("push session expired, next handshake identifies afresh");
                self.session_id = None;
                self.last_timestamp = None;
            }
            DisconnectCode::InvalidToken => {
                info!("push token rejected, refetching before next handshake");
                self.token_invalid = true;
            }
            _ => {}
        }

        let mut actions = vec![self.transition(ConnectionState::Disconnected(
            DisconnectReason::Disconnect(code),
        ))];
        actions.extend(self.schedule_reconnect());
        actions
    }

    /// The transport failed with an error that is not a close code.
    pub fn transport_failed(&mut self, message: impl Into<String>) -> Vec<ConnectionAction> {
        if self.state.is_disconnected() {
            return Vec::new();
        }
        let message = message.into();
        warn!(error = %message, "push transport failed");
        let mut actions = vec![self.transition(ConnectionState::Disconnected(
            DisconnectReason::Error(message),
        ))];
        actions.extend(self.schedule_reconnect());
        actions
    }

    fn schedule_reconnect(&mut self) -> Vec<ConnectionAction> {
        if self.stopped || self.reconnect_pending {
            return Vec::new();
        }
        self.reconnect_pending = true;
        debug!(delay = ?self.config.reconnect_delay, "scheduling reconnect");
        vec![ConnectionAction::ScheduleReconnect(self.config.reconnect_delay)]
    }

    /// The reconnect delay elapsed.
    pub fn reconnect_elapsed(&mut self) -> Vec<ConnectionAction> {
        self.reconnect_pending = false;
        if self.stopped {
            return Vec::new();
        }
        self.connect()
    }

    /// Disconnects and stops scheduling reconnects.
    pub fn shutdown(&mut self) -> Vec<ConnectionAction> {
        self.stopped = true;
        self.reconnect_pending = false;
        if self.state.is_disconnected() {
            return Vec::new();
        }
        vec![
            ConnectionAction::CloseTransport,
            self.transition(ConnectionState::Disconnected(DisconnectReason::Disconnect(
                DisconnectCode::Normal,
            ))),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const READY: &str = r#"{"type":"ready","data":{"sessionId":"s1","timestamp":100}}"#;

    fn manager() -> ConnectionManager {
        ConnectionManager::new("wss://push.test", ReconnectConfig::default())
    }

    fn sent(actions: &[ConnectionAction]) -> Option<&ClientOp> {
        actions.iter().find_map(|action| match action {
            ConnectionAction::Send(op) => Some(op),
            _ => None,
        })
    }

    fn authorize(manager: &mut ConnectionManager) {
        manager.connect();
        let actions = manager.transport_opened();
        assert_eq!(actions.last(), Some(&ConnectionAction::FetchToken));
        let actions = manager.token_fetched(Ok("t1".into()));
        assert_eq!(
            sent(&actions),
            Some(&ClientOp::Identify { token: "t1".into() })
        );
        manager.frame_received(READY);
        assert!(manager.state().is_authorized());
    }

    fn service_frame(kind: &str, id: i64, updated_at: i64) -> String {
        format!(
            r#"{{"type":"service","data":{{"serviceChangeData":"{kind}","service":{{"id":{id},"name":"n","updatedAt":{updated_at}}}}}}}"#
        )
    }

    #[test]
    fn connect_is_noop_unless_disconnected() {
        let mut manager = manager();
        let actions = manager.connect();
        assert!(actions.contains(&ConnectionAction::OpenTransport));
        assert_eq!(manager.state(), &ConnectionState::Connecting);
        assert!(manager.connect().is_empty());
    }

    #[test]
    fn expired_session_forces_fresh_identify() {
        let mut manager = manager();
        authorize(&mut manager);
        assert_eq!(manager.session_id(), Some("s1"));

        manager.transport_closed(DisconnectCode::ExpiredSessionId);
        assert_eq!(manager.session_id(), None);

        manager.reconnect_elapsed();
        let actions = manager.transport_opened();
        assert_eq!(
            sent(&actions),
            Some(&ClientOp::Identify { token: "t1".into() })
        );
    }

    #[test]
    fn abnormal_close_resumes_session() {
        let mut manager = manager();
        authorize(&mut manager);
        manager.frame_received(&service_frame("update", 1, 250));

        manager.transport_closed(DisconnectCode::Abnormal);
        manager.reconnect_elapsed();
        let actions = manager.transport_opened();
        assert_eq!(
            sent(&actions),
            Some(&ClientOp::IdentifyReconnect {
                token: "t1".into(),
                session_id: "s1".into(),
                timestamp_since: 250,
            })
        );
    }

    #[test]
    fn invalid_token_refetches_before_send() {
        let mut manager = manager();
        authorize(&mut manager);

        manager.transport_closed(DisconnectCode::InvalidToken);
        manager.reconnect_elapsed();
        let actions = manager.transport_opened();
        assert_eq!(actions.last(), Some(&ConnectionAction::FetchToken));
        assert!(sent(&actions).is_none());
    }

    #[test]
    fn token_failure_schedules_single_retry() {
        let mut manager = manager();
        manager.connect();
        manager.transport_opened();
        let actions = manager.token_fetched(Err(SyncError::Authorization("denied".into())));
        assert_eq!(
            actions,
            vec![ConnectionAction::ScheduleTokenRetry(Duration::from_secs(2))]
        );
        assert_eq!(manager.token_retry_elapsed(), vec![ConnectionAction::FetchToken]);
        // A fetch is in flight; a second identify must not start another.
        assert!(manager.token_retry_elapsed().is_empty());
    }

    #[test]
    fn change_frames_require_authorization() {
        let mut manager = manager();
        manager.connect();
        manager.transport_opened();
        assert!(manager.frame_received(&service_frame("create", 1, 5)).is_empty());

        manager.token_fetched(Ok("t".into()));
        manager.frame_received(READY);
        let actions = manager.frame_received(&service_frame("create", 1, 5));
        assert!(matches!(
            actions.as_slice(),
            [ConnectionAction::Notify(ConnectionEvent::Change(ChangeEvent::Create(_)))]
        ));
        assert_eq!(manager.last_timestamp(), Some(100));
        manager.frame_received(&service_frame("update", 1, 150));
        assert_eq!(manager.last_timestamp(), Some(150));
    }

    #[test]
    fn ready_is_only_accepted_while_connected() {
        let mut manager = manager();
        assert!(manager.frame_received(READY).is_empty());
        assert!(!manager.state().is_authorized());
    }

    #[test]
    fn replay_forwards_events_in_order() {
        let mut manager = manager();
        authorize(&mut manager);
        let replay = r#"{"type":"replay","data":[
            {"serviceChangeData":"create","service":{"id":1,"name":"a","updatedAt":110}},
            {"serviceChangeData":"delete","service":{"id":2,"updatedAt":120}}
        ]}"#;

        let actions = manager.frame_received(replay);
        assert_eq!(actions.len(), 2);
        assert!(matches!(
            &actions[1],
            ConnectionAction::Notify(ConnectionEvent::Change(ChangeEvent::Delete(_)))
        ));
        assert_eq!(manager.last_timestamp(), Some(120));
    }

    #[test]
    fn stale_replay_entries_keep_the_cursor() {
        let mut manager = manager();
        authorize(&mut manager);
        let replay = r#"{"type":"replay","data":[
            {"serviceChangeData":"update","service":{"id":1,"name":"a","updatedAt":130}},
            {"serviceChangeData":"update","service":{"id":2,"name":"b","updatedAt":90}},
            {"serviceChangeData":"delete","service":{"id":3}}
        ]}"#;

        assert_eq!(manager.frame_received(replay).len(), 3);
        assert_eq!(manager.last_timestamp(), Some(130));
    }

    #[test]
    fn nameless_update_frames_are_ignored() {
        let mut manager = manager();
        authorize(&mut manager);
        let frame =
            r#"{"type":"service","data":{"serviceChangeData":"update","service":{"id":2,"updatedAt":500}}}"#;
        assert!(manager.frame_received(frame).is_empty());
        assert_eq!(manager.last_timestamp(), Some(100));
        assert!(manager.state().is_authorized());
    }

    #[test]
    fn unknown_frames_are_ignored() {
        let mut manager = manager();
        authorize(&mut manager);
        assert!(manager.frame_received(r#"{"type":"mystery"}"#).is_empty());
        assert!(manager.frame_received("not json").is_empty());
        assert!(manager.state().is_authorized());
    }

    #[test]
    fn at_most_one_reconnect_pending() {
        let mut manager = manager();
        manager.connect();
        let actions = manager.transport_closed(DisconnectCode::NoConnectivity);
        assert!(actions.contains(&ConnectionAction::ScheduleReconnect(Duration::from_secs(3))));
        assert!(manager.reconnect_pending());
        assert!(manager.transport_failed("again").is_empty());
    }

    #[test]
    fn shutdown_stops_reconnects() {
        let mut manager = manager();
        authorize(&mut manager);
        let actions = manager.shutdown();
        assert_eq!(actions.first(), Some(&ConnectionAction::CloseTransport));
        assert!(manager.transport_closed(DisconnectCode::Normal).is_empty());
        assert!(manager.reconnect_elapsed().is_empty());
    }
}
