//! Push channel transport and the tokio driver for [`ConnectionManager`].

use crate::config::ReconnectConfig;
use crate::connection::{ConnectionAction, ConnectionEvent, ConnectionManager};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use pushnote_protocol::DisconnectCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// A frame read from the push transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    /// A text frame.
    Text(String),
    /// The transport closed.
    Closed(DisconnectCode),
}

/// Write half of an open push transport.
#[async_trait]
pub trait FrameSink: Send {
    /// Sends a text frame.
    async fn send_text(&mut self, text: String) -> SyncResult<()>;

    /// Closes the transport with a normal close.
    async fn close(&mut self) -> SyncResult<()>;
}

/// Read half of an open push transport.
#[async_trait]
pub trait FrameStream: Send {
    /// Next frame, or `None` once the transport is gone without a close
    /// frame.
    async fn next_frame(&mut self) -> Option<TransportFrame>;
}

/// Opens push transports.
#[async_trait]
pub trait PushConnector: Send + Sync {
    /// Connects to `url`. Retryable errors are treated as lost connectivity.
    async fn connect(&self, url: &str) -> SyncResult<(Box<dyn FrameSink>, Box<dyn FrameStream>)>;
}

/// Supplies bearer tokens for the push handshake.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Fetches a fresh token.
    async fn fetch_token(&self) -> SyncResult<String>;
}

/// Token provider returning a fixed token.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    /// Creates a provider for `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn fetch_token(&self) -> SyncResult<String> {
        Ok(self.token.clone())
    }
}

enum Command {
    Connect,
    Shutdown,
}

enum DriverInput {
    Opened {
        generation: u64,
        result: SyncResult<(Box<dyn FrameSink>, Box<dyn FrameStream>)>,
    },
    Frame {
        generation: u64,
        frame: TransportFrame,
    },
    TokenFetched(SyncResult<String>),
    ReconnectElapsed,
    TokenRetryElapsed,
}

/// Handle to a running push connection.
///
/// The connection runs on its own tokio task. Connection events are
/// delivered through the receiver returned by [`PushConnection::spawn`].
pub struct PushConnection {
    commands: mpsc::UnboundedSender<Command>,
}

impl PushConnection {
    /// Spawns the driver task. Must be called inside a tokio runtime.
    pub fn spawn(
        url: impl Into<String>,
        reconnect: ReconnectConfig,
        connector: Arc<dyn PushConnector>,
        tokens: Arc<dyn TokenProvider>,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let (inputs, input_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            manager: ConnectionManager::new(url, reconnect),
            connector,
            tokens,
            events,
            inputs,
            sink: None,
            reader: None,
            generation: 0,
        };
        tokio::spawn(driver.run(command_rx, input_rx));
        (Self { commands }, events_rx)
    }

    /// Starts connecting. No-op unless disconnected.
    pub fn connect(&self) -> SyncResult<()> {
        self.commands
            .send(Command::Connect)
            .map_err(|_| SyncError::NotConnected)
    }

    /// Disconnects and stops reconnecting.
    pub fn shutdown(&self) {
        // The driver may already be gone.
        let _ = self.commands.send(Command::Shutdown);
    }
}

struct Driver {
    manager: ConnectionManager,
    connector: Arc<dyn PushConnector>,
    tokens: Arc<dyn TokenProvider>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    inputs: mpsc::UnboundedSender<DriverInput>,
    sink: Option<Box<dyn FrameSink>>,
    reader: Option<JoinHandle<()>>,
    generation: u64,
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut inputs: mpsc::UnboundedReceiver<DriverInput>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Connect) => {
                        let actions = self.manager.connect();
                        self.execute(actions).await;
                    }
                    Some(Command::Shutdown) | None => {
                        let actions = self.manager.shutdown();
                        self.execute(actions).await;
                        self.close_transport().await;
                        debug!("push driver stopped");
                        return;
                    }
                },
                Some(input) = inputs.recv() => self.handle_input(input).await,
            }
        }
    }

    async fn handle_input(&mut self, input: DriverInput) {
        let actions = match input {
            DriverInput::Opened { generation, result } => {
                if generation != self.generation {
                    if let Ok((mut sink, _)) = result {
                        let _ = sink.close().await;
                    }
                    return;
                }
                match result {
                    Ok((sink, stream)) => {
                        self.sink = Some(sink);
                        self.reader = Some(self.spawn_reader(generation, stream));
                        self.manager.transport_opened()
                    }
                    Err(e) if e.is_retryable() => {
                        debug!(error = %e, "push connect failed");
                        self.manager.transport_closed(DisconnectCode::NoConnectivity)
                    }
                    Err(e) => self.manager.transport_failed(e.to_string()),
                }
            }
            DriverInput::Frame { generation, frame } => {
                if generation != self.generation {
                    trace!("dropping frame from stale transport");
                    return;
                }
                match frame {
                    TransportFrame::Text(text) => self.manager.frame_received(&text),
                    TransportFrame::Closed(code) => {
                        self.sink = None;
                        self.reader = None;
                        self.manager.transport_closed(code)
                    }
                }
            }
            DriverInput::TokenFetched(result) => self.manager.token_fetched(result),
            DriverInput::ReconnectElapsed => self.manager.reconnect_elapsed(),
            DriverInput::TokenRetryElapsed => self.manager.token_retry_elapsed(),
        };
        self.execute(actions).await;
    }

    async fn execute(&mut self, actions: Vec<ConnectionAction>) {
        for action in actions {
            match action {
                ConnectionAction::OpenTransport => self.open_transport(),
                ConnectionAction::CloseTransport => self.close_transport().await,
                ConnectionAction::Send(op) => {
                    let text = match op.encode() {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, "failed to encode client op");
                            continue;
                        }
                    };
                    match self.sink.as_mut() {
                        Some(sink) => {
                            if let Err(e) = sink.send_text(text).await {
                                warn!(error = %e, "push send failed");
                            }
                        }
                        None => debug!("no open transport, dropping client op"),
                    }
                }
                ConnectionAction::FetchToken => {
                    let tokens = Arc::clone(&self.tokens);
                    let inputs = self.inputs.clone();
                    tokio::spawn(async move {
                        let result = tokens.fetch_token().await;
                        let _ = inputs.send(DriverInput::TokenFetched(result));
                    });
                }
                ConnectionAction::ScheduleReconnect(delay) => {
                    self.schedule(delay, DriverInput::ReconnectElapsed)
                }
                ConnectionAction::ScheduleTokenRetry(delay) => {
                    self.schedule(delay, DriverInput::TokenRetryElapsed)
                }
                ConnectionAction::Notify(event) => {
                    if self.events.send(event).is_err() {
                        trace!("connection event receiver dropped");
                    }
                }
            }
        }
    }

    fn schedule(&self, delay: std::time::Duration, input: DriverInput) {
        let inputs = self.inputs.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = inputs.send(input);
        });
    }

    fn open_transport(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        let connector = Arc::clone(&self.connector);
        let inputs = self.inputs.clone();
        let url = self.manager.url().to_string();
        tokio::spawn(async move {
            let result = connector.connect(&url).await;
            let _ = inputs.send(DriverInput::Opened { generation, result });
        });
    }

    async fn close_transport(&mut self) {
        self.generation += 1;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.close().await {
                debug!(error = %e, "error closing push transport");
            }
        }
    }

    fn spawn_reader(&self, generation: u64, mut stream: Box<dyn FrameStream>) -> JoinHandle<()> {
        let inputs = self.inputs.clone();
        tokio::spawn(async move {
            loop {
                let frame = stream
                    .next_frame()
                    .await
                    .unwrap_or(TransportFrame::Closed(DisconnectCode::Abnormal));
                let closed = matches!(frame, TransportFrame::Closed(_));
                if inputs.send(DriverInput::Frame { generation, frame }).is_err() || closed {
                    return;
                }
            }
        })
    }
}

/// Server end of a [`ChannelConnector`] connection.
pub struct ServerSide {
    /// Frames sent by the client.
    pub received: mpsc::UnboundedReceiver<String>,
    /// Frames to deliver to the client.
    pub outgoing: mpsc::UnboundedSender<TransportFrame>,
}

impl ServerSide {
    /// Sends a text frame to the client.
    pub fn send(&self, text: impl Into<String>) {
        let _ = self.outgoing.send(TransportFrame::Text(text.into()));
    }

    /// Closes the connection with `code`.
    pub fn close(&self, code: DisconnectCode) {
        let _ = self.outgoing.send(TransportFrame::Closed(code));
    }
}

/// In-process push connector for tests and local tooling.
///
/// Every successful connect hands a [`ServerSide`] to the receiver returned
/// by [`ChannelConnector::new`].
#[derive(Clone)]
pub struct ChannelConnector {
    servers: mpsc::UnboundedSender<ServerSide>,
    offline: Arc<AtomicBool>,
    connects: Arc<Mutex<u32>>,
}

impl ChannelConnector {
    /// Creates a connector and the stream of server ends.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerSide>) {
        let (servers, server_rx) = mpsc::unbounded_channel();
        (
            Self {
                servers,
                offline: Arc::new(AtomicBool::new(false)),
                connects: Arc::new(Mutex::new(0)),
            },
            server_rx,
        )
    }

    /// While offline, connects fail with a retryable transport error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of connect attempts so far.
    pub fn connect_attempts(&self) -> u32 {
        *self.connects.lock()
    }
}

struct ChannelSink(Option<mpsc::UnboundedSender<String>>);

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send_text(&mut self, text: String) -> SyncResult<()> {
        self.0
            .as_ref()
            .ok_or(SyncError::NotConnected)?
            .send(text)
            .map_err(|_| SyncError::transport_retryable("server end dropped"))
    }

    async fn close(&mut self) -> SyncResult<()> {
        self.0 = None;
        Ok(())
    }
}

struct ChannelStream(mpsc::UnboundedReceiver<TransportFrame>);

#[async_trait]
impl FrameStream for ChannelStream {
    async fn next_frame(&mut self) -> Option<TransportFrame> {
        self.0.recv().await
    }
}

#[async_trait]
impl PushConnector for ChannelConnector {
    async fn connect(&self, url: &str) -> SyncResult<(Box<dyn FrameSink>, Box<dyn FrameStream>)> {
        *self.connects.lock() += 1;
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::transport_retryable(format!(
                "{url} unreachable"
            )));
        }

        let (client_tx, received) = mpsc::unbounded_channel();
        let (outgoing, client_rx) = mpsc::unbounded_channel();
        self.servers
            .send(ServerSide { received, outgoing })
            .map_err(|_| SyncError::transport_fatal("no server listening"))?;
        Ok((
            Box::new(ChannelSink(Some(client_tx))),
            Box::new(ChannelStream(client_rx)),
        ))
    }
}
