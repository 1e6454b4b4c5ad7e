//! WebSocket push transport backed by tokio-tungstenite.

use crate::error::{SyncError, SyncResult};
use crate::push::{FrameSink, FrameStream, PushConnector, TransportFrame};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use pushnote_protocol::DisconnectCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connects to the push server over a WebSocket.
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Creates a connector.
    pub fn new() -> Self {
        Self
    }
}

fn connect_error(err: tungstenite::Error) -> SyncError {
    match err {
        tungstenite::Error::Url(e) => SyncError::transport_fatal(format!("invalid push url: {e}")),
        other => SyncError::transport_retryable(other.to_string()),
    }
}

#[async_trait]
impl PushConnector for WsConnector {
    async fn connect(&self, url: &str) -> SyncResult<(Box<dyn FrameSink>, Box<dyn FrameStream>)> {
        let (ws, _response) = connect_async(url).await.map_err(connect_error)?;
        debug!(url, "push websocket open");
        let (sink, stream) = ws.split();
        Ok((Box::new(WsSink(sink)), Box::new(WsFrames(stream))))
    }
}

struct WsSink(SplitSink<WsStream, Message>);

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> SyncResult<()> {
        self.0
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| SyncError::transport_retryable(e.to_string()))
    }

    async fn close(&mut self) -> SyncResult<()> {
        self.0
            .close()
            .await
            .map_err(|e| SyncError::transport_retryable(e.to_string()))
    }
}

struct WsFrames(SplitStream<WsStream>);

#[async_trait]
impl FrameStream for WsFrames {
    async fn next_frame(&mut self) -> Option<TransportFrame> {
        loop {
            match self.0.next().await? {
                Ok(Message::Text(text)) => return Some(TransportFrame::Text(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => {
                    let code = frame
                        .map(|frame| DisconnectCode::from_close_code(u16::from(frame.code)))
                        .unwrap_or(DisconnectCode::Normal);
                    return Some(TransportFrame::Closed(code));
                }
                Ok(other) => trace!(len = other.len(), "ignoring non-text websocket message"),
                Err(e) => {
                    debug!(error = %e, "push websocket read failed");
                    return Some(TransportFrame::Closed(DisconnectCode::Abnormal));
                }
            }
        }
    }
}
