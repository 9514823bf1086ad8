//! WebSocket transport built on tokio-tungstenite.
//!
//! Each session gets its own connection. A reader task decodes inbound frames
//! and forwards them as [`Delivery`] values tagged with the session id; a
//! writer task drains the session's outbound queue. Closing a handle stops the
//! reader before the connection is shut down, so a closed session produces no
//! further deliveries.

use crate::identity::UserId;
use crate::session::ConversationKey;
use crate::transport::{Connector, Delivery, InboundEvent, OutboundEvent, SessionId, TransportHandle};
use crate::utils::{Result, TransportError};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long `close` waits for the writer to flush and send the close frame
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Opens one WebSocket connection per session
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    deliveries: mpsc::UnboundedSender<Delivery>,
    queue_size: usize,
    connect_timeout: Duration,
}

impl WebSocketConnector {
    /// Create a connector for `url` that forwards inbound events to `deliveries`
    pub fn new(
        url: impl Into<String>,
        deliveries: mpsc::UnboundedSender<Delivery>,
        queue_size: usize,
    ) -> Self {
        Self {
            url: url.into(),
            deliveries,
            queue_size: queue_size.max(1),
            connect_timeout: Duration::from_secs(crate::defaults::DEFAULT_CONNECT_TIMEOUT),
        }
    }

    /// Bound the time `open` may spend on the TCP connect and handshake
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Endpoint this connector dials
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    type Handle = WebSocketHandle;

    async fn open(
        &self,
        session: SessionId,
        room_key: &ConversationKey,
        user_id: &UserId,
    ) -> Result<WebSocketHandle> {
        log::info!("Connecting {} to {} (room {}, user {})", session, self.url, room_key, user_id);

        let connect_failed = |reason: String| TransportError::ConnectionFailed {
            url: self.url.clone(),
            reason,
        };
        let (stream, _response) = tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| connect_failed(format!("no handshake within {:?}", self.connect_timeout)))?
            .map_err(|e| connect_failed(e.to_string()))?;

        let (sink, source) = stream.split();
        let (outbound, frames) = mpsc::channel(self.queue_size);

        let writer = tokio::spawn(write_frames(sink, frames, session));
        let reader = tokio::spawn(read_frames(source, self.deliveries.clone(), session));

        Ok(WebSocketHandle {
            session,
            outbound: Some(outbound),
            writer: Some(writer),
            reader: Some(reader),
        })
    }
}

/// A live WebSocket connection owned by one session
#[derive(Debug)]
pub struct WebSocketHandle {
    session: SessionId,
    outbound: Option<mpsc::Sender<String>>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

#[async_trait]
impl TransportHandle for WebSocketHandle {
    fn session_id(&self) -> SessionId {
        self.session
    }

    async fn emit(&mut self, event: OutboundEvent) -> Result<()> {
        let outbound = self.outbound.as_ref().ok_or(TransportError::Closed {
            session: self.session.0,
        })?;

        let frame = event.to_frame()?;
        outbound
            .send(frame)
            .await
            .map_err(|_| TransportError::SendFailed {
                reason: format!("{} writer has stopped", self.session),
            })?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
            let _ = reader.await;
        }

        // Dropping the queue lets the writer flush and send the close frame.
        self.outbound.take();
        if let Some(mut writer) = self.writer.take() {
            if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
                log::warn!("{} writer did not finish in time, aborting", self.session);
                writer.abort();
                let _ = writer.await;
            }
        }

        log::info!("Closed connection for {}", self.session);
    }
}

impl Drop for WebSocketHandle {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
    }
}

async fn write_frames(
    mut sink: SplitSink<WsStream, Message>,
    mut frames: mpsc::Receiver<String>,
    session: SessionId,
) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = sink.send(Message::Text(frame)).await {
            log::error!("{} failed to send frame: {}", session, e);
            return;
        }
    }

    if let Err(e) = sink.send(Message::Close(None)).await {
        log::debug!("{} close frame not sent: {}", session, e);
    }
    let _ = sink.close().await;
}

async fn read_frames(
    mut source: SplitStream<WsStream>,
    deliveries: mpsc::UnboundedSender<Delivery>,
    session: SessionId,
) {
    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => match InboundEvent::from_frame(&text) {
                Ok(event) => {
                    if deliveries.send(Delivery { session, event }).is_err() {
                        log::debug!("{} delivery channel closed, stopping reader", session);
                        return;
                    }
                }
                Err(e) => log::warn!("{} dropped inbound frame: {}", session, e),
            },
            Ok(Message::Close(_)) => {
                log::info!("{} closed by server", session);
                return;
            }
            Ok(_) => {}
            Err(e) => {
                log::warn!("{} connection error: {}", session, e);
                return;
            }
        }
    }
}
