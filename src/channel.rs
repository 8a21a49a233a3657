//! Auto-reconnecting live channel between a tab and the box server.
//!
//! The connection task owns the socket. On every open it asks for the box
//! state, dispatches incoming messages by `type`, and reconnects with
//! exponential backoff after any close it did not ask for.

use crate::protocol::BoxEvent;
use crate::timer::TimerSink;
use crate::types::BoxId;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub const BACKOFF_BASE: Duration = Duration::from_secs(1);
pub const BACKOFF_MAX: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel is not connected")]
    Disconnected,

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Malformed message: {0}")]
    Malformed(String),
}

/// Exponential reconnect delays: 1s, 2s, 4s, 8s, then 15s
#[derive(Debug, Clone)]
pub struct Backoff {
    attempt: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self { attempt: 0 }
    }

    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        BACKOFF_BASE.saturating_mul(factor).min(BACKOFF_MAX)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

/// One open connection
#[async_trait]
pub trait Link: Send {
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError>;

    /// Next text frame. `None` once the peer closed the connection.
    async fn recv_text(&mut self) -> Option<Result<String, ChannelError>>;

    async fn close(&mut self);
}

/// Opens connections; each call is one handshake
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    async fn dial(&self) -> Result<Box<dyn Link>, ChannelError>;
}

/// WebSocket dialer for `ws://host/api/ws?boxId=...`
pub struct WsDialer {
    url: String,
}

impl WsDialer {
    pub fn new(base_url: &str, box_id: &str) -> Self {
        Self {
            url: format!("{}/api/ws?boxId={}", base_url.trim_end_matches('/'), box_id),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

struct WsLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Link for WsLink {
    async fn send_text(&mut self, text: String) -> Result<(), ChannelError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))
    }

    async fn recv_text(&mut self) -> Option<Result<String, ChannelError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(_)) => return None,
                Ok(Message::Ping(data)) => {
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        return Some(Err(ChannelError::Transport(e.to_string())));
                    }
                }
                Ok(_) => {}
                Err(e) => return Some(Err(ChannelError::Transport(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!("WebSocket close failed: {}", e);
        }
    }
}

#[async_trait]
impl Dialer for WsDialer {
    async fn dial(&self) -> Result<Box<dyn Link>, ChannelError> {
        let (stream, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        Ok(Box::new(WsLink { stream }))
    }
}

/// Parse one incoming frame. Unknown types come back as `None`.
pub fn decode_event(text: &str) -> Result<Option<BoxEvent>, ChannelError> {
    match serde_json::from_str::<BoxEvent>(text) {
        Ok(BoxEvent::Unknown) => Ok(None),
        Ok(event) => Ok(Some(event)),
        Err(e) => Err(ChannelError::Malformed(e.to_string())),
    }
}

/// Handle to a running connection task
pub struct LiveChannel {
    box_id: BoxId,
    outgoing: mpsc::UnboundedSender<BoxEvent>,
    connected: Arc<AtomicBool>,
    reconnect: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

enum Step {
    Incoming(Option<Result<String, ChannelError>>),
    Outgoing(Option<BoxEvent>),
    Shutdown,
}

impl LiveChannel {
    /// Start the connection task. Received events arrive on the returned receiver.
    pub fn spawn(
        dialer: Arc<dyn Dialer>,
        box_id: BoxId,
    ) -> (Self, mpsc::UnboundedReceiver<BoxEvent>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connected = Arc::new(AtomicBool::new(false));
        let reconnect = Arc::new(AtomicBool::new(true));

        let task = tokio::spawn(run_connection(
            dialer,
            box_id.clone(),
            out_rx,
            in_tx,
            shutdown_rx,
            connected.clone(),
            reconnect.clone(),
        ));

        (
            Self {
                box_id,
                outgoing: out_tx,
                connected,
                reconnect,
                shutdown: shutdown_tx,
                task,
            },
            in_rx,
        )
    }

    pub fn box_id(&self) -> &BoxId {
        &self.box_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Queue an event for the open socket. Fails fast while disconnected.
    pub fn send(&self, event: BoxEvent) -> Result<(), ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::Disconnected);
        }
        self.outgoing
            .send(event)
            .map_err(|_| ChannelError::Disconnected)
    }

    /// Intentional teardown. Clears the reconnect flag before closing; a
    /// socket still in its handshake is closed once the handshake completes.
    pub async fn close(self) {
        self.reconnect.store(false, Ordering::SeqCst);
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!("Live channel task for box {} ended abnormally: {}", self.box_id, e);
        }
    }
}

impl TimerSink for LiveChannel {
    fn send_timer_sync(&self, event: BoxEvent) {
        if let Err(e) = self.send(event) {
            tracing::debug!("Timer sync not sent: {}", e);
        }
    }
}

async fn run_connection(
    dialer: Arc<dyn Dialer>,
    box_id: BoxId,
    mut outgoing: mpsc::UnboundedReceiver<BoxEvent>,
    incoming: mpsc::UnboundedSender<BoxEvent>,
    mut shutdown: watch::Receiver<bool>,
    connected: Arc<AtomicBool>,
    reconnect: Arc<AtomicBool>,
) {
    let mut backoff = Backoff::new();

    while reconnect.load(Ordering::SeqCst) {
        // The handshake is never interrupted; a close request is honoured after it.
        let dialed = dialer.dial().await;

        match dialed {
            Ok(mut link) => {
                if !reconnect.load(Ordering::SeqCst) {
                    tracing::debug!("Closing box {} socket after deferred close", box_id);
                    link.close().await;
                    break;
                }

                backoff.reset();
                connected.store(true, Ordering::SeqCst);
                tracing::info!("Live channel for box {} connected", box_id);

                let request = BoxEvent::RequestState {
                    box_id: box_id.clone(),
                };
                match serde_json::to_string(&request) {
                    Ok(json) => {
                        if let Err(e) = link.send_text(json).await {
                            tracing::warn!("REQUEST_STATE for box {} failed: {}", box_id, e);
                        }
                    }
                    Err(e) => tracing::error!("Failed to encode event: {}", e),
                }

                loop {
                    let step = tokio::select! {
                        msg = link.recv_text() => Step::Incoming(msg),
                        out = outgoing.recv() => Step::Outgoing(out),
                        _ = shutdown.changed() => Step::Shutdown,
                    };

                    match step {
                        Step::Incoming(Some(Ok(text))) => match decode_event(&text) {
                            Ok(Some(event)) => {
                                if incoming.send(event).is_err() {
                                    tracing::debug!("Event receiver for box {} dropped", box_id);
                                }
                            }
                            Ok(None) => tracing::debug!("Ignoring unknown message type"),
                            Err(e) => tracing::warn!("Discarding message on box {}: {}", box_id, e),
                        },
                        Step::Incoming(Some(Err(e))) => {
                            tracing::warn!("Live channel for box {} failed: {}", box_id, e);
                            break;
                        }
                        Step::Incoming(None) => {
                            tracing::info!("Live channel for box {} closed by peer", box_id);
                            break;
                        }
                        Step::Outgoing(Some(event)) => match serde_json::to_string(&event) {
                            Ok(json) => {
                                if let Err(e) = link.send_text(json).await {
                                    tracing::warn!("Send on box {} failed: {}", box_id, e);
                                    break;
                                }
                            }
                            Err(e) => tracing::error!("Failed to encode event: {}", e),
                        },
                        Step::Outgoing(None) | Step::Shutdown => {
                            reconnect.store(false, Ordering::SeqCst);
                            link.close().await;
                            break;
                        }
                    }
                }
                connected.store(false, Ordering::SeqCst);
            }
            Err(e) => {
                tracing::warn!("Live channel for box {} could not connect: {}", box_id, e);
            }
        }

        if !reconnect.load(Ordering::SeqCst) {
            break;
        }

        let delay = backoff.next_delay();
        tracing::info!("Reconnecting box {} in {:?}", box_id, delay);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    tracing::info!("Live channel for box {} stopped", box_id);
}
