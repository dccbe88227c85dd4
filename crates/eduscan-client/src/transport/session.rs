//! Transport session: one WebSocket connection and its lifecycle

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument, trace, warn};
use url::Url;
use uuid::Uuid;

use eduscan_core::{
    ConnectionState, InboundKind, InboundMessage, OutboundMessage, ScanError, ScanResult,
};

use super::handlers::{HandlerRegistry, Slot};
use crate::config::ScanConfig;
use crate::notifier::{Notice, Notifier};
use crate::policy::ReconnectPolicy;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Why a connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called
    Requested,
    /// The service closed the connection
    RemoteClosed,
    /// The socket failed
    Failed(String),
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::Requested => f.write_str("disconnect requested"),
            DisconnectReason::RemoteClosed => f.write_str("connection closed by scanning service"),
            DisconnectReason::Failed(e) => write!(f, "connection lost: {}", e),
        }
    }
}

/// Callback for connections that end without `disconnect()` being called
pub type DisconnectHandler = dyn Fn(&DisconnectReason) + Send + Sync;

/// Handle to the live connection task
struct Link {
    id: Uuid,
    outbound: mpsc::UnboundedSender<Message>,
    shutdown: Option<oneshot::Sender<()>>,
}

struct Inner {
    url: Url,
    connect_timeout: Duration,
    policy: ReconnectPolicy,
    handlers: HandlerRegistry,
    on_disconnect: Slot<DisconnectHandler>,
    notifier: Arc<dyn Notifier>,
    state: watch::Sender<ConnectionState>,
    link: Mutex<Option<Link>>,
}

/// Owns at most one real-time connection to the scanning service
///
/// # Lifecycle
///
/// ```text
/// Disconnected --connect()--> Connecting --(handshake accepted)--> Connected
/// Connecting   --(error)----> Disconnected
/// Connected    --disconnect() / remote close--> Disconnected
/// ```
///
/// There is no automatic reconnect unless the [`ReconnectPolicy`] asks for
/// retries, and authentication failures are never retried. Dropping the
/// session closes the connection.
pub struct TransportSession {
    inner: Arc<Inner>,
}

impl TransportSession {
    /// Create a disconnected session for the configured endpoint
    pub fn new(config: &ScanConfig, notifier: Arc<dyn Notifier>) -> ScanResult<Self> {
        let url = Url::parse(&config.connection.url)
            .map_err(|e| ScanError::InvalidUrl(format!("{}: {}", config.connection.url, e)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ScanError::InvalidUrl(format!(
                "{}: expected a ws:// or wss:// URL",
                url
            )));
        }

        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Ok(Self {
            inner: Arc::new(Inner {
                url,
                connect_timeout: config.timeouts.connect(),
                policy: config.reconnect.clone(),
                handlers: HandlerRegistry::new(),
                on_disconnect: Slot::new(),
                notifier,
                state,
                link: Mutex::new(None),
            }),
        })
    }

    /// Endpoint URL
    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Subscribe to connection state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Identifier of the open connection, if any
    pub fn connection_id(&self) -> Option<Uuid> {
        self.inner.link.lock().as_ref().map(|link| link.id)
    }

    /// Register the handler for one inbound message type
    ///
    /// Replaces any earlier handler for the same type; the connection task
    /// looks the handler up per message, so the swap applies immediately.
    pub fn on<F>(&self, kind: InboundKind, handler: F)
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        self.inner.handlers.on(kind, handler);
    }

    /// Remove the handler for one inbound message type
    pub fn off(&self, kind: InboundKind) {
        self.inner.handlers.off(kind);
    }

    /// Register the callback for connections that end unexpectedly
    pub fn on_disconnect<F>(&self, handler: F)
    where
        F: Fn(&DisconnectReason) + Send + Sync + 'static,
    {
        self.inner.on_disconnect.set(Arc::new(handler));
    }

    /// Open the connection, presenting `token` as a bearer credential
    ///
    /// Returns immediately if a connection is already open or being opened.
    #[instrument(skip(self, token), fields(url = %self.inner.url))]
    pub async fn connect(&self, token: &str) -> ScanResult<()> {
        let started = self.inner.state.send_if_modified(|state| {
            if state.is_active() {
                false
            } else {
                *state = ConnectionState::Connecting;
                true
            }
        });
        if !started {
            debug!("Connect ignored: already {}", self.state());
            return Ok(());
        }

        let ws = match self.establish(token).await {
            Ok(ws) => ws,
            Err(e) => {
                self.inner.set_state(ConnectionState::Disconnected);
                warn!("Connection failed: {}", e);
                self.inner.notifier.notify(Notice::from(&e));
                return Err(e);
            }
        };

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let id = Uuid::new_v4();

        {
            let mut link = self.inner.link.lock();
            let current = self.state();
            if current != ConnectionState::Connecting {
                // disconnect() ran while the handshake was in flight
                debug!("Connection cancelled during handshake");
                return Err(ScanError::ConnectionFailed("connection cancelled".into()));
            }
            *link = Some(Link {
                id,
                outbound: outbound_tx,
                shutdown: Some(shutdown_tx),
            });
            self.inner.set_state(ConnectionState::Connected);
        }

        tokio::spawn(run_link(self.inner.clone(), id, ws, outbound_rx, shutdown_rx));
        info!(connection = %id, "Connected to scanning service");

        Ok(())
    }

    /// Close the connection if open. Safe to call any number of times.
    pub fn disconnect(&self, reason: &str) {
        self.inner.disconnect(reason);
    }

    /// Send one message
    ///
    /// Only succeeds while connected. Otherwise nothing is sent, a notice is
    /// published and `NotConnected` is returned.
    pub fn send(&self, message: &OutboundMessage) -> ScanResult<()> {
        let result = self.try_send(message);
        if let Err(e) = &result {
            warn!(event = %message.kind(), "Send failed: {}", e);
            self.inner
                .notifier
                .notify(Notice::error(format!("Cannot send {}: {}", message.kind(), e)));
        }
        result
    }

    fn try_send(&self, message: &OutboundMessage) -> ScanResult<()> {
        let link = self.inner.link.lock();
        match link.as_ref() {
            Some(link) if self.state().is_connected() => {
                let text = message.encode()?;
                link.outbound
                    .send(Message::Text(text.into()))
                    .map_err(|_| ScanError::NotConnected)?;
                debug!(event = %message.kind(), connection = %link.id, "Sent message");
                Ok(())
            }
            _ => Err(ScanError::NotConnected),
        }
    }

    /// Wait until a pending connect settles
    ///
    /// Ok once connected; an error if the connection attempt ends in any
    /// other state or `timeout` elapses first.
    pub async fn wait_until_connected(&self, timeout: Duration) -> ScanResult<()> {
        let mut rx = self.inner.state.subscribe();
        let settled = tokio::time::timeout(
            timeout,
            rx.wait_for(|state| *state != ConnectionState::Connecting),
        )
        .await
        .map(|waited| waited.map(|state| *state));
        match settled {
            Err(_) => Err(ScanError::Timeout("connection")),
            Ok(Err(_)) => Err(ScanError::ConnectionFailed("transport dropped".into())),
            Ok(Ok(state)) if state.is_connected() => Ok(()),
            Ok(Ok(state)) => Err(ScanError::ConnectionFailed(format!(
                "connection is {}",
                state
            ))),
        }
    }

    /// Wait until no connection is open; false if `timeout` elapses first
    pub async fn wait_until_disconnected(&self, timeout: Duration) -> bool {
        let mut rx = self.inner.state.subscribe();
        let closed = tokio::time::timeout(timeout, rx.wait_for(|state| !state.is_active()))
            .await
            .map(|waited| waited.is_ok());
        closed.unwrap_or(false)
    }

    async fn establish(&self, token: &str) -> ScanResult<WsStream> {
        let mut attempt = 1;
        loop {
            match self.handshake(token).await {
                Ok(ws) => return Ok(ws),
                Err(e) if e.is_retryable() && self.inner.policy.should_retry(attempt) => {
                    let delay = self.inner.policy.delay_for(attempt);
                    warn!(attempt, "Connection attempt failed: {}; retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                    if self.state() != ConnectionState::Connecting {
                        return Err(ScanError::ConnectionFailed("connection cancelled".into()));
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn handshake(&self, token: &str) -> ScanResult<WsStream> {
        let mut request = self
            .inner
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ScanError::InvalidUrl(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
            ScanError::AuthRejected("access token contains invalid characters".into())
        })?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        debug!("Opening WebSocket to {}", self.inner.url);

        let connecting = tokio_tungstenite::connect_async(request);
        match tokio::time::timeout(self.inner.connect_timeout, connecting).await {
            Err(_) => Err(ScanError::Timeout("connection")),
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(tungstenite::Error::Http(response))) => {
                let status = response.status();
                if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                    Err(ScanError::AuthRejected(format!(
                        "handshake rejected ({})",
                        status
                    )))
                } else {
                    Err(ScanError::ConnectionFailed(format!(
                        "handshake rejected ({})",
                        status
                    )))
                }
            }
            Ok(Err(e)) => Err(ScanError::ConnectionFailed(e.to_string())),
        }
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.inner.disconnect("transport dropped");
    }
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession")
            .field("url", &self.inner.url.as_str())
            .field("state", &self.state())
            .finish()
    }
}

impl Inner {
    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                trace!("Connection state {} -> {}", state, next);
                *state = next;
                true
            }
        });
    }

    fn disconnect(&self, reason: &str) {
        let link = {
            let mut guard = self.link.lock();
            let link = guard.take();
            self.set_state(ConnectionState::Disconnected);
            link
        };

        match link {
            Some(mut link) => {
                info!(connection = %link.id, reason, "Disconnecting");
                if let Some(shutdown) = link.shutdown.take() {
                    let _ = shutdown.send(());
                }
            }
            None => debug!(reason, "Disconnect with no open connection"),
        }
    }

    fn dispatch(&self, text: &str) {
        match InboundMessage::decode(text) {
            Ok(message) => {
                debug!(event = %message.kind(), "Received message");
                if !self.handlers.dispatch(&message) {
                    trace!(event = %message.kind(), "No handler registered");
                }
            }
            Err(e) => warn!("Ignoring undecodable message: {}", e),
        }
    }

    /// Called by the connection task when it exits
    fn link_closed(&self, id: Uuid, reason: DisconnectReason) {
        let was_current = {
            let mut guard = self.link.lock();
            if guard.as_ref().map(|link| link.id) == Some(id) {
                *guard = None;
                if matches!(reason, DisconnectReason::Failed(_)) {
                    self.set_state(ConnectionState::Error);
                }
                self.set_state(ConnectionState::Disconnected);
                true
            } else {
                false
            }
        };

        if !was_current {
            trace!(connection = %id, "Connection task finished");
            return;
        }

        match &reason {
            DisconnectReason::Failed(_) => {
                warn!(connection = %id, "{}", reason);
                self.notifier.notify(Notice::error(capitalize(&reason.to_string())));
            }
            DisconnectReason::RemoteClosed => {
                info!(connection = %id, "{}", reason);
                self.notifier.notify(Notice::warning(capitalize(&reason.to_string())));
            }
            DisconnectReason::Requested => {}
        }

        if let Some(handler) = self.on_disconnect.get() {
            handler(&reason);
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Connection task: owns the socket until shutdown, close or failure
async fn run_link(
    inner: Arc<Inner>,
    id: Uuid,
    ws: WsStream,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let (mut sink, mut stream) = ws.split();
    let mut heartbeat = inner.policy.heartbeat().map(|period| {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval
    });

    let reason = loop {
        tokio::select! {
            biased;

            Some(message) = outbound.recv() => {
                if let Err(e) = sink.send(message).await {
                    break DisconnectReason::Failed(e.to_string());
                }
            }

            _ = &mut shutdown => {
                // Flush anything queued before the disconnect
                while let Ok(message) = outbound.try_recv() {
                    if sink.send(message).await.is_err() {
                        break;
                    }
                }
                let _ = sink.send(Message::Close(None)).await;
                break DisconnectReason::Requested;
            }

            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => inner.dispatch(text.as_str()),
                Some(Ok(Message::Close(frame))) => {
                    debug!(connection = %id, ?frame, "Close frame received");
                    break DisconnectReason::RemoteClosed;
                }
                Some(Ok(_)) => trace!("Ignoring non-text frame"),
                Some(Err(e)) => break DisconnectReason::Failed(e.to_string()),
                None => break DisconnectReason::RemoteClosed,
            },

            _ = next_beat(&mut heartbeat) => {
                trace!(connection = %id, "Heartbeat ping");
                if let Err(e) = sink.send(Message::Ping(Default::default())).await {
                    break DisconnectReason::Failed(e.to_string());
                }
            }
        }
    };

    inner.link_closed(id, reason);
}

async fn next_beat(heartbeat: &mut Option<tokio::time::Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
