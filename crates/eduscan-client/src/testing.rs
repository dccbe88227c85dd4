//! Test utilities for eduscan-client
//!
//! Provides a throwaway server for any axum router and a scripted
//! WebSocket service that records every message the client sends.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tracing::warn;

use eduscan_core::{InboundMessage, OutboundKind, OutboundMessage, RecognitionResult};

use crate::config::ScanConfig;

/// A test server that automatically shuts down when dropped
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    /// Serve `router` on an ephemeral localhost port
    ///
    /// # Example
    ///
    /// ```ignore
    /// use eduscan_client::testing::{RecordingService, TestServer};
    ///
    /// let service = RecordingService::standard();
    /// let server = TestServer::start(service.router()).await?;
    /// let config = server.scan_config("/ws/scan");
    /// ```
    pub async fn start(router: axum::Router) -> std::io::Result<Self> {
        // Bind to any available port
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        // Give server a moment to start
        tokio::time::sleep(Duration::from_millis(10)).await;

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Get the HTTP base URL of the test server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// WebSocket URL for `path`
    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Client configuration pointing at `path`, with short timeouts
    pub fn scan_config(&self, path: &str) -> ScanConfig {
        ScanConfig::builder(self.ws_url(path))
            .connect_timeout_ms(2_000)
            .connected_wait_ms(2_000)
            .end_session_grace_ms(500)
            .build()
    }

    /// Shutdown the server gracefully
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        // Send shutdown signal if not already done
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        // Abort the task if still running
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Maps each received message to the replies the service sends back
pub type Responder = dyn Fn(&OutboundMessage) -> Vec<InboundMessage> + Send + Sync;

/// Scripted scanning service that records what the client sends
///
/// Serves WebSocket connections on `/ws/scan`. Every decoded client message
/// is appended to the record and answered by the responder.
#[derive(Clone)]
pub struct RecordingService {
    received: Arc<Mutex<Vec<OutboundMessage>>>,
    connections: Arc<AtomicUsize>,
    greeting: Arc<Vec<InboundMessage>>,
    responder: Arc<Responder>,
    reply_delay: Duration,
    close_after: Option<OutboundKind>,
}

impl RecordingService {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&OutboundMessage) -> Vec<InboundMessage> + Send + Sync + 'static,
    {
        Self {
            received: Arc::new(Mutex::new(Vec::new())),
            connections: Arc::new(AtomicUsize::new(0)),
            greeting: Arc::new(Vec::new()),
            responder: Arc::new(responder),
            reply_delay: Duration::ZERO,
            close_after: None,
        }
    }

    /// A well-behaved service: acknowledges everything, recognises every frame
    pub fn standard() -> Self {
        Self::new(standard_reply).with_greeting(vec![InboundMessage::Connected {
            session_id: Some("test-session".into()),
            message: None,
        }])
    }

    /// Messages pushed to every client right after it connects
    pub fn with_greeting(mut self, greeting: Vec<InboundMessage>) -> Self {
        self.greeting = Arc::new(greeting);
        self
    }

    /// Hold every batch of replies back for `delay`
    pub fn with_reply_delay(mut self, delay: Duration) -> Self {
        self.reply_delay = delay;
        self
    }

    /// Close the socket after answering the first message of `kind`
    pub fn with_close_after(mut self, kind: OutboundKind) -> Self {
        self.close_after = Some(kind);
        self
    }

    pub fn router(&self) -> axum::Router {
        axum::Router::new()
            .route("/ws/scan", get(ws_handler))
            .with_state(self.clone())
    }

    /// Everything received so far, in order
    pub fn received(&self) -> Vec<OutboundMessage> {
        self.received.lock().clone()
    }

    /// Number of received messages of one kind
    pub fn count(&self, kind: OutboundKind) -> usize {
        self.received
            .lock()
            .iter()
            .filter(|message| message.kind() == kind)
            .count()
    }

    /// Number of WebSocket connections accepted
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    async fn serve(self, mut socket: WebSocket) {
        for message in self.greeting.iter() {
            if !send(&mut socket, message).await {
                return;
            }
        }

        while let Some(Ok(frame)) = socket.recv().await {
            match frame {
                Message::Text(text) => match OutboundMessage::decode(text.as_str()) {
                    Ok(message) => {
                        self.received.lock().push(message.clone());
                        let replies = (self.responder)(&message);
                        if !replies.is_empty() && !self.reply_delay.is_zero() {
                            tokio::time::sleep(self.reply_delay).await;
                        }
                        for reply in replies {
                            if !send(&mut socket, &reply).await {
                                return;
                            }
                        }
                        if self.close_after == Some(message.kind()) {
                            let _ = socket.send(Message::Close(None)).await;
                            return;
                        }
                    }
                    Err(e) => warn!("Test service ignoring message: {}", e),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    }
}

async fn ws_handler(State(service): State<RecordingService>, ws: WebSocketUpgrade) -> Response {
    service.connections.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| service.serve(socket))
}

async fn send(socket: &mut WebSocket, message: &InboundMessage) -> bool {
    match message.encode() {
        Ok(text) => socket.send(Message::Text(text.into())).await.is_ok(),
        Err(_) => false,
    }
}

/// Replies of [`RecordingService::standard`]
pub fn standard_reply(message: &OutboundMessage) -> Vec<InboundMessage> {
    match message {
        OutboundMessage::StartScanning {
            exam_id,
            template_id,
        } => vec![InboundMessage::ScanningStarted {
            exam_id: Some(*exam_id),
            template_id: Some(*template_id),
            message: None,
        }],
        OutboundMessage::CaptureFrame { frame_id, .. } => vec![InboundMessage::FrameProcessed {
            success: true,
            message: None,
            data: Some(RecognitionResult {
                success: true,
                student_id: Some("S-001".into()),
                score: Some(9.0),
                max_score: Some(10.0),
                ..Default::default()
            }),
            frame_id: Some(*frame_id),
        }],
        OutboundMessage::SaveResult { .. } => vec![InboundMessage::ResultSaved {
            success: true,
            message: Some("Result saved".into()),
        }],
        OutboundMessage::EndSession {} => vec![InboundMessage::SessionEnded { message: None }],
    }
}

/// Wait for a condition with timeout
pub async fn wait_for<F, Fut>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;

    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_format() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        assert_eq!(format!("ws://{}{}", addr, "/ws/scan"), "ws://127.0.0.1:8080/ws/scan");
    }

    #[test]
    fn test_standard_reply_echoes_frame_id() {
        let replies = standard_reply(&OutboundMessage::CaptureFrame {
            frame: "AAAA".into(),
            frame_id: 7,
        });
        assert!(matches!(
            replies.as_slice(),
            [InboundMessage::FrameProcessed {
                frame_id: Some(7),
                ..
            }]
        ));
    }
}
