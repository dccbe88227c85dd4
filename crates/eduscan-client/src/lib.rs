//! EduScan scanning session client
//!
//! Drives a real-time scanning session against the EduScan scanning service:
//! connect, start a session for an exam/template pair, submit captured
//! frames, receive recognition results, save them, and end the session.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use eduscan_client::{ScanConfig, ScanSessionController, StaticToken, TracingNotifier};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ScanConfig::builder("ws://localhost:8090/ws/scan").build();
//!     let controller = ScanSessionController::new(
//!         &config,
//!         Arc::new(StaticToken::new("secret")),
//!         Arc::new(TracingNotifier),
//!     )?;
//!
//!     controller.set_context(42, 7);
//!     controller.start_scanning().await?;
//!     controller.wait_until_scanning(std::time::Duration::from_secs(5)).await?;
//!
//!     let frame_id = controller.capture_frame("data:image/jpeg;base64,/9j/4AAQ...")?;
//!     let result = controller
//!         .wait_for_result(frame_id, std::time::Duration::from_secs(10))
//!         .await?;
//!     controller.save_result(Some(result))?;
//!
//!     controller.end_session().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Layers
//!
//! - [`TransportSession`] owns one WebSocket connection and dispatches named
//!   messages to per-type handlers.
//! - [`ScanSessionController`] sequences the scanning workflow on top of it
//!   and publishes [`ScanStatus`] snapshots.
//!
//! # Testing
//!
//! The `testing` module serves any axum router on an ephemeral port:
//!
//! ```rust,ignore
//! use eduscan_client::testing::TestServer;
//!
//! let server = TestServer::start(eduscan_mock::create_router(state)).await?;
//! let url = server.ws_url("/ws/scan");
//! ```

pub mod config;
pub mod controller;
pub mod credentials;
pub mod notifier;
pub mod policy;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, ScanConfig};
pub use controller::{ScanSessionController, ScanStatus};
pub use credentials::{CredentialStore, EnvToken, Identity, StaticToken, TokenSource};
pub use notifier::{ChannelNotifier, Notice, NoticeLevel, Notifier, TracingNotifier};
pub use policy::{Backoff, ReconnectPolicy};
pub use transport::{DisconnectReason, TransportSession};

// Re-export core types for convenience
pub use eduscan_core::{
    data_url, ConnectionState, ErrorKind, InboundKind, InboundMessage, OutboundKind,
    OutboundMessage, RecognitionResult, SavedResult, ScanError, ScanResult, ScanningContext,
};
