//! eduscan-mock - stand-in EduScan scanning service
//!
//! Speaks the scanning WebSocket protocol on `/ws/scan` with a deterministic
//! fake recogniser, so clients can be developed and tested without the real
//! recognition backend.
//!
//! # Usage
//!
//! ```ignore
//! use eduscan_mock::{create_router, MockConfig, MockState};
//!
//! let state = MockState::new(MockConfig::default().with_tokens(["secret"]));
//! let router = create_router(state);
//! ```

pub mod config;
pub mod handlers;
pub mod recognizer;
pub mod session;
pub mod state;

pub use config::{ConfigError, MockConfig, RejectMode};
pub use recognizer::{RecognitionError, Recognizer};
pub use session::{Reply, ScanSession};
pub use state::{MockState, SavedRecord};

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

/// Create the mock service router with the given state
pub fn create_router(state: MockState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/results", get(handlers::list_results))
        .route("/ws/scan", get(handlers::scan_socket))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
