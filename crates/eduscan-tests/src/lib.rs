//! End-to-end tests for the EduScan scanning stack
//!
//! Every test serves the real mock scanning service (`eduscan-mock`) on an
//! ephemeral port and drives it with `eduscan-client`, so the wire protocol,
//! authentication and session state machine are exercised together.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p eduscan-tests
//! ```
//!
//! # Test Structure
//!
//! - `session_e2e_test.rs` - full scanning sessions
//! - `auth_e2e_test.rs` - token rejection at the handshake and by message

// This crate only contains tests, no library code
