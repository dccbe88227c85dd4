//! eduscan-core - Wire protocol and shared types for EduScan scanning sessions
//!
//! This crate holds everything the client and the scanning service must agree
//! on: the named messages exchanged over the real-time connection, the domain
//! models they carry, and the error taxonomy surfaced to users.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::{ErrorKind, ScanError, ScanResult};
pub use models::*;
pub use protocol::{InboundKind, InboundMessage, OutboundKind, OutboundMessage};
