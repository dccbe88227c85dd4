//! Scanning workflow on top of the transport
//!
//! The controller turns the raw message stream into the four things a
//! scanning screen cares about (connected, scanning, processing, last result)
//! and refuses requests that make no sense in the current state before they
//! reach the network.

mod session;
mod state;

pub use session::{ResultCallback, SavedCallback, ScanSessionController};
pub use state::ScanStatus;
