//! WebSocket transport for scanning sessions
//!
//! ```text
//! ┌────────────────────┐   JSON text frames   ┌────────────────────┐
//! │  TransportSession  │◄────────────────────►│  Scanning service  │
//! │  (one connection)  │   ws://…/ws/scan     │                    │
//! └─────────┬──────────┘                      └────────────────────┘
//!           │ dispatch by InboundKind
//!           ▼
//!    HandlerRegistry (one slot per message type)
//! ```
//!
//! The connection is driven by one background task that owns the socket.
//! Inbound frames are decoded and handed to whatever handler currently sits in
//! the slot for that message type.

mod handlers;
mod session;

pub use handlers::{HandlerRegistry, Slot};
pub use session::{DisconnectReason, TransportSession};
