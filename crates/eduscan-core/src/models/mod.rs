//! Domain models carried by a scanning session

mod connection;
mod context;
mod frame;
mod result;

pub use connection::*;
pub use context::*;
pub use frame::*;
pub use result::*;
