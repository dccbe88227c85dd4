//! Swappable per-message-type handlers

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use eduscan_core::{InboundKind, InboundMessage};

/// Single-slot holder for a callback
///
/// Listeners hold the slot, not the callback, and look the callback up on
/// every invocation. Replacing the callback therefore takes effect for the
/// very next event without re-subscribing anything.
pub struct Slot<F: ?Sized> {
    current: RwLock<Option<Arc<F>>>,
}

impl<F: ?Sized> Default for Slot<F> {
    fn default() -> Self {
        Self {
            current: RwLock::new(None),
        }
    }
}

impl<F: ?Sized> Slot<F> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the callback
    pub fn set(&self, callback: Arc<F>) {
        *self.current.write() = Some(callback);
    }

    pub fn clear(&self) {
        *self.current.write() = None;
    }

    /// Current callback; the lock is released before the caller runs it
    pub fn get(&self) -> Option<Arc<F>> {
        self.current.read().clone()
    }

    pub fn is_set(&self) -> bool {
        self.current.read().is_some()
    }
}

impl<F: ?Sized> std::fmt::Debug for Slot<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot").field("set", &self.is_set()).finish()
    }
}

/// Handler invoked for one inbound message
pub type MessageHandler = dyn Fn(&InboundMessage) + Send + Sync;

/// One handler slot per inbound message type
#[derive(Debug)]
pub struct HandlerRegistry {
    slots: BTreeMap<InboundKind, Slot<MessageHandler>>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self {
            slots: InboundKind::ALL
                .into_iter()
                .map(|kind| (kind, Slot::new()))
                .collect(),
        }
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `kind`, replacing any previous one
    pub fn on<F>(&self, kind: InboundKind, handler: F)
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        if let Some(slot) = self.slots.get(&kind) {
            slot.set(Arc::new(handler));
        }
    }

    /// Remove the handler for `kind`
    pub fn off(&self, kind: InboundKind) {
        if let Some(slot) = self.slots.get(&kind) {
            slot.clear();
        }
    }

    /// Run the current handler for the message's type; false if none is set
    pub fn dispatch(&self, message: &InboundMessage) -> bool {
        let handler = self.slots.get(&message.kind()).and_then(Slot::get);
        match handler {
            Some(handler) => {
                handler(message);
                true
            }
            None => false,
        }
    }
}
