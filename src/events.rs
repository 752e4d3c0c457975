//! Listener registry for inbound named events
//!
//! Handlers are keyed by event name and invoked in registration order on
//! the engine task. The registry lives with the engine rather than the
//! socket, so subscriptions carry over reconnections unchanged.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::protocol::packet::{Packet, Payload};

/// An event received from the server
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub name: String,
    pub args: Vec<Payload>,
    /// Set when the server asked for an acknowledgment
    pub ack_id: Option<u64>,
}

impl InboundEvent {
    /// Build from an event packet; `None` for any other packet
    pub fn from_packet(packet: &Packet) -> Option<Self> {
        let name = packet.event_name()?.to_string();
        Some(Self {
            name,
            args: packet.args(),
            ack_id: packet.id,
        })
    }

    /// First argument as JSON, the common case for application events
    pub fn first_json(&self) -> Option<&serde_json::Value> {
        self.args.first().and_then(Payload::as_json)
    }
}

pub type EventHandler = Arc<dyn Fn(&InboundEvent) + Send + Sync>;

/// Ordered handlers per event name
#[derive(Clone, Default)]
pub struct EventRegistry {
    handlers: Arc<RwLock<HashMap<String, Vec<EventHandler>>>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `name`
    pub fn on<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .entry(name.into())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Remove all handlers for `name`, returning how many were registered
    pub fn off(&self, name: &str) -> usize {
        self.handlers.write().remove(name).map_or(0, |h| h.len())
    }

    pub fn handler_count(&self, name: &str) -> usize {
        self.handlers.read().get(name).map_or(0, Vec::len)
    }

    /// Invoke every handler for the event's name, returning how many ran
    pub fn dispatch(&self, event: &InboundEvent) -> usize {
        // Clone the list so handlers may register more handlers
        let handlers = match self.handlers.read().get(&event.name) {
            Some(handlers) => handlers.clone(),
            None => return 0,
        };
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }
}
