//! In-memory browsing contexts
//!
//! A `Window` models the one thing the protocol needs from a frame: an
//! identity, an origin and `postMessage`. Delivery is FIFO per sender and
//! fans out to every registered listener, like `addEventListener("message")`.
//! Messages posted while nobody listens are dropped.

use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

/// Opaque identity of a browsing context (`event.source`)
pub type WindowId = u64;

/// Origin used by sandboxed frames without `allow-same-origin`
pub const OPAQUE_ORIGIN: &str = "null";

/// A delivered `message` event
#[derive(Debug, Clone, PartialEq)]
pub struct FrameEvent {
    /// Identity of the sending window
    pub source: WindowId,
    /// Origin of the sending window
    pub origin: String,
    /// Structured-clone payload
    pub data: Value,
}

/// A browsing context that can receive posted messages
#[derive(Debug)]
pub struct Window {
    id: WindowId,
    origin: String,
    listeners: Mutex<Vec<UnboundedSender<FrameEvent>>>,
}

impl Window {
    /// Create a window for the given origin
    pub fn new(origin: impl Into<String>) -> Arc<Self> {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Arc::new(Self {
            id: COUNTER.fetch_add(1, Ordering::SeqCst),
            origin: origin.into(),
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Window identity
    pub fn id(&self) -> WindowId {
        self.id
    }

    /// Window origin
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Register a message listener
    pub fn add_listener(&self) -> UnboundedReceiver<FrameEvent> {
        let (tx, rx) = unbounded_channel();
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(tx);
        }
        rx
    }

    /// Number of live listeners
    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .map(|mut l| {
                l.retain(|tx| !tx.is_closed());
                l.len()
            })
            .unwrap_or(0)
    }

    /// Post a message to this window on behalf of `source`.
    ///
    /// Returns `false` when the target origin does not match, in which case
    /// the message is silently discarded.
    pub fn post_message(&self, data: Value, target_origin: &str, source: &Window) -> bool {
        if target_origin != "*" && target_origin != self.origin {
            log::debug!(
                "dropping message for window {}: target origin {} != {}",
                self.id,
                target_origin,
                self.origin
            );
            return false;
        }

        let event = FrameEvent {
            source: source.id,
            origin: source.origin.clone(),
            data,
        };

        let Ok(mut listeners) = self.listeners.lock() else {
            return false;
        };
        listeners.retain(|tx| tx.send(event.clone()).is_ok());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_window_ids_are_unique() {
        let a = Window::new("https://host.example");
        let b = Window::new("https://host.example");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_post_message_delivers_in_order() {
        let host = Window::new("https://host.example");
        let relay = Window::new("https://sandbox.example");
        let mut rx = relay.add_listener();

        assert!(relay.post_message(json!({"n": 1}), "*", &host));
        assert!(relay.post_message(json!({"n": 2}), "https://sandbox.example", &host));

        let first = rx.try_recv().unwrap();
        assert_eq!(first.source, host.id());
        assert_eq!(first.origin, "https://host.example");
        assert_eq!(first.data, json!({"n": 1}));
        assert_eq!(rx.try_recv().unwrap().data, json!({"n": 2}));
    }

    #[test]
    fn test_target_origin_mismatch_is_dropped() {
        let host = Window::new("https://host.example");
        let relay = Window::new("https://sandbox.example");
        let mut rx = relay.add_listener();

        assert!(!relay.post_message(json!({}), "https://evil.example", &host));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_listener_is_pruned() {
        let host = Window::new("https://host.example");
        let relay = Window::new("https://sandbox.example");
        let rx = relay.add_listener();
        assert_eq!(relay.listener_count(), 1);
        drop(rx);
        relay.post_message(json!({}), "*", &host);
        assert_eq!(relay.listener_count(), 0);
    }
}
