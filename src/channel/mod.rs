//! Origin-scoped message channel
//!
//! Wraps one `postMessage` pair into a transport:
//! - `start` begins listening and validates every inbound payload
//! - `send` frames and posts a message to the target window
//! - `close` stops listening and signals closure once
//!
//! Host-side channels toward a specific Guest must be created with
//! [`MessageChannel::with_expected_source`] so messages from other frames are
//! never mistaken for that Guest's.

pub mod window;

pub use window::{FrameEvent, OPAQUE_ORIGIN, Window, WindowId};

use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use crate::protocol::JsonRpcMessage;
use crate::utils::{BridgeError, Result};

/// Receiver of channel events
pub trait ChannelHandler: Send + Sync + 'static {
    /// A validated inbound message
    fn on_message(&self, message: JsonRpcMessage);

    /// A malformed payload was received; the channel stays open
    fn on_error(&self, error: BridgeError) {
        log::warn!("channel error: {}", error);
    }

    /// The channel was closed
    fn on_close(&self) {}
}

#[derive(Default)]
struct ChannelState {
    listener: Option<JoinHandle<()>>,
    handler: Option<Arc<dyn ChannelHandler>>,
    closed: bool,
}

/// Bidirectional transport over a pair of windows
pub struct MessageChannel {
    local: Arc<Window>,
    target: Arc<Window>,
    target_origin: String,
    expected_source: Option<WindowId>,
    state: Mutex<ChannelState>,
}

impl MessageChannel {
    /// Create a channel that listens on `local` and posts to `target`
    pub fn new(local: Arc<Window>, target: Arc<Window>, target_origin: impl Into<String>) -> Self {
        Self {
            local,
            target,
            target_origin: target_origin.into(),
            expected_source: None,
            state: Mutex::new(ChannelState::default()),
        }
    }

    /// Only accept messages whose `event.source` is the given window
    pub fn with_expected_source(mut self, source: WindowId) -> Self {
        self.expected_source = Some(source);
        self
    }

    /// Window this channel posts to
    pub fn target(&self) -> &Arc<Window> {
        &self.target
    }

    /// Window this channel listens on
    pub fn local(&self) -> &Arc<Window> {
        &self.local
    }

    /// Begin listening. Must be called from within a tokio runtime.
    pub fn start(&self, handler: Arc<dyn ChannelHandler>) -> Result<()> {
        let mut state = self.lock_state()?;
        if state.closed {
            return Err(BridgeError::Closed);
        }
        if state.listener.is_some() {
            return Err(BridgeError::Transport("channel already started".into()));
        }

        // Registered synchronously so nothing posted after start() is missed.
        let mut inbox = self.local.add_listener();
        let expected_source = self.expected_source;
        let local_id = self.local.id();
        let loop_handler = Arc::clone(&handler);

        let listener = tokio::spawn(async move {
            while let Some(event) = inbox.recv().await {
                if let Some(expected) = expected_source {
                    if event.source != expected {
                        log::trace!(
                            "window {} ignoring message from unexpected source {}",
                            local_id,
                            event.source
                        );
                        continue;
                    }
                }

                match JsonRpcMessage::from_value(event.data) {
                    Ok(message) => loop_handler.on_message(message),
                    Err(err) => {
                        log::warn!(
                            "window {} received malformed message from {}: {}",
                            local_id,
                            event.origin,
                            err
                        );
                        loop_handler.on_error(err);
                    }
                }
            }
        });

        state.listener = Some(listener);
        state.handler = Some(handler);
        Ok(())
    }

    /// Frame and post a message to the target window
    pub fn send(&self, message: &JsonRpcMessage) -> Result<()> {
        if self.lock_state()?.closed {
            return Err(BridgeError::Closed);
        }
        if let Some(method) = message.method() {
            log::debug!("window {} -> {}: {}", self.local.id(), self.target.id(), method);
        }
        if self
            .target
            .post_message(message.to_value(), &self.target_origin, &self.local)
        {
            Ok(())
        } else {
            Err(BridgeError::Transport(format!(
                "target origin {} rejected by window {}",
                self.target_origin,
                self.target.id()
            )))
        }
    }

    /// Stop listening. Calling this more than once has no further effect.
    pub fn close(&self) {
        let handler = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            if state.closed {
                return;
            }
            state.closed = true;
            if let Some(listener) = state.listener.take() {
                listener.abort();
            }
            state.handler.take()
        };

        if let Some(handler) = handler {
            handler.on_close();
        }
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.state.lock().map(|s| s.closed).unwrap_or(true)
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, ChannelState>> {
        self.state
            .lock()
            .map_err(|_| BridgeError::Transport("channel state poisoned".into()))
    }
}

impl Drop for MessageChannel {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(listener) = state.listener.take() {
                listener.abort();
            }
        }
    }
}
