//! Request correlation over a [`MessageChannel`]
//!
//! The minimal contract Bridge and App build on: send a request and await the
//! correlated response, send a notification, register handlers. Pending
//! requests are rejected with [`BridgeError::Closed`] when the session closes
//! and with [`BridgeError::Timeout`] when no answer arrives in time.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::oneshot;

use super::jsonrpc::{JsonRpcMessage, RequestId, RpcErrorObject};
use crate::channel::{ChannelHandler, MessageChannel};
use crate::utils::{BridgeError, Result};

/// Async handler for an inbound request
pub type RequestHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Handler for an inbound notification; runs in arrival order
pub type NotificationHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Timing knobs shared by both endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionOptions {
    /// Timeout for ordinary requests
    pub request_timeout_ms: u64,
    /// Timeout for `ui/resource-teardown`
    pub teardown_timeout_ms: u64,
    /// Minimum spacing between two tool-input-partial notifications
    pub partial_input_interval_ms: u64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            teardown_timeout_ms: 5_000,
            partial_input_interval_ms: 50,
        }
    }
}

impl SessionOptions {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }

    pub fn partial_input_interval(&self) -> Duration {
        Duration::from_millis(self.partial_input_interval_ms)
    }
}

struct SessionInner {
    label: &'static str,
    options: SessionOptions,
    channel: Mutex<Option<Arc<MessageChannel>>>,
    pending: Mutex<HashMap<RequestId, oneshot::Sender<Result<Value>>>>,
    request_handlers: Mutex<HashMap<String, RequestHandler>>,
    notification_handlers: Mutex<HashMap<String, NotificationHandler>>,
    close_hooks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    next_id: AtomicI64,
    closed: AtomicBool,
}

/// One end of a JSON-RPC conversation
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create an unconnected session. `label` only appears in logs.
    pub fn new(label: &'static str, options: SessionOptions) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                label,
                options,
                channel: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                request_handlers: Mutex::new(HashMap::new()),
                notification_handlers: Mutex::new(HashMap::new()),
                close_hooks: Mutex::new(Vec::new()),
                next_id: AtomicI64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.inner.options
    }

    /// Attach a channel and start listening on it
    pub fn connect(&self, channel: MessageChannel) -> Result<()> {
        if self.is_closed() {
            return Err(BridgeError::Closed);
        }
        let channel = Arc::new(channel);
        {
            let mut slot = self
                .inner
                .channel
                .lock()
                .map_err(|_| BridgeError::Transport("session state poisoned".into()))?;
            if slot.is_some() {
                return Err(BridgeError::Transport(format!(
                    "{} session is already connected",
                    self.inner.label
                )));
            }
            *slot = Some(Arc::clone(&channel));
        }

        let dispatcher = Arc::new(Dispatcher {
            session: Arc::downgrade(&self.inner),
        });
        if let Err(err) = channel.start(dispatcher) {
            if let Ok(mut slot) = self.inner.channel.lock() {
                slot.take();
            }
            return Err(err);
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        !self.is_closed()
            && self
                .inner
                .channel
                .lock()
                .map(|c| c.is_some())
                .unwrap_or(false)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Register (or replace) the handler for a request method
    pub fn set_request_handler<F>(&self, method: &str, handler: F)
    where
        F: Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync + 'static,
    {
        if let Ok(mut handlers) = self.inner.request_handlers.lock() {
            handlers.insert(method.to_string(), Arc::new(handler));
        }
    }

    /// Register (or replace) the handler for a notification method
    pub fn set_notification_handler<F>(&self, method: &str, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        if let Ok(mut handlers) = self.inner.notification_handlers.lock() {
            handlers.insert(method.to_string(), Arc::new(handler));
        }
    }

    /// Run `hook` once when the session closes
    pub fn on_close<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_closed() {
            hook();
            return;
        }
        if let Ok(mut hooks) = self.inner.close_hooks.lock() {
            hooks.push(Box::new(hook));
        }
    }

    /// Send a request with the default timeout
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.request_with_timeout(method, params, self.inner.options.request_timeout())
            .await
    }

    /// Send a request and wait at most `timeout` for the response
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let channel = self.channel()?;
        let id = RequestId::Number(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();

        self.inner
            .pending
            .lock()
            .map_err(|_| BridgeError::Transport("pending table poisoned".into()))?
            .insert(id.clone(), tx);

        if let Err(err) = channel.send(&JsonRpcMessage::request(id.clone(), method, params)) {
            self.forget(&id);
            return Err(err);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BridgeError::Closed),
            Err(_) => {
                self.forget(&id);
                log::warn!(
                    "{}: request {} ({}) timed out",
                    self.inner.label,
                    id,
                    method
                );
                Err(BridgeError::Timeout {
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Send a notification
    pub fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.channel()?
            .send(&JsonRpcMessage::notification(method, params))
    }

    /// Close the channel and reject everything still pending
    pub fn close(&self) {
        close_inner(&self.inner);
    }

    fn channel(&self) -> Result<Arc<MessageChannel>> {
        if self.is_closed() {
            return Err(BridgeError::Closed);
        }
        self.inner
            .channel
            .lock()
            .map_err(|_| BridgeError::Transport("session state poisoned".into()))?
            .clone()
            .ok_or_else(|| BridgeError::Protocol(format!("{} session is not connected", self.inner.label)))
    }

    fn forget(&self, id: &RequestId) {
        if let Ok(mut pending) = self.inner.pending.lock() {
            pending.remove(id);
        }
    }
}

fn close_inner(inner: &Arc<SessionInner>) {
    if inner.closed.swap(true, Ordering::SeqCst) {
        return;
    }
    log::debug!("{} session closing", inner.label);

    let channel = inner.channel.lock().ok().and_then(|mut c| c.take());
    if let Some(channel) = channel {
        channel.close();
    }
    reject_pending(inner);

    let hooks = inner
        .close_hooks
        .lock()
        .map(|mut h| std::mem::take(&mut *h))
        .unwrap_or_default();
    for hook in hooks {
        hook();
    }
}

fn reject_pending(inner: &SessionInner) {
    let drained: Vec<_> = inner
        .pending
        .lock()
        .map(|mut p| p.drain().collect())
        .unwrap_or_default();
    for (_, tx) in drained {
        let _ = tx.send(Err(BridgeError::Closed));
    }
}

fn respond(inner: &SessionInner, id: RequestId, outcome: &Result<Value>) {
    let message = match outcome {
        Ok(result) => JsonRpcMessage::Response {
            id,
            result: result.clone(),
        },
        Err(err) => JsonRpcMessage::Error {
            id: Some(id),
            error: RpcErrorObject::from(err),
        },
    };
    let channel = inner.channel.lock().ok().and_then(|c| c.clone());
    match channel {
        Some(channel) => {
            if let Err(err) = channel.send(&message) {
                log::debug!("{}: dropping response: {}", inner.label, err);
            }
        }
        None => log::debug!("{}: no channel for response", inner.label),
    }
}

/// Routes channel events into the session without keeping it alive
struct Dispatcher {
    session: Weak<SessionInner>,
}

impl ChannelHandler for Dispatcher {
    fn on_message(&self, message: JsonRpcMessage) {
        let Some(inner) = self.session.upgrade() else {
            return;
        };

        match message {
            JsonRpcMessage::Request { id, method, params } => {
                let handler = inner
                    .request_handlers
                    .lock()
                    .ok()
                    .and_then(|h| h.get(&method).cloned());

                let Some(handler) = handler else {
                    log::debug!("{}: no handler for request {}", inner.label, method);
                    respond(&inner, id, &Err(BridgeError::MethodNotFound(method)));
                    return;
                };

                let future = handler(params.unwrap_or(Value::Object(Default::default())));
                tokio::spawn(async move {
                    let outcome = future.await;
                    if let Err(err) = &outcome {
                        log::debug!("{}: request {} failed: {}", inner.label, method, err);
                    }
                    respond(&inner, id, &outcome);
                    if matches!(outcome, Err(BridgeError::Initialization(_))) {
                        log::warn!("{}: initialization failed, closing", inner.label);
                        close_inner(&inner);
                    }
                });
            }
            JsonRpcMessage::Notification { method, params } => {
                let handler = inner
                    .notification_handlers
                    .lock()
                    .ok()
                    .and_then(|h| h.get(&method).cloned());
                match handler {
                    Some(handler) => handler(params.unwrap_or(Value::Object(Default::default()))),
                    None => log::debug!("{}: unhandled notification {}", inner.label, method),
                }
            }
            JsonRpcMessage::Response { id, result } => {
                complete(&inner, &id, Ok(result));
            }
            JsonRpcMessage::Error { id: Some(id), error } => {
                complete(&inner, &id, Err(BridgeError::from_rpc(error.code, error.message)));
            }
            JsonRpcMessage::Error { id: None, error } => {
                log::warn!(
                    "{}: peer reported error without id: {} {}",
                    inner.label,
                    error.code,
                    error.message
                );
            }
        }
    }

    fn on_close(&self) {
        if let Some(inner) = self.session.upgrade() {
            reject_pending(&inner);
        }
    }
}

fn complete(inner: &SessionInner, id: &RequestId, outcome: Result<Value>) {
    let tx = inner.pending.lock().ok().and_then(|mut p| p.remove(id));
    match tx {
        Some(tx) => {
            let _ = tx.send(outcome);
        }
        None => log::warn!("{}: response for unknown request {}", inner.label, id),
    }
}
