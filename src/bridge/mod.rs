//! Host-side protocol endpoint
//!
//! An [`AppBridge`] serves one Guest. It answers the handshake, owns the
//! last host context it sent, drives the tool call lifecycle and forwards
//! Guest requests to a [`HostDelegate`] or an [`UpstreamServer`].

pub mod lifecycle;
pub mod loader;

pub use lifecycle::ToolLifecycle;
pub use loader::{GuestLoader, GuestResource};

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{Map, Value, json};
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use url::Url;

use crate::channel::MessageChannel;
use crate::protocol::metadata::tool_visible_to_app;
use crate::protocol::types::{decode_params, encode};
use crate::protocol::{
    AppCapabilities, CallToolResult, DisplayMode, HostCapabilities, HostContext, Implementation,
    InitializeParams, InitializeResult, LoggingMessageParams, MessageParams, MessageResult,
    OpenLinkParams, OpenLinkResult, RequestDisplayModeParams, RequestDisplayModeResult, Session,
    SessionOptions, SizeChangedParams, ToolCancelledParams, ToolInputParams, UpdateModelContextParams,
    methods, version,
};
use crate::sandbox::TamperReport;
use crate::utils::{BridgeError, Result};

/// Host decisions and observations for Guest traffic.
///
/// Every method has a default, so an implementation only overrides what it
/// supports. Hooks run on the message loop and must not block.
#[async_trait]
pub trait HostDelegate: Send + Sync + 'static {
    /// Add a user-role message to the conversation
    async fn on_message(&self, _params: MessageParams) -> Result<MessageResult> {
        Err(BridgeError::MethodNotFound(methods::MESSAGE.into()))
    }

    /// Open an external http(s) link
    async fn on_open_link(&self, _url: Url) -> Result<OpenLinkResult> {
        Err(BridgeError::MethodNotFound(methods::OPEN_LINK.into()))
    }

    /// Apply a display mode and return the one actually in effect
    async fn on_request_display_mode(
        &self,
        _requested: DisplayMode,
        current: Option<DisplayMode>,
    ) -> Result<DisplayMode> {
        Ok(current.unwrap_or(DisplayMode::Inline))
    }

    fn on_initialized(&self, _app_info: &Implementation, _capabilities: &AppCapabilities) {}

    fn on_model_context_updated(&self, _params: &UpdateModelContextParams) {}

    fn on_size_changed(&self, _size: SizeChangedParams) {}

    fn on_log(&self, _params: &LoggingMessageParams) {}

    fn on_tamper_detected(&self, _report: &TamperReport) {}
}

/// Delegate that accepts nothing beyond the defaults
pub struct DefaultHostDelegate;

impl HostDelegate for DefaultHostDelegate {}

/// Server methods the Guest may reach through the Host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpstreamMethod {
    CallTool,
    ListTools,
    ReadResource,
    ListResources,
    ListResourceTemplates,
    ListPrompts,
}

impl UpstreamMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamMethod::CallTool => methods::TOOLS_CALL,
            UpstreamMethod::ListTools => methods::TOOLS_LIST,
            UpstreamMethod::ReadResource => methods::RESOURCES_READ,
            UpstreamMethod::ListResources => methods::RESOURCES_LIST,
            UpstreamMethod::ListResourceTemplates => methods::RESOURCES_TEMPLATES_LIST,
            UpstreamMethod::ListPrompts => methods::PROMPTS_LIST,
        }
    }
}

/// The server whose tools and resources the Host exposes
#[async_trait]
pub trait UpstreamServer: Send + Sync + 'static {
    async fn request(&self, method: UpstreamMethod, params: Value) -> Result<Value>;
}

/// Connection phase of a bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgePhase {
    AwaitingInitialize,
    AwaitingInitialized,
    Ready,
    Closed,
}

/// How a teardown ended. All of them mean "unmount now".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownOutcome {
    Completed,
    TimedOut,
    NoHandler,
    Disconnected,
    Rejected(String),
}

#[derive(Default)]
struct PartialThrottle {
    last_sent: Option<Instant>,
    pending: Option<Map<String, Value>>,
    flush_scheduled: bool,
}

#[derive(Default)]
struct BridgeState {
    app_info: Option<Implementation>,
    app_capabilities: Option<AppCapabilities>,
    protocol_version: Option<String>,
    host_context: HostContext,
    /// What the Guest last received, in the handshake or a change notification
    sent_context: HostContext,
    model_context: Option<UpdateModelContextParams>,
    lifecycle: ToolLifecycle,
    partial: PartialThrottle,
    queued_cancel: Option<ToolCancelledParams>,
    hidden_tools: HashSet<String>,
}

struct BridgeInner {
    session: Session,
    host_info: Implementation,
    capabilities: HostCapabilities,
    delegate: Arc<dyn HostDelegate>,
    upstream: Option<Arc<dyn UpstreamServer>>,
    phase: watch::Sender<BridgePhase>,
    state: Mutex<BridgeState>,
}

/// Builder for [`AppBridge`]
pub struct AppBridgeBuilder {
    host_info: Implementation,
    capabilities: HostCapabilities,
    host_context: HostContext,
    delegate: Arc<dyn HostDelegate>,
    upstream: Option<Arc<dyn UpstreamServer>>,
    options: SessionOptions,
}

impl AppBridgeBuilder {
    pub fn capabilities(mut self, capabilities: HostCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn host_context(mut self, context: HostContext) -> Self {
        self.host_context = context;
        self
    }

    pub fn delegate(mut self, delegate: Arc<dyn HostDelegate>) -> Self {
        self.delegate = delegate;
        self
    }

    pub fn upstream(mut self, upstream: Arc<dyn UpstreamServer>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    pub fn options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> AppBridge {
        let (phase, _) = watch::channel(BridgePhase::AwaitingInitialize);
        let inner = Arc::new(BridgeInner {
            session: Session::new("host", self.options),
            host_info: self.host_info,
            capabilities: self.capabilities,
            delegate: self.delegate,
            upstream: self.upstream,
            phase,
            state: Mutex::new(BridgeState {
                host_context: self.host_context,
                ..BridgeState::default()
            }),
        });
        BridgeInner::install_handlers(&inner);
        AppBridge { inner }
    }
}

/// Host endpoint for one Guest
#[derive(Clone)]
pub struct AppBridge {
    inner: Arc<BridgeInner>,
}

impl AppBridge {
    pub fn builder(host_info: Implementation) -> AppBridgeBuilder {
        AppBridgeBuilder {
            host_info,
            capabilities: HostCapabilities::default(),
            host_context: HostContext::default(),
            delegate: Arc::new(DefaultHostDelegate),
            upstream: None,
            options: SessionOptions::default(),
        }
    }

    /// Attach the channel to the Guest (normally from [`GuestLoader::channel`])
    pub fn connect(&self, channel: MessageChannel) -> Result<()> {
        self.inner.session.connect(channel)
    }

    pub fn phase(&self) -> BridgePhase {
        *self.inner.phase.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.phase() == BridgePhase::Ready
    }

    /// Wait until the Guest has sent `initialized`
    pub async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let mut rx = self.inner.phase.subscribe();
        let wait = rx.wait_for(|p| matches!(p, BridgePhase::Ready | BridgePhase::Closed));
        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(phase)) if *phase == BridgePhase::Ready => Ok(()),
            Ok(_) => Err(BridgeError::Closed),
            Err(_) => Err(BridgeError::Timeout {
                method: methods::INITIALIZED.into(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    pub fn host_capabilities(&self) -> &HostCapabilities {
        &self.inner.capabilities
    }

    pub fn app_info(&self) -> Option<Implementation> {
        self.inner.lock().ok().and_then(|s| s.app_info.clone())
    }

    pub fn app_capabilities(&self) -> Option<AppCapabilities> {
        self.inner.lock().ok().and_then(|s| s.app_capabilities.clone())
    }

    pub fn protocol_version(&self) -> Option<String> {
        self.inner.lock().ok().and_then(|s| s.protocol_version.clone())
    }

    /// The host context as last sent (or to be sent at handshake)
    pub fn host_context(&self) -> HostContext {
        self.inner
            .lock()
            .map(|s| s.host_context.clone())
            .unwrap_or_default()
    }

    /// Latest context the Guest asked the Host to surface to its model
    pub fn model_context(&self) -> Option<UpdateModelContextParams> {
        self.inner.lock().ok().and_then(|s| s.model_context.clone())
    }

    pub fn tool_lifecycle(&self) -> ToolLifecycle {
        self.inner
            .lock()
            .map(|s| s.lifecycle)
            .unwrap_or_default()
    }

    /// Replace the host context and send the changed top-level keys.
    ///
    /// Returns whether a notification went out. Before the Guest is ready the
    /// context is only stored; it travels in the handshake result.
    pub fn set_host_context(&self, context: HostContext) -> Result<bool> {
        self.inner.set_host_context(context)
    }

    /// Send the complete tool arguments
    pub fn send_tool_input(&self, arguments: Map<String, Value>) -> Result<()> {
        let inner = &self.inner;
        inner.require_ready()?;
        let mut state = inner.lock()?;
        state.lifecycle.input()?;
        state.partial.pending = None;
        inner.notify(
            methods::TOOL_INPUT,
            &ToolInputParams {
                arguments: Some(arguments),
            },
        )
    }

    /// Send streaming arguments.
    ///
    /// Partials closer together than the configured interval are coalesced:
    /// the latest one is delivered when the interval has passed, unless the
    /// complete input or a cancel supersedes it first.
    pub fn send_tool_input_partial(&self, arguments: Map<String, Value>) -> Result<()> {
        let inner = &self.inner;
        inner.require_ready()?;
        let interval = inner.session.options().partial_input_interval();
        let mut state = inner.lock()?;
        state.lifecycle.partial_input()?;

        let now = Instant::now();
        match state.partial.last_sent.map(|t| t + interval) {
            Some(due) if due > now => {
                state.partial.pending = Some(arguments);
                if !state.partial.flush_scheduled {
                    state.partial.flush_scheduled = true;
                    let weak = Arc::downgrade(inner);
                    tokio::spawn(async move {
                        tokio::time::sleep_until(due).await;
                        if let Some(inner) = weak.upgrade() {
                            inner.flush_partial();
                        }
                    });
                }
                Ok(())
            }
            _ => {
                state.partial.last_sent = Some(now);
                inner.notify(
                    methods::TOOL_INPUT_PARTIAL,
                    &ToolInputParams {
                        arguments: Some(arguments),
                    },
                )
            }
        }
    }

    /// Send the tool result
    pub fn send_tool_result(&self, result: CallToolResult) -> Result<()> {
        let inner = &self.inner;
        inner.require_ready()?;
        let mut state = inner.lock()?;
        state.lifecycle.result()?;
        inner.notify(methods::TOOL_RESULT, &result)
    }

    /// Tell the Guest the tool call was aborted.
    ///
    /// Before the Guest is ready the cancel is queued and delivered right
    /// after `initialized`.
    pub fn send_tool_cancelled(&self, reason: Option<String>) -> Result<()> {
        let inner = &self.inner;
        let phase = *inner.phase.borrow();
        let params = ToolCancelledParams { reason };
        let mut state = inner.lock()?;
        match phase {
            BridgePhase::Ready => {
                state.lifecycle.cancel()?;
                state.partial.pending = None;
                inner.notify(methods::TOOL_CANCELLED, &params)
            }
            BridgePhase::Closed => Err(BridgeError::Closed),
            _ => {
                state.lifecycle.cancel()?;
                state.partial.pending = None;
                log::debug!("queueing tool-cancelled until the guest is initialized");
                state.queued_cancel = Some(params);
                Ok(())
            }
        }
    }

    /// Call a tool the Guest itself provides
    pub async fn call_app_tool(&self, params: Value) -> Result<Value> {
        self.inner.require_app_tools()?;
        self.inner.session.request(methods::TOOLS_CALL, Some(params)).await
    }

    /// List the tools the Guest provides
    pub async fn list_app_tools(&self) -> Result<Value> {
        self.inner.require_app_tools()?;
        self.inner.session.request(methods::TOOLS_LIST, Some(json!({}))).await
    }

    /// Tell the Guest the upstream tool list changed
    pub fn notify_tools_list_changed(&self) -> Result<()> {
        self.inner.require_ready()?;
        if let Ok(mut state) = self.inner.lock() {
            state.hidden_tools.clear();
        }
        self.inner.session.notify(methods::TOOLS_LIST_CHANGED, Some(json!({})))
    }

    /// Tell the Guest the upstream resource list changed
    pub fn notify_resources_list_changed(&self) -> Result<()> {
        self.inner.require_ready()?;
        self.inner
            .session
            .notify(methods::RESOURCES_LIST_CHANGED, Some(json!({})))
    }

    /// Ask the Guest to clean up, then close the connection.
    ///
    /// Never fails: whatever happens the caller may unmount the Guest.
    pub async fn teardown(&self) -> TeardownOutcome {
        let session = &self.inner.session;
        let outcome = if !session.is_connected() {
            TeardownOutcome::Disconnected
        } else {
            let timeout = session.options().teardown_timeout();
            match session
                .request_with_timeout(methods::RESOURCE_TEARDOWN, Some(json!({})), timeout)
                .await
            {
                Ok(_) => TeardownOutcome::Completed,
                Err(BridgeError::Timeout { .. }) => {
                    log::warn!("guest did not answer teardown within {:?}", timeout);
                    TeardownOutcome::TimedOut
                }
                Err(BridgeError::MethodNotFound(_)) => {
                    log::warn!("guest has no teardown handler");
                    TeardownOutcome::NoHandler
                }
                Err(err) if err.is_disconnect() => {
                    log::warn!("guest went away during teardown: {}", err);
                    TeardownOutcome::Disconnected
                }
                Err(err) => {
                    log::warn!("guest teardown failed: {}", err);
                    TeardownOutcome::Rejected(err.to_string())
                }
            }
        };
        session.close();
        outcome
    }

    /// Close without teardown
    pub fn close(&self) {
        self.inner.session.close();
    }
}

impl BridgeInner {
    fn lock(&self) -> Result<MutexGuard<'_, BridgeState>> {
        self.state
            .lock()
            .map_err(|_| BridgeError::Transport("bridge state poisoned".into()))
    }

    fn require_ready(&self) -> Result<()> {
        match *self.phase.borrow() {
            BridgePhase::Ready => Ok(()),
            BridgePhase::Closed => Err(BridgeError::Closed),
            phase => Err(BridgeError::Protocol(format!(
                "guest is not initialized ({:?})",
                phase
            ))),
        }
    }

    fn require_app_tools(&self) -> Result<()> {
        self.require_ready()?;
        let declared = self
            .lock()?
            .app_capabilities
            .as_ref()
            .is_some_and(|c| c.tools.is_some());
        if declared {
            Ok(())
        } else {
            Err(BridgeError::Protocol("guest did not declare the tools capability".into()))
        }
    }

    fn upstream_for(&self, method: UpstreamMethod) -> Result<&Arc<dyn UpstreamServer>> {
        let declared = match method {
            UpstreamMethod::CallTool | UpstreamMethod::ListTools => self.capabilities.server_tools.is_some(),
            UpstreamMethod::ReadResource
            | UpstreamMethod::ListResources
            | UpstreamMethod::ListResourceTemplates => self.capabilities.server_resources.is_some(),
            UpstreamMethod::ListPrompts => true,
        };
        match (&self.upstream, declared) {
            (Some(upstream), true) => Ok(upstream),
            _ => Err(BridgeError::MethodNotFound(method.as_str().into())),
        }
    }

    fn notify<T: serde::Serialize>(&self, method: &str, params: &T) -> Result<()> {
        self.session.notify(method, Some(encode(params)?))
    }

    fn set_host_context(&self, context: HostContext) -> Result<bool> {
        let mut state = self.lock()?;
        state.host_context = context;
        if *self.phase.borrow() != BridgePhase::Ready {
            return Ok(false);
        }
        self.send_context_changes(&mut state)
    }

    /// Send what the Guest is missing; the sent record only moves on success.
    /// Callers hold the state lock so the phase cannot change underneath.
    fn send_context_changes(&self, state: &mut BridgeState) -> Result<bool> {
        let changes = state.sent_context.diff(&state.host_context);
        if changes.is_empty() {
            return Ok(false);
        }
        self.session
            .notify(methods::HOST_CONTEXT_CHANGED, Some(Value::Object(changes)))?;
        state.sent_context = state.host_context.clone();
        Ok(true)
    }

    fn flush_partial(&self) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.partial.flush_scheduled = false;
        let Some(arguments) = state.partial.pending.take() else {
            return;
        };
        if state.lifecycle != ToolLifecycle::Streaming {
            return;
        }
        state.partial.last_sent = Some(Instant::now());
        let params = ToolInputParams {
            arguments: Some(arguments),
        };
        if let Err(err) = self.notify(methods::TOOL_INPUT_PARTIAL, &params) {
            log::debug!("dropping coalesced partial input: {}", err);
        }
    }

    fn install_handlers(this: &Arc<Self>) {
        route(this, methods::INITIALIZE, Self::handle_initialize);
        route(this, methods::PING, |_, _| async { Ok(json!({})) });
        route(this, methods::MESSAGE, Self::handle_message);
        route(this, methods::OPEN_LINK, Self::handle_open_link);
        route(this, methods::UPDATE_MODEL_CONTEXT, Self::handle_update_model_context);
        route(this, methods::REQUEST_DISPLAY_MODE, Self::handle_request_display_mode);
        route(this, methods::TOOLS_CALL, Self::handle_tools_call);
        route(this, methods::TOOLS_LIST, Self::handle_tools_list);
        route(this, methods::RESOURCES_READ, |inner, params| {
            inner.proxy(UpstreamMethod::ReadResource, params)
        });
        route(this, methods::RESOURCES_LIST, |inner, params| {
            inner.proxy(UpstreamMethod::ListResources, params)
        });
        route(this, methods::RESOURCES_TEMPLATES_LIST, |inner, params| {
            inner.proxy(UpstreamMethod::ListResourceTemplates, params)
        });
        route(this, methods::PROMPTS_LIST, |inner, params| {
            inner.proxy(UpstreamMethod::ListPrompts, params)
        });

        listen(this, methods::INITIALIZED, Self::handle_initialized);
        listen(this, methods::SIZE_CHANGED, |inner, params| {
            match decode_params::<SizeChangedParams>(params) {
                Ok(size) => inner.delegate.on_size_changed(size),
                Err(err) => log::warn!("bad size-changed from guest: {}", err),
            }
        });
        listen(this, methods::LOGGING_MESSAGE, |inner, params| {
            match decode_params::<LoggingMessageParams>(params) {
                Ok(entry) => {
                    log::log!(
                        target: "guest",
                        entry.level.to_log_level(),
                        "{}: {}",
                        entry.logger.as_deref().unwrap_or("app"),
                        entry.data
                    );
                    inner.delegate.on_log(&entry);
                }
                Err(err) => log::warn!("bad log message from guest: {}", err),
            }
        });
        listen(this, methods::TAMPER_DETECTED, |inner, params| {
            match decode_params::<TamperReport>(params) {
                Ok(report) => {
                    report.log();
                    inner.delegate.on_tamper_detected(&report);
                }
                Err(err) => log::warn!("unreadable tamper report: {}", err),
            }
        });

        let weak = Arc::downgrade(this);
        this.session.on_close(move || {
            if let Some(inner) = weak.upgrade() {
                inner.phase.send_replace(BridgePhase::Closed);
            }
        });
    }

    async fn handle_initialize(self: Arc<Self>, params: Value) -> Result<Value> {
        let params: InitializeParams = decode_params(params)
            .map_err(|e| BridgeError::Initialization(format!("bad initialize params: {}", e)))?;

        if *self.phase.borrow() != BridgePhase::AwaitingInitialize {
            log::debug!("guest re-initializing");
        }

        let protocol_version = version::negotiate(&params.protocol_version);
        if protocol_version != params.protocol_version {
            log::info!(
                "guest asked for protocol {}, answering with {}",
                params.protocol_version,
                protocol_version
            );
        }

        let host_context = {
            let mut state = self.lock()?;
            state.app_info = Some(params.app_info);
            state.app_capabilities = Some(params.app_capabilities);
            state.protocol_version = Some(protocol_version.to_string());
            state.sent_context = state.host_context.clone();
            state.host_context.clone()
        };
        self.phase.send_replace(BridgePhase::AwaitingInitialized);

        encode(&InitializeResult {
            protocol_version: protocol_version.to_string(),
            host_info: self.host_info.clone(),
            host_capabilities: self.capabilities.clone(),
            host_context,
        })
    }

    fn handle_initialized(&self, _params: Value) {
        if *self.phase.borrow() != BridgePhase::AwaitingInitialized {
            log::warn!("ignoring initialized notification before initialize");
            return;
        }

        let (app_info, capabilities, queued) = match self.lock() {
            Ok(mut state) => {
                self.phase.send_replace(BridgePhase::Ready);
                // Context set between the handshake result and now
                if let Err(err) = self.send_context_changes(&mut state) {
                    log::warn!("could not deliver pending host context: {}", err);
                }
                (
                    state.app_info.clone().unwrap_or_default(),
                    state.app_capabilities.clone().unwrap_or_default(),
                    state.queued_cancel.take(),
                )
            }
            Err(_) => return,
        };
        log::debug!("guest {} {} is ready", app_info.name, app_info.version);

        if let Some(cancel) = queued {
            if let Err(err) = self.notify(methods::TOOL_CANCELLED, &cancel) {
                log::warn!("could not deliver queued tool-cancelled: {}", err);
            }
        }
        self.delegate.on_initialized(&app_info, &capabilities);
    }

    async fn handle_message(self: Arc<Self>, params: Value) -> Result<Value> {
        self.require_ready()?;
        let params: MessageParams = decode_params(params)?;
        let result = self.delegate.on_message(params).await?;
        // Only the flag goes back; the Host's own state never leaks into the reply.
        encode(&MessageResult {
            is_error: result.is_error,
        })
    }

    async fn handle_open_link(self: Arc<Self>, params: Value) -> Result<Value> {
        self.require_ready()?;
        if self.capabilities.open_links.is_none() {
            return Err(BridgeError::MethodNotFound(methods::OPEN_LINK.into()));
        }
        let params: OpenLinkParams = decode_params(params)?;
        let url = match Url::parse(&params.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            _ => {
                log::warn!("refusing to open link {:?}", params.url);
                return encode(&OpenLinkResult { is_error: Some(true) });
            }
        };
        let result = self.delegate.on_open_link(url).await?;
        encode(&result)
    }

    async fn handle_update_model_context(self: Arc<Self>, params: Value) -> Result<Value> {
        self.require_ready()?;
        let params: UpdateModelContextParams = decode_params(params)?;
        self.delegate.on_model_context_updated(&params);
        self.lock()?.model_context = Some(params);
        Ok(json!({}))
    }

    async fn handle_request_display_mode(self: Arc<Self>, params: Value) -> Result<Value> {
        self.require_ready()?;
        let params: RequestDisplayModeParams = decode_params(params)?;
        let current = self.lock()?.host_context.display_mode;
        let mode = self
            .delegate
            .on_request_display_mode(params.mode, current)
            .await?;

        if current != Some(mode) {
            let mut next = self.lock()?.host_context.clone();
            next.display_mode = Some(mode);
            self.set_host_context(next)?;
        }
        encode(&RequestDisplayModeResult { mode })
    }

    async fn handle_tools_call(self: Arc<Self>, params: Value) -> Result<Value> {
        self.require_ready()?;
        let upstream = Arc::clone(self.upstream_for(UpstreamMethod::CallTool)?);
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| BridgeError::InvalidParams("tools/call needs a tool name".into()))?;
        if self.lock()?.hidden_tools.contains(name) {
            log::warn!("guest tried to call model-only tool {}", name);
            return Err(BridgeError::Protocol(format!("tool {} is not available to the app", name)));
        }
        upstream.request(UpstreamMethod::CallTool, params).await
    }

    async fn handle_tools_list(self: Arc<Self>, params: Value) -> Result<Value> {
        self.require_ready()?;
        let upstream = Arc::clone(self.upstream_for(UpstreamMethod::ListTools)?);
        let mut result = upstream.request(UpstreamMethod::ListTools, params).await?;

        let mut hidden = Vec::new();
        if let Some(tools) = result.get_mut("tools").and_then(Value::as_array_mut) {
            tools.retain(|tool| {
                let visible = tool_visible_to_app(tool);
                if !visible {
                    if let Some(name) = tool.get("name").and_then(Value::as_str) {
                        hidden.push(name.to_string());
                    }
                }
                visible
            });
        }
        if !hidden.is_empty() {
            log::debug!("hiding {} model-only tools from the guest", hidden.len());
            self.lock()?.hidden_tools.extend(hidden);
        }
        Ok(result)
    }

    async fn proxy(self: Arc<Self>, method: UpstreamMethod, params: Value) -> Result<Value> {
        self.require_ready()?;
        let upstream = Arc::clone(self.upstream_for(method)?);
        upstream.request(method, params).await
    }
}

/// Register a request handler that runs against a live bridge
fn route<F, Fut>(inner: &Arc<BridgeInner>, method: &'static str, handler: F)
where
    F: Fn(Arc<BridgeInner>, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    let weak = Arc::downgrade(inner);
    inner.session.set_request_handler(method, move |params| {
        let call = weak.upgrade().map(|inner| handler(inner, params));
        async move {
            match call {
                Some(call) => call.await,
                None => Err(BridgeError::Closed),
            }
        }
        .boxed()
    });
}

/// Register a notification handler that runs against a live bridge
fn listen<F>(inner: &Arc<BridgeInner>, method: &'static str, handler: F)
where
    F: Fn(&BridgeInner, Value) + Send + Sync + 'static,
{
    let weak = Arc::downgrade(inner);
    inner.session.set_notification_handler(method, move |params| {
        if let Some(inner) = weak.upgrade() {
            handler(&inner, params);
        }
    });
}
