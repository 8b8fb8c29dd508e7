//! Guest-side protocol endpoint
//!
//! An [`App`] runs inside the Guest frame. It performs the handshake, keeps a
//! read-only copy of the host context, hands Host notifications to an
//! [`AppDelegate`] and offers typed requests back to the Host.

pub mod resize;

pub use resize::{AutoResizer, LayoutRoot, MeasuredSize, TaffyLayoutRoot};

use async_trait::async_trait;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::channel::MessageChannel;
use crate::protocol::types::{decode_params, encode};
use crate::protocol::{
    AppCapabilities, CallToolResult, ContentBlock, DisplayMode, HostCapabilities, HostContext,
    HostContextUpdate, Implementation, InitializeParams, InitializeResult, LATEST_PROTOCOL_VERSION,
    LoggingLevel, LoggingMessageParams, MessageParams, MessageResult, OpenLinkParams, OpenLinkResult,
    RequestDisplayModeParams, RequestDisplayModeResult, Role, Session, SessionOptions,
    SizeChangedParams, ToolCancelledParams, ToolInputParams, UpdateModelContextParams, methods,
    version,
};
use crate::utils::{BridgeError, Result};

/// Guest reactions to Host traffic.
///
/// Notification hooks are synchronous and run in arrival order. Request
/// hooks are async; the defaults answer as a Guest without tools would.
#[async_trait]
pub trait AppDelegate: Send + Sync + 'static {
    fn on_tool_input(&self, _params: &ToolInputParams) {}

    fn on_tool_input_partial(&self, _params: &ToolInputParams) {}

    fn on_tool_result(&self, _result: &CallToolResult) {}

    fn on_tool_cancelled(&self, _params: &ToolCancelledParams) {}

    /// `context` is the merged copy, `update` the keys that arrived
    fn on_host_context_changed(&self, _context: &HostContext, _update: &HostContextUpdate) {}

    fn on_tools_list_changed(&self) {}

    fn on_resources_list_changed(&self) {}

    /// Clean up before the Host unmounts the frame
    async fn on_teardown(&self) -> Result<()> {
        Ok(())
    }

    /// Run one of the Guest's own tools
    async fn call_tool(&self, _params: Value) -> Result<Value> {
        Err(BridgeError::MethodNotFound(methods::TOOLS_CALL.into()))
    }

    async fn list_tools(&self, _params: Value) -> Result<Value> {
        Err(BridgeError::MethodNotFound(methods::TOOLS_LIST.into()))
    }
}

/// Delegate that ignores every notification
pub struct DefaultAppDelegate;

impl AppDelegate for DefaultAppDelegate {}

/// What the Host told us during the handshake
#[derive(Clone)]
struct Connection {
    session: Session,
    protocol_version: String,
    host_info: Implementation,
    host_capabilities: HostCapabilities,
}

struct AppInner {
    app_info: Implementation,
    capabilities: AppCapabilities,
    delegate: Arc<dyn AppDelegate>,
    options: SessionOptions,
    connection: Mutex<Option<Connection>>,
    host_context: Mutex<HostContext>,
    resizer: Mutex<AutoResizer>,
}

/// Guest endpoint
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

impl App {
    pub fn new(
        app_info: Implementation,
        capabilities: AppCapabilities,
        delegate: Arc<dyn AppDelegate>,
        options: SessionOptions,
    ) -> Self {
        Self {
            inner: Arc::new(AppInner {
                app_info,
                capabilities,
                delegate,
                options,
                connection: Mutex::new(None),
                host_context: Mutex::new(HostContext::default()),
                resizer: Mutex::new(AutoResizer::new()),
            }),
        }
    }

    /// Connect and run the handshake.
    ///
    /// On any failure the channel is closed and the App stays disconnected;
    /// it may be connected again with a fresh channel.
    pub async fn connect(&self, channel: MessageChannel) -> Result<InitializeResult> {
        if self.is_connected() {
            return Err(BridgeError::Transport("app is already connected".into()));
        }

        let session = Session::new("guest", self.inner.options);
        AppInner::install_handlers(&self.inner, &session);
        session.connect(channel)?;

        match self.inner.handshake(&session).await {
            Ok(result) => Ok(result),
            Err(err) => {
                log::warn!("guest handshake failed: {}", err);
                session.close();
                if let Ok(mut slot) = self.inner.connection.lock() {
                    slot.take();
                }
                Err(err)
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner
            .connection
            .lock()
            .map(|c| c.as_ref().is_some_and(|c| c.session.is_connected()))
            .unwrap_or(false)
    }

    pub fn app_info(&self) -> &Implementation {
        &self.inner.app_info
    }

    pub fn protocol_version(&self) -> Option<String> {
        self.inner.connected().ok().map(|c| c.protocol_version)
    }

    pub fn host_info(&self) -> Option<Implementation> {
        self.inner.connected().ok().map(|c| c.host_info)
    }

    pub fn host_capabilities(&self) -> Option<HostCapabilities> {
        self.inner.connected().ok().map(|c| c.host_capabilities)
    }

    /// Local copy of the host context with every update folded in
    pub fn host_context(&self) -> HostContext {
        self.inner
            .host_context
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// Add a user message to the Host's conversation
    pub async fn send_message(&self, content: Vec<ContentBlock>) -> Result<MessageResult> {
        let params = MessageParams {
            role: Role::User,
            content,
        };
        self.inner.request(methods::MESSAGE, &params).await
    }

    /// Ask the Host to open an external link.
    ///
    /// A denied link comes back as a result with `is_error` set.
    pub async fn open_link(&self, url: &str) -> Result<OpenLinkResult> {
        self.inner.require(|c| c.open_links.is_some(), "openLinks")?;
        let params = OpenLinkParams { url: url.to_string() };
        self.inner.request(methods::OPEN_LINK, &params).await
    }

    /// Replace what the Host surfaces to its model on the next turn
    pub async fn update_model_context(&self, params: UpdateModelContextParams) -> Result<()> {
        let _: Value = self.inner.request(methods::UPDATE_MODEL_CONTEXT, &params).await?;
        Ok(())
    }

    /// Ask for a display mode; returns the mode the Host applied
    pub async fn request_display_mode(&self, mode: DisplayMode) -> Result<DisplayMode> {
        let result: RequestDisplayModeResult = self
            .inner
            .request(methods::REQUEST_DISPLAY_MODE, &RequestDisplayModeParams { mode })
            .await?;
        Ok(result.mode)
    }

    /// Call a tool on the Host's server
    pub async fn call_server_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<CallToolResult> {
        self.inner.require(|c| c.server_tools.is_some(), "serverTools")?;
        let params = json!({"name": name, "arguments": arguments});
        self.inner.request(methods::TOOLS_CALL, &params).await
    }

    pub async fn list_server_tools(&self) -> Result<Value> {
        self.inner.require(|c| c.server_tools.is_some(), "serverTools")?;
        self.inner.request(methods::TOOLS_LIST, &json!({})).await
    }

    pub async fn read_server_resource(&self, uri: &str) -> Result<Value> {
        self.inner.require(|c| c.server_resources.is_some(), "serverResources")?;
        self.inner.request(methods::RESOURCES_READ, &json!({"uri": uri})).await
    }

    pub async fn list_server_resources(&self) -> Result<Value> {
        self.inner.require(|c| c.server_resources.is_some(), "serverResources")?;
        self.inner.request(methods::RESOURCES_LIST, &json!({})).await
    }

    /// Forward a log entry to the Host
    pub fn send_log(&self, level: LoggingLevel, data: Value) -> Result<()> {
        self.inner.require(|c| c.logging.is_some(), "logging")?;
        let params = LoggingMessageParams {
            level,
            logger: Some(self.inner.app_info.name.clone()),
            data,
        };
        self.inner.notify(methods::LOGGING_MESSAGE, &params)
    }

    /// Report the content size
    pub fn send_size_changed(&self, size: SizeChangedParams) -> Result<()> {
        self.inner.notify(methods::SIZE_CHANGED, &size)
    }

    /// Content changed; returns `true` if a measurement was scheduled
    pub fn notify_content_changed(&self) -> bool {
        self.inner
            .resizer
            .lock()
            .map(|mut r| r.notify_content_changed())
            .unwrap_or(false)
    }

    /// Run the scheduled measurement and report the size if it changed
    pub fn on_animation_frame<R: LayoutRoot>(&self, root: &mut R) -> Result<Option<SizeChangedParams>> {
        let size = self.resizer()?.take_frame(root)?;
        if let Some(size) = size {
            // Unsent sizes stay unrecorded so the next frame reports them again
            self.send_size_changed(size)?;
            self.resizer()?.mark_reported(size);
        }
        Ok(size)
    }

    fn resizer(&self) -> Result<MutexGuard<'_, AutoResizer>> {
        self.inner
            .resizer
            .lock()
            .map_err(|_| BridgeError::Layout("resizer state poisoned".into()))
    }

    /// Drop the connection without waiting for the Host
    pub fn close(&self) {
        let connection = self.inner.connection.lock().ok().and_then(|mut c| c.take());
        if let Some(connection) = connection {
            connection.session.close();
        }
    }
}

impl AppInner {
    fn connected(&self) -> Result<Connection> {
        let slot = self
            .connection
            .lock()
            .map_err(|_| BridgeError::Transport("app state poisoned".into()))?;
        match slot.as_ref() {
            Some(c) if c.session.is_closed() => Err(BridgeError::Closed),
            Some(c) => Ok(c.clone()),
            None => Err(BridgeError::Protocol("app is not connected".into())),
        }
    }

    fn require(&self, declared: impl Fn(&HostCapabilities) -> bool, name: &str) -> Result<()> {
        if declared(&self.connected()?.host_capabilities) {
            Ok(())
        } else {
            Err(BridgeError::Protocol(format!("host did not declare the {} capability", name)))
        }
    }

    async fn request<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: serde::Serialize,
        R: DeserializeOwned,
    {
        let session = self.connected()?.session;
        let result = session.request(method, Some(encode(params)?)).await?;
        serde_json::from_value(result)
            .map_err(|e| BridgeError::InvalidMessage(format!("bad {} result: {}", method, e)))
    }

    fn notify<T: serde::Serialize>(&self, method: &str, params: &T) -> Result<()> {
        self.connected()?.session.notify(method, Some(encode(params)?))
    }

    fn lock_context(&self) -> Result<MutexGuard<'_, HostContext>> {
        self.host_context
            .lock()
            .map_err(|_| BridgeError::Transport("host context poisoned".into()))
    }

    async fn handshake(&self, session: &Session) -> Result<InitializeResult> {
        let params = InitializeParams {
            app_info: self.app_info.clone(),
            app_capabilities: self.capabilities.clone(),
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
        };
        let result = session
            .request(methods::INITIALIZE, Some(encode(&params)?))
            .await
            .map_err(|e| BridgeError::Initialization(format!("initialize failed: {}", e)))?;
        let result: InitializeResult = serde_json::from_value(result)
            .map_err(|e| BridgeError::Initialization(format!("bad initialize result: {}", e)))?;

        if !version::is_supported(&result.protocol_version) {
            return Err(BridgeError::Initialization(format!(
                "host answered with unsupported protocol {}",
                result.protocol_version
            )));
        }

        *self.lock_context()? = result.host_context.clone();
        {
            let mut slot = self
                .connection
                .lock()
                .map_err(|_| BridgeError::Transport("app state poisoned".into()))?;
            *slot = Some(Connection {
                session: session.clone(),
                protocol_version: result.protocol_version.clone(),
                host_info: result.host_info.clone(),
                host_capabilities: result.host_capabilities.clone(),
            });
        }
        session
            .notify(methods::INITIALIZED, Some(json!({})))
            .map_err(|e| BridgeError::Initialization(format!("could not send initialized: {}", e)))?;

        log::debug!(
            "connected to {} {} (protocol {})",
            result.host_info.name,
            result.host_info.version,
            result.protocol_version
        );
        Ok(result)
    }

    fn apply_context_update(&self, update: HostContextUpdate) {
        let merged = {
            let Ok(mut context) = self.lock_context() else {
                return;
            };
            match context.merged(&update) {
                Ok(merged) => {
                    *context = merged.clone();
                    merged
                }
                Err(err) => {
                    log::warn!("ignoring host context update: {}", err);
                    return;
                }
            }
        };
        self.delegate.on_host_context_changed(&merged, &update);
    }

    fn install_handlers(this: &Arc<Self>, session: &Session) {
        let weak = Arc::downgrade(this);

        route(session, &weak, methods::PING, |_, _| async { Ok(json!({})) });
        route(session, &weak, methods::RESOURCE_TEARDOWN, |inner, _| async move {
            inner.delegate.on_teardown().await?;
            Ok(json!({}))
        });
        route(session, &weak, methods::TOOLS_CALL, |inner, params| async move {
            if inner.capabilities.tools.is_none() {
                return Err(BridgeError::MethodNotFound(methods::TOOLS_CALL.into()));
            }
            inner.delegate.call_tool(params).await
        });
        route(session, &weak, methods::TOOLS_LIST, |inner, params| async move {
            if inner.capabilities.tools.is_none() {
                return Err(BridgeError::MethodNotFound(methods::TOOLS_LIST.into()));
            }
            inner.delegate.list_tools(params).await
        });

        listen::<ToolInputParams, _>(session, &weak, methods::TOOL_INPUT, |inner, p| {
            inner.delegate.on_tool_input(&p)
        });
        listen::<ToolInputParams, _>(session, &weak, methods::TOOL_INPUT_PARTIAL, |inner, p| {
            inner.delegate.on_tool_input_partial(&p)
        });
        listen::<CallToolResult, _>(session, &weak, methods::TOOL_RESULT, |inner, r| {
            inner.delegate.on_tool_result(&r)
        });
        listen::<ToolCancelledParams, _>(session, &weak, methods::TOOL_CANCELLED, |inner, p| {
            inner.delegate.on_tool_cancelled(&p)
        });
        listen::<HostContextUpdate, _>(session, &weak, methods::HOST_CONTEXT_CHANGED, |inner, u| {
            inner.apply_context_update(u)
        });
        listen::<Value, _>(session, &weak, methods::TOOLS_LIST_CHANGED, |inner, _| {
            inner.delegate.on_tools_list_changed()
        });
        listen::<Value, _>(session, &weak, methods::RESOURCES_LIST_CHANGED, |inner, _| {
            inner.delegate.on_resources_list_changed()
        });
    }
}

fn route<F, Fut>(session: &Session, weak: &Weak<AppInner>, method: &'static str, handler: F)
where
    F: Fn(Arc<AppInner>, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    let weak = weak.clone();
    session.set_request_handler(method, move |params| {
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

fn listen<T, F>(session: &Session, weak: &Weak<AppInner>, method: &'static str, handler: F)
where
    T: DeserializeOwned,
    F: Fn(&AppInner, T) + Send + Sync + 'static,
{
    let weak = weak.clone();
    session.set_notification_handler(method, move |params| {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        match decode_params::<T>(params) {
            Ok(params) => handler(&inner, params),
            Err(err) => log::warn!("bad {} from host: {}", method, err),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{AppBridge, HostDelegate};
    use crate::channel::Window;
    use crate::protocol::{EmptyObject, Theme};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn pair() -> (MessageChannel, MessageChannel) {
        let host = Window::new("https://host.example");
        let guest = Window::new("null");
        (
            MessageChannel::new(host.clone(), guest.clone(), "*").with_expected_source(guest.id()),
            MessageChannel::new(guest, host, "*"),
        )
    }

    fn app(delegate: Arc<dyn AppDelegate>) -> App {
        App::new(
            Implementation::new("guest", "0.1.0"),
            AppCapabilities::default(),
            delegate,
            SessionOptions::default(),
        )
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AppDelegate for Recorder {
        fn on_tool_input(&self, params: &ToolInputParams) {
            self.events.lock().unwrap().push(format!("input {:?}", params.arguments));
        }

        fn on_tool_cancelled(&self, params: &ToolCancelledParams) {
            self.events.lock().unwrap().push(format!("cancelled {:?}", params.reason));
        }

        async fn on_teardown(&self) -> Result<()> {
            self.events.lock().unwrap().push("teardown".into());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_connect_and_receive_context() {
        let (host_side, guest_side) = pair();
        let bridge = AppBridge::builder(Implementation::new("host", "1.0.0"))
            .host_context(HostContext {
                theme: Some(Theme::Light),
                ..HostContext::default()
            })
            .build();
        bridge.connect(host_side).unwrap();

        let app = app(Arc::new(DefaultAppDelegate));
        let result = app.connect(guest_side).await.unwrap();
        assert_eq!(result.host_info.name, "host");
        assert!(app.is_connected());
        assert_eq!(app.host_context().theme, Some(Theme::Light));

        bridge.wait_ready(Duration::from_secs(1)).await.unwrap();
        let mut next = bridge.host_context();
        next.theme = Some(Theme::Dark);
        next.locale = Some("de-DE".into());
        bridge.set_host_context(next.clone()).unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(app.host_context(), next);
    }

    #[tokio::test]
    async fn test_operations_before_connect_fail() {
        let app = app(Arc::new(DefaultAppDelegate));
        assert!(matches!(
            app.send_message(vec![ContentBlock::text("hi")]).await,
            Err(BridgeError::Protocol(_))
        ));
        assert!(app.send_size_changed(SizeChangedParams { width: 1, height: 1 }).is_err());
        assert_eq!(app.host_info(), None);
    }

    #[tokio::test]
    async fn test_failed_handshake_leaves_app_disconnected() {
        let (host_side, guest_side) = pair();
        // A host that answers initialize with garbage
        let host = Session::new("host", SessionOptions::default());
        host.set_request_handler(methods::INITIALIZE, |_| async { Ok(json!({"bogus": 1})) }.boxed());
        host.connect(host_side).unwrap();

        let app = app(Arc::new(DefaultAppDelegate));
        let err = app.connect(guest_side).await.unwrap_err();
        assert!(matches!(err, BridgeError::Initialization(_)));
        assert!(!app.is_connected());
        assert_eq!(app.protocol_version(), None);
    }

    #[tokio::test]
    async fn test_lifecycle_notifications_reach_delegate() {
        let (host_side, guest_side) = pair();
        let bridge = AppBridge::builder(Implementation::new("host", "1.0.0")).build();
        bridge.connect(host_side).unwrap();
        let recorder = Arc::new(Recorder::default());
        let app = app(recorder.clone());
        app.connect(guest_side).await.unwrap();
        bridge.wait_ready(Duration::from_secs(1)).await.unwrap();

        let mut args = Map::new();
        args.insert("q".into(), json!("cats"));
        bridge.send_tool_input(args).unwrap();
        bridge.send_tool_cancelled(Some("stop".into())).unwrap();
        assert_eq!(bridge.teardown().await, crate::bridge::TeardownOutcome::Completed);

        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                r#"input Some({"q": String("cats")})"#.to_string(),
                r#"cancelled Some("stop")"#.to_string(),
                "teardown".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_capability_gating() {
        let (host_side, guest_side) = pair();
        let bridge = AppBridge::builder(Implementation::new("host", "1.0.0")).build();
        bridge.connect(host_side).unwrap();
        let app = app(Arc::new(DefaultAppDelegate));
        app.connect(guest_side).await.unwrap();

        assert!(matches!(app.open_link("https://example.com").await, Err(BridgeError::Protocol(_))));
        assert!(matches!(app.list_server_tools().await, Err(BridgeError::Protocol(_))));
        assert!(app.send_log(LoggingLevel::Info, json!("x")).is_err());
    }

    #[tokio::test]
    async fn test_open_link_and_display_mode() {
        struct Host;
        #[async_trait]
        impl HostDelegate for Host {
            async fn on_open_link(&self, _url: url::Url) -> Result<OpenLinkResult> {
                Ok(OpenLinkResult::default())
            }
            async fn on_request_display_mode(
                &self,
                requested: DisplayMode,
                _current: Option<DisplayMode>,
            ) -> Result<DisplayMode> {
                Ok(requested)
            }
        }

        let (host_side, guest_side) = pair();
        let bridge = AppBridge::builder(Implementation::new("host", "1.0.0"))
            .capabilities(HostCapabilities {
                open_links: Some(EmptyObject {}),
                ..HostCapabilities::default()
            })
            .delegate(Arc::new(Host))
            .build();
        bridge.connect(host_side).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        struct Watcher(mpsc::UnboundedSender<HostContextUpdate>);
        impl AppDelegate for Watcher {
            fn on_host_context_changed(&self, _context: &HostContext, update: &HostContextUpdate) {
                let _ = self.0.send(update.clone());
            }
        }
        let app = app(Arc::new(Watcher(tx)));
        app.connect(guest_side).await.unwrap();
        bridge.wait_ready(Duration::from_secs(1)).await.unwrap();

        assert_eq!(app.open_link("https://example.com").await.unwrap().is_error, None);
        assert_eq!(app.open_link("file:///etc/passwd").await.unwrap().is_error, Some(true));

        let mode = app.request_display_mode(DisplayMode::Fullscreen).await.unwrap();
        assert_eq!(mode, DisplayMode::Fullscreen);
        let update = rx.recv().await.unwrap();
        assert_eq!(update.get("displayMode"), Some(&json!("fullscreen")));
        assert_eq!(app.host_context().display_mode, Some(DisplayMode::Fullscreen));
    }

    #[tokio::test]
    async fn test_resize_reports_once_per_change() {
        struct Sizes(mpsc::UnboundedSender<SizeChangedParams>);
        impl HostDelegate for Sizes {
            fn on_size_changed(&self, size: SizeChangedParams) {
                let _ = self.0.send(size);
            }
        }
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (host_side, guest_side) = pair();
        let bridge = AppBridge::builder(Implementation::new("host", "1.0.0"))
            .delegate(Arc::new(Sizes(tx)))
            .build();
        bridge.connect(host_side).unwrap();
        let app = app(Arc::new(DefaultAppDelegate));
        app.connect(guest_side).await.unwrap();
        bridge.wait_ready(Duration::from_secs(1)).await.unwrap();

        let mut root = TaffyLayoutRoot::new(800.0, 600.0).unwrap();
        root.add_block(400.0, 200.0).unwrap();
        assert!(app.notify_content_changed());
        assert!(!app.notify_content_changed());
        assert!(app.on_animation_frame(&mut root).unwrap().is_some());
        assert_eq!(rx.recv().await.unwrap(), SizeChangedParams { width: 400, height: 200 });

        // Host applies the size; nothing new to report.
        root.set_viewport(400.0, 200.0);
        app.notify_content_changed();
        assert_eq!(app.on_animation_frame(&mut root).unwrap(), None);
    }

    #[tokio::test]
    async fn test_size_is_reported_again_after_failed_send() {
        struct Sizes(mpsc::UnboundedSender<SizeChangedParams>);
        impl HostDelegate for Sizes {
            fn on_size_changed(&self, size: SizeChangedParams) {
                let _ = self.0.send(size);
            }
        }
        let app = app(Arc::new(DefaultAppDelegate));
        let mut root = TaffyLayoutRoot::new(800.0, 600.0).unwrap();
        root.add_block(300.0, 100.0).unwrap();

        app.notify_content_changed();
        assert!(matches!(app.on_animation_frame(&mut root), Err(BridgeError::Protocol(_))));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (host_side, guest_side) = pair();
        let bridge = AppBridge::builder(Implementation::new("host", "1.0.0"))
            .delegate(Arc::new(Sizes(tx)))
            .build();
        bridge.connect(host_side).unwrap();
        app.connect(guest_side).await.unwrap();
        bridge.wait_ready(Duration::from_secs(1)).await.unwrap();

        app.notify_content_changed();
        let size = SizeChangedParams { width: 300, height: 100 };
        assert_eq!(app.on_animation_frame(&mut root).unwrap(), Some(size));
        assert_eq!(rx.recv().await.unwrap(), size);
    }
}
