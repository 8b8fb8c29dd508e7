//! Double-frame sandbox relay
//!
//! The relay is the intermediate document between Host and Guest. It runs on
//! its own origin, refuses to start unless it is embedded the expected way,
//! and then:
//! - announces itself with `sandbox-proxy-ready`
//! - turns `sandbox-resource-ready` into a loaded inner frame (CSP meta tag
//!   and tamper monitor spliced into the document head)
//! - forwards everything else between parent and inner frame untouched

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use url::Url;

use super::attributes::{DEFAULT_SANDBOX, SandboxAttributes};
use super::csp::{ContentSecurityPolicy, CspDeclaration};
use super::embedding::{EmbeddingEnvironment, parse_patterns, verify_embedding};
use super::frame::{ContentFrame, PreparedDocument};
use super::tamper::TamperMonitor;
use crate::channel::{FrameEvent, Window};
use crate::protocol::jsonrpc::peek_method;
use crate::protocol::{JsonRpcMessage, methods};
use crate::utils::{BridgeError, Result};

/// Relay settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RelayConfig {
    /// `scheme://host[:port]` patterns the embedding page must match
    pub allowed_referrers: Vec<String>,
    /// Sandbox attribute used when a resource does not override it
    pub default_sandbox: String,
    /// Inject the tamper monitor into Guest documents
    pub tamper_monitor: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            allowed_referrers: vec!["http://localhost:*".into(), "http://127.0.0.1:*".into()],
            default_sandbox: DEFAULT_SANDBOX.into(),
            tamper_monitor: true,
        }
    }
}

/// Relay lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Unloaded,
    AwaitingReady,
    Relaying,
}

/// Params of `sandbox-resource-ready`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxResourceReadyParams {
    pub html: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csp: Option<CspDeclaration>,
}

/// Insert the CSP meta tag and monitor script right after `<head ...>`,
/// or at the very start when the document has no head tag.
pub fn prepare_document(html: &str, csp: &ContentSecurityPolicy, monitor: Option<&str>) -> String {
    let mut injected = csp.to_meta_tag();
    if let Some(script) = monitor {
        injected.push_str(script);
    }

    match head_insertion_point(html) {
        Some(at) => {
            let mut out = String::with_capacity(html.len() + injected.len());
            out.push_str(&html[..at]);
            out.push_str(&injected);
            out.push_str(&html[at..]);
            out
        }
        None => injected + html,
    }
}

/// Byte offset just past the `>` of the first `<head>` opening tag
fn head_insertion_point(html: &str) -> Option<usize> {
    // ASCII lowercasing keeps byte offsets intact.
    let lower = html.to_ascii_lowercase();
    let mut from = 0;
    while let Some(found) = lower[from..].find("<head") {
        let start = from + found;
        let after = start + "<head".len();
        match lower.as_bytes().get(after) {
            Some(b'>') => return Some(after + 1),
            Some(c) if c.is_ascii_whitespace() || *c == b'/' => {
                return lower[after..].find('>').map(|end| after + end + 1);
            }
            _ => from = after,
        }
    }
    None
}

/// Origin string of a referrer URL, used as the target origin for the parent
fn referrer_origin(referrer: Option<&str>) -> Result<String> {
    let referrer = referrer.ok_or_else(|| BridgeError::Security("sandbox relay has no referrer".into()))?;
    let url = Url::parse(referrer)
        .map_err(|e| BridgeError::Security(format!("unparseable referrer {}: {}", referrer, e)))?;
    Ok(url.origin().ascii_serialization())
}

struct RelayWorker {
    own: Arc<Window>,
    parent: Arc<Window>,
    parent_origin: String,
    frame: Arc<dyn ContentFrame>,
    inner: Arc<Window>,
    default_sandbox: String,
    monitor: Option<String>,
    state: watch::Sender<RelayState>,
}

impl RelayWorker {
    fn handle(&self, event: FrameEvent) {
        if event.source == self.parent.id() {
            self.from_parent(event.data);
        } else if event.source == self.inner.id() {
            self.from_inner(event.data);
        } else {
            log::trace!("relay {} dropping message from window {}", self.own.id(), event.source);
        }
    }

    fn from_parent(&self, data: Value) {
        match peek_method(&data) {
            Some(methods::SANDBOX_RESOURCE_READY) => {
                if let Err(err) = self.load_resource(data) {
                    log::error!("relay {} could not load guest resource: {}", self.own.id(), err);
                }
            }
            Some(methods::SANDBOX_PROXY_READY) => {
                log::warn!("relay {} ignoring proxy-ready from parent", self.own.id());
            }
            _ => {
                if *self.state.borrow() != RelayState::Relaying {
                    log::debug!("relay {} forwarding before a guest is loaded", self.own.id());
                }
                self.inner.post_message(data, "*", &self.own);
            }
        }
    }

    fn from_inner(&self, data: Value) {
        match peek_method(&data) {
            Some(method) if methods::is_relay_signal(method) => {
                log::warn!("relay {} dropping {} sent by the guest", self.own.id(), method);
            }
            _ => {
                if !self.parent.post_message(data, &self.parent_origin, &self.own) {
                    log::warn!("relay {} could not reach parent", self.own.id());
                }
            }
        }
    }

    fn load_resource(&self, data: Value) -> Result<()> {
        let params = match JsonRpcMessage::from_value(data)? {
            JsonRpcMessage::Notification { params, .. } | JsonRpcMessage::Request { params, .. } => {
                params.unwrap_or(Value::Null)
            }
            _ => return Err(BridgeError::InvalidMessage("resource-ready must carry params".into())),
        };
        let params: SandboxResourceReadyParams = serde_json::from_value(params)
            .map_err(|e| BridgeError::InvalidParams(format!("sandbox-resource-ready: {}", e)))?;

        let sandbox = SandboxAttributes::resolve(params.sandbox.as_deref(), &self.default_sandbox)?;
        let csp = ContentSecurityPolicy::for_guest(params.csp.as_ref());
        let html = prepare_document(&params.html, &csp, self.monitor.as_deref());

        self.frame.load(PreparedDocument { html, sandbox })?;
        self.state.send_replace(RelayState::Relaying);
        log::debug!("relay {} loaded guest into frame {}", self.own.id(), self.inner.id());
        Ok(())
    }
}

/// A running relay
pub struct SandboxRelay {
    state: watch::Receiver<RelayState>,
    task: JoinHandle<()>,
}

impl SandboxRelay {
    /// Verify the embedding, start relaying and announce readiness.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        env: &EmbeddingEnvironment,
        config: &RelayConfig,
        own: Arc<Window>,
        parent: Arc<Window>,
        frame: Arc<dyn ContentFrame>,
    ) -> Result<Self> {
        let patterns = parse_patterns(&config.allowed_referrers)?;
        if let Err(err) = verify_embedding(env, &patterns) {
            log::error!("sandbox relay refused to start: {}", err);
            return Err(err);
        }
        let parent_origin = referrer_origin(env.referrer.as_deref())?;

        // Fail on a bad default here rather than on the first resource.
        SandboxAttributes::parse(&config.default_sandbox)?;
        let monitor = if config.tamper_monitor {
            Some(TamperMonitor::default().script_tag()?)
        } else {
            None
        };

        let (state_tx, state_rx) = watch::channel(RelayState::Unloaded);
        let mut inbox = own.add_listener();
        let inner = frame.window();

        let worker = RelayWorker {
            own: Arc::clone(&own),
            parent: Arc::clone(&parent),
            parent_origin: parent_origin.clone(),
            frame,
            inner,
            default_sandbox: config.default_sandbox.clone(),
            monitor,
            state: state_tx,
        };

        worker.state.send_replace(RelayState::AwaitingReady);
        let ready = JsonRpcMessage::notification(methods::SANDBOX_PROXY_READY, Some(json!({})));
        if !parent.post_message(ready.to_value(), &parent_origin, &own) {
            return Err(BridgeError::Transport(format!(
                "parent window rejected origin {}",
                parent_origin
            )));
        }
        log::debug!("relay {} announced readiness to {}", own.id(), parent_origin);

        let task = tokio::spawn(async move {
            while let Some(event) = inbox.recv().await {
                worker.handle(event);
            }
        });

        Ok(Self {
            state: state_rx,
            task,
        })
    }

    pub fn state(&self) -> RelayState {
        *self.state.borrow()
    }

    /// Wait for the relay to reach `state`
    pub async fn wait_for_state(&self, state: RelayState) -> Result<()> {
        let mut rx = self.state.clone();
        rx.wait_for(|s| *s == state).await.map_err(|_| BridgeError::Closed)?;
        Ok(())
    }

    /// Stop relaying
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for SandboxRelay {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::OPAQUE_ORIGIN;
    use crate::sandbox::frame::InMemoryFrame;
    use pretty_assertions::assert_eq;
    use tokio::sync::mpsc::UnboundedReceiver;

    const HOST: &str = "https://host.example";

    struct Fixture {
        host: Arc<Window>,
        relay_window: Arc<Window>,
        frame: Arc<InMemoryFrame>,
        host_inbox: UnboundedReceiver<FrameEvent>,
        relay: SandboxRelay,
    }

    fn config() -> RelayConfig {
        RelayConfig {
            allowed_referrers: vec![HOST.into()],
            ..RelayConfig::default()
        }
    }

    fn start() -> Fixture {
        let host = Window::new(HOST);
        let relay_window = Window::new("https://sandbox.example");
        let frame = InMemoryFrame::new(Window::new(OPAQUE_ORIGIN));
        let host_inbox = host.add_listener();
        let relay = SandboxRelay::start(
            &EmbeddingEnvironment::embedded("https://host.example/chat"),
            &config(),
            relay_window.clone(),
            host.clone(),
            frame.clone(),
        )
        .unwrap();
        Fixture {
            host,
            relay_window,
            frame,
            host_inbox,
            relay,
        }
    }

    fn resource_ready(params: Value) -> Value {
        JsonRpcMessage::notification(methods::SANDBOX_RESOURCE_READY, Some(params)).to_value()
    }

    #[test]
    fn test_prepare_document_splices_after_head() {
        let csp = ContentSecurityPolicy::for_guest(None);
        let out = prepare_document(
            "<html><HEAD lang=\"en\"><title>t</title></HEAD><body></body></html>",
            &csp,
            Some("<script>m()</script>"),
        );
        let meta = csp.to_meta_tag();
        assert!(out.starts_with(&format!("<html><HEAD lang=\"en\">{}<script>m()</script><title>", meta)));
    }

    #[test]
    fn test_prepare_document_without_head_prepends() {
        let csp = ContentSecurityPolicy::for_guest(None);
        let out = prepare_document("<header>x</header>", &csp, None);
        assert_eq!(out, format!("{}<header>x</header>", csp.to_meta_tag()));
    }

    #[tokio::test]
    async fn test_announces_readiness_on_start() {
        let mut fx = start();
        assert_eq!(fx.relay.state(), RelayState::AwaitingReady);
        let event = fx.host_inbox.recv().await.unwrap();
        assert_eq!(event.source, fx.relay_window.id());
        assert_eq!(peek_method(&event.data), Some(methods::SANDBOX_PROXY_READY));
    }

    #[tokio::test]
    async fn test_refuses_bad_embedding() {
        let host = Window::new(HOST);
        let frame = InMemoryFrame::new(Window::new(OPAQUE_ORIGIN));
        let mut env = EmbeddingEnvironment::embedded("https://evil.example/");
        let result = SandboxRelay::start(&env, &config(), Window::new("https://sandbox.example"), host.clone(), frame.clone());
        assert!(matches!(result, Err(BridgeError::Security(_))));

        env = EmbeddingEnvironment::embedded("https://host.example/");
        env.top_access = crate::sandbox::embedding::TopAccess::Allowed;
        let result = SandboxRelay::start(&env, &config(), Window::new("https://sandbox.example"), host, frame);
        assert!(matches!(result, Err(BridgeError::Security(_))));
    }

    #[tokio::test]
    async fn test_resource_ready_loads_guest() {
        let fx = start();
        let params = json!({
            "html": "<html><head></head><body>hi</body></html>",
            "sandbox": "allow-scripts",
            "csp": {"resourceDomains": ["https://cdn.example"]}
        });
        fx.relay_window.post_message(resource_ready(params), "*", &fx.host);

        let doc = fx.frame.wait_for_load(1).await.unwrap();
        assert_eq!(doc.sandbox.to_string(), "allow-scripts");
        assert!(doc.html.starts_with("<html><head><meta http-equiv=\"Content-Security-Policy\""));
        assert!(doc.html.contains("img-src 'self' data: https://cdn.example"));
        assert!(doc.html.contains("connect-src 'self';"));
        assert!(doc.html.contains(methods::TAMPER_DETECTED));
        fx.relay.wait_for_state(RelayState::Relaying).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_sandbox_override_is_not_loaded() {
        let fx = start();
        fx.relay_window.post_message(
            resource_ready(json!({"html": "<p>x</p>", "sandbox": "allow-top-navigation"})),
            "*",
            &fx.host,
        );
        fx.relay_window.post_message(resource_ready(json!({"html": "<p>y</p>"})), "*", &fx.host);

        let doc = fx.frame.wait_for_load(1).await.unwrap();
        assert!(doc.html.ends_with("<p>y</p>"));
        assert_eq!(doc.sandbox, SandboxAttributes::default());
    }

    #[tokio::test]
    async fn test_forwards_verbatim_both_ways() {
        let mut fx = start();
        let _ready = fx.host_inbox.recv().await.unwrap();
        let inner = fx.frame.window();
        let mut inner_inbox = inner.add_listener();

        let down = json!({"jsonrpc": "2.0", "method": "x", "params": {"k": [1, 2]}});
        fx.relay_window.post_message(down.clone(), "*", &fx.host);
        let event = inner_inbox.recv().await.unwrap();
        assert_eq!(event.data, down);
        assert_eq!(event.source, fx.relay_window.id());

        let up = json!({"method": "x"});
        fx.relay_window.post_message(up.clone(), "*", &inner);
        let event = fx.host_inbox.recv().await.unwrap();
        assert_eq!(event.data, up);
    }

    #[tokio::test]
    async fn test_guest_cannot_spoof_sandbox_signals() {
        let mut fx = start();
        let _ready = fx.host_inbox.recv().await.unwrap();
        let inner = fx.frame.window();

        let spoof = JsonRpcMessage::notification(methods::SANDBOX_PROXY_READY, None).to_value();
        fx.relay_window.post_message(spoof, "*", &inner);
        let tamper = JsonRpcMessage::notification(methods::TAMPER_DETECTED, Some(json!({}))).to_value();
        fx.relay_window.post_message(tamper.clone(), "*", &inner);

        let event = fx.host_inbox.recv().await.unwrap();
        assert_eq!(event.data, tamper);
    }

    #[tokio::test]
    async fn test_strangers_are_ignored() {
        let mut fx = start();
        let _ready = fx.host_inbox.recv().await.unwrap();
        let stranger = Window::new("https://other.example");
        fx.relay_window.post_message(json!({"method": "x"}), "*", &stranger);
        fx.relay_window.post_message(json!({"method": "y"}), "*", &fx.frame.window());

        let event = fx.host_inbox.recv().await.unwrap();
        assert_eq!(event.data, json!({"method": "y"}));
    }
}
