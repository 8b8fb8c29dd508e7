//! Host half of the relay hops
//!
//! The Host embeds the relay, waits for `sandbox-proxy-ready`, then hands it
//! the Guest document with `sandbox-resource-ready`. From then on Guest
//! traffic arrives from the relay window, so the Host-side channel is
//! filtered to that window.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

use super::AppBridge;
use crate::channel::{FrameEvent, MessageChannel, Window};
use crate::protocol::jsonrpc::peek_method;
use crate::protocol::metadata::{APP_HTML_MIME_TYPE, ResourceUiMeta};
use crate::protocol::{JsonRpcMessage, methods};
use crate::sandbox::{CspDeclaration, SandboxResourceReadyParams};
use crate::utils::{BridgeError, Result};

/// A Guest UI resource as delivered to the relay
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuestResource {
    pub uri: Option<String>,
    pub html: String,
    pub csp: Option<CspDeclaration>,
    pub sandbox: Option<String>,
    pub prefers_border: Option<bool>,
}

impl GuestResource {
    pub fn from_html(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            ..Self::default()
        }
    }

    pub fn with_csp(mut self, csp: CspDeclaration) -> Self {
        self.csp = Some(csp);
        self
    }

    /// Pick the Guest HTML out of a `resources/read` result
    pub fn from_read_result(result: &Value) -> Result<Self> {
        let contents = result
            .get("contents")
            .and_then(Value::as_array)
            .ok_or_else(|| BridgeError::InvalidMetadata("resource result has no contents".into()))?;

        let content = contents
            .iter()
            .find(|c| c.get("mimeType").and_then(Value::as_str) == Some(APP_HTML_MIME_TYPE))
            .ok_or_else(|| {
                BridgeError::InvalidMetadata(format!("no {} content in resource", APP_HTML_MIME_TYPE))
            })?;

        let html = match (content.get("text"), content.get("blob")) {
            (Some(Value::String(text)), _) => text.clone(),
            (_, Some(Value::String(blob))) => {
                let bytes = STANDARD
                    .decode(blob)
                    .map_err(|e| BridgeError::InvalidMetadata(format!("resource blob: {}", e)))?;
                String::from_utf8(bytes)
                    .map_err(|e| BridgeError::InvalidMetadata(format!("resource blob: {}", e)))?
            }
            _ => return Err(BridgeError::InvalidMetadata("resource has neither text nor blob".into())),
        };

        let ui = ResourceUiMeta::from_contents(content)?;
        Ok(Self {
            uri: content.get("uri").and_then(Value::as_str).map(str::to_string),
            html,
            csp: ui.csp,
            sandbox: ui.sandbox,
            prefers_border: ui.prefers_border,
        })
    }

    fn ready_params(&self) -> SandboxResourceReadyParams {
        SandboxResourceReadyParams {
            html: self.html.clone(),
            sandbox: self.sandbox.clone(),
            csp: self.csp.clone(),
        }
    }
}

/// Drives one relay from the Host window
pub struct GuestLoader {
    host: Arc<Window>,
    relay: Arc<Window>,
    inbox: Option<UnboundedReceiver<FrameEvent>>,
}

impl GuestLoader {
    /// Start listening for the relay. Create this before the relay starts,
    /// or its ready signal is missed.
    pub fn new(host: Arc<Window>, relay: Arc<Window>) -> Self {
        let inbox = Some(host.add_listener());
        Self { host, relay, inbox }
    }

    /// Wait for `sandbox-proxy-ready` from the relay window
    pub async fn wait_ready(&mut self, timeout: Duration) -> Result<()> {
        let relay_id = self.relay.id();
        let inbox = self.inbox.as_mut().ok_or(BridgeError::Closed)?;
        let wait = async {
            while let Some(event) = inbox.recv().await {
                if event.source == relay_id && peek_method(&event.data) == Some(methods::SANDBOX_PROXY_READY) {
                    return Ok(());
                }
            }
            Err(BridgeError::Closed)
        };
        let ready = tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| BridgeError::Timeout {
                method: methods::SANDBOX_PROXY_READY.into(),
                timeout_ms: timeout.as_millis() as u64,
            })?;
        // The channel takes over from here.
        self.inbox = None;
        ready
    }

    /// Channel to the Guest, filtered to the relay window
    pub fn channel(&self) -> MessageChannel {
        MessageChannel::new(
            Arc::clone(&self.host),
            Arc::clone(&self.relay),
            self.relay.origin().to_string(),
        )
        .with_expected_source(self.relay.id())
    }

    /// Hand the Guest document to the relay
    pub fn send_resource(&self, resource: &GuestResource) -> Result<()> {
        let params = serde_json::to_value(resource.ready_params())?;
        let message = JsonRpcMessage::notification(methods::SANDBOX_RESOURCE_READY, Some(params));
        if self
            .relay
            .post_message(message.to_value(), self.relay.origin(), &self.host)
        {
            log::debug!(
                "sent guest resource {} to relay {}",
                resource.uri.as_deref().unwrap_or("<inline>"),
                self.relay.id()
            );
            Ok(())
        } else {
            Err(BridgeError::Transport("relay window rejected the resource".into()))
        }
    }

    /// Wait for the relay, connect the bridge, then send the resource.
    ///
    /// The bridge is connected first so the Guest's `initialize` cannot
    /// arrive before anyone listens for it.
    pub async fn load(&mut self, bridge: &AppBridge, resource: &GuestResource, timeout: Duration) -> Result<()> {
        self.wait_ready(timeout).await?;
        bridge.connect(self.channel())?;
        self.send_resource(resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_from_read_result() {
        let result = json!({
            "contents": [{
                "uri": "ui://qr-server/view.html",
                "mimeType": APP_HTML_MIME_TYPE,
                "text": "<html></html>",
                "_meta": {"ui": {"csp": {"resourceDomains": ["https://unpkg.com"]}, "prefersBorder": true}}
            }]
        });
        let resource = GuestResource::from_read_result(&result).unwrap();
        assert_eq!(resource.uri.as_deref(), Some("ui://qr-server/view.html"));
        assert_eq!(resource.html, "<html></html>");
        assert_eq!(resource.csp.unwrap().resource_domains, vec!["https://unpkg.com".to_string()]);
        assert_eq!(resource.prefers_border, Some(true));
    }

    #[test]
    fn test_blob_contents_are_decoded() {
        let result = json!({
            "contents": [{"mimeType": APP_HTML_MIME_TYPE, "blob": STANDARD.encode("<p>hi</p>")}]
        });
        assert_eq!(GuestResource::from_read_result(&result).unwrap().html, "<p>hi</p>");
    }

    #[test]
    fn test_wrong_mime_type_is_rejected() {
        let result = json!({"contents": [{"mimeType": "text/html", "text": "<p></p>"}]});
        assert!(matches!(
            GuestResource::from_read_result(&result),
            Err(BridgeError::InvalidMetadata(_))
        ));
        tokio_test::assert_err!(GuestResource::from_read_result(&json!({})));
    }

    #[tokio::test]
    async fn test_ready_then_resource() {
        let host = Window::new("https://host.example");
        let relay = Window::new("https://sandbox.example");
        let mut relay_inbox = relay.add_listener();
        let mut loader = GuestLoader::new(host.clone(), relay.clone());

        host.post_message(
            JsonRpcMessage::notification(methods::SANDBOX_PROXY_READY, Some(json!({}))).to_value(),
            "*",
            &relay,
        );
        tokio_test::assert_ok!(loader.wait_ready(Duration::from_secs(1)).await);

        loader
            .send_resource(&GuestResource::from_html("<p>x</p>").with_csp(CspDeclaration::new()))
            .unwrap();
        let event = relay_inbox.recv().await.unwrap();
        assert_eq!(event.source, host.id());
        assert_eq!(peek_method(&event.data), Some(methods::SANDBOX_RESOURCE_READY));
        assert_eq!(event.data["params"]["html"], json!("<p>x</p>"));
    }

    #[tokio::test]
    async fn test_wait_ready_times_out() {
        let host = Window::new("https://host.example");
        let relay = Window::new("https://sandbox.example");
        let mut loader = GuestLoader::new(host, relay);
        let err = loader.wait_ready(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, BridgeError::Timeout { .. }));
    }
}
