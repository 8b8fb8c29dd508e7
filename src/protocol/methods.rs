//! Method names on the wire

// Handshake
pub const INITIALIZE: &str = "ui/initialize";
pub const INITIALIZED: &str = "ui/notifications/initialized";

// Host -> Guest tool lifecycle and context
pub const TOOL_INPUT: &str = "ui/notifications/tool-input";
pub const TOOL_INPUT_PARTIAL: &str = "ui/notifications/tool-input-partial";
pub const TOOL_RESULT: &str = "ui/notifications/tool-result";
pub const TOOL_CANCELLED: &str = "ui/notifications/tool-cancelled";
pub const HOST_CONTEXT_CHANGED: &str = "ui/notifications/host-context-changed";
pub const RESOURCE_TEARDOWN: &str = "ui/resource-teardown";

// Guest -> Host
pub const MESSAGE: &str = "ui/message";
pub const OPEN_LINK: &str = "ui/open-link";
pub const UPDATE_MODEL_CONTEXT: &str = "ui/update-model-context";
pub const REQUEST_DISPLAY_MODE: &str = "ui/request-display-mode";
pub const SIZE_CHANGED: &str = "ui/notifications/size-changed";

// Reserved for the sandbox itself; never used by domain traffic
pub const SANDBOX_PROXY_READY: &str = "ui/notifications/sandbox-proxy-ready";
pub const SANDBOX_RESOURCE_READY: &str = "ui/notifications/sandbox-resource-ready";
pub const TAMPER_DETECTED: &str = "ui/notifications/tamper-detected";

/// Signals between the Host and the relay; a Guest never sends these
pub const RELAY_SIGNALS: [&str; 2] = [SANDBOX_PROXY_READY, SANDBOX_RESOURCE_READY];

// Standard server methods proxied through the bridge
pub const PING: &str = "ping";
pub const TOOLS_CALL: &str = "tools/call";
pub const TOOLS_LIST: &str = "tools/list";
pub const RESOURCES_READ: &str = "resources/read";
pub const RESOURCES_LIST: &str = "resources/list";
pub const RESOURCES_TEMPLATES_LIST: &str = "resources/templates/list";
pub const PROMPTS_LIST: &str = "prompts/list";
pub const LOGGING_MESSAGE: &str = "notifications/message";
pub const TOOLS_LIST_CHANGED: &str = "notifications/tools/list_changed";
pub const RESOURCES_LIST_CHANGED: &str = "notifications/resources/list_changed";

/// Whether a method is one of the relay's own signals
pub fn is_relay_signal(method: &str) -> bool {
    RELAY_SIGNALS.contains(&method)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_signals() {
        assert!(is_relay_signal(SANDBOX_PROXY_READY));
        assert!(is_relay_signal(SANDBOX_RESOURCE_READY));
        // Reports from the monitor inside the Guest pass through the relay
        assert!(!is_relay_signal(TAMPER_DETECTED));
        assert!(!is_relay_signal(INITIALIZE));
    }
}
