//! Tool and resource `_meta` conventions
//!
//! Tools point at their UI resource either through the legacy flat key
//! `ui/resourceUri` or through the nested `ui.resourceUri`. Both are accepted
//! and normalized once, when a tool is registered, into [`ToolUiMeta`]; the
//! rest of the crate only ever sees the normalized form.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::sandbox::CspDeclaration;
use crate::utils::{BridgeError, Result};

/// Legacy flat key on a tool's `_meta`
pub const LEGACY_RESOURCE_URI_KEY: &str = "ui/resourceUri";
/// Nested namespace on a tool's or resource's `_meta`
pub const UI_META_KEY: &str = "ui";
/// Scheme every UI resource URI must use
pub const UI_RESOURCE_SCHEME: &str = "ui://";
/// MIME type of Guest HTML resources
pub const APP_HTML_MIME_TYPE: &str = "text/html;profile=mcp-app";

/// Who may see and call a tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolVisibility {
    /// The upstream model
    Model,
    /// The embedding Guest only
    App,
}

/// Canonical UI metadata of a tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolUiMeta {
    pub resource_uri: Option<String>,
    pub visibility: Vec<ToolVisibility>,
}

impl Default for ToolUiMeta {
    fn default() -> Self {
        Self {
            resource_uri: None,
            visibility: vec![ToolVisibility::Model, ToolVisibility::App],
        }
    }
}

impl ToolUiMeta {
    /// Normalize a tool's `_meta` object.
    ///
    /// Returns `Ok(None)` when the tool carries no UI metadata at all.
    pub fn normalize(meta: Option<&Map<String, Value>>) -> Result<Option<Self>> {
        let Some(meta) = meta else {
            return Ok(None);
        };

        let legacy = match meta.get(LEGACY_RESOURCE_URI_KEY) {
            None | Some(Value::Null) => None,
            Some(Value::String(uri)) => Some(uri.clone()),
            Some(_) => {
                return Err(BridgeError::InvalidMetadata(format!(
                    "{} must be a string",
                    LEGACY_RESOURCE_URI_KEY
                )));
            }
        };

        let nested = match meta.get(UI_META_KEY) {
            None | Some(Value::Null) => None,
            Some(Value::Object(ui)) => Some(ui),
            Some(_) => {
                return Err(BridgeError::InvalidMetadata("ui must be an object".into()));
            }
        };

        if legacy.is_none() && nested.is_none() {
            return Ok(None);
        }

        let nested_uri = match nested.and_then(|ui| ui.get("resourceUri")) {
            None | Some(Value::Null) => None,
            Some(Value::String(uri)) => Some(uri.clone()),
            Some(_) => {
                return Err(BridgeError::InvalidMetadata(
                    "ui.resourceUri must be a string".into(),
                ));
            }
        };

        let resource_uri = match (legacy, nested_uri) {
            (Some(a), Some(b)) if a != b => {
                return Err(BridgeError::InvalidMetadata(format!(
                    "conflicting resource URIs: {} vs {}",
                    a, b
                )));
            }
            (a, b) => a.or(b),
        };

        if let Some(uri) = &resource_uri {
            if !uri.starts_with(UI_RESOURCE_SCHEME) {
                return Err(BridgeError::InvalidMetadata(format!(
                    "resource URI {} must use the {} scheme",
                    uri, UI_RESOURCE_SCHEME
                )));
            }
        }

        let visibility = match nested.and_then(|ui| ui.get("visibility")) {
            None | Some(Value::Null) => ToolUiMeta::default().visibility,
            Some(raw) => serde_json::from_value::<Vec<ToolVisibility>>(raw.clone())
                .map_err(|e| BridgeError::InvalidMetadata(format!("ui.visibility: {}", e)))?,
        };

        Ok(Some(Self {
            resource_uri,
            visibility,
        }))
    }

    /// Write both the legacy and the nested form so older and newer
    /// consumers see the same values.
    pub fn write_into(&self, meta: &mut Map<String, Value>) {
        let mut ui = match meta.remove(UI_META_KEY) {
            Some(Value::Object(ui)) => ui,
            _ => Map::new(),
        };

        match &self.resource_uri {
            Some(uri) => {
                meta.insert(LEGACY_RESOURCE_URI_KEY.into(), Value::from(uri.as_str()));
                ui.insert("resourceUri".into(), Value::from(uri.as_str()));
            }
            None => {
                meta.remove(LEGACY_RESOURCE_URI_KEY);
                ui.remove("resourceUri");
            }
        }
        ui.insert("visibility".into(), json!(self.visibility));
        meta.insert(UI_META_KEY.into(), Value::Object(ui));
    }

    pub fn visible_to_app(&self) -> bool {
        self.visibility.contains(&ToolVisibility::App)
    }

    pub fn visible_to_model(&self) -> bool {
        self.visibility.contains(&ToolVisibility::Model)
    }
}

/// Normalize a tool definition in place at registration time.
///
/// Afterwards the tool's `_meta` carries both key forms with identical values.
pub fn register_tool(tool: &mut Value) -> Result<Option<ToolUiMeta>> {
    let Some(obj) = tool.as_object_mut() else {
        return Err(BridgeError::InvalidMetadata("tool must be an object".into()));
    };

    let normalized = ToolUiMeta::normalize(obj.get("_meta").and_then(Value::as_object))?;
    if let Some(ui) = &normalized {
        let meta = obj
            .entry("_meta")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(meta) = meta.as_object_mut() {
            ui.write_into(meta);
        }
    }
    Ok(normalized)
}

/// Whether the Guest may see a tool from a `tools/list` result.
///
/// Tools with unreadable metadata are hidden.
pub fn tool_visible_to_app(tool: &Value) -> bool {
    match ToolUiMeta::normalize(tool.get("_meta").and_then(Value::as_object)) {
        Ok(Some(ui)) => ui.visible_to_app(),
        Ok(None) => true,
        Err(err) => {
            log::warn!("hiding tool with invalid metadata: {}", err);
            false
        }
    }
}

/// UI metadata of a resource (`_meta.ui` on resource contents)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUiMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csp: Option<CspDeclaration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefers_border: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<String>,
}

impl ResourceUiMeta {
    /// Read `_meta.ui` from resource contents
    pub fn from_contents(contents: &Value) -> Result<Self> {
        match contents.get("_meta").and_then(|m| m.get(UI_META_KEY)) {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(ui) => serde_json::from_value(ui.clone())
                .map_err(|e| BridgeError::InvalidMetadata(format!("resource ui meta: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn meta(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_legacy_key_is_accepted() {
        let m = meta(json!({"ui/resourceUri": "ui://qr-server/widget.html"}));
        let ui = ToolUiMeta::normalize(Some(&m)).unwrap().unwrap();
        assert_eq!(ui.resource_uri.as_deref(), Some("ui://qr-server/widget.html"));
        assert!(ui.visible_to_app());
        assert!(ui.visible_to_model());
    }

    #[test]
    fn test_nested_form_with_visibility() {
        let m = meta(json!({"ui": {"resourceUri": "ui://say/view.html", "visibility": ["app"]}}));
        let ui = ToolUiMeta::normalize(Some(&m)).unwrap().unwrap();
        assert_eq!(ui.visibility, vec![ToolVisibility::App]);
        assert!(!ui.visible_to_model());
    }

    #[test]
    fn test_conflicting_forms_rejected() {
        let m = meta(json!({
            "ui/resourceUri": "ui://a/view.html",
            "ui": {"resourceUri": "ui://b/view.html"}
        }));
        assert!(matches!(
            ToolUiMeta::normalize(Some(&m)),
            Err(BridgeError::InvalidMetadata(_))
        ));
    }

    #[test]
    fn test_non_ui_scheme_rejected() {
        let m = meta(json!({"ui/resourceUri": "https://example.com/view.html"}));
        assert!(ToolUiMeta::normalize(Some(&m)).is_err());
    }

    #[test]
    fn test_no_ui_meta() {
        let m = meta(json!({"other": 1}));
        assert_eq!(ToolUiMeta::normalize(Some(&m)).unwrap(), None);
        assert_eq!(ToolUiMeta::normalize(None).unwrap(), None);
    }

    #[test]
    fn test_register_tool_writes_both_forms() {
        let mut tool = json!({
            "name": "generate_qr",
            "_meta": {"ui/resourceUri": "ui://qr-server/widget.html"}
        });
        register_tool(&mut tool).unwrap();
        assert_eq!(
            tool["_meta"],
            json!({
                "ui/resourceUri": "ui://qr-server/widget.html",
                "ui": {"resourceUri": "ui://qr-server/widget.html", "visibility": ["model", "app"]}
            })
        );
        // Registering again is stable
        let again = register_tool(&mut tool).unwrap().unwrap();
        assert_eq!(again.resource_uri.as_deref(), Some("ui://qr-server/widget.html"));
    }

    #[test]
    fn test_tool_visibility_filter() {
        assert!(tool_visible_to_app(&json!({"name": "plain"})));
        assert!(!tool_visible_to_app(
            &json!({"name": "m", "_meta": {"ui": {"visibility": ["model"]}}})
        ));
        assert!(!tool_visible_to_app(
            &json!({"name": "bad", "_meta": {"ui": {"visibility": "app"}}})
        ));
    }

    #[test]
    fn test_resource_meta_csp() {
        let contents = json!({
            "uri": "ui://qr-server/widget.html",
            "_meta": {"ui": {"csp": {"resourceDomains": ["https://unpkg.com"]}}}
        });
        let ui = ResourceUiMeta::from_contents(&contents).unwrap();
        let csp = ui.csp.unwrap();
        assert_eq!(csp.resource_domains, vec!["https://unpkg.com".to_string()]);
        assert!(csp.connect_domains.is_empty());
    }
}
