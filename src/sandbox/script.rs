//! Headless script host using the Boa engine
//!
//! Runs Guest-side scripts (the tamper installer in particular) outside a
//! browser so their behavior can be checked from Rust.

use boa_engine::{Context, JsValue, Source};
use serde::Deserialize;
use serde_json::Value;

use super::tamper::TamperMonitor;
use crate::utils::{BridgeError, Result};

/// Stand-in for the relay window so installed wrappers have somewhere to report
const PARENT_STUB: &str = r#"
var __reports = [];
globalThis.parent = { postMessage: function (message, origin) { __reports.push(message); } };
"#;

/// Rule counts returned by the tamper installer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct InstallSummary {
    pub installed: u32,
    pub failed: u32,
}

/// A JavaScript context
pub struct ScriptHost {
    context: Context,
}

impl ScriptHost {
    /// Create a fresh context
    pub fn new() -> Self {
        Self {
            context: Context::default(),
        }
    }

    /// Run a script for its side effects
    pub fn execute(&mut self, code: &str) -> Result<()> {
        if code.trim().is_empty() {
            return Ok(());
        }
        self.run(code).map(|_| ())
    }

    /// Evaluate an expression and bring its value over as JSON.
    ///
    /// `undefined` and functions come back as `null`.
    pub fn eval_json(&mut self, expression: &str) -> Result<Value> {
        let wrapped = format!("JSON.stringify(({}))", expression);
        let result = self.run(&wrapped)?;
        match result.as_string() {
            Some(text) => Ok(serde_json::from_str(&text.to_std_string_escaped())?),
            None if result.is_undefined() => Ok(Value::Null),
            None => Err(BridgeError::Script(format!(
                "expression did not serialize: {}",
                expression
            ))),
        }
    }

    fn run(&mut self, code: &str) -> Result<JsValue> {
        self.context
            .eval(Source::from_bytes(code))
            .map_err(|e| BridgeError::Script(e.to_string()))
    }
}

impl Default for ScriptHost {
    fn default() -> Self {
        Self::new()
    }
}

/// Install a monitor in a bare context and report how many rules took.
///
/// Rules that target browser-only objects are expected to fail here.
pub fn probe_monitor(monitor: &TamperMonitor, setup: &str) -> Result<InstallSummary> {
    let mut host = ScriptHost::new();
    host.execute(PARENT_STUB)?;
    host.execute(setup)?;
    let summary = host.eval_json(&monitor.installer_script()?)?;
    serde_json::from_value(summary).map_err(|e| BridgeError::Script(e.to_string()))
}
