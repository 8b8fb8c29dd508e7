//! Tamper-detection monitor
//!
//! The monitor is a script injected into the Guest document ahead of any
//! Guest-authored script. The rule table lives here as plain data; the
//! rendered installer carries it as JSON and walks it with a single
//! `install(rule)` function that dispatches on [`AccessKind`].
//!
//! Every wrapped access is reported to the parent frame with
//! [`methods::TAMPER_DETECTED`]. Critical rules fail closed: getters yield
//! `undefined` and methods throw. Everything else still reaches the original.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::protocol::methods;
use crate::utils::Result;

/// How bad an access is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Critical accesses are blocked rather than observed
    pub fn is_blocking(self) -> bool {
        self == Severity::Critical
    }

    /// Log level the Host uses for a report of this severity
    pub fn log_level(self) -> log::Level {
        match self {
            Severity::Low => log::Level::Debug,
            Severity::Medium => log::Level::Info,
            Severity::High => log::Level::Warn,
            Severity::Critical => log::Level::Error,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Which side of a property is wrapped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessKind {
    /// Reads of the property
    Getter,
    /// Calls of the function stored in the property
    Method,
    /// Reads and writes of the property
    Both,
}

/// Object that owns the wrapped property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TamperTarget {
    /// The global object (`window`)
    Global,
    /// `globalThis[name].prototype`
    Prototype(&'static str),
}

impl TamperTarget {
    fn label(&self) -> &'static str {
        match self {
            TamperTarget::Global => "window",
            TamperTarget::Prototype(name) => name,
        }
    }
}

/// One entry of the rule table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TamperRule {
    pub target: TamperTarget,
    pub property: &'static str,
    pub access: AccessKind,
    pub severity: Severity,
}

impl TamperRule {
    pub const fn global(property: &'static str, access: AccessKind, severity: Severity) -> Self {
        Self {
            target: TamperTarget::Global,
            property,
            access,
            severity,
        }
    }

    pub const fn prototype(
        name: &'static str,
        property: &'static str,
        access: AccessKind,
        severity: Severity,
    ) -> Self {
        Self {
            target: TamperTarget::Prototype(name),
            property,
            access,
            severity,
        }
    }
}

/// Properties watched in every Guest document
pub const DEFAULT_TAMPER_RULES: &[TamperRule] = &[
    // Storage and credentials
    TamperRule::prototype("Document", "cookie", AccessKind::Both, Severity::High),
    TamperRule::global("localStorage", AccessKind::Getter, Severity::Medium),
    TamperRule::global("sessionStorage", AccessKind::Getter, Severity::Medium),
    TamperRule::global("indexedDB", AccessKind::Getter, Severity::Low),
    // Network
    TamperRule::global("fetch", AccessKind::Method, Severity::Medium),
    TamperRule::prototype("XMLHttpRequest", "open", AccessKind::Method, Severity::Medium),
    TamperRule::prototype("Navigator", "sendBeacon", AccessKind::Method, Severity::High),
    // Code evaluation
    TamperRule::global("eval", AccessKind::Method, Severity::High),
    // Device and user data
    TamperRule::prototype("Navigator", "clipboard", AccessKind::Getter, Severity::High),
    TamperRule::prototype("Navigator", "geolocation", AccessKind::Getter, Severity::High),
    // Escaping the frame
    TamperRule::prototype("HTMLIFrameElement", "contentWindow", AccessKind::Getter, Severity::Critical),
    TamperRule::prototype("HTMLIFrameElement", "contentDocument", AccessKind::Getter, Severity::Critical),
    TamperRule::global("open", AccessKind::Method, Severity::Critical),
    TamperRule::prototype("Document", "domain", AccessKind::Both, Severity::Critical),
];

/// Rule as embedded in the installer
#[derive(Serialize)]
struct RenderedRule<'a> {
    target: &'a str,
    prototype: bool,
    property: &'a str,
    access: AccessKind,
    severity: Severity,
}

impl<'a> From<&'a TamperRule> for RenderedRule<'a> {
    fn from(rule: &'a TamperRule) -> Self {
        Self {
            target: rule.target.label(),
            prototype: matches!(rule.target, TamperTarget::Prototype(_)),
            property: rule.property,
            access: rule.access,
            severity: rule.severity,
        }
    }
}

/// Renders the monitor installer for a rule table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TamperMonitor {
    rules: Vec<TamperRule>,
}

impl Default for TamperMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_TAMPER_RULES.to_vec())
    }
}

impl TamperMonitor {
    pub fn new(rules: Vec<TamperRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[TamperRule] {
        &self.rules
    }

    /// Self-contained installer expression.
    ///
    /// Evaluates to `{ installed, failed }` counting the rules that could and
    /// could not be wrapped.
    pub fn installer_script(&self) -> Result<String> {
        let rules: Vec<RenderedRule<'_>> = self.rules.iter().map(RenderedRule::from).collect();
        let rules = serde_json::to_string(&rules)?;
        let method = serde_json::to_string(methods::TAMPER_DETECTED)?;
        Ok(format!("{}({}, {})", INSTALLER, rules, method))
    }

    /// Installer wrapped in a `<script>` element
    pub fn script_tag(&self) -> Result<String> {
        let script = self.installer_script()?.replace("</", "<\\/");
        Ok(format!("<script>{};</script>", script))
    }
}

const INSTALLER: &str = r#"(function (rules, method) {
  "use strict";
  var root = globalThis;
  var post = null;
  try {
    var parentWindow = root.parent;
    if (parentWindow && parentWindow !== root && typeof parentWindow.postMessage === "function") {
      post = parentWindow.postMessage.bind(parentWindow);
    }
  } catch (e) {}

  var reporting = false;

  function stackTrace() {
    try { throw new Error(); } catch (e) { return String(e.stack || ""); }
  }

  function report(rule, label, access, blocked) {
    if (reporting || !post) return;
    reporting = true;
    try {
      post({
        jsonrpc: "2.0",
        method: method,
        params: {
          target: label,
          property: rule.property,
          access: access,
          severity: rule.severity,
          stack: stackTrace(),
          blocked: blocked
        }
      }, "*");
    } catch (e) {
    } finally {
      reporting = false;
    }
  }

  function lookup(obj, name) {
    for (var o = obj; o; o = Object.getPrototypeOf(o)) {
      var desc = Object.getOwnPropertyDescriptor(o, name);
      if (desc) return desc;
    }
    return undefined;
  }

  function wrapAccessor(holder, rule, label, desc, critical) {
    var getter = desc.get;
    var setter = desc.set;
    var isData = !getter && !setter;
    var value = desc.value;
    var replacement = {
      configurable: true,
      enumerable: !!desc.enumerable,
      get: function () {
        report(rule, label, "get", critical);
        if (critical) return undefined;
        return getter ? getter.call(this) : value;
      }
    };
    if (rule.access === "both") {
      replacement.set = function (next) {
        report(rule, label, "set", critical);
        if (critical) return;
        if (setter) setter.call(this, next); else if (isData) value = next;
      };
    } else if (setter) {
      replacement.set = setter;
    } else if (isData && desc.writable) {
      replacement.set = function (next) { value = next; };
    }
    Object.defineProperty(holder, rule.property, replacement);
  }

  function wrapMethod(holder, rule, label, desc, critical) {
    var original = desc.get ? desc.get.call(holder) : desc.value;
    if (typeof original !== "function") throw new TypeError(label + " is not a function");
    var wrapped = function () {
      report(rule, label, "call", critical);
      if (critical) throw new Error("Blocked by sandbox: " + label);
      return original.apply(this, arguments);
    };
    Object.defineProperty(holder, rule.property, {
      configurable: true,
      enumerable: !!desc.enumerable,
      writable: true,
      value: wrapped
    });
  }

  function install(rule) {
    var holder = root;
    if (rule.prototype) {
      var ctor = root[rule.target];
      holder = ctor && ctor.prototype;
    }
    if (!holder) throw new Error("missing target " + rule.target);
    var desc = lookup(holder, rule.property);
    if (!desc) throw new Error("missing property " + rule.property);
    var label = rule.target + "." + rule.property;
    var critical = rule.severity === "critical";
    switch (rule.access) {
      case "method":
        wrapMethod(holder, rule, label, desc, critical);
        break;
      case "getter":
      case "both":
        wrapAccessor(holder, rule, label, desc, critical);
        break;
      default:
        throw new Error("unknown access kind " + rule.access);
    }
  }

  var installed = 0;
  var failed = 0;
  for (var i = 0; i < rules.length; i++) {
    try {
      install(rules[i]);
      installed++;
    } catch (e) {
      failed++;
    }
  }
  return { installed: installed, failed: failed };
})"#;

/// What the wrapped access did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TamperAccess {
    Get,
    Set,
    Call,
}

/// Params of a `tamper-detected` notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TamperReport {
    /// `window`, or the constructor name for prototype rules
    pub target: String,
    pub property: String,
    pub access: TamperAccess,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub blocked: bool,
}

impl TamperReport {
    /// Log the report at the level its severity calls for
    pub fn log(&self) {
        log::log!(
            self.severity.log_level(),
            "guest tamper attempt: {} {}.{} (severity {}, {})",
            match self.access {
                TamperAccess::Get => "read",
                TamperAccess::Set => "write",
                TamperAccess::Call => "call",
            },
            self.target,
            self.property,
            self.severity,
            if self.blocked { "blocked" } else { "allowed" }
        );
    }
}
