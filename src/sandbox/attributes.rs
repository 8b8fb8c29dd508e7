//! `sandbox` attribute tokens for the inner Guest frame

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::utils::{BridgeError, Result};

/// Attribute value applied when a resource does not override it
pub const DEFAULT_SANDBOX: &str = "allow-scripts allow-same-origin allow-forms";

/// A single sandbox capability flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SandboxFlag {
    AllowScripts,
    AllowSameOrigin,
    AllowForms,
    AllowPopups,
    AllowModals,
    AllowDownloads,
    AllowPointerLock,
}

impl SandboxFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SandboxFlag::AllowScripts => "allow-scripts",
            SandboxFlag::AllowSameOrigin => "allow-same-origin",
            SandboxFlag::AllowForms => "allow-forms",
            SandboxFlag::AllowPopups => "allow-popups",
            SandboxFlag::AllowModals => "allow-modals",
            SandboxFlag::AllowDownloads => "allow-downloads",
            SandboxFlag::AllowPointerLock => "allow-pointer-lock",
        }
    }
}

impl FromStr for SandboxFlag {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "allow-scripts" => Ok(SandboxFlag::AllowScripts),
            "allow-same-origin" => Ok(SandboxFlag::AllowSameOrigin),
            "allow-forms" => Ok(SandboxFlag::AllowForms),
            "allow-popups" => Ok(SandboxFlag::AllowPopups),
            "allow-modals" => Ok(SandboxFlag::AllowModals),
            "allow-downloads" => Ok(SandboxFlag::AllowDownloads),
            "allow-pointer-lock" => Ok(SandboxFlag::AllowPointerLock),
            // These would let the Guest act on the Host's browsing context.
            t if t.starts_with("allow-top-navigation") || t == "allow-popups-to-escape-sandbox" => {
                Err(BridgeError::Security(format!("sandbox token {} is not permitted", t)))
            }
            other => Err(BridgeError::Config(format!("unknown sandbox token {}", other))),
        }
    }
}

/// Parsed `sandbox` attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxAttributes {
    flags: BTreeSet<SandboxFlag>,
}

impl SandboxAttributes {
    /// No capabilities at all (the strictest sandbox)
    pub fn none() -> Self {
        Self {
            flags: BTreeSet::new(),
        }
    }

    /// Parse a space separated token list
    pub fn parse(value: &str) -> Result<Self> {
        let flags = value
            .split_whitespace()
            .map(SandboxFlag::from_str)
            .collect::<Result<BTreeSet<_>>>()?;
        Ok(Self { flags })
    }

    /// Use `override_value` when given, otherwise the default
    pub fn resolve(override_value: Option<&str>, default_value: &str) -> Result<Self> {
        match override_value {
            Some(value) => Self::parse(value),
            None => Self::parse(default_value),
        }
    }

    pub fn allows(&self, flag: SandboxFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn insert(&mut self, flag: SandboxFlag) {
        self.flags.insert(flag);
    }
}

impl Default for SandboxAttributes {
    fn default() -> Self {
        Self {
            flags: [
                SandboxFlag::AllowScripts,
                SandboxFlag::AllowSameOrigin,
                SandboxFlag::AllowForms,
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl fmt::Display for SandboxAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tokens: Vec<&str> = self.flags.iter().map(SandboxFlag::as_str).collect();
        write!(f, "{}", tokens.join(" "))
    }
}
