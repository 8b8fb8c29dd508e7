//! Runtime configuration
//!
//! Loaded from a JSON file and then overridden by `GUESTBRIDGE_*`
//! environment variables:
//!
//! ```json
//! {
//!   "relay": {
//!     "allowedReferrers": ["https://*.example.com"],
//!     "defaultSandbox": "allow-scripts allow-forms",
//!     "tamperMonitor": true
//!   },
//!   "session": { "requestTimeoutMs": 30000, "teardownTimeoutMs": 5000 },
//!   "host": { "name": "my-host", "version": "1.0.0" }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::protocol::{Implementation, SessionOptions};
use crate::sandbox::embedding::parse_patterns;
use crate::sandbox::{RelayConfig, SandboxAttributes};
use crate::utils::{BridgeError, Result};

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "GUESTBRIDGE_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub relay: RelayConfig,
    pub session: SessionOptions,
    /// Identity the Host announces in the handshake
    pub host: Implementation,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay: RelayConfig::default(),
            session: SessionOptions::default(),
            host: Implementation::new(crate::NAME, crate::VERSION),
        }
    }
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config =
            serde_json::from_str(json).map_err(|e| BridgeError::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        log::debug!("loading config from {}", path.display());
        Self::from_json(&json)
    }

    /// Apply `GUESTBRIDGE_*` variables from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(std::env::vars())
    }

    /// Apply overrides given as `(name, value)` pairs. Names without the
    /// `GUESTBRIDGE_` prefix are ignored; unknown names under it are errors.
    pub fn apply_overrides<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in vars {
            let Some(key) = name.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref();
            match key {
                "ALLOWED_REFERRERS" => {
                    self.relay.allowed_referrers = value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                "DEFAULT_SANDBOX" => self.relay.default_sandbox = value.to_string(),
                "TAMPER_MONITOR" => self.relay.tamper_monitor = parse_bool(key, value)?,
                "REQUEST_TIMEOUT_MS" => self.session.request_timeout_ms = parse_ms(key, value)?,
                "TEARDOWN_TIMEOUT_MS" => self.session.teardown_timeout_ms = parse_ms(key, value)?,
                "PARTIAL_INPUT_INTERVAL_MS" => {
                    self.session.partial_input_interval_ms = parse_ms(key, value)?
                }
                "HOST_NAME" => self.host.name = value.to_string(),
                "HOST_VERSION" => self.host.version = value.to_string(),
                _ => {
                    return Err(BridgeError::Config(format!(
                        "unknown setting {}{}",
                        ENV_PREFIX, key
                    )));
                }
            }
            log::debug!("config override {}{}", ENV_PREFIX, key);
        }
        self.validate()
    }

    /// Check values serde cannot
    pub fn validate(&self) -> Result<()> {
        parse_patterns(&self.relay.allowed_referrers)?;
        SandboxAttributes::parse(&self.relay.default_sandbox)
            .map_err(|e| BridgeError::Config(format!("defaultSandbox: {}", e)))?;
        if self.session.request_timeout_ms == 0 || self.session.teardown_timeout_ms == 0 {
            return Err(BridgeError::Config("timeouts must be greater than zero".into()));
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(BridgeError::Config(format!("{}{}: expected a boolean, got {:?}", ENV_PREFIX, key, value))),
    }
}

fn parse_ms(key: &str, value: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| BridgeError::Config(format!("{}{}: expected milliseconds, got {:?}", ENV_PREFIX, key, value)))
}
