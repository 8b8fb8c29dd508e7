//! Relay self-check: is this document embedded the way it must be?
//!
//! All three checks are fatal. A relay that fails any of them cannot
//! vouch for the isolation between Host and Guest and must not start.

use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::utils::{BridgeError, Result};

/// Outcome of touching `window.top` from inside the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopAccess {
    /// The platform raised its cross-origin security error (expected)
    SecurityError,
    /// The access succeeded: the relay shares an origin with the top frame
    Allowed,
    /// Some other failure
    Failed(String),
}

/// What the relay can observe about where it is loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingEnvironment {
    pub is_top_level: bool,
    pub referrer: Option<String>,
    pub top_access: TopAccess,
}

impl EmbeddingEnvironment {
    /// A correctly embedded relay under the given referrer
    pub fn embedded(referrer: impl Into<String>) -> Self {
        Self {
            is_top_level: false,
            referrer: Some(referrer.into()),
            top_access: TopAccess::SecurityError,
        }
    }
}

/// `scheme://host[:port]` with `*` for any port and `*.` for any subdomain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferrerPattern {
    scheme: String,
    host: HostPattern,
    port: PortPattern,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum HostPattern {
    Exact(String),
    Subdomains(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortPattern {
    Any,
    Default,
    Exact(u16),
}

impl FromStr for ReferrerPattern {
    type Err = BridgeError;

    fn from_str(pattern: &str) -> Result<Self> {
        let invalid = || BridgeError::Config(format!("invalid referrer pattern {}", pattern));

        let (scheme, rest) = pattern.split_once("://").ok_or_else(invalid)?;
        if scheme.is_empty() || rest.is_empty() {
            return Err(invalid());
        }
        let authority = rest.split('/').next().unwrap_or_default();

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, "*")) => (host, PortPattern::Any),
            Some((host, port)) => (host, PortPattern::Exact(port.parse().map_err(|_| invalid())?)),
            None => (authority, PortPattern::Default),
        };

        let host = match host.strip_prefix("*.") {
            Some(base) if !base.is_empty() => HostPattern::Subdomains(base.to_ascii_lowercase()),
            Some(_) => return Err(invalid()),
            None if host.is_empty() || host.contains('*') => return Err(invalid()),
            None => HostPattern::Exact(host.to_ascii_lowercase()),
        };

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            host,
            port,
        })
    }
}

impl ReferrerPattern {
    /// Whether a referrer URL matches this pattern
    pub fn matches(&self, referrer: &Url) -> bool {
        if referrer.scheme() != self.scheme {
            return false;
        }
        let Some(host) = referrer.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        let host_ok = match &self.host {
            HostPattern::Exact(expected) => host == *expected,
            HostPattern::Subdomains(base) => host.ends_with(&format!(".{}", base)),
        };
        if !host_ok {
            return false;
        }
        match self.port {
            PortPattern::Any => true,
            PortPattern::Default => referrer.port().is_none(),
            PortPattern::Exact(port) => referrer.port_or_known_default() == Some(port),
        }
    }
}

impl fmt::Display for ReferrerPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.scheme)?;
        match &self.host {
            HostPattern::Exact(h) => write!(f, "{}", h)?,
            HostPattern::Subdomains(h) => write!(f, "*.{}", h)?,
        }
        match self.port {
            PortPattern::Any => write!(f, ":*"),
            PortPattern::Default => Ok(()),
            PortPattern::Exact(p) => write!(f, ":{}", p),
        }
    }
}

/// Parse a list of pattern strings
pub fn parse_patterns(patterns: &[String]) -> Result<Vec<ReferrerPattern>> {
    patterns.iter().map(|p| p.parse()).collect()
}

/// Check a referrer against the allow-list
pub fn check_referrer(referrer: &str, allowed: &[ReferrerPattern]) -> Result<()> {
    let url = Url::parse(referrer)
        .map_err(|e| BridgeError::Security(format!("unparseable referrer {}: {}", referrer, e)))?;
    if allowed.iter().any(|p| p.matches(&url)) {
        Ok(())
    } else {
        Err(BridgeError::Security(format!(
            "referrer {} is not allowed to embed the sandbox",
            referrer
        )))
    }
}

/// Run all self-checks, failing on the first violation
pub fn verify_embedding(env: &EmbeddingEnvironment, allowed: &[ReferrerPattern]) -> Result<()> {
    if env.is_top_level {
        return Err(BridgeError::Security(
            "sandbox relay must be embedded in a frame".into(),
        ));
    }

    let referrer = env
        .referrer
        .as_deref()
        .filter(|r| !r.is_empty())
        .ok_or_else(|| BridgeError::Security("sandbox relay has no referrer".into()))?;
    check_referrer(referrer, allowed)?;

    match &env.top_access {
        TopAccess::SecurityError => Ok(()),
        TopAccess::Allowed => {
            log::error!("top-level window is reachable from the sandbox relay");
            Err(BridgeError::Security(
                "top-level window is accessible; sandbox isolation is broken".into(),
            ))
        }
        TopAccess::Failed(reason) => Err(BridgeError::Security(format!(
            "unexpected error probing the top-level window: {}",
            reason
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(list: &[&str]) -> Vec<ReferrerPattern> {
        list.iter().map(|p| p.parse().unwrap()).collect()
    }

    #[test]
    fn test_pattern_matching() {
        let allowed = patterns(&["http://localhost:*", "https://*.host.example", "https://app.example"]);
        assert!(check_referrer("http://localhost:8080/page", &allowed).is_ok());
        assert!(check_referrer("https://chat.host.example/", &allowed).is_ok());
        assert!(check_referrer("https://app.example/x", &allowed).is_ok());

        assert!(check_referrer("https://host.example/", &allowed).is_err());
        assert!(check_referrer("https://app.example:8443/", &allowed).is_err());
        assert!(check_referrer("https://localhost:8080/", &allowed).is_err());
        assert!(check_referrer("not a url", &allowed).is_err());
    }

    #[test]
    fn test_exact_port() {
        let allowed = patterns(&["https://app.example:443"]);
        assert!(check_referrer("https://app.example/", &allowed).is_ok());
    }

    #[test]
    fn test_invalid_patterns() {
        assert!("localhost".parse::<ReferrerPattern>().is_err());
        assert!("https://*.".parse::<ReferrerPattern>().is_err());
        assert!("https://a*b.example".parse::<ReferrerPattern>().is_err());
        assert!("https://a.example:http".parse::<ReferrerPattern>().is_err());
    }

    #[test]
    fn test_pattern_display() {
        assert_eq!(
            "HTTP://LocalHost:*".parse::<ReferrerPattern>().unwrap().to_string(),
            "http://localhost:*"
        );
    }

    #[test]
    fn test_verify_embedding() {
        let allowed = patterns(&["https://host.example"]);
        assert!(verify_embedding(&EmbeddingEnvironment::embedded("https://host.example/chat"), &allowed).is_ok());

        let mut top = EmbeddingEnvironment::embedded("https://host.example/");
        top.is_top_level = true;
        assert!(matches!(verify_embedding(&top, &allowed), Err(BridgeError::Security(_))));

        let mut no_ref = EmbeddingEnvironment::embedded("");
        no_ref.referrer = None;
        assert!(verify_embedding(&no_ref, &allowed).is_err());

        let wrong = EmbeddingEnvironment::embedded("https://evil.example/");
        assert!(verify_embedding(&wrong, &allowed).is_err());
    }

    #[test]
    fn test_reachable_top_is_fatal() {
        let allowed = patterns(&["https://host.example"]);
        let mut env = EmbeddingEnvironment::embedded("https://host.example/");
        env.top_access = TopAccess::Allowed;
        let err = verify_embedding(&env, &allowed).unwrap_err();
        assert!(err.to_string().contains("isolation is broken"));

        env.top_access = TopAccess::Failed("TypeError".into());
        assert!(verify_embedding(&env, &allowed).is_err());
    }
}
