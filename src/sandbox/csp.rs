//! Content Security Policy synthesis for Guest documents

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// CSP directive types emitted for Guest documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CspDirective {
    DefaultSrc,
    ScriptSrc,
    StyleSrc,
    ImgSrc,
    FontSrc,
    MediaSrc,
    ConnectSrc,
    FrameSrc,
    ObjectSrc,
    BaseUri,
}

impl CspDirective {
    pub fn as_str(&self) -> &'static str {
        match self {
            CspDirective::DefaultSrc => "default-src",
            CspDirective::ScriptSrc => "script-src",
            CspDirective::StyleSrc => "style-src",
            CspDirective::ImgSrc => "img-src",
            CspDirective::FontSrc => "font-src",
            CspDirective::MediaSrc => "media-src",
            CspDirective::ConnectSrc => "connect-src",
            CspDirective::FrameSrc => "frame-src",
            CspDirective::ObjectSrc => "object-src",
            CspDirective::BaseUri => "base-uri",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "default-src" => Some(CspDirective::DefaultSrc),
            "script-src" => Some(CspDirective::ScriptSrc),
            "style-src" => Some(CspDirective::StyleSrc),
            "img-src" => Some(CspDirective::ImgSrc),
            "font-src" => Some(CspDirective::FontSrc),
            "media-src" => Some(CspDirective::MediaSrc),
            "connect-src" => Some(CspDirective::ConnectSrc),
            "frame-src" => Some(CspDirective::FrameSrc),
            "object-src" => Some(CspDirective::ObjectSrc),
            "base-uri" => Some(CspDirective::BaseUri),
            _ => None,
        }
    }
}

/// Origins a Guest resource declares it needs.
///
/// `resource_domains` extends script/style/img/font/media sources,
/// `connect_domains` extends fetch/XHR/WebSocket destinations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CspDeclaration {
    #[serde(default)]
    pub connect_domains: Vec<String>,
    #[serde(default)]
    pub resource_domains: Vec<String>,
}

impl CspDeclaration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource_domain(mut self, domain: impl Into<String>) -> Self {
        self.resource_domains.push(domain.into());
        self
    }

    pub fn with_connect_domain(mut self, domain: impl Into<String>) -> Self {
        self.connect_domains.push(domain.into());
        self
    }
}

/// A source expression is kept only if it cannot end a directive,
/// start a new one, or break out of the meta tag.
fn is_safe_source(source: &str) -> bool {
    !source.is_empty()
        && !source.chars().any(|c| {
            c.is_whitespace() || matches!(c, ';' | ',' | '\'' | '"' | '<' | '>' | '\\')
        })
}

fn sanitize(domains: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for domain in domains {
        let domain = domain.trim();
        if !is_safe_source(domain) {
            log::warn!("dropping unsafe CSP source {:?}", domain);
            continue;
        }
        if !out.iter().any(|d| d == domain) {
            out.push(domain.to_string());
        }
    }
    out
}

/// Content Security Policy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentSecurityPolicy {
    directives: BTreeMap<CspDirective, Vec<String>>,
}

impl ContentSecurityPolicy {
    /// Create a new empty CSP
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the policy for a Guest document.
    ///
    /// With no declaration the result only allows the document's own origin.
    pub fn for_guest(declaration: Option<&CspDeclaration>) -> Self {
        let (resource, connect) = match declaration {
            Some(d) => (sanitize(&d.resource_domains), sanitize(&d.connect_domains)),
            None => (Vec::new(), Vec::new()),
        };

        let with = |base: &[&str], extra: &[String]| -> Vec<String> {
            base.iter()
                .map(|s| s.to_string())
                .chain(extra.iter().cloned())
                .collect()
        };

        let mut csp = Self::new();
        csp.set(CspDirective::DefaultSrc, with(&["'self'"], &[]));
        csp.set(
            CspDirective::ScriptSrc,
            with(&["'self'", "'unsafe-inline'"], &resource),
        );
        csp.set(
            CspDirective::StyleSrc,
            with(&["'self'", "'unsafe-inline'"], &resource),
        );
        csp.set(CspDirective::ImgSrc, with(&["'self'", "data:"], &resource));
        csp.set(CspDirective::FontSrc, with(&["'self'", "data:"], &resource));
        csp.set(CspDirective::MediaSrc, with(&["'self'", "data:"], &resource));
        csp.set(CspDirective::ConnectSrc, with(&["'self'"], &connect));
        csp.set(CspDirective::FrameSrc, with(&["'none'"], &[]));
        csp.set(CspDirective::ObjectSrc, with(&["'none'"], &[]));
        csp.set(CspDirective::BaseUri, with(&["'self'"], &[]));
        csp
    }

    /// Parse CSP from a policy string
    pub fn parse(header: &str) -> Self {
        let mut csp = Self::new();

        for directive_str in header.split(';') {
            let parts: Vec<&str> = directive_str.split_whitespace().collect();
            let Some((name, sources)) = parts.split_first() else {
                continue;
            };
            if let Some(directive) = CspDirective::parse(name) {
                csp.set(directive, sources.iter().map(|s| s.to_string()).collect());
            }
        }

        csp
    }

    /// Replace a directive's sources
    pub fn set(&mut self, directive: CspDirective, sources: Vec<String>) {
        self.directives.insert(directive, sources);
    }

    /// Sources of a directive, if present
    pub fn sources(&self, directive: CspDirective) -> Option<&[String]> {
        self.directives.get(&directive).map(Vec::as_slice)
    }

    /// Check whether an origin is listed for a directive, falling back to default-src
    pub fn allows_origin(&self, directive: CspDirective, origin: &str) -> bool {
        let sources = self
            .directives
            .get(&directive)
            .or_else(|| self.directives.get(&CspDirective::DefaultSrc));
        match sources {
            Some(sources) => sources
                .iter()
                .any(|s| s == "*" || s.trim_end_matches('/') == origin.trim_end_matches('/')),
            None => true,
        }
    }

    /// Serialized policy, directives in a fixed order
    pub fn to_policy_string(&self) -> String {
        self.directives
            .iter()
            .map(|(directive, sources)| {
                if sources.is_empty() {
                    directive.as_str().to_string()
                } else {
                    format!("{} {}", directive.as_str(), sources.join(" "))
                }
            })
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// `<meta http-equiv>` tag carrying this policy
    pub fn to_meta_tag(&self) -> String {
        format!(
            r#"<meta http-equiv="Content-Security-Policy" content="{}">"#,
            escape_attribute(&self.to_policy_string())
        )
    }
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csp_directive_as_str() {
        assert_eq!(CspDirective::ScriptSrc.as_str(), "script-src");
        assert_eq!(CspDirective::DefaultSrc.as_str(), "default-src");
    }

    #[test]
    fn test_csp_directive_parse() {
        assert_eq!(CspDirective::parse("connect-src"), Some(CspDirective::ConnectSrc));
        assert_eq!(CspDirective::parse("invalid"), None);
    }

    #[test]
    fn test_default_policy_is_same_origin_only() {
        let csp = ContentSecurityPolicy::for_guest(None);
        assert_eq!(
            csp.sources(CspDirective::ConnectSrc),
            Some(&["'self'".to_string()][..])
        );
        assert_eq!(
            csp.sources(CspDirective::FrameSrc),
            Some(&["'none'".to_string()][..])
        );
        assert_eq!(
            csp.sources(CspDirective::ObjectSrc),
            Some(&["'none'".to_string()][..])
        );
        assert_eq!(
            csp.sources(CspDirective::BaseUri),
            Some(&["'self'".to_string()][..])
        );
        assert!(!csp.allows_origin(CspDirective::ScriptSrc, "https://cdn.example"));
    }

    #[test]
    fn test_resource_domains_extend_static_sources() {
        let decl = CspDeclaration::new().with_resource_domain("https://cdn.example");
        let csp = ContentSecurityPolicy::for_guest(Some(&decl));

        for directive in [
            CspDirective::ScriptSrc,
            CspDirective::StyleSrc,
            CspDirective::ImgSrc,
            CspDirective::FontSrc,
        ] {
            assert!(csp.allows_origin(directive, "https://cdn.example"), "{:?}", directive);
        }
        assert_eq!(
            csp.sources(CspDirective::ConnectSrc),
            Some(&["'self'".to_string()][..])
        );
    }

    #[test]
    fn test_connect_domains_extend_connect_src_only() {
        let decl = CspDeclaration::new().with_connect_domain("wss://api.example");
        let csp = ContentSecurityPolicy::for_guest(Some(&decl));
        assert!(csp.allows_origin(CspDirective::ConnectSrc, "wss://api.example"));
        assert!(!csp.allows_origin(CspDirective::ImgSrc, "wss://api.example"));
    }

    #[test]
    fn test_injection_attempts_are_dropped() {
        let decl = CspDeclaration {
            resource_domains: vec![
                "https://ok.example".into(),
                "https://x.example; script-src *".into(),
                "\"><script>".into(),
                "https://ok.example".into(),
            ],
            connect_domains: vec!["'unsafe-eval'".into()],
        };
        let csp = ContentSecurityPolicy::for_guest(Some(&decl));
        assert_eq!(
            csp.sources(CspDirective::ImgSrc).unwrap(),
            &["'self'", "data:", "https://ok.example"]
        );
        assert_eq!(csp.sources(CspDirective::ConnectSrc).unwrap(), &["'self'"]);
    }

    #[test]
    fn test_policy_string_roundtrips_through_parse() {
        let decl = CspDeclaration::new()
            .with_resource_domain("https://unpkg.com")
            .with_connect_domain("https://api.example");
        let csp = ContentSecurityPolicy::for_guest(Some(&decl));
        let policy = csp.to_policy_string();

        assert!(policy.starts_with("default-src 'self'; script-src 'self' 'unsafe-inline' https://unpkg.com"));
        assert!(policy.ends_with("frame-src 'none'; object-src 'none'; base-uri 'self'"));
        assert_eq!(ContentSecurityPolicy::parse(&policy), csp);
    }

    #[test]
    fn test_meta_tag() {
        let tag = ContentSecurityPolicy::for_guest(None).to_meta_tag();
        assert!(tag.starts_with(r#"<meta http-equiv="Content-Security-Policy" content="default-src 'self';"#));
        assert!(tag.ends_with(r#"">"#));
    }
}
