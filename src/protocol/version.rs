//! Protocol version negotiation

/// Newest version this crate speaks
pub const LATEST_PROTOCOL_VERSION: &str = "2026-01-26";

/// Every version this crate accepts, newest first
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &[LATEST_PROTOCOL_VERSION, "2025-11-21"];

/// Pick the version to answer a Guest's `ui/initialize` with.
///
/// A supported request is echoed back; anything else falls back to the
/// latest version. Negotiation never fails.
pub fn negotiate(requested: &str) -> &'static str {
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .copied()
        .find(|v| *v == requested)
        .unwrap_or(LATEST_PROTOCOL_VERSION)
}

/// Whether a version string is one this crate understands
pub fn is_supported(version: &str) -> bool {
    SUPPORTED_PROTOCOL_VERSIONS.contains(&version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_supported_version_is_echoed() {
        for v in SUPPORTED_PROTOCOL_VERSIONS {
            assert_eq!(negotiate(v), *v);
        }
    }

    #[test]
    fn test_unknown_version_falls_back() {
        assert_eq!(negotiate("1999-01-01"), LATEST_PROTOCOL_VERSION);
        assert_eq!(negotiate(""), LATEST_PROTOCOL_VERSION);
    }

    proptest! {
        #[test]
        fn test_negotiation_never_fails(requested in "\\PC*") {
            let negotiated = negotiate(&requested);
            prop_assert!(is_supported(negotiated));
            if !is_supported(&requested) {
                prop_assert_eq!(negotiated, LATEST_PROTOCOL_VERSION);
            }
        }
    }
}
