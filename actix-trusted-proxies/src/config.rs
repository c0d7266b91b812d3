use serde::Deserialize;

/// Environment variable that enables trusting all proxies.
pub const TRUSTED_PLATFORM_ENV: &str = "TRUSTED_PLATFORM";

/// Environment variable that enables platform client IP header detection.
pub const HEADER_DETECTION_ENV: &str = "TRUSTED_PLATFORM_HEADER_DETECTION";

/// Trust configuration for [`ProxyTrustResolver`](crate::ProxyTrustResolver).
///
/// Read once at startup and immutable afterwards.
///
/// # Trust All
/// When the address of the load balancer or reverse proxy in front of the app is not known, every
/// peer can be trusted to set forwarded headers. This is insecure unless the server can only be
/// reached through that trusted proxy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// Trust every peer address instead of Cloudflare's published ranges.
    pub trust_all: bool,

    /// Look for a platform connecting-IP header before resolving trusted proxies.
    pub header_detection: bool,
}

impl TrustConfig {
    /// Constructs config with both options disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads config from process environment.
    ///
    /// Missing or unrecognized values are treated as `false`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads config using `lookup` to resolve environment variable names.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |key: &str| match lookup(key) {
            Some(val) => parse_flag(key, &val),
            None => false,
        };

        Self {
            trust_all: flag(TRUSTED_PLATFORM_ENV),
            header_detection: flag(HEADER_DETECTION_ENV),
        }
    }

    /// Sets whether all peers are trusted.
    pub fn trust_all(mut self, trust_all: bool) -> Self {
        self.trust_all = trust_all;
        self
    }

    /// Sets whether platform client IP headers are detected.
    pub fn header_detection(mut self, header_detection: bool) -> Self {
        self.header_detection = header_detection;
        self
    }
}

fn parse_flag(key: &str, val: &str) -> bool {
    let val = val.trim();
    let val = val
        .strip_prefix('(')
        .and_then(|val| val.strip_suffix(')'))
        .unwrap_or(val)
        .trim();

    match val.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" | "" => false,
        _ => {
            tracing::warn!("{key} has unrecognized value {val:?}; treating as false");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> TrustConfig {
        let env = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();

        TrustConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_to_restrictive() {
        assert_eq!(from_pairs(&[]), TrustConfig::new());
        assert!(!from_pairs(&[]).trust_all);
        assert!(!from_pairs(&[]).header_detection);
    }

    #[test]
    fn recognized_values() {
        for val in ["true", "TRUE", " 1 ", "yes", "on", "(true)"] {
            assert!(from_pairs(&[(TRUSTED_PLATFORM_ENV, val)]).trust_all, "{val}");
        }

        for val in ["false", "0", "no", "off", "", "(false)"] {
            assert!(!from_pairs(&[(TRUSTED_PLATFORM_ENV, val)]).trust_all, "{val}");
        }
    }

    #[test]
    fn invalid_values_are_false() {
        let config = from_pairs(&[(TRUSTED_PLATFORM_ENV, "definitely")]);
        assert!(!config.trust_all);
    }

    #[test]
    fn header_detection_flag() {
        let config = from_pairs(&[(HEADER_DETECTION_ENV, "true")]);
        assert!(config.header_detection);
        assert!(!config.trust_all);
    }

    #[test]
    fn builder() {
        let config = TrustConfig::new().trust_all(true).header_detection(true);
        assert!(config.trust_all);
        assert!(config.header_detection);
    }

    #[test]
    fn deserialize_partial() {
        let config: TrustConfig = serde_json::from_str(r#"{ "trust_all": true }"#).unwrap();
        assert_eq!(config, TrustConfig::new().trust_all(true));
    }
}
