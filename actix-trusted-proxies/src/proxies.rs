use std::{fmt, net::IpAddr, ops};

use ipnetwork::IpNetwork;

/// Set of proxy addresses allowed to set forwarded headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustedProxies {
    /// Every peer is trusted.
    All,

    /// IP addresses or CIDR ranges, in the order they were resolved.
    List(Vec<String>),
}

impl TrustedProxies {
    /// Returns true if this is the trust-all wildcard.
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Returns listed entries; empty for the wildcard.
    pub fn entries(&self) -> &[String] {
        match self {
            Self::All => &[],
            Self::List(entries) => entries,
        }
    }
}

impl Default for TrustedProxies {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl fmt::Display for TrustedProxies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("*"),
            Self::List(entries) => f.write_str(&entries.join(", ")),
        }
    }
}

/// Mask of `X-Forwarded-*` headers that are believed from trusted proxies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ForwardedHeaders(u8);

impl ForwardedHeaders {
    /// No forwarded headers.
    pub const NONE: Self = Self(0);

    /// `X-Forwarded-For`.
    pub const X_FORWARDED_FOR: Self = Self(0b0001);

    /// `X-Forwarded-Host`.
    pub const X_FORWARDED_HOST: Self = Self(0b0010);

    /// `X-Forwarded-Port`.
    pub const X_FORWARDED_PORT: Self = Self(0b0100);

    /// `X-Forwarded-Proto`.
    pub const X_FORWARDED_PROTO: Self = Self(0b1000);

    /// All four `X-Forwarded-*` headers.
    pub const ALL_X_FORWARDED: Self = Self(0b1111);

    /// Returns true if all headers in `other` are enabled in `self`.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl ops::BitOr for ForwardedHeaders {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Trusted proxy settings applied to a request.
///
/// Inserted into request extensions by [`ProxyTrustResolver`](crate::ProxyTrustResolver) and read
/// by [`ClientInfo`](crate::ClientInfo).
#[derive(Debug, Clone)]
pub struct ProxyTrust {
    proxies: TrustedProxies,
    headers: ForwardedHeaders,
    networks: Vec<IpNetwork>,
}

impl ProxyTrust {
    /// Constructs trust settings, parsing listed entries as IP addresses or CIDR ranges.
    ///
    /// Entries that fail to parse are kept in [`proxies`](Self::proxies) but never match a peer.
    pub fn new(proxies: TrustedProxies, headers: ForwardedHeaders) -> Self {
        let networks = proxies
            .entries()
            .iter()
            .filter_map(|entry| match entry.parse::<IpNetwork>() {
                Ok(net) => Some(net),
                Err(err) => {
                    tracing::warn!("ignoring invalid trusted proxy {entry:?}: {err}");
                    None
                }
            })
            .collect();

        Self {
            proxies,
            headers,
            networks,
        }
    }

    /// Returns trusted proxy set.
    pub fn proxies(&self) -> &TrustedProxies {
        &self.proxies
    }

    /// Returns enabled forwarded headers.
    pub fn headers(&self) -> ForwardedHeaders {
        self.headers
    }

    /// Returns true if `ip` is a trusted proxy.
    pub fn is_trusted(&self, ip: IpAddr) -> bool {
        match self.proxies {
            TrustedProxies::All => true,
            TrustedProxies::List(_) => self.networks.iter().any(|net| net.contains(ip)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_mask() {
        let mask = ForwardedHeaders::X_FORWARDED_FOR | ForwardedHeaders::X_FORWARDED_PROTO;

        assert!(mask.contains(ForwardedHeaders::X_FORWARDED_FOR));
        assert!(mask.contains(ForwardedHeaders::X_FORWARDED_PROTO));
        assert!(!mask.contains(ForwardedHeaders::X_FORWARDED_HOST));
        assert!(!mask.contains(ForwardedHeaders::ALL_X_FORWARDED));

        assert_eq!(
            ForwardedHeaders::X_FORWARDED_FOR
                | ForwardedHeaders::X_FORWARDED_HOST
                | ForwardedHeaders::X_FORWARDED_PORT
                | ForwardedHeaders::X_FORWARDED_PROTO,
            ForwardedHeaders::ALL_X_FORWARDED,
        );
        assert!(ForwardedHeaders::NONE.contains(ForwardedHeaders::NONE));
    }

    #[test]
    fn wildcard_trusts_everyone() {
        let trust = ProxyTrust::new(TrustedProxies::All, ForwardedHeaders::ALL_X_FORWARDED);

        assert!(trust.is_trusted(IpAddr::from([10, 0, 0, 1])));
        assert!(trust.is_trusted("::1".parse().unwrap()));
        assert_eq!(trust.proxies().to_string(), "*");
    }

    #[test]
    fn list_matches_cidr_and_single_ips() {
        let trust = ProxyTrust::new(
            TrustedProxies::List(vec![
                "103.21.244.0/22".to_owned(),
                "192.0.2.7".to_owned(),
                "2400:cb00::/32".to_owned(),
                "not an ip".to_owned(),
            ]),
            ForwardedHeaders::ALL_X_FORWARDED,
        );

        assert!(trust.is_trusted(IpAddr::from([103, 21, 247, 255])));
        assert!(!trust.is_trusted(IpAddr::from([103, 21, 248, 0])));
        assert!(trust.is_trusted(IpAddr::from([192, 0, 2, 7])));
        assert!(!trust.is_trusted(IpAddr::from([192, 0, 2, 8])));
        assert!(trust.is_trusted("2400:cb00::1".parse().unwrap()));
        assert!(!trust.is_trusted("2606:4700::1".parse().unwrap()));

        // invalid entries are kept but never match
        assert_eq!(trust.proxies().entries().len(), 4);
    }

    #[test]
    fn empty_list_trusts_nobody() {
        let trust = ProxyTrust::new(TrustedProxies::default(), ForwardedHeaders::ALL_X_FORWARDED);
        assert!(!trust.is_trusted(IpAddr::from([127, 0, 0, 1])));
        assert!(!trust.proxies().is_all());
    }
}
