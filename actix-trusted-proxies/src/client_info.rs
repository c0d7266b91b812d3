use std::{
    convert::Infallible,
    fmt,
    future::{ready, Ready},
    net::{IpAddr, SocketAddr},
};

use actix_web::{
    dev,
    http::header::{self, HeaderName},
    FromRequest, HttpMessage, HttpRequest,
};

use crate::{ForwardedHeaders, ProxyTrust};

/// The `X-Forwarded-For` header name.
#[allow(clippy::declare_interior_mutable_const)]
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// The `X-Forwarded-Host` header name.
#[allow(clippy::declare_interior_mutable_const)]
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// The `X-Forwarded-Port` header name.
#[allow(clippy::declare_interior_mutable_const)]
pub const X_FORWARDED_PORT: HeaderName = HeaderName::from_static("x-forwarded-port");

/// The `X-Forwarded-Proto` header name.
#[allow(clippy::declare_interior_mutable_const)]
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Connection details of the original client, honoring forwarded headers only from trusted
/// proxies.
///
/// Unlike Actix Web's `ConnectionInfo`, `X-Forwarded-*` headers are only believed when the direct
/// peer is trusted by the [`ProxyTrust`] recorded on the request by
/// [`TrustProxies`](crate::TrustProxies). Without one, the peer address and request's own host and
/// scheme are used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    ip: Option<IpAddr>,
    host: String,
    scheme: String,
    port: Option<u16>,
    via_trusted_proxy: bool,
}

impl ClientInfo {
    /// Resolves client connection details for `req`.
    pub fn new(req: &HttpRequest) -> Self {
        let peer_ip = req.peer_addr().map(|addr| addr.ip());

        let host = header_str(req, header::HOST)
            .map(str::to_owned)
            .or_else(|| req.uri().authority().map(|auth| auth.to_string()))
            .unwrap_or_else(|| req.app_config().host().to_owned());

        let scheme = req
            .uri()
            .scheme_str()
            .unwrap_or(if req.app_config().secure() {
                "https"
            } else {
                "http"
            })
            .to_owned();

        let direct = Self {
            ip: peer_ip,
            port: host_port(&host),
            host,
            scheme,
            via_trusted_proxy: false,
        };

        let trust = req.extensions().get::<ProxyTrust>().cloned();

        let (trust, peer_ip) = match (trust, peer_ip) {
            (Some(trust), Some(ip)) if trust.is_trusted(ip) => (trust, ip),
            _ => return direct,
        };

        let headers = trust.headers();
        let mut info = Self {
            via_trusted_proxy: true,
            ..direct
        };

        if headers.contains(ForwardedHeaders::X_FORWARDED_FOR) {
            info.ip = Some(forwarded_client_ip(req, &trust, peer_ip));
        }

        if headers.contains(ForwardedHeaders::X_FORWARDED_HOST) {
            if let Some(host) = first_value(req, X_FORWARDED_HOST) {
                info.port = host_port(host);
                info.host = host.to_owned();
            }
        }

        if headers.contains(ForwardedHeaders::X_FORWARDED_PROTO) {
            if let Some(proto) = first_value(req, X_FORWARDED_PROTO) {
                info.scheme = proto.to_ascii_lowercase();
            }
        }

        if headers.contains(ForwardedHeaders::X_FORWARDED_PORT) {
            if let Some(port) = first_value(req, X_FORWARDED_PORT).and_then(|p| p.parse().ok()) {
                info.port = Some(port);
            }
        }

        info
    }

    /// Returns client IP address, if known.
    pub fn ip(&self) -> Option<IpAddr> {
        self.ip
    }

    /// Returns host requested by the client.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns scheme used by the client (typically "http" or "https").
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Returns port requested by the client, if explicitly known.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Returns true if details were taken from headers set by a trusted proxy.
    pub fn is_via_trusted_proxy(&self) -> bool {
        self.via_trusted_proxy
    }
}

impl fmt::Display for ClientInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            Some(ip) => write!(f, "{ip} via {}://{}", self.scheme, self.host),
            None => write!(f, "unknown via {}://{}", self.scheme, self.host),
        }
    }
}

impl FromRequest for ClientInfo {
    type Error = Infallible;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _pl: &mut dev::Payload) -> Self::Future {
        ready(Ok(Self::new(req)))
    }
}

fn header_str(req: &HttpRequest, name: HeaderName) -> Option<&str> {
    req.headers()
        .get(name)
        .and_then(|val| val.to_str().ok())
        .map(str::trim)
        .filter(|val| !val.is_empty())
}

/// Returns first comma-separated value of header `name`.
fn first_value(req: &HttpRequest, name: HeaderName) -> Option<&str> {
    header_str(req, name)?
        .split(',')
        .map(str::trim)
        .find(|val| !val.is_empty())
}

fn host_port(host: &str) -> Option<u16> {
    // bracketed IPv6 hosts contain colons before the port separator
    let (_, port) = host.rsplit_once(':')?;

    if port.contains(']') {
        return None;
    }

    port.parse().ok()
}

/// Parses an `X-Forwarded-For` node, which may include a port.
fn parse_node(node: &str) -> Option<IpAddr> {
    let node = node.trim();

    node.parse::<IpAddr>()
        .ok()
        .or_else(|| node.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}

/// Walks the forwarding chain from the peer backwards, returning the first untrusted hop.
///
/// If every hop is trusted, the leftmost one is the client. Unparseable nodes are skipped.
fn forwarded_client_ip(req: &HttpRequest, trust: &ProxyTrust, peer_ip: IpAddr) -> IpAddr {
    let chain = req
        .headers()
        .get_all(X_FORWARDED_FOR)
        .filter_map(|val| val.to_str().ok())
        .flat_map(|val| val.split(','))
        .filter_map(parse_node)
        .collect::<Vec<_>>();

    let mut client = peer_ip;

    for ip in chain.into_iter().rev() {
        client = ip;

        if !trust.is_trusted(ip) {
            break;
        }
    }

    client
}
