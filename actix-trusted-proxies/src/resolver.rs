use std::{
    fmt,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use actix_web::{dev::ServiceRequest, http::header::HeaderMap, HttpMessage};
use serde_json::Value;

use crate::{
    fetch_cloudflare_ranges, Cache, FetchError, ForwardedHeaders, ProxyTrust, RangeListFetcher,
    TrustConfig, TrustedProxies,
};

/// Cache key for the fetched Cloudflare ranges.
pub const CF_IPS_CACHE_KEY: &str = "cf_ips";

/// Cache key for the name of the detected platform client IP header.
pub const HEADER_CACHE_KEY: &str = "header";

/// How long a detected platform header name is remembered.
pub const HEADER_CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Headers probed for the connecting client's IP, in priority order.
///
/// Names starting with `HTTP_` are also looked up in their plain header form (e.g.,
/// `HTTP_CF_CONNECTING_IP` as `CF-Connecting-IP`).
pub const PLATFORM_HEADERS: [&str; 2] = ["Do-Connecting-Ip", "HTTP_CF_CONNECTING_IP"];

/// Client IP taken from a platform header, recorded in request extensions when header detection
/// is enabled.
///
/// `None` means no platform header carried a usable address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformClientIp(pub Option<IpAddr>);

/// Decides which proxies are trusted for each request.
///
/// Trusts every peer when [`TrustConfig::trust_all`] is set. Otherwise, trusts the pre-seeded
/// proxies plus Cloudflare's published ranges, which are fetched on first use and cached
/// permanently under [`CF_IPS_CACHE_KEY`].
///
/// With [`TrustConfig::header_detection`] enabled, requests carrying a platform client IP header
/// (see [`PLATFORM_HEADERS`]) use that address directly and skip proxy resolution.
#[derive(Clone)]
pub struct ProxyTrustResolver {
    config: TrustConfig,
    cache: Arc<dyn Cache>,
    fetcher: Arc<dyn RangeListFetcher>,
    proxies: Vec<String>,
    headers: ForwardedHeaders,
}

impl ProxyTrustResolver {
    /// Constructs resolver from config and its collaborators.
    pub fn new(
        config: TrustConfig,
        cache: impl Cache + 'static,
        fetcher: impl RangeListFetcher + 'static,
    ) -> Self {
        Self {
            config,
            cache: Arc::new(cache),
            fetcher: Arc::new(fetcher),
            proxies: Vec::new(),
            headers: ForwardedHeaders::ALL_X_FORWARDED,
        }
    }

    /// Adds proxies that are trusted in front of the Cloudflare ranges.
    pub fn with_proxies<I>(mut self, proxies: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.proxies.extend(proxies.into_iter().map(Into::into));
        self
    }

    /// Returns trust config.
    pub fn config(&self) -> TrustConfig {
        self.config
    }

    /// Resolves trusted proxies for `req` and records them in its extensions as [`ProxyTrust`].
    ///
    /// # Errors
    /// Fails if the Cloudflare ranges are not cached yet and fetching them fails.
    pub async fn resolve(&self, req: &mut ServiceRequest) -> Result<(), FetchError> {
        if self.config.header_detection && self.find_and_set_ip(req).await {
            return Ok(());
        }

        let proxies = self.trusted_proxies().await?;
        tracing::trace!("trusted proxies: {proxies}");

        req.extensions_mut()
            .insert(ProxyTrust::new(proxies, self.headers));

        Ok(())
    }

    /// Sets the request's peer address from a platform client IP header.
    ///
    /// A previously detected header name is used without probing the others. Returns true when
    /// proxy resolution should be skipped for this request.
    pub async fn find_and_set_ip(&self, req: &mut ServiceRequest) -> bool {
        if let Some(Value::String(name)) = self.cache.get(HEADER_CACHE_KEY).await {
            let ip = client_ip_from(req.headers(), &name);
            set_remote_addr(req, ip);
            return true;
        }

        for name in PLATFORM_HEADERS {
            let Some(ip) = client_ip_from(req.headers(), name) else {
                continue;
            };

            tracing::debug!("detected platform client IP header {name}");
            self.cache
                .put(HEADER_CACHE_KEY, Value::from(name), Some(HEADER_CACHE_TTL))
                .await;

            set_remote_addr(req, Some(ip));
            return true;
        }

        set_remote_addr(req, None);
        false
    }

    /// Returns the trusted proxy set, fetching Cloudflare ranges if they are not cached yet.
    ///
    /// # Errors
    /// Fails if fetching either Cloudflare list fails. Nothing is cached in that case.
    pub async fn trusted_proxies(&self) -> Result<TrustedProxies, FetchError> {
        if self.config.trust_all {
            return Ok(TrustedProxies::All);
        }

        let fetcher = Arc::clone(&self.fetcher);
        let cached = self
            .cache
            .remember_forever(
                CF_IPS_CACHE_KEY,
                Box::pin(async move {
                    let ranges = fetch_cloudflare_ranges(&*fetcher).await?;
                    Ok::<_, FetchError>(Value::from(ranges))
                }),
            )
            .await?;

        let mut proxies = self.proxies.clone();

        match cached_ranges(&cached) {
            Some(ranges) if !ranges.is_empty() => proxies.extend(ranges),
            _ => tracing::debug!("no usable cloudflare ranges cached"),
        }

        Ok(TrustedProxies::List(proxies))
    }
}

impl fmt::Debug for ProxyTrustResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyTrustResolver")
            .field("config", &self.config)
            .field("proxies", &self.proxies)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Returns cached entries if `value` is a list of strings.
fn cached_ranges(value: &Value) -> Option<Vec<String>> {
    value
        .as_array()?
        .iter()
        .map(|item| item.as_str().map(str::to_owned))
        .collect()
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|val| val.to_str().ok())
        .map(str::trim)
        .filter(|val| !val.is_empty())
}

/// Reads a client IP from header `name`, falling back to the header named by its CGI form.
fn client_ip_from(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    let val = header_value(headers, name).or_else(|| {
        let hdr = name.strip_prefix("HTTP_")?.replace('_', "-");
        header_value(headers, &hdr)
    })?;

    match val.parse() {
        Ok(ip) => Some(ip),
        Err(_) => {
            tracing::debug!("{name} header is not an IP address: {val:?}");
            None
        }
    }
}

fn set_remote_addr(req: &mut ServiceRequest, ip: Option<IpAddr>) {
    if let Some(ip) = ip {
        let port = req.peer_addr().map_or(0, |addr| addr.port());
        req.head_mut().peer_addr = Some(SocketAddr::new(ip, port));
    }

    req.extensions_mut().insert(PlatformClientIp(ip));
}
