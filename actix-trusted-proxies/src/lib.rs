//! Trusted proxy resolution for Actix Web.
//!
//! Decides which upstream peers may set `X-Forwarded-*` headers for each request. Peers are either
//! all trusted (opt-in, see [`TrustConfig`]) or limited to Cloudflare's published IP ranges, which
//! are fetched once and cached. The [`ClientInfo`] extractor then reads client details from
//! forwarded headers only when they were set by a trusted peer.
//!
//! Optionally, a platform connecting-IP header (see [`PLATFORM_HEADERS`]) can be detected and used
//! as the client address directly.
//!
//! # Examples
//! ```no_run
//! use actix_trusted_proxies::{
//!     AwcFetcher, ClientInfo, MemoryCache, ProxyTrustResolver, TrustConfig, TrustProxies,
//! };
//! use actix_web::{get, App, HttpServer, Responder};
//!
//! #[get("/")]
//! async fn index(info: ClientInfo) -> impl Responder {
//!     format!("{info}")
//! }
//!
//! # async fn run() -> std::io::Result<()> {
//! let resolver = ProxyTrustResolver::new(TrustConfig::from_env(), MemoryCache::new(), AwcFetcher);
//!
//! HttpServer::new(move || {
//!     App::new()
//!         .wrap(TrustProxies::new(resolver.clone()))
//!         .service(index)
//! })
//! .bind(("127.0.0.1", 8080))?
//! .run()
//! .await
//! # }
//! ```
//!
//! # Crate Features
//!
//! `fetch-ips` (default): Enables [`AwcFetcher`] for fetching Cloudflare's IP lists over HTTPS.
//! This feature includes `rustls` but if you prefer OpenSSL you can use it by disabling default
//! crate features and enabling `fetch-ips-openssl` instead.

#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

mod cache;
mod client_info;
mod config;
mod error;
mod fetch;
mod middleware;
mod proxies;
mod resolver;

#[cfg(feature = "fetch-ips")]
pub use self::fetch::AwcFetcher;
pub use self::{
    cache::{Cache, MemoryCache},
    client_info::{
        ClientInfo, X_FORWARDED_FOR, X_FORWARDED_HOST, X_FORWARDED_PORT, X_FORWARDED_PROTO,
    },
    config::{TrustConfig, HEADER_DETECTION_ENV, TRUSTED_PLATFORM_ENV},
    error::FetchError,
    fetch::{
        fetch_cloudflare_ranges, parse_range_list, RangeListFetcher, CF_URL_IPS_V4, CF_URL_IPS_V6,
    },
    middleware::{TrustProxies, TrustProxiesMiddleware, TrustedProxyMiddleware},
    proxies::{ForwardedHeaders, ProxyTrust, TrustedProxies},
    resolver::{
        PlatformClientIp, ProxyTrustResolver, CF_IPS_CACHE_KEY, HEADER_CACHE_KEY,
        HEADER_CACHE_TTL, PLATFORM_HEADERS,
    },
};
