//! Demonstrates resolving trusted proxies from Cloudflare's IP ranges.
//!
//! Set `TRUSTED_PLATFORM=true` to trust every peer, or `TRUSTED_PLATFORM_HEADER_DETECTION=true` to
//! take the client IP from a platform connecting-IP header.

use actix_trusted_proxies::{
    AwcFetcher, ClientInfo, MemoryCache, PlatformClientIp, ProxyTrustResolver, TrustConfig,
    TrustProxies,
};
use actix_web::{get, middleware::Logger, web::ReqData, App, HttpServer, Responder};

#[get("/")]
async fn index(info: ClientInfo, platform: Option<ReqData<PlatformClientIp>>) -> impl Responder {
    match platform.map(ReqData::into_inner) {
        Some(PlatformClientIp(Some(ip))) => format!("Client IP from platform header: {ip}"),
        _ => format!("Client: {info}"),
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = TrustConfig::from_env();
    tracing::info!("trust config: {config:?}");

    let resolver = ProxyTrustResolver::new(config, MemoryCache::new(), AwcFetcher)
        .with_proxies(["127.0.0.1/32", "::1/128"]);

    HttpServer::new(move || {
        App::new()
            .wrap(TrustProxies::new(resolver.clone()))
            .wrap(Logger::default())
            .service(index)
    })
    .bind(("127.0.0.1", 8080))?
    .workers(2)
    .run()
    .await
}
