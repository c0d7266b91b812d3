use std::{
    future::{ready, Ready},
    rc::Rc,
};

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use async_trait::async_trait;
use futures_core::future::LocalBoxFuture;

use crate::ProxyTrustResolver;

/// Capability for deciding proxy trust on a request before it is routed.
///
/// [`TrustProxies`] calls [`apply`](Self::apply) for every request it wraps. Implement this trait
/// to substitute a different trust policy for [`ProxyTrustResolver`].
#[async_trait(?Send)]
pub trait TrustedProxyMiddleware {
    /// Applies trust settings to `req`.
    ///
    /// Returning an error fails the request without calling the wrapped service.
    async fn apply(&self, req: &mut ServiceRequest) -> Result<(), Error>;
}

#[async_trait(?Send)]
impl TrustedProxyMiddleware for ProxyTrustResolver {
    async fn apply(&self, req: &mut ServiceRequest) -> Result<(), Error> {
        self.resolve(req).await?;
        Ok(())
    }
}

/// Middleware that resolves trusted proxies for each request.
///
/// # Examples
/// ```
/// use actix_trusted_proxies::{
///     AwcFetcher, ClientInfo, MemoryCache, ProxyTrustResolver, TrustConfig, TrustProxies,
/// };
/// use actix_web::{web, App};
///
/// let resolver = ProxyTrustResolver::new(TrustConfig::from_env(), MemoryCache::new(), AwcFetcher);
///
/// App::new()
///     .wrap(TrustProxies::new(resolver))
///     .route("/", web::to(|info: ClientInfo| async move { format!("{info}") }));
/// ```
#[derive(Debug)]
pub struct TrustProxies<M> {
    mw: Rc<M>,
}

impl<M> TrustProxies<M> {
    /// Constructs middleware from a trust policy.
    pub fn new(mw: M) -> Self {
        Self { mw: Rc::new(mw) }
    }
}

#[cfg(feature = "fetch-ips")]
impl TrustProxies<ProxyTrustResolver> {
    /// Constructs middleware using config from the environment, an in-memory cache and an `awc`
    /// fetcher.
    ///
    /// The cache belongs to this instance. When running multiple workers, construct a
    /// [`ProxyTrustResolver`] outside the app factory and clone it into [`TrustProxies::new`] so
    /// that workers share the cached ranges.
    pub fn from_env() -> Self {
        Self::new(ProxyTrustResolver::new(
            crate::TrustConfig::from_env(),
            crate::MemoryCache::new(),
            crate::AwcFetcher,
        ))
    }
}

impl<M> Clone for TrustProxies<M> {
    fn clone(&self) -> Self {
        Self {
            mw: Rc::clone(&self.mw),
        }
    }
}

impl<S, B, M> Transform<S, ServiceRequest> for TrustProxies<M>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    M: TrustedProxyMiddleware + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = TrustProxiesMiddleware<S, M>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(TrustProxiesMiddleware {
            service: Rc::new(service),
            mw: Rc::clone(&self.mw),
        }))
    }
}

/// Service for [`TrustProxies`].
pub struct TrustProxiesMiddleware<S, M> {
    service: Rc<S>,
    mw: Rc<M>,
}

impl<S, B, M> Service<ServiceRequest> for TrustProxiesMiddleware<S, M>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    M: TrustedProxyMiddleware + 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let mw = Rc::clone(&self.mw);

        Box::pin(async move {
            mw.apply(&mut req).await?;
            service.call(req).await
        })
    }
}
