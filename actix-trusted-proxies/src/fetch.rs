use async_trait::async_trait;

use crate::FetchError;

/// URL for Cloudflare's plain-text list of IPv4 ranges.
pub const CF_URL_IPS_V4: &str = "https://www.cloudflare.com/ips-v4";

/// URL for Cloudflare's plain-text list of IPv6 ranges.
pub const CF_URL_IPS_V6: &str = "https://www.cloudflare.com/ips-v6";

/// Retrieves a newline-delimited list of IP addresses or CIDR ranges.
#[async_trait(?Send)]
pub trait RangeListFetcher: Send + Sync {
    /// Fetches the list at `url`, in the order it is published.
    ///
    /// Any non-success response is an error.
    async fn fetch(&self, url: &str) -> Result<Vec<String>, FetchError>;
}

/// Splits a response body into list entries, skipping blank lines.
pub fn parse_range_list(body: &str) -> Vec<String> {
    body.split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Fetches Cloudflare's IPv4 ranges followed by its IPv6 ranges.
///
/// If either fetch fails, the whole operation fails.
pub async fn fetch_cloudflare_ranges(
    fetcher: &dyn RangeListFetcher,
) -> Result<Vec<String>, FetchError> {
    tracing::debug!("fetching cloudflare ips");

    let mut ranges = fetcher.fetch(CF_URL_IPS_V4).await?;
    ranges.extend(fetcher.fetch(CF_URL_IPS_V6).await?);

    tracing::debug!("fetched {} cloudflare ranges", ranges.len());

    Ok(ranges)
}

/// [`RangeListFetcher`] using an `awc` client with default settings.
#[cfg(feature = "fetch-ips")]
#[derive(Debug, Clone, Default)]
pub struct AwcFetcher;

#[cfg(feature = "fetch-ips")]
#[async_trait(?Send)]
impl RangeListFetcher for AwcFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<String>, FetchError> {
        let client = awc::Client::new();

        tracing::debug!("fetching {url}");
        let mut res = client.get(url).send().await.map_err(|err| {
            tracing::error!("{err}");
            FetchError::Send {
                url: url.to_owned(),
                reason: err.to_string(),
            }
        })?;

        if !res.status().is_success() {
            tracing::error!("{url} responded with {}", res.status());
            return Err(FetchError::Status {
                url: url.to_owned(),
                status: res.status(),
            });
        }

        let body = res.body().await.map_err(|err| {
            tracing::error!("{err}");
            FetchError::Body {
                url: url.to_owned(),
                reason: err.to_string(),
            }
        })?;

        let body = std::str::from_utf8(&body).map_err(|err| FetchError::Body {
            url: url.to_owned(),
            reason: err.to_string(),
        })?;

        Ok(parse_range_list(body))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use actix_web::http::StatusCode;

    use super::*;

    /// Fetcher serving canned bodies, counting every fetch.
    #[derive(Clone, Default)]
    pub(crate) struct StaticFetcher {
        bodies: Arc<HashMap<String, Result<String, StatusCode>>>,
        calls: Arc<AtomicUsize>,
        delay: Option<Duration>,
    }

    impl StaticFetcher {
        pub(crate) fn new(v4: &str, v6: &str) -> Self {
            Self::with_responses(Ok(v4), Ok(v6))
        }

        pub(crate) fn with_responses(
            v4: Result<&str, StatusCode>,
            v6: Result<&str, StatusCode>,
        ) -> Self {
            let bodies = HashMap::from([
                (CF_URL_IPS_V4.to_owned(), v4.map(str::to_owned)),
                (CF_URL_IPS_V6.to_owned(), v6.map(str::to_owned)),
            ]);

            Self {
                bodies: Arc::new(bodies),
                ..Self::default()
            }
        }

        pub(crate) fn delayed(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait(?Send)]
    impl RangeListFetcher for StaticFetcher {
        async fn fetch(&self, url: &str) -> Result<Vec<String>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if let Some(delay) = self.delay {
                actix_web::rt::time::sleep(delay).await;
            }

            match self.bodies.get(url) {
                Some(Ok(body)) => Ok(parse_range_list(body)),
                Some(Err(status)) => Err(FetchError::Status {
                    url: url.to_owned(),
                    status: *status,
                }),
                None => Err(FetchError::Status {
                    url: url.to_owned(),
                    status: StatusCode::NOT_FOUND,
                }),
            }
        }
    }

    #[test]
    fn parse_lines() {
        assert!(parse_range_list("").is_empty());
        assert!(parse_range_list("\n\n").is_empty());

        assert_eq!(
            parse_range_list("173.245.48.0/20\n103.21.244.0/22\n"),
            ["173.245.48.0/20", "103.21.244.0/22"]
        );

        assert_eq!(
            parse_range_list("2400:cb00::/32\r\n\r\n2606:4700::/32"),
            ["2400:cb00::/32", "2606:4700::/32"]
        );
    }

    #[actix_web::test]
    async fn v4_before_v6() {
        let fetcher = StaticFetcher::new("173.245.48.0/20\n103.21.244.0/22", "2400:cb00::/32\n");

        let ranges = fetch_cloudflare_ranges(&fetcher).await.unwrap();
        assert_eq!(
            ranges,
            ["173.245.48.0/20", "103.21.244.0/22", "2400:cb00::/32"]
        );
        assert_eq!(fetcher.calls(), 2);
    }

    #[actix_web::test]
    async fn v4_failure_skips_v6() {
        let fetcher =
            StaticFetcher::with_responses(Err(StatusCode::INTERNAL_SERVER_ERROR), Ok("::1"));

        let err = fetch_cloudflare_ranges(&fetcher).await.unwrap_err();
        assert_eq!(err.url(), CF_URL_IPS_V4);
        assert_eq!(fetcher.calls(), 1);
    }

    #[actix_web::test]
    async fn v6_failure_discards_v4() {
        let fetcher =
            StaticFetcher::with_responses(Ok("173.245.48.0/20"), Err(StatusCode::BAD_GATEWAY));

        let err = fetch_cloudflare_ranges(&fetcher).await.unwrap_err();
        assert_eq!(err.url(), CF_URL_IPS_V6);
    }

    #[cfg(feature = "fetch-ips")]
    #[actix_web::test]
    async fn awc_fetcher_against_local_server() {
        use actix_web::{web, App, HttpResponse, HttpServer};

        let srv = HttpServer::new(|| {
            App::new()
                .route(
                    "/ips",
                    web::get().to(|| async { HttpResponse::Ok().body("a\r\n\r\nb\n") }),
                )
                .route(
                    "/down",
                    web::get().to(|| async { HttpResponse::ServiceUnavailable().finish() }),
                )
                .route(
                    "/binary",
                    web::get().to(|| async { HttpResponse::Ok().body(vec![0xff, 0xfe, 0xfd]) }),
                )
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();

        let addr = srv.addrs()[0];
        let srv = srv.run();
        let handle = srv.handle();
        actix_web::rt::spawn(srv);

        let url = |path: &str| format!("http://{addr}{path}");

        let ranges = AwcFetcher.fetch(&url("/ips")).await.unwrap();
        assert_eq!(ranges, ["a", "b"]);

        let err = AwcFetcher.fetch(&url("/down")).await.unwrap_err();
        assert!(matches!(
            &err,
            FetchError::Status { status, .. } if *status == StatusCode::SERVICE_UNAVAILABLE
        ));
        assert_eq!(err.url(), url("/down"));

        let err = AwcFetcher.fetch(&url("/binary")).await.unwrap_err();
        assert!(matches!(&err, FetchError::Body { .. }));

        handle.stop(true).await;
    }
}
