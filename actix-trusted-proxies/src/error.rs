use actix_web::{http::StatusCode, ResponseError};
use derive_more::{Display, Error};

/// Failure to retrieve a list of trusted IP ranges.
///
/// A fetch error fails the request that triggered it. Nothing is cached when a fetch fails, so the
/// next request tries again.
#[derive(Debug, Display, Error)]
#[non_exhaustive]
pub enum FetchError {
    /// Request could not be sent or no response was received.
    #[display("request to {url} failed: {reason}")]
    Send {
        /// URL that was requested.
        url: String,

        /// Description of the underlying client error.
        reason: String,
    },

    /// Upstream responded with a non-success status code.
    #[display("{url} responded with status {status}")]
    Status {
        /// URL that was requested.
        url: String,

        /// Status code of the response.
        status: StatusCode,
    },

    /// Response body could not be read or was not valid UTF-8.
    #[display("could not read response body from {url}: {reason}")]
    Body {
        /// URL that was requested.
        url: String,

        /// Description of the underlying body error.
        reason: String,
    },
}

impl FetchError {
    /// Returns the URL whose fetch failed.
    pub fn url(&self) -> &str {
        match self {
            Self::Send { url, .. } | Self::Status { url, .. } | Self::Body { url, .. } => url,
        }
    }
}

impl ResponseError for FetchError {
    fn status_code(&self) -> StatusCode {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}
