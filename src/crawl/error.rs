//! Error type for fetching pages and configuring the extractor.

use thiserror::Error;

/// Fetch and extractor-setup failures.
///
/// The controller treats every fetch error the same way; the variants exist for logging.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Timed out fetching {url}: {source}")]
    Timeout { url: String, source: reqwest::Error },

    #[error("Network error: could not reach {url}: {source}")]
    Network { url: String, source: reqwest::Error },

    #[error("HTTP {status} when fetching: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Failed to read response body from {url}: {source}")]
    BodyRead { url: String, source: reqwest::Error },

    #[error("Giving up on {url} after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        #[source]
        last: Box<CrawlError>,
    },

    #[error("Invalid selector {selector:?}: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Failed to create HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl CrawlError {
    /// Build the right variant for a transport-level reqwest error.
    pub(crate) fn from_send(url: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            CrawlError::Timeout {
                url: url.to_string(),
                source,
            }
        } else {
            CrawlError::Network {
                url: url.to_string(),
                source,
            }
        }
    }
}
