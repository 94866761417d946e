//! Error kinds produced by the crawl engine.
//!
//! Every variant here corresponds to one of the locally-recoverable failure
//! modes the coordinator handles by skipping the offending URL and moving on.
//! Nothing in this crate panics on a malformed page; a bad page becomes one
//! of these and is logged, not thrown.

use thiserror::Error;

/// A failure encountered while canonicalizing, admitting, or fetching a URL.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CrawlError {
    #[error("malformed url: {0}")]
    MalformedUrl(String),

    #[error("{url} is out of scope for host {expected_host}")]
    OutOfScope { url: String, expected_host: String },

    #[error("robots.txt denies {0}")]
    RobotsDenied(String),

    #[error("transport failure fetching {0}")]
    Transport(String),

    #[error("http status {status} fetching {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("redirect limit exceeded for {0}")]
    RedirectExceeded(String),

    #[error("redirect loop detected for {0}")]
    RedirectLoop(String),

    #[error("content type {content_type} skipped for {url}")]
    ContentSkipped { url: String, content_type: String },

    #[error("failed to parse document at {0}")]
    ParseError(String),
}

impl CrawlError {
    /// True for the error kinds spec'd as "local recovery": the coordinator
    /// logs and continues rather than treating the crawl itself as failed.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, CrawlError::MalformedUrl(_))
    }
}
