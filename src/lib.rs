//! `sitecrawl` is a polite, single-site async web crawler. Given a seed URL
//! and a bounded budget (max pages, worker count, politeness delay), it
//! crawls within the seed's registered host, extracts every image
//! reference it can find on each fetched page, classifies images that look
//! like site logos, and returns a deduplicated, annotated result set. It
//! respects `robots.txt` and paces requests with a configurable politeness
//! delay.
//!
//! The crate is organized around the six components of the crawl engine:
//!
//! - [`url_canon`]: URL normalization, equivalence, and site-name extraction.
//! - [`robots`]: `robots.txt` fetching and per-host allow/disallow policy.
//! - [`fetch`]: the retrying, redirect-chasing, content-type-gated HTTP pipeline.
//! - [`extract`]: image and link extraction from parsed HTML.
//! - [`logo`]: the heuristic logo classifier.
//! - [`coordinator`]: the worker pool, admission queue, and shared crawl state.
//!
//! Callers typically only need the re-exports at the crate root: build a
//! [`Crawler`] with [`CrawlerBuilder`], call [`Crawler::crawl`], and inspect
//! the returned [`CrawlReport`].

pub mod coordinator;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod logo;
pub mod robots;
pub mod url_canon;

pub use coordinator::{
    CrawlHandle, CrawlOptions, CrawlReport, CrawlSession, Crawler, CrawlerBuilder, ImageRecord,
};
pub use error::CrawlError;
pub use extract::ImageCandidate;
pub use fetch::FetchConfig;
pub use logo::LogoDetector;
pub use robots::HostPolicy;
pub use url_canon::{canonicalize, site_name, CanonicalUrl};
