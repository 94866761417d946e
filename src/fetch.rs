//! HTTP fetch pipeline (C3): retrying GET, manual redirect chasing, and a
//! content-type gate, composed as a single pipeline per the design note that
//! retry wraps redirect-chasing rather than the two being separate passes.
//!
//! The actual GET is issued through the [`Transport`] trait rather than
//! directly against `reqwest::Client`, so the redirect/retry/content-gate
//! state machine can be driven from a fixture in tests without a socket.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use rand::Rng;
use reqwest::Client;

use crate::error::CrawlError;
use crate::url_canon::CanonicalUrl;

const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "text/html",
    "application/xhtml+xml",
    "application/xml",
    "text/xml",
];

/// Tunables for the fetch pipeline. Defaults match the spec's figures.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub max_attempts: u32,
    pub base_connect_timeout: Duration,
    pub base_read_timeout: Duration,
    pub max_redirects: u32,
    pub max_body_bytes: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "Eulerity-Crawler/1.0".to_string(),
            max_attempts: 3,
            base_connect_timeout: Duration::from_secs(30),
            base_read_timeout: Duration::from_secs(60),
            max_redirects: 5,
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// A successfully fetched, content-type-gated, size-capped page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// The effective URL after redirect-chasing, already canonicalized.
    pub url: CanonicalUrl,
    pub body: String,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The minimal GET surface the fetch pipeline needs. `reqwest::Client`
/// implements this for real traffic; tests drive the same state machine
/// against a fixture implementation instead of a socket.
pub trait Transport: Send + Sync {
    fn get<'a>(&'a self, url: &'a str, user_agent: &'a str, timeout: Duration) -> BoxFuture<'a, Result<RawResponse, CrawlError>>;
}

/// A transport-agnostic view of an HTTP response: just enough for the
/// redirect/content-gate/truncation logic below to operate on.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub location: Option<String>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

fn is_redirection(status: u16) -> bool {
    (300..400).contains(&status)
}

impl Transport for Client {
    fn get<'a>(&'a self, url: &'a str, user_agent: &'a str, timeout: Duration) -> BoxFuture<'a, Result<RawResponse, CrawlError>> {
        Box::pin(async move {
            let response = self
                .get(url)
                .header(reqwest::header::USER_AGENT, user_agent)
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| CrawlError::Transport(e.to_string()))?;

            let status = response.status().as_u16();
            let location = response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            let body = response
                .bytes()
                .await
                .map_err(|e| CrawlError::Transport(e.to_string()))?
                .to_vec();

            Ok(RawResponse {
                status,
                location,
                content_type,
                body,
            })
        })
    }
}

/// Fetch `start`, retrying transport failures up to `cfg.max_attempts` times
/// with exponential backoff, each attempt chasing redirects on its own.
#[tracing::instrument(skip(transport, cfg))]
pub async fn fetch<T: Transport>(
    transport: &T,
    cfg: &FetchConfig,
    start: &CanonicalUrl,
) -> Result<FetchedPage, CrawlError> {
    let mut last_error = CrawlError::Transport(format!("no attempt executed for {start}"));

    for attempt in 1..=cfg.max_attempts {
        let multiplier = timeout_multiplier(attempt);
        let timeout = cfg.base_connect_timeout.saturating_add(cfg.base_read_timeout) * multiplier;

        match fetch_once(transport, cfg, start, timeout).await {
            Ok(page) => return Ok(page),
            Err(err @ CrawlError::Transport(_)) => {
                tracing::debug!(%start, attempt, "transport failure, will retry");
                last_error = err;
                if attempt < cfg.max_attempts {
                    let backoff_ms = (1000u64.saturating_mul(1u64 << (attempt - 1))).min(10000);
                    let jitter_ms = rand::thread_rng().gen_range(0..1000u64);
                    tokio::time::sleep(Duration::from_millis(backoff_ms + jitter_ms)).await;
                }
            }
            Err(other) => return Err(other),
        }
    }

    Err(last_error)
}

/// attempt 1 uses the base timeout; attempt N>1 multiplies it by N+1.
fn timeout_multiplier(attempt: u32) -> u32 {
    if attempt <= 1 {
        1
    } else {
        attempt + 1
    }
}

async fn fetch_once<T: Transport>(
    transport: &T,
    cfg: &FetchConfig,
    start: &CanonicalUrl,
    timeout: Duration,
) -> Result<FetchedPage, CrawlError> {
    let mut trail: Vec<CanonicalUrl> = vec![start.clone()];
    let mut current = start.clone();
    let mut redirects_followed = 0u32;

    loop {
        let response = transport.get(current.as_str(), &cfg.user_agent, timeout).await?;

        if is_redirection(response.status) {
            redirects_followed += 1;
            if redirects_followed > cfg.max_redirects {
                return Err(CrawlError::RedirectExceeded(current.to_string()));
            }

            let location = response.location.as_deref().ok_or_else(|| {
                CrawlError::Transport(format!("redirect without Location: {current}"))
            })?;
            let next = current.resolve(location)?;

            if trail.contains(&next) {
                return Err(CrawlError::RedirectLoop(next.to_string()));
            }

            let hop_sleep_ms = (200u64.saturating_mul(redirects_followed as u64)).min(2000);
            tokio::time::sleep(Duration::from_millis(hop_sleep_ms)).await;

            trail.push(next.clone());
            current = next;
            continue;
        }

        return finish(current, response, cfg);
    }
}

fn finish(current: CanonicalUrl, response: RawResponse, cfg: &FetchConfig) -> Result<FetchedPage, CrawlError> {
    if response.status >= 400 {
        return Err(CrawlError::HttpStatus {
            url: current.to_string(),
            status: response.status,
        });
    }

    let content_type = response.content_type.unwrap_or_default();
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();

    if !ALLOWED_CONTENT_TYPES
        .iter()
        .any(|allowed| essence.starts_with(allowed))
    {
        return Err(CrawlError::ContentSkipped {
            url: current.to_string(),
            content_type,
        });
    }

    let capped = if response.body.len() > cfg.max_body_bytes {
        &response.body[..cfg.max_body_bytes]
    } else {
        &response.body[..]
    };
    let body = String::from_utf8_lossy(capped).into_owned();

    Ok(FetchedPage { url: current, body })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::url_canon::canonicalize;

    use super::*;

    #[test]
    fn timeout_multiplier_matches_spec_table() {
        assert_eq!(timeout_multiplier(1), 1);
        assert_eq!(timeout_multiplier(2), 3);
        assert_eq!(timeout_multiplier(3), 4);
    }

    #[test]
    fn default_config_matches_spec_figures() {
        let cfg = FetchConfig::default();
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.max_redirects, 5);
        assert_eq!(cfg.max_body_bytes, 1024 * 1024);
        assert_eq!(cfg.base_connect_timeout, Duration::from_secs(30));
        assert_eq!(cfg.base_read_timeout, Duration::from_secs(60));
    }

    /// A canned transport keyed by URL, so tests can script a redirect
    /// chain or a single response without touching a socket.
    struct MockTransport {
        responses: HashMap<String, RawResponse>,
        calls: Mutex<Vec<String>>,
    }

    impl MockTransport {
        fn new(responses: Vec<(&str, RawResponse)>) -> Self {
            Self {
                responses: responses
                    .into_iter()
                    .map(|(url, resp)| (url.to_string(), resp))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl Transport for MockTransport {
        fn get<'a>(&'a self, url: &'a str, _user_agent: &'a str, _timeout: Duration) -> BoxFuture<'a, Result<RawResponse, CrawlError>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push(url.to_string());
                self.responses
                    .get(url)
                    .cloned()
                    .ok_or_else(|| CrawlError::Transport(format!("no fixture for {url}")))
            })
        }
    }

    fn redirect(location: &str) -> RawResponse {
        RawResponse {
            status: 301,
            location: Some(location.to_string()),
            content_type: None,
            body: Vec::new(),
        }
    }

    fn html_ok(body: &str) -> RawResponse {
        RawResponse {
            status: 200,
            location: None,
            content_type: Some("text/html; charset=utf-8".to_string()),
            body: body.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn follows_redirects_to_final_page() {
        let start = canonicalize("https://example.com/old").unwrap();
        let transport = MockTransport::new(vec![
            ("https://example.com/old", redirect("/new")),
            ("https://example.com/new", html_ok("<html>hi</html>")),
        ]);
        let cfg = FetchConfig::default();

        let page = fetch(&transport, &cfg, &start).await.unwrap();
        assert_eq!(page.url.as_str(), "https://example.com/new");
        assert_eq!(page.body, "<html>hi</html>");
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn redirect_loop_is_broken_without_error() {
        // 301 -> 302 -> 301 cycling between two URLs must terminate via
        // loop detection rather than erroring or looping forever.
        let start = canonicalize("https://example.com/a").unwrap();
        let transport = MockTransport::new(vec![
            ("https://example.com/a", redirect("/b")),
            ("https://example.com/b", redirect("/a")),
        ]);
        let cfg = FetchConfig::default();

        let err = fetch(&transport, &cfg, &start).await.unwrap_err();
        assert!(matches!(err, CrawlError::RedirectLoop(_)));
    }

    #[tokio::test]
    async fn redirect_exceeded_past_max_hops() {
        let start = canonicalize("https://example.com/r0").unwrap();
        let mut responses = Vec::new();
        for i in 0..10 {
            responses.push((
                format!("https://example.com/r{i}"),
                redirect(&format!("/r{}", i + 1)),
            ));
        }
        let transport = MockTransport::new(
            responses.iter().map(|(u, r)| (u.as_str(), r.clone())).collect(),
        );
        let mut cfg = FetchConfig::default();
        cfg.max_redirects = 2;

        let err = fetch(&transport, &cfg, &start).await.unwrap_err();
        assert!(matches!(err, CrawlError::RedirectExceeded(_)));
    }

    #[tokio::test]
    async fn non_html_content_type_is_skipped_not_errored() {
        let start = canonicalize("https://example.com/photo.png").unwrap();
        let transport = MockTransport::new(vec![(
            "https://example.com/photo.png",
            RawResponse {
                status: 200,
                location: None,
                content_type: Some("image/png".to_string()),
                body: vec![0u8; 16],
            },
        )]);
        let cfg = FetchConfig::default();

        let err = fetch(&transport, &cfg, &start).await.unwrap_err();
        assert!(matches!(err, CrawlError::ContentSkipped { .. }));
    }

    #[tokio::test]
    async fn http_error_status_is_reported() {
        let start = canonicalize("https://example.com/missing").unwrap();
        let transport = MockTransport::new(vec![(
            "https://example.com/missing",
            RawResponse {
                status: 404,
                location: None,
                content_type: Some("text/html".to_string()),
                body: Vec::new(),
            },
        )]);
        let cfg = FetchConfig::default();

        let err = fetch(&transport, &cfg, &start).await.unwrap_err();
        assert!(matches!(err, CrawlError::HttpStatus { status: 404, .. }));
    }

    #[tokio::test]
    async fn body_is_truncated_to_max_bytes() {
        let start = canonicalize("https://example.com/big").unwrap();
        let oversized = "x".repeat(2000);
        let transport = MockTransport::new(vec![(
            "https://example.com/big",
            html_ok(&oversized),
        )]);
        let mut cfg = FetchConfig::default();
        cfg.max_body_bytes = 1000;

        let page = fetch(&transport, &cfg, &start).await.unwrap();
        assert_eq!(page.body.len(), 1000);
    }
}
