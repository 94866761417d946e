//! URL canonicalization and site-name extraction (C1).
//!
//! Canonical form is the string identity used for the visited-set, the
//! image map, and scope checks. Two URLs are "the same page" iff their
//! canonical string forms match exactly.

use std::fmt;
use std::hash::{Hash, Hasher};

use once_cell::sync::Lazy;
use reqwest::Url;

use crate::error::CrawlError;

/// Query parameters stripped during canonicalization, matched
/// case-insensitively against the parameter name.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "msclkid",
    "ref",
    "source",
    "session",
    "timestamp",
];

static INDEX_FILENAME: Lazy<regex::Regex> = Lazy::new(|| {
    regex::Regex::new(r"(?i)^(index\.(html|php|asp|jsp)|default\..+|home\..+)$").unwrap()
});

/// A normalized, comparable URL. Equality and hashing are defined over the
/// canonical string form, not the underlying `Url`'s field-by-field layout.
#[derive(Debug, Clone)]
pub struct CanonicalUrl {
    url: Url,
}

impl CanonicalUrl {
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// Number of `/`-separated path segments, used by admission's depth cap.
    pub fn path_depth(&self) -> usize {
        self.url.path().matches('/').count()
    }

    pub fn inner(&self) -> &Url {
        &self.url
    }

    /// Resolve `href` relative to this URL, then canonicalize the result.
    pub fn resolve(&self, href: &str) -> Result<CanonicalUrl, CrawlError> {
        let joined = self
            .url
            .join(href)
            .map_err(|e| CrawlError::MalformedUrl(format!("{href}: {e}")))?;
        canonicalize(joined.as_str())
    }
}

impl PartialEq for CanonicalUrl {
    fn eq(&self, other: &Self) -> bool {
        self.url.as_str() == other.url.as_str()
    }
}

impl Eq for CanonicalUrl {}

impl Hash for CanonicalUrl {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.as_str().hash(state);
    }
}

impl fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// Strip the terminal index/default/home filename off a path, returning the
/// containing directory. Leaves non-matching paths untouched.
fn strip_index_filename(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if let Some(idx) = trimmed.rfind('/') {
        let (dir, file) = trimmed.split_at(idx + 1);
        if INDEX_FILENAME.is_match(file) {
            return dir.to_string();
        }
    }
    path.to_string()
}

/// Normalize `raw` into a [`CanonicalUrl`] per the invariants in the data
/// model: lower-cased `www.`-stripped host, default ports elided, index
/// filenames collapsed, fragment removed, tracking params stripped.
pub fn canonicalize(raw: &str) -> Result<CanonicalUrl, CrawlError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(CrawlError::MalformedUrl("empty url".into()));
    }

    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };

    let mut url = Url::parse(&with_scheme)
        .map_err(|e| CrawlError::MalformedUrl(format!("{raw}: {e}")))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(CrawlError::MalformedUrl(format!(
            "unsupported scheme: {}",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .ok_or_else(|| CrawlError::MalformedUrl(format!("{raw}: no host")))?
        .to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    url.set_host(Some(&host))
        .map_err(|e| CrawlError::MalformedUrl(format!("{raw}: {e}")))?;

    if let Some(port) = url.port() {
        let is_default_port =
            (url.scheme() == "http" && port == 80) || (url.scheme() == "https" && port == 443);
        if is_default_port {
            let _ = url.set_port(None);
        }
    }

    let mut path = url.path().to_string();
    if path.is_empty() {
        path = "/".to_string();
    }
    path = strip_index_filename(&path);
    if path.is_empty() {
        path = "/".to_string();
    }
    if path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    url.set_path(&path);

    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.to_lowercase().as_str()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept.iter());
    }

    Ok(CanonicalUrl { url })
}

/// Extract the "site name" used by the logo heuristic: the host with `www.`
/// and the TLD stripped, plus a second label dropped when the remaining tail
/// label is 2-3 characters long (handles `co.uk`-style compound suffixes).
pub fn site_name(host: &str) -> String {
    let host = host.strip_prefix("www.").unwrap_or(host);
    let mut labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 1 {
        return host.to_string();
    }
    labels.pop(); // drop the TLD
    if let Some(last) = labels.last() {
        if labels.len() > 1 && (2..=3).contains(&last.len()) {
            labels.pop();
        }
    }
    labels.join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adds_scheme_when_missing() {
        let c = canonicalize("example.com").unwrap();
        assert_eq!(c.as_str(), "https://example.com/");
    }

    #[test]
    fn strips_www_and_lowercases_host() {
        let c = canonicalize("https://WWW.Example.COM/Path").unwrap();
        assert_eq!(c.host(), Some("example.com"));
    }

    #[test]
    fn elides_default_ports() {
        let https = canonicalize("https://example.com:443/").unwrap();
        let http = canonicalize("http://example.com:80/").unwrap();
        assert_eq!(https.as_str(), "https://example.com/");
        assert_eq!(http.as_str(), "http://example.com/");
    }

    #[test]
    fn keeps_non_default_port() {
        let c = canonicalize("https://example.com:8443/").unwrap();
        assert_eq!(c.as_str(), "https://example.com:8443/");
    }

    #[test]
    fn collapses_index_filenames() {
        let c = canonicalize("https://example.com/blog/index.html").unwrap();
        assert_eq!(c.as_str(), "https://example.com/blog");
        let c = canonicalize("https://example.com/index.html").unwrap();
        assert_eq!(c.as_str(), "https://example.com/");
        let c = canonicalize("https://example.com/home.php").unwrap();
        assert_eq!(c.as_str(), "https://example.com/");
        let c = canonicalize("https://example.com/default.asp").unwrap();
        assert_eq!(c.as_str(), "https://example.com/");
    }

    #[test]
    fn strips_trailing_slash_except_root() {
        let c = canonicalize("https://example.com/path/").unwrap();
        assert_eq!(c.as_str(), "https://example.com/path");
        let c = canonicalize("https://example.com/").unwrap();
        assert_eq!(c.as_str(), "https://example.com/");
    }

    #[test]
    fn removes_fragment() {
        let c = canonicalize("https://example.com/page#section").unwrap();
        assert_eq!(c.as_str(), "https://example.com/page");
    }

    #[test]
    fn strips_tracking_params_preserving_order() {
        let c =
            canonicalize("https://example.com/page?b=2&utm_source=x&a=1&fbclid=y").unwrap();
        assert_eq!(c.as_str(), "https://example.com/page?b=2&a=1");
    }

    #[test]
    fn rejects_non_http_scheme() {
        assert!(canonicalize("ftp://example.com/").is_err());
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let inputs = [
            "example.com",
            "https://WWW.Example.com:443/Blog/Index.html?utm_source=x&a=1#frag",
            "http://example.com:80/default.asp/",
        ];
        for i in inputs {
            let once = canonicalize(i).unwrap();
            let twice = canonicalize(once.as_str()).unwrap();
            assert_eq!(once.as_str(), twice.as_str());
        }
    }

    #[test]
    fn site_name_handles_compound_tld() {
        assert_eq!(site_name("www.a.example.co.uk"), "a.example");
    }

    #[test]
    fn site_name_simple_host() {
        assert_eq!(site_name("www.example.com"), "example");
    }
}
