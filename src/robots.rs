//! robots.txt fetching and policy evaluation (C2).
//!
//! One [`HostPolicy`] is built per host and cached for the life of a crawl
//! session. Once built it is immutable and freely shared across workers.

use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;

const ROBOTS_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct RobotsGroup {
    disallow: Vec<String>,
    allow: Vec<String>,
    crawl_delay_ms: Option<u64>,
}

/// Parsed robots.txt state for one host. `fetch_failed` means "treat as
/// fully permissive": a transport error or non-200 response is not a
/// reason to block the crawl.
#[derive(Debug)]
pub struct HostPolicy {
    groups: HashMap<String, RobotsGroup>,
    fetch_failed: bool,
}

impl HostPolicy {
    /// Fetch `{scheme}://{host}/robots.txt` and parse it. Any transport
    /// failure or non-2xx status yields a fully-permissive policy.
    #[tracing::instrument(skip(client))]
    pub async fn fetch(client: &Client, scheme: &str, host: &str, user_agent: &str) -> Self {
        let robots_url = format!("{scheme}://{host}/robots.txt");

        let body = match client
            .get(&robots_url)
            .header(reqwest::header::USER_AGENT, user_agent)
            .timeout(ROBOTS_FETCH_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => resp.text().await.ok(),
            Ok(resp) => {
                tracing::debug!(status = %resp.status(), %robots_url, "robots.txt fetch non-200");
                None
            }
            Err(error) => {
                tracing::debug!(%error, %robots_url, "robots.txt fetch failed");
                None
            }
        };

        match body {
            Some(text) => Self::parse(&text),
            None => Self::permissive(),
        }
    }

    fn permissive() -> Self {
        Self {
            groups: HashMap::new(),
            fetch_failed: true,
        }
    }

    /// Parse robots.txt body text into per-agent rule groups. Consecutive
    /// `User-agent:` lines share the directives that follow them.
    fn parse(body: &str) -> Self {
        let mut groups: HashMap<String, RobotsGroup> = HashMap::new();
        let mut current_agents: Vec<String> = Vec::new();
        let mut awaiting_agents = false;

        for raw_line in body.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    let agent = value.to_lowercase();
                    if !awaiting_agents {
                        current_agents.clear();
                    }
                    current_agents.push(agent);
                    awaiting_agents = true;
                }
                "disallow" => {
                    awaiting_agents = false;
                    if value.is_empty() {
                        continue;
                    }
                    for agent in &current_agents {
                        groups
                            .entry(agent.clone())
                            .or_default()
                            .disallow
                            .push(value.to_string());
                    }
                }
                "allow" => {
                    awaiting_agents = false;
                    if value.is_empty() {
                        continue;
                    }
                    for agent in &current_agents {
                        groups
                            .entry(agent.clone())
                            .or_default()
                            .allow
                            .push(value.to_string());
                    }
                }
                "crawl-delay" => {
                    awaiting_agents = false;
                    if let Ok(seconds) = value.parse::<f64>() {
                        let ms = (seconds * 1000.0).round() as u64;
                        for agent in &current_agents {
                            groups.entry(agent.clone()).or_default().crawl_delay_ms = Some(ms);
                        }
                    }
                }
                _ => {}
            }
        }

        Self {
            groups,
            fetch_failed: false,
        }
    }

    fn group_for<'a>(&'a self, agent: &str) -> Option<&'a RobotsGroup> {
        self.groups
            .get(&agent.to_lowercase())
            .or_else(|| self.groups.get("*"))
    }

    /// Is `path` allowed for `agent`? Allow patterns take precedence over
    /// disallow patterns within the matched group; no group means allow.
    pub fn is_allowed(&self, path: &str, agent: &str) -> bool {
        if self.fetch_failed {
            return true;
        }
        let Some(group) = self.group_for(agent) else {
            return true;
        };
        if group.allow.iter().any(|pattern| pattern_matches(pattern, path)) {
            return true;
        }
        !group.disallow.iter().any(|pattern| pattern_matches(pattern, path))
    }

    /// Resolve a crawl-delay in milliseconds: agent's delay, else `*`'s,
    /// else `default_ms`.
    pub fn crawl_delay_ms(&self, agent: &str, default_ms: u64) -> u64 {
        if let Some(group) = self.groups.get(&agent.to_lowercase()) {
            if let Some(ms) = group.crawl_delay_ms {
                return ms;
            }
        }
        if let Some(group) = self.groups.get("*") {
            if let Some(ms) = group.crawl_delay_ms {
                return ms;
            }
        }
        default_ms
    }

    pub fn fetch_failed(&self) -> bool {
        self.fetch_failed
    }
}

/// Match a robots.txt path pattern against `path`. `*` becomes `.*`, `?` is
/// literal, `.` is literal; a trailing `$` anchors to the end of `path`;
/// otherwise any prefix match succeeds.
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (body, anchor_end) = match pattern.strip_suffix('$') {
        Some(stripped) => (stripped, true),
        None => (pattern, false),
    };

    let mut regex_src = String::from("^");
    for ch in body.chars() {
        match ch {
            '*' => regex_src.push_str(".*"),
            '?' => regex_src.push_str(r"\?"),
            '.' => regex_src.push_str(r"\."),
            other => {
                regex_src.push_str(&regex::escape(&other.to_string()));
            }
        }
    }
    if anchor_end {
        regex_src.push('$');
    }

    match regex::Regex::new(&regex_src) {
        Ok(re) => {
            if anchor_end {
                re.is_match(path)
            } else {
                re.find(path).map(|m| m.start() == 0).unwrap_or(false)
            }
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disallow_blocks_plain_prefix() {
        let policy = HostPolicy::parse("User-agent: *\nDisallow: /private\n");
        assert!(!policy.is_allowed("/private/page", "Eulerity-Crawler/1.0"));
        assert!(policy.is_allowed("/public", "Eulerity-Crawler/1.0"));
    }

    #[test]
    fn allow_overrides_disallow() {
        let policy = HostPolicy::parse(
            "User-agent: *\nDisallow: /private\nAllow: /private/public-ish\n",
        );
        assert!(policy.is_allowed("/private/public-ish/page", "x"));
        assert!(!policy.is_allowed("/private/secret", "x"));
    }

    #[test]
    fn agent_specific_group_takes_precedence_over_wildcard() {
        let policy = HostPolicy::parse(
            "User-agent: Eulerity-Crawler/1.0\nDisallow: /only-for-us\nUser-agent: *\nDisallow: /for-everyone\n",
        );
        assert!(!policy.is_allowed("/only-for-us", "Eulerity-Crawler/1.0"));
        assert!(policy.is_allowed("/for-everyone", "Eulerity-Crawler/1.0"));
        assert!(!policy.is_allowed("/for-everyone", "SomeOtherBot"));
    }

    #[test]
    fn wildcard_and_dollar_anchor_patterns() {
        let policy = HostPolicy::parse("User-agent: *\nDisallow: /*.pdf$\n");
        assert!(!policy.is_allowed("/docs/file.pdf", "x"));
        assert!(policy.is_allowed("/docs/file.pdf.html", "x"));
    }

    #[test]
    fn crawl_delay_converted_to_milliseconds() {
        let policy = HostPolicy::parse("User-agent: *\nCrawl-delay: 2\n");
        assert_eq!(policy.crawl_delay_ms("x", 500), 2000);
    }

    #[test]
    fn crawl_delay_falls_back_to_default() {
        let policy = HostPolicy::parse("User-agent: *\nDisallow: /x\n");
        assert_eq!(policy.crawl_delay_ms("x", 750), 750);
    }

    #[test]
    fn fetch_failed_is_fully_permissive() {
        let policy = HostPolicy::permissive();
        assert!(policy.is_allowed("/anything", "x"));
        assert!(policy.fetch_failed());
    }

    #[test]
    fn shared_group_for_consecutive_user_agent_lines() {
        let policy = HostPolicy::parse("User-agent: a\nUser-agent: b\nDisallow: /x\n");
        assert!(!policy.is_allowed("/x", "a"));
        assert!(!policy.is_allowed("/x", "b"));
    }
}
