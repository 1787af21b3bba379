//! Meeting platform detection from tab URLs.
//!
//! Pure lookup: a hostname matches an entry when it equals the entry's
//! domain or is a subdomain of it. Matching is anchored on label
//! boundaries, so `notzoom.us` never matches `zoom.us`.

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::config::PlatformEntry;

/// Immutable description of a known meeting platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub key: String,
    pub name: String,
    pub priority: u8,
}

impl Platform {
    pub fn new(key: &str, name: &str, priority: u8) -> Self {
        Self {
            key: key.to_ascii_lowercase(),
            name: name.to_string(),
            priority,
        }
    }
}

const KNOWN_PLATFORMS: &[(&str, &str, u8)] = &[
    ("meet.google.com", "Google Meet", 10),
    ("zoom.us", "Zoom", 9),
    ("teams.microsoft.com", "Microsoft Teams", 8),
    ("teams.live.com", "Microsoft Teams", 8),
    ("webex.com", "Webex", 7),
    ("whereby.com", "Whereby", 6),
    ("jit.si", "Jitsi", 5),
];

#[derive(Debug, Clone)]
pub struct PlatformMatcher {
    platforms: Vec<Platform>,
}

impl Default for PlatformMatcher {
    fn default() -> Self {
        Self::new(
            KNOWN_PLATFORMS
                .iter()
                .map(|(key, name, priority)| Platform::new(key, name, *priority))
                .collect(),
        )
    }
}

impl PlatformMatcher {
    pub fn new(platforms: Vec<Platform>) -> Self {
        Self { platforms }
    }

    /// Built-in table extended with configured entries.
    pub fn with_extra(extra: &[PlatformEntry]) -> Self {
        let mut matcher = Self::default();
        matcher.platforms.extend(
            extra
                .iter()
                .filter(|entry| !entry.domain.trim().is_empty())
                .map(|entry| Platform::new(entry.domain.trim(), &entry.name, entry.priority)),
        );
        matcher
    }

    /// Look up the platform for a URL. Unparseable URLs and URLs without a
    /// host never match.
    pub fn match_url(&self, url: &str) -> Option<Platform> {
        let parsed = Url::parse(url).ok()?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return None;
        }
        let host = parsed.host_str()?.trim_end_matches('.').to_ascii_lowercase();
        self.match_host(&host)
    }

    pub fn match_host(&self, host: &str) -> Option<Platform> {
        self.platforms
            .iter()
            .filter(|platform| host_matches(host, &platform.key))
            .max_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then(a.key.len().cmp(&b.key.len()))
            })
            .cloned()
    }

    pub fn is_meeting_url(&self, url: &str) -> bool {
        self.match_url(url).is_some()
    }
}

fn host_matches(host: &str, domain: &str) -> bool {
    if host == domain {
        return true;
    }
    host.strip_suffix(domain)
        .map(|prefix| prefix.len() > 1 && prefix.ends_with('.'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_domain_matches() {
        let matcher = PlatformMatcher::default();
        let platform = matcher
            .match_url("https://meet.google.com/abc-defg-hij")
            .unwrap();
        assert_eq!(platform.name, "Google Meet");
        assert_eq!(platform.priority, 10);
    }

    #[test]
    fn test_subdomain_matches() {
        let matcher = PlatformMatcher::default();
        let platform = matcher.match_url("https://us02web.zoom.us/j/123").unwrap();
        assert_eq!(platform.key, "zoom.us");
    }

    #[test]
    fn test_substring_only_rejected() {
        let matcher = PlatformMatcher::default();
        assert!(matcher.match_url("https://notzoom.us/j/1").is_none());
        assert!(matcher
            .match_url("https://meet.google.com.attacker.io/x")
            .is_none());
        assert!(matcher.match_url("https://example.com/?u=zoom.us").is_none());
    }

    #[test]
    fn test_host_case_and_trailing_dot() {
        let matcher = PlatformMatcher::default();
        assert!(matcher.match_url("https://Meet.Google.COM./x").is_some());
    }

    #[test]
    fn test_non_http_and_garbage_rejected() {
        let matcher = PlatformMatcher::default();
        assert!(matcher.match_url("chrome://newtab").is_none());
        assert!(matcher.match_url("not a url").is_none());
        assert!(matcher.match_url("").is_none());
    }

    #[test]
    fn test_extra_entries_and_priority() {
        let matcher = PlatformMatcher::with_extra(&[
            PlatformEntry {
                domain: "example.com".to_string(),
                name: "Example".to_string(),
                priority: 1,
            },
            PlatformEntry {
                domain: "meet.example.com".to_string(),
                name: "Example Meet".to_string(),
                priority: 4,
            },
        ]);

        let platform = matcher.match_url("https://meet.example.com/room").unwrap();
        assert_eq!(platform.name, "Example Meet");

        let platform = matcher.match_url("https://www.example.com/").unwrap();
        assert_eq!(platform.name, "Example");
    }

    #[test]
    fn test_longest_key_breaks_priority_ties() {
        let matcher = PlatformMatcher::new(vec![
            Platform::new("example.com", "Broad", 3),
            Platform::new("meet.example.com", "Narrow", 3),
        ]);
        let platform = matcher.match_host("a.meet.example.com").unwrap();
        assert_eq!(platform.name, "Narrow");
    }
}
