//! Matcher for the public URL a quick tunnel prints once it is established.

use regex::Regex;

use crate::error::{Error, Result};

/// Domain suffix used by anonymous quick tunnels.
pub const QUICK_TUNNEL_SUFFIX: &str = "trycloudflare.com";

/// Compiled `https://<label>.<suffix>` matcher.
///
/// The label is one or more ASCII alphanumerics or hyphens. The suffix must
/// end on a word boundary so `trycloudflare.community` is not accepted.
#[derive(Debug, Clone)]
pub struct EndpointPattern {
    regex: Regex,
}

impl EndpointPattern {
    pub fn new(suffix: &str) -> Result<Self> {
        let suffix = suffix.trim().trim_start_matches('.');
        if suffix.is_empty() {
            return Err(Error::Config("URL suffix must not be empty".into()));
        }
        let pattern = format!(r"https://[A-Za-z0-9-]+\.{}\b", regex::escape(suffix));
        let regex = Regex::new(&pattern)
            .map_err(|e| Error::Config(format!("invalid URL suffix {suffix:?}: {e}")))?;
        Ok(Self { regex })
    }

    /// Return the first matching URL in `text`.
    pub fn find<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.regex.find(text).map(|m| m.as_str())
    }

    /// Return the last matching URL in `text`.
    ///
    /// Log files accumulate across restarts and each restart gets a new
    /// label, so the most recent URL is the live one.
    pub fn find_last<'t>(&self, text: &'t str) -> Option<&'t str> {
        self.regex.find_iter(text).last().map(|m| m.as_str())
    }
}

impl Default for EndpointPattern {
    fn default() -> Self {
        #[allow(clippy::expect_used)] // the built-in suffix is a valid pattern
        Self::new(QUICK_TUNNEL_SUFFIX).expect("built-in suffix compiles")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_url_embedded_in_log_noise() {
        let log = "2024-12-20T10:00:00Z INF Requesting new quick Tunnel on trycloudflare.com...\n\
                   2024-12-20T10:00:02Z INF |  https://abc-123.trycloudflare.com  |\n\
                   2024-12-20T10:00:03Z INF Registered tunnel connection";
        let pattern = EndpointPattern::default();
        assert_eq!(pattern.find(log), Some("https://abc-123.trycloudflare.com"));
    }

    #[test]
    fn returns_first_of_several_urls() {
        let text = "https://first.trycloudflare.com then https://second.trycloudflare.com";
        assert_eq!(
            EndpointPattern::default().find(text),
            Some("https://first.trycloudflare.com")
        );
    }

    #[test]
    fn find_last_prefers_most_recent_restart() {
        let log = "INF |  https://old-label.trycloudflare.com  |\n\
                   ERR connection lost, restarting\n\
                   INF |  https://new-label.trycloudflare.com  |\n";
        assert_eq!(
            EndpointPattern::default().find_last(log),
            Some("https://new-label.trycloudflare.com")
        );
    }

    #[test]
    fn rejects_wrong_suffix() {
        let pattern = EndpointPattern::default();
        assert_eq!(pattern.find("https://abc-123.trycloudflare.net"), None);
        assert_eq!(pattern.find("https://abc-123.example.com"), None);
        assert_eq!(pattern.find("https://abc-123.trycloudflare.community"), None);
    }

    #[test]
    fn rejects_missing_https_scheme() {
        let pattern = EndpointPattern::default();
        assert_eq!(pattern.find("abc-123.trycloudflare.com"), None);
        assert_eq!(pattern.find("http://abc-123.trycloudflare.com"), None);
    }

    #[test]
    fn rejects_bare_suffix_without_label() {
        assert_eq!(
            EndpointPattern::default().find("on https://.trycloudflare.com"),
            None
        );
    }

    #[test]
    fn custom_suffix_is_escaped() {
        let pattern = EndpointPattern::new("tunnel.example.org").expect("valid suffix");
        assert_eq!(
            pattern.find("url=https://x1.tunnel.example.org/"),
            Some("https://x1.tunnel.example.org")
        );
        assert_eq!(pattern.find("https://x1.tunnelXexample.org"), None);
    }

    #[test]
    fn empty_suffix_is_config_error() {
        assert!(matches!(EndpointPattern::new("  "), Err(Error::Config(_))));
    }
}
