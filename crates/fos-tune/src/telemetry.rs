//! Telemetry Filter
//!
//! Refuses outgoing analytics and telemetry requests using an Aho-Corasick
//! automaton over a built-in endpoint list. Matching is a single pass over
//! the URL regardless of how many patterns are loaded.

use crate::error::{EngineError, require};
use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use fos_page::{Capability, Host};
use std::cell::Cell;
use std::rc::Rc;
use tracing::{debug, info};

/// Endpoints chat front-ends report usage and diagnostics to.
const TELEMETRY_ENDPOINTS: &[&str] = &[
    // Product analytics
    "/ces/v1/",
    "/v1/rgstr",
    "statsig",
    "featuregates.org",
    "segment.io",
    "segment.com",
    "mixpanel.com",
    "amplitude.com",
    "google-analytics.com",
    "googletagmanager.com",

    // Error and performance reporting
    "sentry.io",
    "browser-intake-datadoghq",
    "/cdn-cgi/rum",

    // Session replay
    "hotjar.com",
    "fullstory.com",
    "intercomcdn.com/",

    // Generic paths
    "/telemetry",
    "/beacon/",
    "/api/collect",
];

pub struct TelemetryFilter {
    automaton: AhoCorasick,
    pattern_count: usize,
    blocked: Cell<u64>,
}

impl TelemetryFilter {
    pub fn new() -> Result<Self, EngineError> {
        Self::with_patterns(TELEMETRY_ENDPOINTS)
    }

    pub fn with_patterns<I, P>(patterns: I) -> Result<Self, EngineError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        let patterns: Vec<_> = patterns.into_iter().collect();
        let pattern_count = patterns.len();

        let automaton = AhoCorasickBuilder::new()
            .match_kind(MatchKind::LeftmostFirst)
            .ascii_case_insensitive(true)
            .build(&patterns)
            .map_err(|e| EngineError::Matcher(e.to_string()))?;

        Ok(Self {
            automaton,
            pattern_count,
            blocked: Cell::new(0),
        })
    }

    /// Whether a request to `url` should be refused.
    #[inline]
    pub fn is_blocked(&self, url: &str) -> bool {
        self.automaton.is_match(url)
    }

    pub fn pattern_count(&self) -> usize {
        self.pattern_count
    }

    /// Requests refused since install.
    pub fn blocked_count(&self) -> u64 {
        self.blocked.get()
    }

    /// Hook into the host's outgoing-request gate.
    pub fn install(host: &Host) -> Result<Rc<Self>, EngineError> {
        let gate = require(host.requests(), Capability::RequestGate)?;
        let filter = Rc::new(Self::new()?);

        let weak = Rc::downgrade(&filter);
        gate.add_request_filter(Rc::new(move |url: &str| {
            let Some(filter) = weak.upgrade() else {
                return false;
            };
            let blocked = filter.is_blocked(url);
            if blocked {
                filter.blocked.set(filter.blocked.get() + 1);
                debug!(url, "Blocked telemetry request");
            }
            blocked
        }));

        info!(patterns = filter.pattern_count, "Telemetry blocking installed");
        Ok(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fos_page::HeadlessPage;

    #[test]
    fn test_blocks_telemetry_endpoints() {
        let filter = TelemetryFilter::new().unwrap();

        assert!(filter.is_blocked("https://chat.example.com/ces/v1/t"));
        assert!(filter.is_blocked("https://o123.ingest.sentry.io/api/42/envelope/"));
        assert!(filter.is_blocked("https://api.statsig.com/v1/rgstr"));
        assert!(filter.is_blocked("https://WWW.Google-Analytics.com/g/collect"));
    }

    #[test]
    fn test_allows_app_traffic() {
        let filter = TelemetryFilter::new().unwrap();

        assert!(!filter.is_blocked("https://chat.example.com/backend-api/conversation"));
        assert!(!filter.is_blocked("https://cdn.example.com/assets/app.js"));
        assert!(!filter.is_blocked("https://docs.rs"));
    }

    #[test]
    fn test_custom_patterns() {
        let filter = TelemetryFilter::with_patterns(["/metrics"]).unwrap();

        assert_eq!(filter.pattern_count(), 1);
        assert!(filter.is_blocked("https://example.com/metrics?x=1"));
        assert!(!filter.is_blocked("https://sentry.io/"));
    }

    #[test]
    fn test_installed_into_request_gate() {
        let page = HeadlessPage::new();
        let filter = TelemetryFilter::install(&page.host()).unwrap();

        assert!(page.would_block("https://api.segment.io/v1/batch"));
        assert!(!page.would_block("https://chat.example.com/backend-api/models"));
        assert_eq!(filter.blocked_count(), 1);
    }

    #[test]
    fn test_requires_request_gate() {
        let page = HeadlessPage::new();
        let host = page.host_builder().without(Capability::RequestGate).build();

        assert!(matches!(
            TelemetryFilter::install(&host),
            Err(EngineError::CapabilityUnavailable(Capability::RequestGate))
        ));
    }
}
