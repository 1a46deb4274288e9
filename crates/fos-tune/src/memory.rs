//! Memory Pressure Monitor
//!
//! Samples heap usage every `memory_interval` and whenever the page is
//! hidden. Above `memory_threshold` it releases the sources of blob-backed
//! images that are not laid out, at most once per `memory_cooldown`.
//! Images inside engine-managed subtrees (collapsed messages) are host
//! content that merely looks hidden, and are kept.
//!
//! Pressure levels (relative to the threshold, for logging):
//! - Low: < 50%
//! - Medium: 50-80%
//! - High: 80-100%
//! - Critical: over the threshold

use crate::config::Tuning;
use crate::error::{EngineError, require};
use crate::markers::is_engine_managed;
use fos_page::{
    Capability, Document, Event, HeapProbe, Host, Listener, ListenerOptions, PageVisibility,
    Selector, Target, Timers, VisibilityState,
};
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info, warn};

const BLOB_IMAGE_SELECTOR: &str = r#"img[src^="blob:"]"#;

/// Memory pressure levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PressureLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl PressureLevel {
    /// Classify a usage ratio against the mitigation threshold
    pub fn from_ratio(ratio: f64, threshold: f64) -> Self {
        let relative = ratio / threshold;

        if relative > 1.0 {
            Self::Critical
        } else if relative >= 0.8 {
            Self::High
        } else if relative >= 0.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// What started a check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckTrigger {
    Interval,
    Hidden,
    Manual,
}

/// Result of one check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CheckOutcome {
    /// Too soon after the last mitigation pass
    CoolingDown,
    /// The page could not report heap usage
    Unavailable,
    BelowThreshold { ratio: f64, level: PressureLevel },
    Mitigated { ratio: f64, released: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub checks: u64,
    pub mitigations: u64,
    pub released: u64,
}

pub struct MemoryMonitor {
    document: Rc<dyn Document>,
    heap: Rc<dyn HeapProbe>,
    timers: Rc<dyn Timers>,
    blob_images: Selector,
    threshold: f64,
    cooldown: Duration,
    last_cleanup: Cell<Option<Duration>>,
    stats: Cell<MemoryStats>,
}

impl MemoryMonitor {
    pub fn new(
        document: Rc<dyn Document>,
        heap: Rc<dyn HeapProbe>,
        timers: Rc<dyn Timers>,
        tuning: &Tuning,
    ) -> Result<Rc<Self>, EngineError> {
        Ok(Rc::new(Self {
            document,
            heap,
            timers,
            blob_images: Selector::parse(BLOB_IMAGE_SELECTOR)?,
            threshold: tuning.memory_threshold,
            cooldown: tuning.memory_cooldown(),
            last_cleanup: Cell::new(None),
            stats: Cell::new(MemoryStats::default()),
        }))
    }

    /// Start periodic checks and the hidden-page trigger.
    ///
    /// Does not install at all without heap introspection.
    pub fn install(host: &Host, tuning: &Tuning) -> Result<Rc<Self>, EngineError> {
        let heap = require(host.heap(), Capability::HeapIntrospection)?;
        let document = require(host.document(), Capability::Document)?;
        let timers = require(host.timers(), Capability::Timers)?;
        let monitor = Self::new(document, heap, timers.clone(), tuning)?;

        let weak = Rc::downgrade(&monitor);
        timers.set_interval(
            tuning.memory_interval(),
            Rc::new(move || {
                if let Some(monitor) = weak.upgrade() {
                    monitor.check(CheckTrigger::Interval);
                }
            }),
        );

        match host.visibility() {
            Some(visibility) => monitor.watch_visibility(host, visibility),
            None => debug!("No page visibility, hidden-page checks disabled"),
        }

        info!(
            threshold = monitor.threshold,
            cooldown_ms = monitor.cooldown.as_millis() as u64,
            "Memory heuristics installed"
        );
        Ok(monitor)
    }

    fn watch_visibility(self: &Rc<Self>, host: &Host, visibility: Rc<dyn PageVisibility>) {
        let weak = Rc::downgrade(self);
        let listener: Listener = Rc::new(move |_: &Event| {
            if visibility.visibility_state() == VisibilityState::Hidden {
                if let Some(monitor) = weak.upgrade() {
                    monitor.check(CheckTrigger::Hidden);
                }
            }
            Ok(())
        });
        if host
            .add_event_listener(Target::Document, "visibilitychange", listener, ListenerOptions::passive())
            .is_none()
        {
            debug!("No event registration, hidden-page checks disabled");
        }
    }

    /// Sample the heap and mitigate if needed.
    pub fn check(&self, trigger: CheckTrigger) -> CheckOutcome {
        let now = self.timers.now();
        let mut stats = self.stats.get();
        stats.checks += 1;
        self.stats.set(stats);

        if let Some(last) = self.last_cleanup.get() {
            if now.saturating_sub(last) < self.cooldown {
                debug!(?trigger, "Memory check skipped, cooling down");
                return CheckOutcome::CoolingDown;
            }
        }

        let Some(ratio) = self.heap.sample().and_then(|s| s.usage_ratio()) else {
            debug!(?trigger, "Heap usage unavailable");
            return CheckOutcome::Unavailable;
        };

        let level = PressureLevel::from_ratio(ratio, self.threshold);
        if ratio <= self.threshold {
            debug!(?trigger, ratio, %level, "Memory pressure");
            return CheckOutcome::BelowThreshold { ratio, level };
        }

        warn!(?trigger, ratio, %level, "Memory pressure above threshold, releasing");
        let released = self.release_offscreen_images();
        self.last_cleanup.set(Some(now));

        let mut stats = self.stats.get();
        stats.mitigations += 1;
        stats.released += released as u64;
        self.stats.set(stats);

        info!(released, "Memory mitigation pass complete");
        CheckOutcome::Mitigated { ratio, released }
    }

    /// Drop `src` from blob images that are not laid out, outside
    /// engine-managed subtrees.
    fn release_offscreen_images(&self) -> usize {
        let document = self.document.as_ref();
        let mut released = 0;
        for image in document.query_all(&self.blob_images) {
            if document.is_rendered(image) || is_engine_managed(document, image) {
                continue;
            }
            match document.remove_attribute(image, "src") {
                Ok(()) => released += 1,
                Err(err) => debug!(node = %image, "Cannot release image: {}", err),
            }
        }
        released
    }

    pub fn last_cleanup(&self) -> Option<Duration> {
        self.last_cleanup.get()
    }

    pub fn stats(&self) -> MemoryStats {
        self.stats.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markers::{VIRTUALIZED_ATTR, VIRTUALIZED_COLLAPSED};
    use fos_page::{HeadlessPage, HeapSnapshot, NodeId};

    fn blob_images(page: &HeadlessPage) -> (NodeId, NodeId, NodeId) {
        let root = page.root();
        let hidden_panel = page.element("div").attr("hidden", "").append_to(root).unwrap();
        let offscreen = page
            .element("img")
            .attr("src", "blob:https://chat.example/1")
            .append_to(hidden_panel)
            .unwrap();
        let visible = page
            .element("img")
            .attr("src", "blob:https://chat.example/2")
            .append_to(root)
            .unwrap();
        let remote = page
            .element("img")
            .attr("src", "https://cdn.example/a.png")
            .attr("hidden", "")
            .append_to(root)
            .unwrap();
        (offscreen, visible, remote)
    }

    fn monitor(page: &HeadlessPage) -> Rc<MemoryMonitor> {
        MemoryMonitor::install(&page.host(), &Tuning::default()).unwrap()
    }

    #[test]
    fn test_pressure_levels() {
        assert_eq!(PressureLevel::from_ratio(0.2, 0.8), PressureLevel::Low);
        assert_eq!(PressureLevel::from_ratio(0.5, 0.8), PressureLevel::Medium);
        assert_eq!(PressureLevel::from_ratio(0.7, 0.8), PressureLevel::High);
        assert_eq!(PressureLevel::from_ratio(0.8, 0.8), PressureLevel::High);
        assert_eq!(PressureLevel::from_ratio(0.85, 0.8), PressureLevel::Critical);
    }

    #[test]
    fn test_mitigates_then_cools_down() {
        let page = HeadlessPage::new();
        let (offscreen, visible, remote) = blob_images(&page);
        let monitor = monitor(&page);
        page.set_heap(Some(HeapSnapshot::new(85, 100)));

        assert_eq!(
            monitor.check(CheckTrigger::Manual),
            CheckOutcome::Mitigated { ratio: 0.85, released: 1 }
        );
        assert_eq!(page.attribute(offscreen, "src"), None);
        assert!(page.attribute(visible, "src").is_some());
        assert!(page.attribute(remote, "src").is_some());

        page.advance(Duration::from_secs(1));
        assert_eq!(monitor.check(CheckTrigger::Manual), CheckOutcome::CoolingDown);
        assert_eq!(monitor.stats().mitigations, 1);

        page.advance(Tuning::default().memory_cooldown());
        assert!(matches!(
            monitor.check(CheckTrigger::Manual),
            CheckOutcome::Mitigated { released: 0, .. }
        ));
    }

    #[test]
    fn test_below_threshold_leaves_images() {
        let page = HeadlessPage::new();
        let (offscreen, _, _) = blob_images(&page);
        let monitor = monitor(&page);
        page.set_heap(Some(HeapSnapshot::new(50, 100)));

        assert_eq!(
            monitor.check(CheckTrigger::Manual),
            CheckOutcome::BelowThreshold { ratio: 0.5, level: PressureLevel::Medium }
        );
        assert!(page.attribute(offscreen, "src").is_some());
        assert_eq!(monitor.last_cleanup(), None);
    }

    #[test]
    fn test_at_threshold_is_not_critical() {
        let page = HeadlessPage::new();
        let monitor = monitor(&page);
        page.set_heap(Some(HeapSnapshot::new(80, 100)));

        assert_eq!(
            monitor.check(CheckTrigger::Manual),
            CheckOutcome::BelowThreshold { ratio: 0.8, level: PressureLevel::High }
        );
    }

    #[test]
    fn test_keeps_images_in_collapsed_messages() {
        let page = HeadlessPage::new();
        let message = page
            .element("article")
            .attr(VIRTUALIZED_ATTR, VIRTUALIZED_COLLAPSED)
            .append_to(page.root())
            .unwrap();
        let body = page.element("div").append_to(message).unwrap();
        page.set_style_property(body, "display", Some("none")).unwrap();
        let image = page
            .element("img")
            .attr("src", "blob:https://chat.example/kept")
            .append_to(body)
            .unwrap();
        let monitor = monitor(&page);
        page.set_heap(Some(HeapSnapshot::new(90, 100)));

        assert!(!page.is_rendered(image));
        assert!(matches!(
            monitor.check(CheckTrigger::Manual),
            CheckOutcome::Mitigated { released: 0, .. }
        ));
        assert!(page.attribute(image, "src").is_some());
    }

    #[test]
    fn test_unavailable_sample() {
        let page = HeadlessPage::new();
        let monitor = monitor(&page);
        page.set_heap(None);

        assert_eq!(monitor.check(CheckTrigger::Manual), CheckOutcome::Unavailable);
    }

    #[test]
    fn test_hidden_page_triggers_check() {
        let page = HeadlessPage::new();
        let (offscreen, _, _) = blob_images(&page);
        let monitor = monitor(&page);
        page.set_heap(Some(HeapSnapshot::new(90, 100)));

        page.set_visibility(VisibilityState::Hidden);
        assert_eq!(page.attribute(offscreen, "src"), None);
        assert_eq!(monitor.stats().mitigations, 1);

        // Becoming visible again does not check; hiding again is cooled down
        page.set_visibility(VisibilityState::Visible);
        assert_eq!(monitor.stats().checks, 1);
        page.set_visibility(VisibilityState::Hidden);
        assert_eq!(monitor.stats().checks, 2);
        assert_eq!(monitor.stats().mitigations, 1);
    }

    #[test]
    fn test_periodic_checks() {
        let page = HeadlessPage::new();
        let monitor = monitor(&page);
        page.set_heap(Some(HeapSnapshot::new(10, 100)));

        page.advance(Tuning::default().memory_interval() * 3);
        assert_eq!(monitor.stats().checks, 3);
    }

    #[test]
    fn test_no_heap_no_install() {
        let page = HeadlessPage::new();
        let host = page.host_builder().without(Capability::HeapIntrospection).build();

        assert!(matches!(
            MemoryMonitor::install(&host, &Tuning::default()),
            Err(EngineError::CapabilityUnavailable(Capability::HeapIntrospection))
        ));
    }
}
