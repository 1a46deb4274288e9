//! Installation status and the root indicator.

use crate::markers::STATUS_ATTR;
use fos_page::Host;
use std::fmt;
use tracing::{info, warn};

/// Value written to the root's status attribute.
pub const STATUS_ACTIVE: &str = "active";

/// Engine components
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    ThrottleInterceptor,
    StyleInjector,
    TelemetryFilter,
    Janitor,
    LazyRenderer,
    ImageOptimizer,
    Virtualizer,
    MemoryMonitor,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ThrottleInterceptor => "input-throttle",
            Self::StyleInjector => "styles",
            Self::TelemetryFilter => "telemetry-filter",
            Self::Janitor => "janitor",
            Self::LazyRenderer => "lazy-render",
            Self::ImageOptimizer => "images",
            Self::Virtualizer => "virtualizer",
            Self::MemoryMonitor => "memory-monitor",
        };
        f.write_str(name)
    }
}

/// What came up and what did not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStatus {
    installed: Vec<Component>,
    degraded: Vec<(Component, String)>,
}

impl EngineStatus {
    pub fn record_installed(&mut self, component: Component) {
        self.installed.push(component);
    }

    pub fn record_degraded(&mut self, component: Component, reason: impl Into<String>) {
        self.degraded.push((component, reason.into()));
    }

    pub fn installed(&self) -> &[Component] {
        &self.installed
    }

    pub fn degraded(&self) -> &[(Component, String)] {
        &self.degraded
    }

    pub fn is_installed(&self, component: Component) -> bool {
        self.installed.contains(&component)
    }

    /// One-line summary, e.g. `3 active [janitor, virtualizer, styles]`.
    pub fn summary(&self) -> String {
        let names = |items: &mut dyn Iterator<Item = String>| items.collect::<Vec<_>>().join(", ");
        let mut line = format!(
            "{} active [{}]",
            self.installed.len(),
            names(&mut self.installed.iter().map(ToString::to_string))
        );
        if !self.degraded.is_empty() {
            line.push_str(&format!(
                ", {} degraded [{}]",
                self.degraded.len(),
                names(&mut self.degraded.iter().map(|(c, reason)| format!("{c}: {reason}")))
            ));
        }
        line
    }

    /// Log the summary and mark the document root.
    pub fn report(&self, host: &Host) {
        info!("fOS Tune {}", self.summary());

        let Some(document) = host.document() else {
            return;
        };
        if let Err(err) = document.set_attribute(document.root(), STATUS_ATTR, STATUS_ACTIVE) {
            warn!("Cannot set status indicator: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fos_page::{Document, HeadlessPage};

    #[test]
    fn test_summary() {
        let mut status = EngineStatus::default();
        status.record_installed(Component::Janitor);
        status.record_installed(Component::Virtualizer);
        assert_eq!(status.summary(), "2 active [janitor, virtualizer]");

        status.record_degraded(Component::MemoryMonitor, "Host does not provide heap introspection");
        assert_eq!(
            status.summary(),
            "2 active [janitor, virtualizer], 1 degraded [memory-monitor: Host does not provide heap introspection]"
        );
        assert!(status.is_installed(Component::Janitor));
        assert!(!status.is_installed(Component::MemoryMonitor));
    }

    #[test]
    fn test_report_marks_root() {
        let page = HeadlessPage::new();
        EngineStatus::default().report(&page.host());

        assert_eq!(page.attribute(page.root(), STATUS_ATTR).as_deref(), Some(STATUS_ACTIVE));
    }
}
