//! Engine installation.

use crate::config::{Config, Feature};
use crate::error::EngineError;
use crate::images::ImageOptimizer;
use crate::janitor::Janitor;
use crate::lazy_render::LazyRenderer;
use crate::memory::MemoryMonitor;
use crate::status::{Component, EngineStatus};
use crate::styles;
use crate::telemetry::TelemetryFilter;
use crate::throttle::ThrottleInterceptor;
use crate::virtualizer::Virtualizer;
use fos_page::{Host, NodeId};
use std::rc::Rc;
use tracing::{debug, warn};

/// Claim key guarding against a second engine on the same document.
const INSTALL_CLAIM: &str = "fos-tune";

/// Handles to every installed component.
///
/// Components schedule themselves on the page; the engine only keeps them
/// alive (through the host) and exposes them for inspection.
pub struct Engine {
    config: Config,
    status: EngineStatus,
    throttle: Option<Rc<ThrottleInterceptor>>,
    stylesheet: Option<NodeId>,
    telemetry: Option<Rc<TelemetryFilter>>,
    janitor: Option<Rc<Janitor>>,
    lazy_render: Option<Rc<LazyRenderer>>,
    images: Option<Rc<ImageOptimizer>>,
    virtualizer: Option<Rc<Virtualizer>>,
    memory: Option<Rc<MemoryMonitor>>,
}

/// Keep the component on success, note the failure otherwise.
fn attempt<T>(
    status: &mut EngineStatus,
    component: Component,
    result: Result<T, EngineError>,
) -> Option<T> {
    match result {
        Ok(value) => {
            status.record_installed(component);
            Some(value)
        }
        Err(err) => {
            warn!(%component, "Component not installed: {}", err);
            status.record_degraded(component, err.to_string());
            None
        }
    }
}

impl Engine {
    /// Install every enabled component on the host.
    ///
    /// One component failing never stops the others. Fails only if an
    /// engine is already installed on this document.
    pub fn install(host: &Host, config: Config) -> Result<Rc<Engine>, EngineError> {
        if !host.claim_once(INSTALL_CLAIM) {
            return Err(EngineError::AlreadyInstalled);
        }

        let tuning = config.tuning().clone();
        let mut status = EngineStatus::default();
        let enabled = |feature| config.is_enabled(feature);

        // First, so every later registration goes through it
        let throttle = enabled(Feature::InputThrottle)
            .then(|| ThrottleInterceptor::install(host, tuning.throttle_window()))
            .and_then(|r| attempt(&mut status, Component::ThrottleInterceptor, r));

        let stylesheet = match styles::install(host, &config) {
            Ok(None) => None,
            result => attempt(&mut status, Component::StyleInjector, result).flatten(),
        };

        let telemetry = enabled(Feature::TelemetryBlock)
            .then(|| TelemetryFilter::install(host))
            .and_then(|r| attempt(&mut status, Component::TelemetryFilter, r));

        let janitor = enabled(Feature::DomCleanup)
            .then(|| Janitor::install(host, &tuning))
            .and_then(|r| attempt(&mut status, Component::Janitor, r));

        let lazy_render = enabled(Feature::LazyCodeRender)
            .then(|| LazyRenderer::install(host, &tuning))
            .and_then(|r| attempt(&mut status, Component::LazyRenderer, r));

        let images = enabled(Feature::ImageOptimization)
            .then(|| ImageOptimizer::install(host))
            .and_then(|r| attempt(&mut status, Component::ImageOptimizer, r));

        let virtualizer = enabled(Feature::MessageVirtualization)
            .then(|| Virtualizer::install(host, &tuning))
            .and_then(|r| attempt(&mut status, Component::Virtualizer, r));

        let memory = enabled(Feature::MemoryHeuristics)
            .then(|| MemoryMonitor::install(host, &tuning))
            .and_then(|r| attempt(&mut status, Component::MemoryMonitor, r));

        status.report(host);

        let engine = Rc::new(Engine {
            config,
            status,
            throttle,
            stylesheet,
            telemetry,
            janitor,
            lazy_render,
            images,
            virtualizer,
            memory,
        });
        host.retain(engine.clone());
        debug!("Engine retained by host");
        Ok(engine)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn status(&self) -> &EngineStatus {
        &self.status
    }

    pub fn throttle(&self) -> Option<&Rc<ThrottleInterceptor>> {
        self.throttle.as_ref()
    }

    pub fn stylesheet(&self) -> Option<NodeId> {
        self.stylesheet
    }

    pub fn telemetry(&self) -> Option<&Rc<TelemetryFilter>> {
        self.telemetry.as_ref()
    }

    pub fn janitor(&self) -> Option<&Rc<Janitor>> {
        self.janitor.as_ref()
    }

    pub fn lazy_render(&self) -> Option<&Rc<LazyRenderer>> {
        self.lazy_render.as_ref()
    }

    pub fn images(&self) -> Option<&Rc<ImageOptimizer>> {
        self.images.as_ref()
    }

    pub fn virtualizer(&self) -> Option<&Rc<Virtualizer>> {
        self.virtualizer.as_ref()
    }

    pub fn memory(&self) -> Option<&Rc<MemoryMonitor>> {
        self.memory.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeatureSet, Tuning};
    use crate::markers::{STATUS_ATTR, VIRTUALIZED_ATTR};
    use crate::memory::{CheckOutcome, CheckTrigger};
    use crate::status::STATUS_ACTIVE;
    use crate::virtualizer::VirtualState;
    use fos_page::{
        Capability, Document, Event, HeadlessPage, HeapSnapshot, Listener, ListenerOptions, Target,
    };
    use std::cell::Cell;
    use std::time::Duration;

    fn chat(page: &HeadlessPage, count: usize) -> Vec<NodeId> {
        (0..count)
            .map(|i| {
                let article = page
                    .element("article")
                    .attr("data-testid", &format!("conversation-turn-{i}"))
                    .height(20.0)
                    .append_to(page.root())
                    .unwrap();
                page.element("p").height(80.0).append_to(article).unwrap();
                article
            })
            .collect()
    }

    fn small_config(features: FeatureSet) -> Config {
        Config::new(
            features,
            Tuning {
                min_tracked: 10,
                exempt_tail: 3,
                viewport_margin_px: 100.0,
                ..Tuning::default()
            },
        )
    }

    #[test]
    fn test_installs_defaults() {
        let page = HeadlessPage::with_viewport(800.0, 300.0);
        chat(&page, 20);
        let engine = Engine::install(&page.host(), small_config(FeatureSet::defaults())).unwrap();

        let status = engine.status();
        assert!(status.degraded().is_empty(), "{}", status.summary());
        for component in [
            Component::ThrottleInterceptor,
            Component::StyleInjector,
            Component::TelemetryFilter,
            Component::Janitor,
            Component::LazyRenderer,
            Component::ImageOptimizer,
            Component::Virtualizer,
            Component::MemoryMonitor,
        ] {
            assert!(status.is_installed(component), "{component} missing");
        }
        assert_eq!(page.attribute(page.root(), STATUS_ATTR).as_deref(), Some(STATUS_ACTIVE));
        assert!(engine.virtualizer().unwrap().collapsed_count() > 0);
    }

    #[test]
    fn test_disabled_features_stay_off() {
        let page = HeadlessPage::new();
        let host = page.host();
        let features = FeatureSet::none().with(Feature::DomCleanup, true);
        let engine = Engine::install(&host, small_config(features)).unwrap();

        assert_eq!(engine.status().installed(), &[Component::Janitor]);
        assert!(engine.throttle().is_none());
        assert!(engine.stylesheet().is_none());

        // Registration entry point untouched: input is not throttled
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let listener: Listener = Rc::new(move |_: &Event| {
            counter.set(counter.get() + 1);
            Ok(())
        });
        host.add_event_listener(Target::Document, "input", listener, ListenerOptions::default());
        for _ in 0..3 {
            page.dispatch(Target::Document, Event::new("input", Target::Document));
        }
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_missing_capabilities_degrade() {
        let page = HeadlessPage::new();
        let host = page
            .host_builder()
            .without(Capability::HeapIntrospection)
            .without(Capability::IntersectionObserver)
            .build();
        let engine = Engine::install(&host, small_config(FeatureSet::defaults())).unwrap();

        let degraded: Vec<Component> = engine.status().degraded().iter().map(|(c, _)| *c).collect();
        assert_eq!(degraded, vec![Component::LazyRenderer, Component::MemoryMonitor]);
        assert!(engine.status().is_installed(Component::Virtualizer));
        assert!(engine.status().is_installed(Component::Janitor));
    }

    #[test]
    fn test_second_install_rejected() {
        let page = HeadlessPage::new();
        let host = page.host();
        Engine::install(&host, Config::default()).unwrap();

        assert!(matches!(
            Engine::install(&host, Config::default()),
            Err(EngineError::AlreadyInstalled)
        ));
    }

    #[test]
    fn test_janitor_skips_collapsed_messages() {
        let page = HeadlessPage::with_viewport(800.0, 300.0);
        let nodes = chat(&page, 20);
        // A closed tooltip inside the first message
        let tooltip = page
            .element("div")
            .attr("role", "tooltip")
            .append_to(nodes[0])
            .unwrap();
        page.scroll_to(1500.0);

        let features = FeatureSet::none()
            .with(Feature::MessageVirtualization, true)
            .with(Feature::DomCleanup, true);
        let engine = Engine::install(&page.host(), small_config(features)).unwrap();
        let virtualizer = engine.virtualizer().unwrap();
        assert_eq!(virtualizer.state_of(nodes[0]), Some(VirtualState::Collapsed));

        // Collapsed children are not rendered, yet the janitor must not touch them
        assert!(!page.is_rendered(tooltip));
        page.advance(engine.config().tuning().janitor_interval());
        assert!(page.is_connected(tooltip));

        page.scroll_to(0.0);
        page.run_frame();
        assert_eq!(virtualizer.state_of(nodes[0]), Some(VirtualState::Expanded));
        assert_eq!(page.attribute(nodes[0], VIRTUALIZED_ATTR), None);
        assert!(page.is_rendered(tooltip));
    }

    #[test]
    fn test_memory_pass_spares_collapsed_messages() {
        let page = HeadlessPage::with_viewport(800.0, 300.0);
        let nodes = chat(&page, 20);
        let image = page
            .element("img")
            .attr("src", "blob:https://chat.example/upload")
            .append_to(nodes[0])
            .unwrap();
        page.scroll_to(1500.0);

        let features = FeatureSet::none()
            .with(Feature::MessageVirtualization, true)
            .with(Feature::MemoryHeuristics, true);
        let engine = Engine::install(&page.host(), small_config(features)).unwrap();
        let virtualizer = engine.virtualizer().unwrap();
        assert_eq!(virtualizer.state_of(nodes[0]), Some(VirtualState::Collapsed));
        assert!(!page.is_rendered(image));

        page.set_heap(Some(HeapSnapshot::new(90, 100)));
        assert!(matches!(
            engine.memory().unwrap().check(CheckTrigger::Manual),
            CheckOutcome::Mitigated { released: 0, .. }
        ));

        page.scroll_to(0.0);
        page.run_frame();
        assert_eq!(virtualizer.state_of(nodes[0]), Some(VirtualState::Expanded));
        assert!(page.is_rendered(image));
        assert_eq!(
            page.attribute(image, "src").as_deref(),
            Some("blob:https://chat.example/upload")
        );
    }

    #[test]
    fn test_components_survive_engine_handle_drop() {
        let page = HeadlessPage::with_viewport(800.0, 300.0);
        let nodes = chat(&page, 20);
        let host = page.host();
        let features = FeatureSet::none().with(Feature::MessageVirtualization, true);
        drop(Engine::install(&host, small_config(features)).unwrap());

        page.scroll_to(1500.0);
        page.advance(Duration::from_millis(16));
        assert_eq!(page.attribute(nodes[0], VIRTUALIZED_ATTR).as_deref(), Some("collapsed"));
    }
}
