//! DOM Janitor
//!
//! Periodically removes debris long-lived chat pages accumulate: tooltips
//! and popovers left behind after they closed, empty `<style>` elements and
//! empty overlay portals. Anything open, or under engine management, is
//! left alone.

use crate::config::Tuning;
use crate::error::{EngineError, require};
use crate::markers::is_engine_managed;
use fos_page::{Capability, Document, Host, NodeId, Selector};
use std::cell::Cell;
use std::rc::Rc;
use tracing::{debug, info};

/// Upper bound on passes per sweep.
const MAX_PASSES: usize = 16;

/// Native `[popover]` elements are excluded: a closed one is hidden until the
/// page shows it again.
const TOOLTIP_SELECTOR: &str = "[role=tooltip], [data-radix-popper-content-wrapper]";
const STYLE_SELECTOR: &str = "style";
const OVERLAY_SELECTOR: &str = "[data-radix-portal], [data-overlay-container]";

/// Janitor counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JanitorStats {
    pub sweeps: u64,
    pub removed: u64,
}

pub struct Janitor {
    document: Rc<dyn Document>,
    tooltips: Selector,
    styles: Selector,
    overlays: Selector,
    stats: Cell<JanitorStats>,
}

impl Janitor {
    pub fn new(document: Rc<dyn Document>) -> Result<Rc<Self>, EngineError> {
        Ok(Rc::new(Self {
            document,
            tooltips: Selector::parse(TOOLTIP_SELECTOR)?,
            styles: Selector::parse(STYLE_SELECTOR)?,
            overlays: Selector::parse(OVERLAY_SELECTOR)?,
            stats: Cell::new(JanitorStats::default()),
        }))
    }

    /// Sweep now, then every `janitor_interval`.
    pub fn install(host: &Host, tuning: &Tuning) -> Result<Rc<Self>, EngineError> {
        let document = require(host.document(), Capability::Document)?;
        let timers = require(host.timers(), Capability::Timers)?;
        let janitor = Self::new(document)?;

        let weak = Rc::downgrade(&janitor);
        timers.set_interval(
            tuning.janitor_interval(),
            Rc::new(move || {
                if let Some(janitor) = weak.upgrade() {
                    janitor.sweep();
                }
            }),
        );

        let removed = janitor.sweep();
        info!(removed, "DOM cleanup installed");
        Ok(janitor)
    }

    /// Remove debris until nothing more qualifies. Returns the count.
    pub fn sweep(&self) -> usize {
        let mut total = 0;
        for _ in 0..MAX_PASSES {
            let removed = self.pass();
            total += removed;
            if removed == 0 {
                break;
            }
        }

        let mut stats = self.stats.get();
        stats.sweeps += 1;
        stats.removed += total as u64;
        self.stats.set(stats);

        if total > 0 {
            debug!(removed = total, "Janitor sweep");
        }
        total
    }

    fn pass(&self) -> usize {
        let document = self.document.as_ref();
        let mut candidates: Vec<NodeId> = document
            .query_all(&self.tooltips)
            .into_iter()
            .filter(|&n| self.is_stale_tooltip(n))
            .collect();
        candidates.extend(
            document
                .query_all(&self.styles)
                .into_iter()
                .filter(|&n| self.is_empty_style(n)),
        );
        candidates.extend(
            document
                .query_all(&self.overlays)
                .into_iter()
                .filter(|&n| self.is_empty_overlay(n)),
        );

        let mut removed = 0;
        for node in candidates {
            // Already gone with an earlier candidate's subtree
            if !document.is_connected(node) {
                continue;
            }
            match document.remove(node) {
                Ok(()) => removed += 1,
                Err(err) => debug!(%node, "Janitor skipped node: {}", err),
            }
        }
        removed
    }

    fn is_open(&self, node: NodeId) -> bool {
        let document = self.document.as_ref();
        document.attribute(node, "data-state").as_deref() == Some("open")
            || document.attribute(node, "open").is_some()
            || document.attribute(node, "aria-expanded").as_deref() == Some("true")
    }

    fn within_open(&self, node: NodeId) -> bool {
        self.document.closest(node, &|n| self.is_open(n)).is_some()
    }

    fn is_empty(&self, node: NodeId) -> bool {
        self.document.children(node).is_empty() && self.document.text_content(node).trim().is_empty()
    }

    fn is_stale_tooltip(&self, node: NodeId) -> bool {
        !self.document.is_rendered(node)
            && !self.within_open(node)
            && !is_engine_managed(self.document.as_ref(), node)
    }

    fn is_empty_style(&self, node: NodeId) -> bool {
        self.is_empty(node) && !is_engine_managed(self.document.as_ref(), node)
    }

    fn is_empty_overlay(&self, node: NodeId) -> bool {
        self.is_empty(node)
            && !self.within_open(node)
            && !is_engine_managed(self.document.as_ref(), node)
    }

    pub fn stats(&self) -> JanitorStats {
        self.stats.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markers::{OWNED_ATTR, VIRTUALIZED_ATTR, VIRTUALIZED_COLLAPSED};
    use fos_page::HeadlessPage;

    fn janitor(page: &HeadlessPage) -> Rc<Janitor> {
        Janitor::new(Rc::new(page.clone())).unwrap()
    }

    #[test]
    fn test_removes_hidden_tooltips_only() {
        let page = HeadlessPage::new();
        let root = page.root();
        let hidden = page
            .element("div")
            .attr("role", "tooltip")
            .attr("hidden", "")
            .append_to(root)
            .unwrap();
        let visible = page.element("div").attr("role", "tooltip").append_to(root).unwrap();
        let open_menu = page
            .element("div")
            .attr("data-state", "open")
            .append_to(root)
            .unwrap();
        let hidden_in_open = page
            .element("div")
            .attr("role", "tooltip")
            .attr("hidden", "")
            .append_to(open_menu)
            .unwrap();

        assert_eq!(janitor(&page).sweep(), 1);
        assert!(!page.is_connected(hidden));
        assert!(page.is_connected(visible));
        assert!(page.is_connected(hidden_in_open));
    }

    #[test]
    fn test_keeps_closed_native_popover() {
        let page = HeadlessPage::new();
        let root = page.root();
        let popover = page
            .element("div")
            .attr("popover", "auto")
            .append_to(root)
            .unwrap();
        page.element("p").text("Share link").append_to(popover).unwrap();
        page.set_style_property(popover, "display", Some("none")).unwrap();
        let hidden_popover = page
            .element("div")
            .attr("popover", "")
            .attr("hidden", "")
            .append_to(root)
            .unwrap();

        assert!(!page.is_rendered(popover));
        assert_eq!(janitor(&page).sweep(), 0);
        assert!(page.is_connected(popover));
        assert!(page.is_connected(hidden_popover));
    }

    #[test]
    fn test_removes_empty_styles_and_overlays() {
        let page = HeadlessPage::new();
        let root = page.root();
        let empty_style = page.element("style").text("  \n").append_to(root).unwrap();
        let live_style = page.element("style").text("p { color: red }").append_to(root).unwrap();
        let empty_portal = page.element("div").attr("data-radix-portal", "").append_to(root).unwrap();
        let open_portal = page
            .element("div")
            .attr("data-overlay-container", "")
            .attr("aria-expanded", "true")
            .append_to(root)
            .unwrap();
        let busy_portal = page.element("div").attr("data-radix-portal", "").append_to(root).unwrap();
        page.element("p").text("menu").append_to(busy_portal).unwrap();

        assert_eq!(janitor(&page).sweep(), 2);
        assert!(!page.is_connected(empty_style));
        assert!(!page.is_connected(empty_portal));
        assert!(page.is_connected(live_style));
        assert!(page.is_connected(open_portal));
        assert!(page.is_connected(busy_portal));
    }

    #[test]
    fn test_sweep_idempotent_with_nested_debris() {
        let page = HeadlessPage::new();
        let portal = page
            .element("div")
            .attr("data-radix-portal", "")
            .append_to(page.root())
            .unwrap();
        // The portal only becomes empty once its stale tooltip is gone
        page.element("div")
            .attr("data-radix-popper-content-wrapper", "")
            .attr("hidden", "")
            .append_to(portal)
            .unwrap();

        let janitor = janitor(&page);
        assert_eq!(janitor.sweep(), 2);
        assert!(!page.is_connected(portal));
        assert_eq!(janitor.sweep(), 0);
        assert_eq!(janitor.stats(), JanitorStats { sweeps: 2, removed: 2 });
    }

    #[test]
    fn test_skips_engine_managed() {
        let page = HeadlessPage::new();
        let root = page.root();
        let message = page
            .element("article")
            .attr(VIRTUALIZED_ATTR, VIRTUALIZED_COLLAPSED)
            .append_to(root)
            .unwrap();
        let tooltip = page
            .element("span")
            .attr("role", "tooltip")
            .attr("hidden", "")
            .append_to(message)
            .unwrap();
        let owned_style = page.element("style").attr(OWNED_ATTR, "styles").append_to(root).unwrap();

        assert_eq!(janitor(&page).sweep(), 0);
        assert!(page.is_connected(tooltip));
        assert!(page.is_connected(owned_style));
    }

    #[test]
    fn test_runs_at_install_and_on_interval() {
        let page = HeadlessPage::new();
        let host = page.host();
        let root = page.root();
        page.element("style").append_to(root).unwrap();

        let tuning = Tuning::default();
        let janitor = Janitor::install(&host, &tuning).unwrap();
        assert_eq!(janitor.stats().removed, 1);

        let later = page.element("style").append_to(root).unwrap();
        page.advance(tuning.janitor_interval());
        assert!(!page.is_connected(later));
        assert_eq!(janitor.stats(), JanitorStats { sweeps: 2, removed: 2 });
    }
}
