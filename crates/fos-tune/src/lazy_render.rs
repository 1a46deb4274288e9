//! Lazy Render Scheduler
//!
//! Code blocks stay in a cheap `pending` state until they first come within
//! `lazy_margin` of the viewport, then flip to `rendered` for good. Blocks
//! streamed in later are picked up by a subtree mutation watcher; the
//! marker attribute keeps anything from registering twice.

use crate::config::Tuning;
use crate::error::{EngineError, require};
use crate::markers::{LAZY_ATTR, LAZY_PENDING, LAZY_RENDERED};
use fos_page::{
    Capability, Document, Host, IntersectionEntry, IntersectionObserver, MutationObserver,
    MutationRecord, NodeId, Selector,
};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use tracing::{debug, info, warn};

pub struct LazyRenderer {
    document: Rc<dyn Document>,
    selector: Selector,
    observer: Rc<dyn IntersectionObserver>,
    /// Kept alive for the page's lifetime
    watcher: RefCell<Option<Rc<dyn MutationObserver>>>,
    registered: Cell<u64>,
    rendered: Cell<u64>,
}

impl LazyRenderer {
    /// Register existing code blocks and watch for new ones.
    ///
    /// Needs the document and intersection notifications. Without mutation
    /// notifications only blocks present at install are handled.
    pub fn install(host: &Host, tuning: &Tuning) -> Result<Rc<Self>, EngineError> {
        let document = require(host.document(), Capability::Document)?;
        let intersections = require(host.intersections(), Capability::IntersectionObserver)?;
        let selector = Selector::parse(&tuning.code_selector)?;
        let margin = tuning.lazy_margin_px;

        let renderer = Rc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let observer = intersections.create_intersection_observer(
                margin,
                Rc::new(move |entries: &[IntersectionEntry]| {
                    if let Some(renderer) = weak.upgrade() {
                        renderer.on_intersections(entries);
                    }
                }),
            );
            Self {
                document: document.clone(),
                selector,
                observer,
                watcher: RefCell::new(None),
                registered: Cell::new(0),
                rendered: Cell::new(0),
            }
        });

        match host.mutations() {
            Some(mutations) => {
                let weak = Rc::downgrade(&renderer);
                let watcher = mutations.observe_subtree(
                    document.root(),
                    Rc::new(move |records: &[MutationRecord]| {
                        if let Some(renderer) = weak.upgrade() {
                            renderer.on_mutations(records);
                        }
                    }),
                );
                *renderer.watcher.borrow_mut() = Some(watcher);
            }
            None => warn!("No mutation notifications, late code blocks stay unregistered"),
        }

        let found = renderer.scan();
        info!(found, margin, "Lazy code rendering installed");
        Ok(renderer)
    }

    /// Register every unregistered code block. Returns how many were new.
    pub fn scan(&self) -> usize {
        self.document
            .query_all(&self.selector)
            .into_iter()
            .filter(|&node| self.register(node))
            .count()
    }

    fn register(&self, node: NodeId) -> bool {
        if self.document.attribute(node, LAZY_ATTR).is_some() {
            return false;
        }
        if let Err(err) = self.document.set_attribute(node, LAZY_ATTR, LAZY_PENDING) {
            debug!(%node, "Cannot register code block: {}", err);
            return false;
        }
        self.observer.observe(node);
        self.registered.set(self.registered.get() + 1);
        true
    }

    fn on_mutations(&self, records: &[MutationRecord]) {
        if records.iter().any(|r| !r.added_nodes.is_empty()) {
            let added = self.scan();
            if added > 0 {
                debug!(added, "Registered streamed code blocks");
            }
        }
    }

    fn on_intersections(&self, entries: &[IntersectionEntry]) {
        for entry in entries.iter().filter(|e| e.is_intersecting) {
            let node = entry.target;
            // Terminal once rendered
            self.observer.unobserve(node);
            if self.document.attribute(node, LAZY_ATTR).as_deref() != Some(LAZY_PENDING) {
                continue;
            }
            match self.document.set_attribute(node, LAZY_ATTR, LAZY_RENDERED) {
                Ok(()) => {
                    self.rendered.set(self.rendered.get() + 1);
                    debug!(%node, "Code block rendered");
                }
                Err(err) => debug!(%node, "Cannot enable rendering: {}", err),
            }
        }
    }

    pub fn registered_count(&self) -> u64 {
        self.registered.get()
    }

    /// Render-enable actions taken so far.
    pub fn rendered_count(&self) -> u64 {
        self.rendered.get()
    }
}
