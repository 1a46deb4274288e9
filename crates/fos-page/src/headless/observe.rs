//! Observer bookkeeping for the headless page.

use super::tree::Tree;
use crate::node::NodeId;
use crate::observers::{
    IntersectionCallback, IntersectionEntry, IntersectionObserver, MutationCallback,
    MutationObserver, MutationRecord,
};
use std::cell::{Cell, RefCell};

pub(crate) struct IntersectionState {
    pub margin: f32,
    pub callback: IntersectionCallback,
    /// Observed nodes and their last reported state
    pub targets: RefCell<Vec<(NodeId, Option<bool>)>>,
}

impl IntersectionState {
    /// Entries for every target whose state changed since the last report.
    pub fn collect_changes(&self, tree: &Tree) -> Vec<IntersectionEntry> {
        let (top, bottom) = tree.viewport.extended_band(self.margin);
        let mut entries = Vec::new();

        for (node, last) in self.targets.borrow_mut().iter_mut() {
            let rect = tree.bounding_rect(*node).unwrap_or_default();
            let intersecting = tree.is_rendered(*node) && rect.overlaps_band(top, bottom);
            if *last != Some(intersecting) {
                *last = Some(intersecting);
                entries.push(IntersectionEntry {
                    target: *node,
                    is_intersecting: intersecting,
                    bounding_rect: rect,
                });
            }
        }
        entries
    }
}

impl IntersectionObserver for IntersectionState {
    fn observe(&self, node: NodeId) {
        let mut targets = self.targets.borrow_mut();
        if !targets.iter().any(|(n, _)| *n == node) {
            targets.push((node, None));
        }
    }

    fn unobserve(&self, node: NodeId) {
        self.targets.borrow_mut().retain(|(n, _)| *n != node);
    }

    fn disconnect(&self) {
        self.targets.borrow_mut().clear();
    }
}

pub(crate) struct MutationState {
    pub root: NodeId,
    pub callback: MutationCallback,
    pub pending: RefCell<Vec<MutationRecord>>,
    pub connected: Cell<bool>,
}

impl MutationState {
    pub fn record(&self, tree: &Tree, record: &MutationRecord) {
        if self.connected.get() && tree.is_inclusive_descendant(record.target, self.root) {
            self.pending.borrow_mut().push(record.clone());
        }
    }
}

impl MutationObserver for MutationState {
    fn disconnect(&self) {
        self.connected.set(false);
        self.pending.borrow_mut().clear();
    }
}
