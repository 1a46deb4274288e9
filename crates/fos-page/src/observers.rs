//! Intersection and mutation notification capabilities.
//!
//! Notifications are delivered asynchronously, between tasks, in batches.

use crate::node::{NodeId, Rect};
use std::rc::Rc;

/// One visibility change of an observed element.
#[derive(Debug, Clone, PartialEq)]
pub struct IntersectionEntry {
    pub target: NodeId,
    /// Whether the element overlaps the viewport extended by the root margin
    pub is_intersecting: bool,
    pub bounding_rect: Rect,
}

pub type IntersectionCallback = Rc<dyn Fn(&[IntersectionEntry])>;

/// A live intersection observer.
pub trait IntersectionObserver {
    /// Start observing; the first notification reports the current state.
    fn observe(&self, node: NodeId);

    fn unobserve(&self, node: NodeId);

    fn disconnect(&self);
}

pub trait IntersectionObserving {
    /// Create an observer whose root is the viewport grown by
    /// `root_margin_px` on the top and bottom edges.
    fn create_intersection_observer(
        &self,
        root_margin_px: f32,
        callback: IntersectionCallback,
    ) -> Rc<dyn IntersectionObserver>;
}

/// A child-list change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    /// The parent whose children changed
    pub target: NodeId,
    pub added_nodes: Vec<NodeId>,
    pub removed_nodes: Vec<NodeId>,
}

pub type MutationCallback = Rc<dyn Fn(&[MutationRecord])>;

/// A live structural-mutation watcher.
pub trait MutationObserver {
    fn disconnect(&self);
}

pub trait MutationObserving {
    /// Watch child-list changes anywhere under `root`.
    fn observe_subtree(&self, root: NodeId, callback: MutationCallback)
    -> Rc<dyn MutationObserver>;
}
