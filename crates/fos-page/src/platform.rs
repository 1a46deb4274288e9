//! Heap introspection, page visibility and the outgoing request gate.

use std::rc::Rc;

/// Sampled heap usage in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapSnapshot {
    pub used: u64,
    pub total: u64,
}

impl HeapSnapshot {
    pub fn new(used: u64, total: u64) -> Self {
        Self { used, total }
    }

    /// `used / total`, or `None` for an empty heap.
    pub fn usage_ratio(&self) -> Option<f64> {
        (self.total > 0).then(|| self.used as f64 / self.total as f64)
    }
}

/// Heap-usage introspection. Not every page exposes it.
pub trait HeapProbe {
    /// `None` if the page cannot report heap usage right now.
    fn sample(&self) -> Option<HeapSnapshot>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VisibilityState {
    #[default]
    Visible,
    Hidden,
}

/// Document visibility. Changes are announced with a `visibilitychange`
/// event on the document target.
pub trait PageVisibility {
    fn visibility_state(&self) -> VisibilityState;
}

/// Returns `true` to refuse a request to the given URL.
pub type RequestFilter = Rc<dyn Fn(&str) -> bool>;

/// Hook into the page's outgoing requests (fetch, beacons, pixels).
pub trait RequestGate {
    fn add_request_filter(&self, filter: RequestFilter);
}
