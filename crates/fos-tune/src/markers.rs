//! Attributes the engine writes onto nodes it manages.

use fos_page::{Document, NodeId};

/// Set on a message while the virtualizer holds it collapsed.
pub const VIRTUALIZED_ATTR: &str = "data-fos-virtualized";
pub const VIRTUALIZED_COLLAPSED: &str = "collapsed";

/// Set on nodes the engine itself inserted.
pub const OWNED_ATTR: &str = "data-fos-owned";

/// Code block registration state: `pending` until first near-visible.
pub const LAZY_ATTR: &str = "data-fos-lazy";
pub const LAZY_PENDING: &str = "pending";
pub const LAZY_RENDERED: &str = "rendered";

/// Status indicator on the document root.
pub const STATUS_ATTR: &str = "data-fos-tune";

/// Whether the node, or any ancestor, is under engine management.
///
/// Cleanup must never touch these.
pub fn is_engine_managed(document: &dyn Document, node: NodeId) -> bool {
    document
        .closest(node, &|id| {
            document.attribute(id, VIRTUALIZED_ATTR).is_some()
                || document.attribute(id, OWNED_ATTR).is_some()
        })
        .is_some()
}
