//! Document tree capability.

use crate::node::{NodeId, Rect, Viewport};
use crate::selector::Selector;
use thiserror::Error;

/// Errors from document operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomError {
    #[error("{0} is not attached to the document")]
    Detached(NodeId),

    #[error("{0} does not exist")]
    UnknownNode(NodeId),

    #[error("Invalid tree operation on {0}")]
    HierarchyRequest(NodeId),
}

/// A live document tree owned by the host page.
///
/// Methods take `&self`: the tree is shared with host code and other
/// components, so implementations use interior mutability. Queries on a
/// node that is gone return `None`/empty rather than failing; operations
/// that need a connected node return [`DomError`].
pub trait Document {
    /// The document's root element.
    fn root(&self) -> NodeId;

    /// Whether the node is currently reachable from the root.
    fn is_connected(&self, node: NodeId) -> bool;

    fn parent(&self, node: NodeId) -> Option<NodeId>;

    /// Element children in document order.
    fn children(&self, node: NodeId) -> Vec<NodeId>;

    /// Lowercase tag name.
    fn tag_name(&self, node: NodeId) -> Option<String>;

    /// Concatenated text of the node and its descendants.
    fn text_content(&self, node: NodeId) -> String;

    /// Replace the node's own text.
    fn set_text_content(&self, node: NodeId, text: &str) -> Result<(), DomError>;

    fn attribute(&self, node: NodeId, name: &str) -> Option<String>;

    fn set_attribute(&self, node: NodeId, name: &str, value: &str) -> Result<(), DomError>;

    fn remove_attribute(&self, node: NodeId, name: &str) -> Result<(), DomError>;

    /// Inline style property, if set.
    fn style_property(&self, node: NodeId, property: &str) -> Option<String>;

    /// Set (`Some`) or clear (`None`) an inline style property.
    fn set_style_property(
        &self,
        node: NodeId,
        property: &str,
        value: Option<&str>,
    ) -> Result<(), DomError>;

    /// Connected elements matching `selector`, in document order.
    fn query_all(&self, selector: &Selector) -> Vec<NodeId>;

    /// Viewport-relative border box. Fails for detached nodes.
    fn bounding_rect(&self, node: NodeId) -> Result<Rect, DomError>;

    /// Whether the node currently generates a layout box.
    fn is_rendered(&self, node: NodeId) -> bool;

    fn viewport(&self) -> Viewport;

    /// Create a detached element.
    fn create_element(&self, tag: &str) -> NodeId;

    fn append_child(&self, parent: NodeId, child: NodeId) -> Result<(), DomError>;

    /// Detach the node (and its subtree) from its parent.
    fn remove(&self, node: NodeId) -> Result<(), DomError>;

    /// Nearest ancestor-or-self satisfying `predicate`.
    fn closest(&self, node: NodeId, predicate: &dyn Fn(NodeId) -> bool) -> Option<NodeId> {
        let mut current = Some(node);
        while let Some(id) = current {
            if predicate(id) {
                return Some(id);
            }
            current = self.parent(id);
        }
        None
    }
}
