//! Node handles and geometry.

use std::fmt;

/// Handle to a node in the host document.
///
/// A handle never owns its node. Once the node leaves the document the
/// handle simply stops resolving; holding it keeps nothing alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

/// Something a listener can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// The global window object
    Window,
    /// The document object
    Document,
    /// An element in the tree
    Node(NodeId),
}

/// Viewport-relative rectangle, as returned by a bounding-rect query.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn top(&self) -> f32 {
        self.y
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn left(&self) -> f32 {
        self.x
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    /// Whether the vertical extent overlaps `[top, bottom]` (edges count).
    pub fn overlaps_band(&self, top: f32, bottom: f32) -> bool {
        self.bottom() >= top && self.top() <= bottom
    }
}

/// The visible window onto the document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
    /// Vertical scroll offset of the document
    pub scroll_y: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            scroll_y: 0.0,
        }
    }

    /// Viewport-relative band extended by `margin` in both directions.
    pub fn extended_band(&self, margin: f32) -> (f32, f32) {
        (-margin, self.height + margin)
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1280.0, 800.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_overlap_edges() {
        let rect = Rect::new(0.0, 100.0, 10.0, 50.0);

        assert!(rect.overlaps_band(150.0, 300.0));
        assert!(rect.overlaps_band(0.0, 100.0));
        assert!(!rect.overlaps_band(151.0, 300.0));
        assert!(!rect.overlaps_band(-50.0, 99.0));
    }

    #[test]
    fn test_extended_band() {
        let viewport = Viewport::new(800.0, 600.0);
        assert_eq!(viewport.extended_band(100.0), (-100.0, 700.0));
    }
}
