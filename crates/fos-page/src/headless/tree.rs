//! Node arena with a vertical block layout.
//!
//! Layout rules, deliberately simple:
//! - `display: none` on a node gives it zero height and no layout box.
//! - An inline `height: Npx` pins the node's height.
//! - Otherwise height is the node's intrinsic height plus its children's.
//! - Children stack top to bottom starting at the parent's top edge.

use crate::dom::DomError;
use crate::node::{NodeId, Rect, Viewport};
use crate::selector::Selector;

#[derive(Debug, Default)]
pub(crate) struct NodeData {
    pub tag: String,
    pub attributes: Vec<(String, String)>,
    pub style: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<NodeId>,
    pub parent: Option<NodeId>,
    pub intrinsic_height: f32,
}

impl NodeData {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            ..Self::default()
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn style(&self, property: &str) -> Option<&str> {
        self.style
            .iter()
            .find(|(k, _)| k == property)
            .map(|(_, v)| v.as_str())
    }

    fn is_display_none(&self) -> bool {
        self.style("display") == Some("none") || self.attribute("hidden").is_some()
    }
}

fn set_pair(pairs: &mut Vec<(String, String)>, key: &str, value: Option<&str>) {
    let pos = pairs.iter().position(|(k, _)| k == key);
    match (pos, value) {
        (Some(i), Some(v)) => pairs[i].1 = v.to_string(),
        (None, Some(v)) => pairs.push((key.to_string(), v.to_string())),
        (Some(i), None) => {
            pairs.remove(i);
        }
        (None, None) => {}
    }
}

fn parse_px(value: &str) -> Option<f32> {
    value.trim().strip_suffix("px")?.trim().parse().ok()
}

#[derive(Debug)]
pub(crate) struct Tree {
    nodes: Vec<NodeData>,
    root: NodeId,
    pub viewport: Viewport,
}

impl Tree {
    pub fn new(viewport: Viewport) -> Self {
        Self {
            nodes: vec![NodeData::new("body")],
            root: NodeId(0),
            viewport,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn get(&self, id: NodeId) -> Result<&NodeData, DomError> {
        self.nodes
            .get(id.0 as usize)
            .ok_or(DomError::UnknownNode(id))
    }

    pub fn get_mut(&mut self, id: NodeId) -> Result<&mut NodeData, DomError> {
        self.nodes
            .get_mut(id.0 as usize)
            .ok_or(DomError::UnknownNode(id))
    }

    pub fn create(&mut self, tag: &str) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(NodeData::new(tag));
        id
    }

    pub fn is_connected(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == self.root {
                return true;
            }
            current = self.get(node).ok().and_then(|n| n.parent);
        }
        false
    }

    /// Whether `node` is `ancestor` or lies beneath it.
    pub fn is_inclusive_descendant(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.get(id).ok().and_then(|n| n.parent);
        }
        false
    }

    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: Option<&str>) -> Result<(), DomError> {
        let node = self.get_mut(id)?;
        set_pair(&mut node.attributes, name, value);
        Ok(())
    }

    pub fn set_style(&mut self, id: NodeId, property: &str, value: Option<&str>) -> Result<(), DomError> {
        let node = self.get_mut(id)?;
        set_pair(&mut node.style, property, value);
        Ok(())
    }

    pub fn append(&mut self, parent: NodeId, child: NodeId) -> Result<Option<NodeId>, DomError> {
        self.get(parent)?;
        self.get(child)?;
        if child == self.root || self.is_inclusive_descendant(parent, child) {
            return Err(DomError::HierarchyRequest(child));
        }

        let previous = self.detach(child);
        self.get_mut(parent)?.children.push(child);
        self.get_mut(child)?.parent = Some(parent);
        Ok(previous)
    }

    /// Unlink `child` from its parent, returning the old parent.
    pub fn detach(&mut self, child: NodeId) -> Option<NodeId> {
        let parent = self.get(child).ok()?.parent?;
        if let Ok(p) = self.get_mut(parent) {
            p.children.retain(|&c| c != child);
        }
        if let Ok(c) = self.get_mut(child) {
            c.parent = None;
        }
        Some(parent)
    }

    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        if let Ok(node) = self.get(id) {
            out.push_str(&node.text);
            for &child in &node.children {
                self.collect_text(child, out);
            }
        }
    }

    /// Pre-order walk of the connected tree.
    pub fn document_order(&self) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            if let Ok(node) = self.get(id) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        order
    }

    pub fn query_all(&self, selector: &Selector) -> Vec<NodeId> {
        self.document_order()
            .into_iter()
            .filter(|&id| {
                self.get(id)
                    .map(|n| selector.matches(&n.tag, |name| n.attribute(name)))
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn is_rendered(&self, id: NodeId) -> bool {
        if !self.is_connected(id) {
            return false;
        }
        let mut current = Some(id);
        while let Some(node) = current {
            match self.get(node) {
                Ok(n) if n.is_display_none() => return false,
                Ok(n) => current = n.parent,
                Err(_) => return false,
            }
        }
        true
    }

    pub fn height(&self, id: NodeId) -> f32 {
        let Ok(node) = self.get(id) else {
            return 0.0;
        };
        if node.is_display_none() {
            return 0.0;
        }
        if let Some(h) = node.style("height").and_then(parse_px) {
            return h;
        }
        node.intrinsic_height + node.children.iter().map(|&c| self.height(c)).sum::<f32>()
    }

    /// Top edge in document coordinates.
    fn absolute_top(&self, id: NodeId) -> f32 {
        let Some(parent) = self.get(id).ok().and_then(|n| n.parent) else {
            return 0.0;
        };
        let preceding: f32 = self
            .get(parent)
            .map(|p| {
                p.children
                    .iter()
                    .take_while(|&&c| c != id)
                    .map(|&c| self.height(c))
                    .sum()
            })
            .unwrap_or(0.0);
        self.absolute_top(parent) + preceding
    }

    pub fn bounding_rect(&self, id: NodeId) -> Result<Rect, DomError> {
        self.get(id)?;
        if !self.is_connected(id) {
            return Err(DomError::Detached(id));
        }
        if !self.is_rendered(id) {
            return Ok(Rect::default());
        }
        Ok(Rect::new(
            0.0,
            self.absolute_top(id) - self.viewport.scroll_y,
            self.viewport.width,
            self.height(id),
        ))
    }

    pub fn content_height(&self) -> f32 {
        self.height(self.root)
    }
}
