//! Owned snapshot of a rendered document.
//!
//! Nodes live in a flat arena and refer to each other by [`NodeId`]; the tree is
//! built once per pipeline run and every derived value (weights, paths) is keyed
//! by those indices.

use crate::core::types::Layout;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementData {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Document,
    Element(ElementData),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone)]
pub struct DocNode {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub layout: Layout,
}

#[derive(Debug, Clone)]
pub struct DocumentTree {
    nodes: Vec<DocNode>,
}

impl Default for DocumentTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![DocNode {
                kind: NodeKind::Document,
                parent: None,
                children: vec![],
                layout: Layout::default(),
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Number of arena slots, detached nodes included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1 && self.nodes[0].children.is_empty()
    }

    pub fn append(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(DocNode {
            kind,
            parent: Some(parent),
            children: vec![],
            layout: Layout::default(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn append_element(&mut self, parent: NodeId, tag: &str, attrs: Vec<(String, String)>) -> NodeId {
        self.append(
            parent,
            NodeKind::Element(ElementData {
                tag: tag.to_ascii_lowercase(),
                attrs,
            }),
        )
    }

    pub fn append_text(&mut self, parent: NodeId, text: &str) -> NodeId {
        self.append(parent, NodeKind::Text(text.to_string()))
    }

    /// Unlinks every child of `id`; the detached nodes stay in the arena until [`Self::compact`].
    pub fn detach_children(&mut self, id: NodeId) {
        let children = std::mem::take(&mut self.nodes[id.0].children);
        for child in children {
            self.nodes[child.0].parent = None;
        }
    }

    /// Rebuilds the arena from the reachable nodes in document order.
    /// Previously handed out [`NodeId`]s are invalid afterwards.
    pub fn compact(&mut self) {
        let order = self.descendants(self.root());
        if order.len() == self.nodes.len() {
            return;
        }
        let mut remap = vec![None; self.nodes.len()];
        for (new_index, old) in order.iter().enumerate() {
            remap[old.0] = Some(NodeId(new_index));
        }
        let mut old_nodes: Vec<Option<DocNode>> = std::mem::take(&mut self.nodes).into_iter().map(Some).collect();
        self.nodes = order
            .iter()
            .filter_map(|old| old_nodes[old.0].take())
            .map(|mut node| {
                node.parent = node.parent.and_then(|parent| remap[parent.0]);
                node.children = node.children.iter().filter_map(|child| remap[child.0]).collect();
                node
            })
            .collect();
    }

    pub fn node(&self, id: NodeId) -> &DocNode {
        &self.nodes[id.0]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn element_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id)
            .iter()
            .copied()
            .filter(move |child| self.is_element(*child))
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.kind(id), NodeKind::Element(_))
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match self.kind(id) {
            NodeKind::Element(element) => Some(element.tag.as_str()),
            _ => None,
        }
    }

    pub fn layout(&self, id: NodeId) -> Layout {
        self.nodes[id.0].layout
    }

    pub fn set_layout(&mut self, id: NodeId, layout: Layout) {
        self.nodes[id.0].layout = layout;
    }

    /// Every reachable node in document order, starting at the root.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = vec![];
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        out
    }

    pub fn find_element(&self, tag: &str) -> Option<NodeId> {
        self.descendants(self.root())
            .into_iter()
            .find(|id| self.tag(*id).is_some_and(|found| found.eq_ignore_ascii_case(tag)))
    }

    /// Where segmentation starts: `body`, else the root element, else the document node.
    pub fn content_root(&self) -> NodeId {
        self.find_element("body")
            .or_else(|| self.element_children(self.root()).next())
            .unwrap_or_else(|| self.root())
    }

    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut out);
        out
    }

    fn collect_text(&self, id: NodeId, out: &mut String) {
        match self.kind(id) {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Comment(_) => {}
            NodeKind::Document | NodeKind::Element(_) => {
                for child in self.children(id) {
                    self.collect_text(*child, out);
                }
            }
        }
    }

    pub fn outer_markup(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, &mut out);
        out
    }

    pub fn inner_markup(&self, id: NodeId) -> String {
        let mut out = String::new();
        for child in self.children(id) {
            self.write_node(*child, &mut out);
        }
        out
    }

    /// Markup characters owned by the element itself (open tag, attributes, close tag).
    /// `None` for nodes that are not elements.
    pub fn tag_overhead(&self, id: NodeId) -> Option<usize> {
        match self.kind(id) {
            NodeKind::Element(element) => {
                let mut open = String::new();
                write_open_tag(element, &mut open);
                let close = if is_void(&element.tag) {
                    0
                } else {
                    element.tag.chars().count() + 3
                };
                Some(open.chars().count() + close)
            }
            _ => None,
        }
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        match self.kind(id) {
            NodeKind::Document => {
                for child in self.children(id) {
                    self.write_node(*child, out);
                }
            }
            NodeKind::Text(text) => {
                let raw = self
                    .parent(id)
                    .and_then(|parent| self.tag(parent))
                    .is_some_and(|tag| RAW_TEXT_ELEMENTS.contains(&tag));
                if raw {
                    out.push_str(text);
                } else {
                    escape_text(text, out);
                }
            }
            NodeKind::Comment(comment) => {
                out.push_str("<!--");
                out.push_str(comment);
                out.push_str("-->");
            }
            NodeKind::Element(element) => {
                write_open_tag(element, out);
                if is_void(&element.tag) {
                    return;
                }
                for child in self.children(id) {
                    self.write_node(*child, out);
                }
                out.push_str("</");
                out.push_str(&element.tag);
                out.push('>');
            }
        }
    }
}

fn is_void(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

fn write_open_tag(element: &ElementData, out: &mut String) {
    out.push('<');
    out.push_str(&element.tag);
    for (name, value) in &element.attrs {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        escape_attr(value, out);
        out.push('"');
    }
    out.push('>');
}

fn escape_text(text: &str, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(ch),
        }
    }
}

fn escape_attr(value: &str, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(ch),
        }
    }
}
