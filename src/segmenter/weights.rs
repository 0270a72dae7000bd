use serde::{Deserialize, Serialize};

use crate::document::tree::{DocumentTree, NodeId, NodeKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeWeight {
    /// Markup characters not attributable to descendant text.
    pub html_weight: usize,
    /// Characters of text content under the node.
    pub content_weight: usize,
}

/// Per-run weight memo over one tree snapshot. Dropped with the run.
pub struct WeightCalculator<'t> {
    tree: &'t DocumentTree,
    memo: Vec<Option<NodeWeight>>,
}

impl<'t> WeightCalculator<'t> {
    pub fn new(tree: &'t DocumentTree) -> Self {
        Self {
            tree,
            memo: vec![None; tree.len()],
        }
    }

    pub fn weight(&mut self, node: NodeId) -> NodeWeight {
        if let Some(cached) = self.memo[node.index()] {
            return cached;
        }

        let weight = match self.tree.kind(node) {
            NodeKind::Text(text) => NodeWeight {
                html_weight: 0,
                content_weight: text.chars().count(),
            },
            NodeKind::Comment(comment) => NodeWeight {
                html_weight: comment.chars().count(),
                content_weight: 0,
            },
            NodeKind::Document | NodeKind::Element(_) => {
                let mut total = NodeWeight::default();
                for child in self.tree.children(node) {
                    let child_weight = self.weight(*child);
                    total.html_weight += child_weight.html_weight;
                    total.content_weight += child_weight.content_weight;
                }
                total.html_weight += self
                    .tree
                    .tag_overhead(node)
                    .unwrap_or_else(|| self.tree.outer_markup(node).chars().count());
                total
            }
        };

        self.memo[node.index()] = Some(weight);
        weight
    }
}
