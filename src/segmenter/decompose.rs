//! Descend-or-select decision over the document tree.
//!
//! A container is split into its element children when doing so sheds more
//! markup than it loses in loose text; otherwise the container itself becomes
//! a segment and the walk stops there.

use crate::{
    document::tree::{DocumentTree, NodeId},
    segmenter::weights::{NodeWeight, WeightCalculator},
};

/// Minimum content characters for a node (or a set of children) to count as text.
pub const TEXT_BOUNDARY_MIN: usize = 20;

/// Elements whose text is never user-visible prose.
pub const NON_CONTENT_TAGS: &[&str] = &["script", "style", "noscript", "template"];

const SIGMOID_STEEPNESS: f64 = 10.0;
const SIGMOID_MIDPOINT: f64 = 0.5;
const HTML_SCALE: f64 = 500.0;

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-SIGMOID_STEEPNESS * (x - SIGMOID_MIDPOINT)).exp())
}

/// True when replacing `parent` by `children` is worth it.
pub fn should_decompose(parent: NodeWeight, children: &[NodeWeight]) -> bool {
    let total_child_html: usize = children.iter().map(|child| child.html_weight).sum();
    let total_child_content: usize = children.iter().map(|child| child.content_weight).sum();
    if total_child_content < TEXT_BOUNDARY_MIN {
        return false;
    }

    let html = parent.html_weight as f64;
    let content = parent.content_weight as f64;
    let child_html = total_child_html as f64;
    let child_content = total_child_content as f64;

    let html_factor = sigmoid(html / HTML_SCALE);
    let content_ratio = if parent.content_weight == 0 {
        0.0
    } else {
        child_content / content
    };
    let content_factor = sigmoid(content_ratio);

    let reduction = (html - child_html) * html_factor;
    let loss = (content - child_content) * (1.0 - content_factor);
    reduction > loss
}

/// Selected content nodes under `root`, in document order.
pub fn segment(tree: &DocumentTree, root: NodeId) -> Vec<NodeId> {
    let mut weights = WeightCalculator::new(tree);
    let mut selected = Vec::new();
    visit(tree, &mut weights, root, &mut selected);
    selected
}

fn visit(tree: &DocumentTree, weights: &mut WeightCalculator<'_>, node: NodeId, out: &mut Vec<NodeId>) {
    let own = weights.weight(node);
    let element_children: Vec<NodeId> = tree.element_children(node).collect();

    if !element_children.is_empty() {
        let child_weights: Vec<NodeWeight> = element_children
            .iter()
            .map(|child| weights.weight(*child))
            .collect();
        if should_decompose(own, &child_weights) {
            for child in element_children {
                visit(tree, weights, child, out);
            }
            return;
        }
    }

    if is_selectable(tree, node, own) {
        out.push(node);
    }
}

fn is_selectable(tree: &DocumentTree, node: NodeId, weight: NodeWeight) -> bool {
    if weight.content_weight < TEXT_BOUNDARY_MIN {
        return false;
    }
    match tree.tag(node) {
        Some(tag) => !NON_CONTENT_TAGS.contains(&tag),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_is_centered_on_half() {
        assert!((sigmoid(0.5) - 0.5).abs() < f64::EPSILON);
        assert!(sigmoid(1.0) > 0.99);
        assert!(sigmoid(0.0) < 0.01);
    }

    #[test]
    fn too_little_child_content_never_decomposes() {
        let parent = NodeWeight {
            html_weight: 5_000,
            content_weight: 30,
        };
        let children = [NodeWeight {
            html_weight: 10,
            content_weight: 19,
        }];
        assert!(!should_decompose(parent, &children));
    }

    #[test]
    fn heavy_wrapper_markup_is_shed() {
        let parent = NodeWeight {
            html_weight: 2_000,
            content_weight: 400,
        };
        let children = [
            NodeWeight {
                html_weight: 20,
                content_weight: 200,
            },
            NodeWeight {
                html_weight: 20,
                content_weight: 200,
            },
        ];
        assert!(should_decompose(parent, &children));
    }

    #[test]
    fn zero_parent_content_uses_zero_ratio() {
        let parent = NodeWeight {
            html_weight: 1_000,
            content_weight: 0,
        };
        let children = [NodeWeight {
            html_weight: 0,
            content_weight: 0,
        }];
        assert!(!should_decompose(parent, &children));
    }
}
