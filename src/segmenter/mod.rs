pub mod address;
pub mod decompose;
pub mod weights;

use tracing::debug;

use crate::{core::types::Segment, document::tree::DocumentTree};

/// Segments worth rewriting, starting from the document's content root.
///
/// A selected node is dropped when its markup is empty or when its
/// whitespace-collapsed text is not longer than `min_visible_text` characters.
pub fn collect_segments(tree: &DocumentTree, min_visible_text: usize) -> Vec<Segment> {
    let root = tree.content_root();
    let selected = decompose::segment(tree, root);
    let total = selected.len();

    let segments: Vec<Segment> = selected
        .into_iter()
        .filter_map(|node| {
            let html = tree.inner_markup(node);
            if html.trim().is_empty() {
                return None;
            }
            let text = tree.text_content(node);
            if min_visible_text > 0 && collapsed_len(&text) <= min_visible_text {
                return None;
            }
            Some(Segment {
                path: address::address_of(tree, node),
                layout: tree.layout(node),
                html,
                text,
            })
        })
        .collect();

    debug!(selected = total, kept = segments.len(), "collected segments");
    segments
}

fn collapsed_len(text: &str) -> usize {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return 0;
    }
    words.iter().map(|word| word.chars().count()).sum::<usize>() + words.len() - 1
}

#[cfg(test)]
mod tests {
    use super::collapsed_len;

    #[test]
    fn collapses_runs_of_whitespace() {
        assert_eq!(collapsed_len("  a \n\t b  "), 3);
        assert_eq!(collapsed_len("   "), 0);
    }
}
