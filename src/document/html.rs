//! HTML ingestion on top of `scraper`: full documents become a [`DocumentTree`],
//! fragments are grafted under an existing node.

use scraper::{node::Node, ElementRef, Html};

use crate::document::tree::{DocumentTree, NodeId, NodeKind};

pub fn parse_document(markup: &str) -> DocumentTree {
    let document = Html::parse_document(markup);
    let mut tree = DocumentTree::new();
    let root = tree.root();
    import_element(&mut tree, root, document.root_element());
    tree
}

/// Replaces the children of `target` with the nodes parsed from `markup`.
pub fn replace_inner_markup(tree: &mut DocumentTree, target: NodeId, markup: &str) {
    let fragment = Html::parse_fragment(markup);
    tree.detach_children(target);
    import_children(tree, target, fragment.root_element());
}

fn import_element(tree: &mut DocumentTree, parent: NodeId, element: ElementRef<'_>) {
    let value = element.value();
    let attrs = value
        .attrs()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();
    let id = tree.append_element(parent, value.name(), attrs);
    import_children(tree, id, element);
}

fn import_children(tree: &mut DocumentTree, parent: NodeId, element: ElementRef<'_>) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                tree.append(parent, NodeKind::Text(String::from(&**text)));
            }
            Node::Comment(comment) => {
                tree.append(parent, NodeKind::Comment(String::from(&**comment)));
            }
            Node::Element(_) => {
                if let Some(child_element) = ElementRef::wrap(child) {
                    import_element(tree, parent, child_element);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_document_into_arena() {
        let tree = parse_document(
            "<html><head><title>t</title></head><body><p>Hello <b>world</b></p><!--c--></body></html>",
        );
        let body = tree.find_element("body").expect("body present");
        assert_eq!(tree.inner_markup(body), "<p>Hello <b>world</b></p><!--c-->");
        assert_eq!(tree.text_content(body), "Hello world");
    }

    #[test]
    fn replaces_children_with_fragment() {
        let mut tree = parse_document("<html><body><div><p>old</p></div></body></html>");
        let div = tree.find_element("div").expect("div present");
        replace_inner_markup(&mut tree, div, "<span>new</span> text");
        assert_eq!(tree.inner_markup(div), "<span>new</span> text");
        assert_eq!(tree.text_content(div), "new text");
    }
}
