use foxvox_lib::{
    document::{
        html::parse_document,
        surface::{DocumentSurface, HtmlSurface},
    },
    segmenter::address::{address_of, resolve, StructuralPath},
};

const PAGE: &str = "<html><body>\
    <div><p>first</p></div>\
    <div><p>second</p><span>aside</span><p>third</p></div>\
    </body></html>";

#[test]
fn address_round_trips_through_resolve() {
    let tree = parse_document(PAGE);
    for node in tree.descendants(tree.root()) {
        if !tree.is_element(node) {
            continue;
        }
        let path = address_of(&tree, node);
        assert_eq!(resolve(&path, &tree), Some(node), "path {path}");
    }
}

#[test]
fn first_sibling_index_is_omitted() {
    let tree = parse_document(PAGE);
    let third = tree
        .descendants(tree.root())
        .into_iter()
        .find(|id| tree.text_content(*id) == "third" && tree.tag(*id) == Some("p"))
        .expect("third paragraph");

    assert_eq!(address_of(&tree, third).to_string(), "/html/body/div[2]/p[2]");

    let parsed: StructuralPath = "/html[1]/body/div[2]/p[2]".parse().expect("parses");
    assert_eq!(parsed.to_string(), "/html/body/div[2]/p[2]");
    assert_eq!(resolve(&parsed, &tree), Some(third));
}

#[test]
fn tag_matching_ignores_case() {
    let tree = parse_document(PAGE);
    let path: StructuralPath = "/HTML/Body/DIV[2]/span".parse().expect("parses");
    let node = resolve(&path, &tree).expect("resolves");
    assert_eq!(tree.text_content(node), "aside");
}

#[test]
fn malformed_paths_are_rejected() {
    assert!("html/body".parse::<StructuralPath>().is_err());
    assert!("/html/p[0]".parse::<StructuralPath>().is_err());
    assert!("/html/p[x]".parse::<StructuralPath>().is_err());
    assert!("/html//p".parse::<StructuralPath>().is_err());
    assert!("".parse::<StructuralPath>().expect("empty parses").is_empty());
}

#[test]
fn paths_serialize_as_plain_strings() {
    let path: StructuralPath = "/html/body/div[2]".parse().expect("parses");
    let encoded = serde_json::to_string(&path).expect("serializes");
    assert_eq!(encoded, "\"/html/body/div[2]\"");
    let decoded: StructuralPath = serde_json::from_str(&encoded).expect("deserializes");
    assert_eq!(decoded, path);
}

#[test]
fn prefix_relation_follows_steps() {
    let parent: StructuralPath = "/html/body/div[2]".parse().expect("parses");
    let child: StructuralPath = "/html/body/div[2]/p".parse().expect("parses");
    let other: StructuralPath = "/html/body/div/p".parse().expect("parses");
    assert!(parent.is_prefix_of(&child));
    assert!(!parent.is_prefix_of(&other));
}

#[tokio::test]
async fn structural_edit_turns_a_path_into_a_miss() {
    let surface = HtmlSurface::from_html(PAGE);
    let path: StructuralPath = "/html/body/div[2]/p[2]".parse().expect("parses");
    assert_eq!(
        surface.markup_at(&path).expect("lock"),
        Some("third".to_string())
    );

    let container: StructuralPath = "/html/body/div[2]".parse().expect("parses");
    assert!(surface
        .replace_markup(&container, "<p>only one now</p>")
        .await
        .expect("replace"));

    assert_eq!(surface.markup_at(&path).expect("lock"), None);
    assert!(!surface
        .replace_markup(&path, "<b>lost</b>")
        .await
        .expect("replace"));
}

#[tokio::test]
async fn repeated_write_backs_do_not_grow_the_document() {
    let surface = HtmlSurface::from_html(PAGE);
    let path: StructuralPath = "/html/body/div[2]/p[2]".parse().expect("valid path");
    let initial = surface.node_count().expect("node count");

    for round in 0..5 {
        let markup = format!("round {round}");
        assert!(surface.replace_markup(&path, &markup).await.expect("replace"));
        assert_eq!(surface.node_count().expect("node count"), initial);
    }

    assert_eq!(surface.markup_at(&path).expect("markup").as_deref(), Some("round 4"));
    let snapshot = surface.collect_tree().await.expect("snapshot");
    assert_eq!(snapshot.len(), snapshot.descendants(snapshot.root()).len());
}
