// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::{parse_document, walk, Diagnostics, Node, NodeValue, Source};

fn parse(text: &str) -> (Node, Diagnostics) {
    let source =
        Source::from_contents("test".to_string(), text.to_string()).expect("a valid source");
    let (node, diags) = parse_document("test", &source);
    (node.expect("a document"), diags)
}

fn parse_ok(text: &str) -> Node {
    let (node, diags) = parse(text);
    assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
    node
}

#[test]
fn block_structure() {
    let node = parse_ok(
        r#"
a: 1
b:
  - x
  - y
c: "quoted value"
d:
  nested: true
"#,
    );

    let entries = node.as_object().expect("an object");
    assert_eq!(entries.len(), 4);
    assert_eq!(entries[0].0.as_str(), Some("a"));
    assert!(matches!(entries[0].1.repr, NodeValue::Number(_)));

    let b = entries[1].1.as_array().expect("an array");
    assert_eq!(b.len(), 2);
    assert_eq!(b[0].as_str(), Some("x"));
    assert_eq!(b[1].as_str(), Some("y"));

    assert_eq!(entries[2].1.as_str(), Some("quoted value"));

    let d = entries[3].1.as_object().expect("an object");
    assert_eq!(d[0].0.as_str(), Some("nested"));
    assert!(matches!(d[0].1.repr, NodeValue::Boolean(true)));
}

#[test]
fn flow_collections() {
    let node = parse_ok("x: {a: 1, b: [true, null, \"s\"]}\n");
    let x = node.get("x").expect("x");
    let entries = x.as_object().expect("an object");
    assert_eq!(entries.len(), 2);

    let b = entries[1].1.as_array().expect("an array");
    assert!(matches!(b[0].repr, NodeValue::Boolean(true)));
    assert!(matches!(b[1].repr, NodeValue::Null));
    assert_eq!(b[2].as_str(), Some("s"));
}

#[test]
fn comments_and_document_marker() {
    let node = parse_ok(
        r#"---
# leading comment
a: 1 # trailing comment
"#,
    );
    let entries = node.as_object().expect("an object");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0.as_str(), Some("a"));
}

#[test]
fn ranges_and_positions() {
    let node = parse_ok("a: 1\nb: two\n");
    let entries = node.as_object().expect("an object");

    let b_key = &entries[1].0;
    assert_eq!(b_key.range().environment, "test");
    assert_eq!(b_key.range().begin.line, 2);
    assert_eq!(b_key.range().begin.column, 1);

    let b_value = &entries[1].1;
    assert_eq!(b_value.range().begin.line, 2);
    assert_eq!(b_value.range().begin.column, 4);
}

#[test]
fn empty_document_is_null() {
    let node = parse_ok("");
    assert!(matches!(node.repr, NodeValue::Null));

    let node = parse_ok("# only a comment\n");
    assert!(matches!(node.repr, NodeValue::Null));
}

#[test]
fn scalar_typing() {
    let node = parse_ok(
        r#"
n: null
t: true
f: false
i: 42
neg: -1.5
s: plain text
quoted: "42"
"#,
    );
    let entries = node.as_object().expect("an object");
    assert!(matches!(entries[0].1.repr, NodeValue::Null));
    assert!(matches!(entries[1].1.repr, NodeValue::Boolean(true)));
    assert!(matches!(entries[2].1.repr, NodeValue::Boolean(false)));
    assert!(matches!(entries[3].1.repr, NodeValue::Number(_)));
    assert!(matches!(entries[4].1.repr, NodeValue::Number(_)));
    assert_eq!(entries[5].1.as_str(), Some("plain text"));
    // Quoting suppresses scalar typing.
    assert_eq!(entries[6].1.as_str(), Some("42"));
}

#[test]
fn tabs_are_rejected() {
    let source =
        Source::from_contents("test".to_string(), "a:\n\tb: 1\n".to_string()).expect("a source");
    let (node, diags) = parse_document("test", &source);
    assert!(node.is_none());
    assert!(diags
        .iter()
        .any(|d| d.summary.contains("tab characters may not be used for indentation")));
}

#[test]
fn multiple_documents_are_rejected() {
    let (_, diags) = parse("a: 1\n---\nb: 2\n");
    assert!(diags
        .iter()
        .any(|d| d.summary.contains("multiple documents are not supported")));
}

#[test]
fn block_scalars_are_rejected() {
    let (_, diags) = parse("a: |\n  text\n");
    assert!(diags
        .iter()
        .any(|d| d.summary.contains("block scalars are not supported")));
}

#[test]
fn anchors_are_rejected() {
    let (_, diags) = parse("a: &anchor 1\n");
    assert!(diags
        .iter()
        .any(|d| d.summary.contains("anchors, aliases, and tags are not supported")));
}

#[test]
fn duplicate_mapping_keys_are_rejected() {
    let (_, diags) = parse("a: 1\na: 2\n");
    assert!(diags.iter().any(|d| d.summary.contains("duplicate key \"a\"")));
}

#[test]
fn unterminated_flow_collections() {
    let (_, diags) = parse("a: [1, 2\n");
    assert!(diags.has_errors());

    let (_, diags) = parse("a: {b: 1\n");
    assert!(diags.has_errors());
}

#[test]
fn walk_visits_and_replaces() {
    let node = parse_ok("a: 1\nb:\n  - x\n");

    let mut visited = Vec::new();
    let node = walk(node, &mut |mut n| {
        visited.push(n.type_name());
        if n.as_str() == Some("x") {
            n.repr = NodeValue::String("y".to_string());
        }
        Ok(n)
    })
    .expect("a clean walk");

    // Children before parents.
    assert_eq!(visited.last(), Some(&"an object"));
    assert!(visited.len() > 4);

    let b = node.get("b").expect("b").as_array().expect("an array");
    assert_eq!(b[0].as_str(), Some("y"));

    let err = walk(node, &mut |n| {
        if n.as_str() == Some("y") {
            return Err(crate::syntax::node_error(&n, "no ys allowed"));
        }
        Ok(n)
    })
    .expect_err("the walk stops");
    assert!(err.summary.contains("no ys allowed"));
}

#[test]
fn invalid_escapes_are_reported() {
    let (_, diags) = parse(r#"a: "bad \q escape""#);
    assert!(diags.iter().any(|d| d.summary.contains("invalid escape")));

    let (_, diags) = parse(r#"a: "bad \uZZZZ escape""#);
    assert!(diags
        .iter()
        .any(|d| d.summary.contains("invalid unicode escape")));
}

#[test]
fn keys_without_colons_are_reported() {
    let (_, diags) = parse("a: 1\njust text\n");
    assert!(diags
        .iter()
        .any(|d| d.summary.contains("expected a mapping key")));
}

#[test]
fn string_escapes() {
    let node = parse_ok(r#"a: "line\nbreak \"quoted\" \u0041""#);
    let a = node.get("a").expect("a");
    assert_eq!(a.as_str(), Some("line\nbreak \"quoted\" A"));
}
