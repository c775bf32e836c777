// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use indexmap::IndexMap;

use crate::{union, Schema};

fn record(entries: &[(&str, Schema)]) -> Schema {
    Schema::record(
        entries
            .iter()
            .map(|(k, s)| (k.to_string(), s.clone()))
            .collect::<IndexMap<_, _>>(),
    )
}

#[test]
fn property_navigation() {
    let s = record(&[("a", Schema::string()), ("b", Schema::number())]);
    assert_eq!(s.property("a").type_(), "string");
    assert_eq!(s.property("b").type_(), "number");

    // Records are closed.
    assert!(s.property("other").is_never());

    // Open objects admit anything.
    let open = Schema::object(IndexMap::new()).with_additional_properties(Schema::always());
    assert!(open.property("anything").is_always());

    assert!(Schema::string().property("a").is_never());
    assert!(Schema::always().property("a").is_never());
}

#[test]
fn item_navigation() {
    let tuple = Schema::tuple(vec![Schema::string(), Schema::number()]);
    assert_eq!(tuple.item(0).type_(), "string");
    assert_eq!(tuple.item(1).type_(), "number");
    assert!(tuple.item(2).is_never());

    let array = Schema::array(Schema::boolean());
    assert_eq!(array.item(0).type_(), "boolean");
    assert_eq!(array.item(100).type_(), "boolean");

    assert!(Schema::string().item(0).is_never());
}

#[test]
fn navigation_through_alternatives() {
    let s = Schema::one_of(vec![
        record(&[("a", Schema::string())]),
        record(&[("a", Schema::number())]),
    ]);
    let a = s.property("a");
    let o = a.as_object().expect("an object schema");
    assert_eq!(o.one_of.len(), 2);
}

#[test]
fn union_collapses() {
    assert!(union(vec![]).is_never());
    assert!(union(vec![Schema::never(), Schema::never()]).is_never());
    assert_eq!(
        union(vec![Schema::never(), Schema::string()]).type_(),
        "string"
    );
    let u = union(vec![Schema::string(), Schema::number()]);
    assert_eq!(u.as_object().expect("an object schema").one_of.len(), 2);
}

#[test]
fn references() {
    let mut defs = IndexMap::new();
    defs.insert("inner".to_string(), Schema::string());
    let s = record(&[("a", Schema::reference("#/$defs/inner"))]).with_defs(defs);

    s.compile().expect("resolvable");
    assert_eq!(
        s.resolve_ref("#/$defs/inner").expect("resolvable").type_(),
        "string"
    );

    let bad = record(&[("a", Schema::reference("#/$defs/missing"))]);
    assert!(bad.compile().is_err());
    assert!(Schema::always().resolve_ref("http://x/schema").is_err());
}

#[test]
fn pattern_compilation() {
    let ok = Schema::string().with_pattern("^a+$");
    ok.compile().expect("a valid pattern");

    let bad = Schema::string().with_pattern("(unclosed");
    assert!(bad.compile().is_err());
}

#[test]
fn secret_marker() {
    assert!(Schema::string().with_secret().is_secret());
    assert!(!Schema::string().is_secret());
}

#[test]
fn serde_forms() {
    let v = serde_json::to_value(Schema::always()).expect("serializable");
    assert_eq!(v, serde_json::Value::Bool(true));
    let v = serde_json::to_value(Schema::never()).expect("serializable");
    assert_eq!(v, serde_json::Value::Bool(false));

    let s = record(&[("a", Schema::string())]);
    let v = serde_json::to_value(&s).expect("serializable");
    assert_eq!(v["type"], "object");
    assert_eq!(v["properties"]["a"]["type"], "string");
    assert_eq!(v["additionalProperties"], serde_json::Value::Bool(false));

    let back: Schema = serde_json::from_value(v).expect("deserializable");
    assert_eq!(back.property("a").type_(), "string");
}
