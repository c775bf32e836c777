// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::{encode_ciphertext, ExecContext, ExprRepr, Value, ValueRepr};

use super::{assert_error, eval_ok, Harness, MapEnvironments, Passthrough};

#[test]
fn literals_and_interpolation() {
    let env = eval_ok(
        r#"
values:
  greeting: hello
  count: 3
  enabled: true
  nothing: null
  message: ${greeting}, world
"#,
    );

    assert_eq!(env.properties["greeting"].as_str(), Some("hello"));
    assert_eq!(env.properties["count"].to_string_value(false), "3");
    assert_eq!(
        env.properties["enabled"].value,
        ValueRepr::Bool(true)
    );
    assert_eq!(env.properties["nothing"].value, ValueRepr::Null);
    assert_eq!(env.properties["message"].as_str(), Some("hello, world"));

    // Property order follows the document.
    let keys: Vec<&String> = env.properties.keys().collect();
    assert_eq!(keys, ["greeting", "count", "enabled", "nothing", "message"]);
}

#[test]
fn dollar_escapes() {
    let env = eval_ok("values:\n  price: $$100\n");
    assert_eq!(env.properties["price"].as_str(), Some("$100"));
}

#[test]
fn forward_references() {
    let env = eval_ok(
        r#"
values:
  a: ${b.c}
  b:
    c: late
"#,
    );
    assert_eq!(env.properties["a"].as_str(), Some("late"));
}

#[test]
fn nested_access() {
    let env = eval_ok(
        r#"
values:
  servers:
    - host: alpha
    - host: beta
  second: ${servers[1].host}
"#,
    );
    assert_eq!(env.properties["second"].as_str(), Some("beta"));
}

#[test]
fn join_and_base64() {
    let env = eval_ok(
        r#"
values:
  joined:
    fn::join:
      - ","
      - - hello
        - world
  encoded:
    fn::toBase64: ${joined}
  decoded:
    fn::fromBase64: ${encoded}
"#,
    );
    assert_eq!(env.properties["joined"].as_str(), Some("hello,world"));
    assert_eq!(env.properties["encoded"].as_str(), Some("aGVsbG8sd29ybGQ="));
    assert_eq!(env.properties["decoded"].as_str(), Some("hello,world"));
}

#[test]
fn join_requires_two_values() {
    let (_, diags) = Harness::default().eval(
        r#"
values:
  bad:
    fn::join:
      - ","
"#,
    );
    assert_error(&diags, "the argument to fn::join must be a two-valued list");
}

#[test]
fn from_json_and_to_string() {
    let env = eval_ok(
        r#"
values:
  parsed:
    fn::fromJSON: '{"a": [1, 2]}'
  second: ${parsed.a[1]}
  text:
    fn::toString: 42
"#,
    );
    assert_eq!(env.properties["second"].to_string_value(false), "2");
    assert_eq!(env.properties["text"].as_str(), Some("42"));
}

#[test]
fn secret_plaintext_propagates() {
    let env = eval_ok(
        r#"
values:
  password:
    fn::secret: hunter2
  greeting: hello, ${password}
"#,
    );

    let password = &env.properties["password"];
    assert!(password.secret);
    assert_eq!(password.as_str(), Some("hunter2"));
    assert_eq!(password.to_string_value(true), "[secret]");

    let greeting = &env.properties["greeting"];
    assert!(greeting.secret);
    assert_eq!(greeting.as_str(), Some("hello, hunter2"));
}

#[test]
fn secret_container_marks_leaves() {
    let env = eval_ok(
        r#"
values:
  creds:
    fn::secret:
      user: admin
      password: hunter2
  copied: ${creds.password}
"#,
    );

    let creds = &env.properties["creds"];
    assert!(creds.secret);
    let leaves = creds.as_object().expect("an object");
    assert!(leaves["password"].secret);
    assert_eq!(leaves["password"].as_str(), Some("hunter2"));

    let copied = &env.properties["copied"];
    assert!(copied.secret, "leaf reference should be secret: {copied:?}");
    assert_eq!(copied.as_str(), Some("hunter2"));
    assert_eq!(copied.to_string_value(true), "[secret]");
}

#[test]
fn secret_ciphertext_decrypts() {
    let ciphertext = encode_ciphertext(b"hunter2");
    let document = format!(
        "values:\n  password:\n    fn::secret:\n      ciphertext: {ciphertext}\n"
    );

    let h = Harness {
        decrypter: Some(Arc::new(Passthrough)),
        ..Harness::default()
    };
    let (env, diags) = h.eval(&document);
    assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
    let env = env.expect("expected an environment");

    let password = &env.properties["password"];
    assert!(password.secret);
    assert_eq!(password.as_str(), Some("hunter2"));
}

#[test]
fn secret_ciphertext_stays_unknown_when_checking() {
    let ciphertext = encode_ciphertext(b"hunter2");
    let document = format!(
        "values:\n  password:\n    fn::secret:\n      ciphertext: {ciphertext}\n"
    );

    let h = Harness {
        decrypter: Some(Arc::new(Passthrough)),
        ..Harness::default()
    };
    let (env, diags) = h.check(&document);
    assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
    let env = env.expect("expected an environment");

    let password = &env.properties["password"];
    assert!(password.secret);
    assert!(password.unknown);
}

#[test]
fn secret_without_decrypter() {
    let ciphertext = encode_ciphertext(b"hunter2");
    let document = format!(
        "values:\n  password:\n    fn::secret:\n      ciphertext: {ciphertext}\n"
    );

    let (_, diags) = Harness::default().eval(&document);
    assert_error(&diags, "decrypting: no decrypter available");
}

#[test]
fn cancellation_leaves_results_unknown() {
    let ciphertext = encode_ciphertext(b"hunter2");
    let document = format!(
        "imports:\n  - other\nvalues:\n  opened:\n    fn::open::test:\n      address: localhost\n  password:\n    fn::secret:\n      ciphertext: {ciphertext}\n"
    );

    let h = Harness {
        environments: MapEnvironments::new(&[("other", "values:\n  x: 1\n")]),
        decrypter: Some(Arc::new(Passthrough)),
        ..Harness::default()
    };
    h.cancel.cancel();

    let (env, diags) = h.eval(&document);
    assert!(!diags.has_errors(), "unexpected errors: {diags:?}");
    let cancelled = diags
        .iter()
        .filter(|d| d.summary == "evaluation cancelled")
        .count();
    assert_eq!(cancelled, 3, "import, open, and decrypt each warn: {diags:?}");

    let env = env.expect("expected an environment");
    assert!(env.properties["opened"].unknown);
    assert!(env.properties["password"].unknown);
    assert!(env.properties["password"].secret);
    assert!(env.value_at("x").is_none());
}

#[test]
fn invalid_ciphertext() {
    let (_, diags) = Harness::default().eval(
        "values:\n  password:\n    fn::secret:\n      ciphertext: AAAA\n",
    );
    assert_error(&diags, "invalid ciphertext");
}

#[test]
fn open_provider() {
    let env = eval_ok(
        r#"
values:
  open:
    fn::open::test:
      address: some-url
  address: ${open.address}
"#,
    );
    assert_eq!(env.properties["address"].as_str(), Some("some-url"));

    match &env.exprs["open"].repr {
        ExprRepr::Builtin(b) => assert_eq!(b.name, "fn::open::test"),
        repr => panic!("expected a builtin expression, got {repr:?}"),
    }
}

#[test]
fn open_provider_long_form() {
    let env = eval_ok(
        r#"
values:
  open:
    fn::open:
      provider: test
      inputs:
        address: other-url
"#,
    );
    let open = env.properties["open"].as_object().expect("an object");
    assert_eq!(open["address"].as_str(), Some("other-url"));
}

#[test]
fn open_provider_stays_unknown_when_checking() {
    let (env, diags) = Harness::default().check(
        r#"
values:
  open:
    fn::open::test:
      address: some-url
  address: ${open.address}
"#,
    );
    assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
    let env = env.expect("expected an environment");

    assert!(env.properties["open"].unknown);
    assert!(env.properties["address"].unknown);

    // The provider's output schema is known even though its value is not.
    let open = env.schema.property("open");
    assert_eq!(open.property("address").type_(), "string");
}

#[test]
fn unknown_provider() {
    let (_, diags) = Harness::default().eval(
        "values:\n  open:\n    fn::open::nope:\n      address: x\n",
    );
    assert_error(&diags, "unknown provider \"nope\"");
}

#[test]
fn open_validates_inputs() {
    let (env, diags) = Harness::default().eval(
        "values:\n  open:\n    fn::open::test:\n      address: 42\n",
    );
    assert!(diags.has_errors());
    assert!(env.expect("expected an environment").properties["open"].unknown);
}

#[test]
fn import_override() {
    let h = Harness::with_environments(&[("a", "values:\n  x: 1\n  y: base\n")]);
    let (env, diags) = h.eval("imports:\n  - a\nvalues:\n  x: 2\n");
    assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
    let env = env.expect("expected an environment");

    // Base keys come first, then the overriding definition's new keys.
    let keys: Vec<&String> = env.properties.keys().collect();
    assert_eq!(keys, ["x", "y"]);

    let x = &env.properties["x"];
    assert_eq!(x.to_string_value(false), "2");

    let base = x.trace.base.as_deref().expect("an overridden base");
    assert_eq!(base.to_string_value(false), "1");
    assert_eq!(base.trace.def.environment, "a");

    assert_eq!(env.properties["y"].as_str(), Some("base"));
}

#[test]
fn import_merge_patch() {
    let h = Harness::with_environments(&[(
        "a",
        "values:\n  obj:\n    keep: 1\n    replace: 2\n",
    )]);
    let (env, diags) = h.eval("imports:\n  - a\nvalues:\n  obj:\n    replace: 3\n");
    assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
    let env = env.expect("expected an environment");

    let obj = env.properties["obj"].as_object().expect("an object");
    assert_eq!(obj["keep"].to_string_value(false), "1");
    assert_eq!(obj["replace"].to_string_value(false), "3");
}

#[test]
fn import_list_override_replaces() {
    let h = Harness::with_environments(&[("a", "values:\n  xs:\n    - 1\n    - 2\n")]);
    let (env, diags) = h.eval("imports:\n  - a\nvalues:\n  xs:\n    - 3\n");
    assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
    let env = env.expect("expected an environment");

    let xs = env.properties["xs"].as_array().expect("an array");
    assert_eq!(xs.len(), 1);
    assert_eq!(xs[0].to_string_value(false), "3");
}

#[test]
fn later_imports_win() {
    let h = Harness::with_environments(&[
        ("a", "values:\n  x: from-a\n"),
        ("b", "values:\n  x: from-b\n"),
    ]);
    let (env, diags) = h.eval("imports:\n  - a\n  - b\n");
    assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
    let env = env.expect("expected an environment");
    assert_eq!(env.properties["x"].as_str(), Some("from-b"));
}

#[test]
fn imports_symbol() {
    let h = Harness::with_environments(&[("a", "values:\n  x: hello\n")]);
    let (env, diags) = h.eval("imports:\n  - a\nvalues:\n  direct: ${imports.a.x}\n");
    assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
    let env = env.expect("expected an environment");
    assert_eq!(env.properties["direct"].as_str(), Some("hello"));
}

#[test]
fn cyclic_imports() {
    let h = Harness::with_environments(&[
        ("a", "imports:\n  - b\n"),
        ("b", "imports:\n  - a\n"),
    ]);
    let (_, diags) = h.eval("imports:\n  - a\n");
    assert_error(&diags, "cyclic import of a");
}

#[test]
fn missing_import() {
    let (_, diags) = Harness::default().eval("imports:\n  - nope\nvalues:\n  x: 1\n");
    assert_error(&diags, "environment \"nope\" not found");
}

#[test]
fn cyclic_reference() {
    let (_, diags) = Harness::default().eval("values:\n  a: ${b}\n  b: ${a}\n");
    assert_error(&diags, "cyclic reference to");
}

#[test]
fn unknown_property_suggestion() {
    let (_, diags) = Harness::default().eval(
        "values:\n  strings: hello\n  x: ${strigs}\n",
    );
    let diag = diags
        .iter()
        .find(|d| d.summary.contains("\"strigs\" does not exist"))
        .expect("an unknown-property diagnostic");
    assert!(diag.summary.contains("did you mean \"strings\"?"), "{}", diag.summary);
    assert!(diag.summary.contains("Existing fields are:"), "{}", diag.summary);
    assert!(diag.summary.contains("strings"), "{}", diag.summary);
}

#[test]
fn reserved_keys() {
    let (_, diags) = Harness::default().eval("values:\n  imports: nope\n");
    assert_error(&diags, "\"imports\" is a reserved key");

    let (_, diags) = Harness::default().eval("values:\n  environments: nope\n");
    assert_error(&diags, "\"environments\" is a reserved key");
}

#[test]
fn duplicate_keys() {
    let (_, diags) = Harness::default().eval("values:\n  a: 1\n  a: 2\n");
    assert_error(&diags, "duplicate key \"a\"");
}

#[test]
fn reserved_function_prefix() {
    let (_, diags) = Harness::default().eval("values:\n  x:\n    fn::frobnicate: 1\n");
    assert_error(&diags, "'fn::' is a reserved prefix");
}

#[test]
fn multi_key_objects_are_plain() {
    // `fn::` keys only form calls in single-key objects.
    let env = eval_ok(
        r#"
values:
  x:
    fn::join: nope
    other: 1
"#,
    );
    let x = env.properties["x"].as_object().expect("an object");
    assert_eq!(x["fn::join"].as_str(), Some("nope"));
    assert_eq!(x["other"].to_string_value(false), "1");
}

#[test]
fn array_access_errors() {
    let (_, diags) = Harness::default().eval(
        "values:\n  xs:\n    - 1\n  oob: ${xs[3]}\n",
    );
    assert_error(&diags, "array index 3 out-of-bounds for array of length 1");

    let (_, diags) = Harness::default().eval(
        "values:\n  xs:\n    - 1\n  bad: ${xs.name}\n",
    );
    assert_error(&diags, "cannot access an array element using a property name");

    let (_, diags) = Harness::default().eval(
        "values:\n  obj:\n    a: 1\n  bad: ${obj[0]}\n",
    );
    assert_error(&diags, "cannot access an object property using an integer index");

    let (_, diags) = Harness::default().eval("values:\n  s: text\n  bad: ${s.x}\n");
    assert_error(&diags, "receiver must be an array or an object");
}

#[test]
fn context_values() {
    let mut values = IndexMap::new();
    values.insert(
        "foo".to_string(),
        Value::new(ValueRepr::String("bar".to_string())),
    );
    let h = Harness {
        context: ExecContext::new(values).expect("a valid context"),
        ..Harness::default()
    };

    let (env, diags) = h.eval(
        "values:\n  c: ${context.foo}\n  who: ${context.currentEnvironment.name}\n",
    );
    assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
    let env = env.expect("expected an environment");
    assert_eq!(env.properties["c"].as_str(), Some("bar"));
    assert_eq!(env.properties["who"].as_str(), Some("test"));
    assert_eq!(env.execution_context["foo"].as_str(), Some("bar"));
}

#[test]
fn forbidden_context_keys() {
    let mut values = IndexMap::new();
    values.insert("currentEnvironment".to_string(), Value::new(ValueRepr::Null));
    assert!(ExecContext::new(values).is_err());
}

#[test]
fn empty_documents() {
    let (env, diags) = Harness::default().eval("");
    assert!(env.is_none());
    assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");

    let (env, diags) = Harness::default().eval("# a comment\n");
    assert!(env.is_none());
    assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
}

#[test]
fn unknown_top_level_keys_warn() {
    let (env, diags) = Harness::default().eval("values:\n  x: 1\nextra: 2\n");
    assert!(env.is_some());
    assert!(!diags.has_errors());
    assert_error(&diags, "unknown top-level key \"extra\"");
}

#[test]
fn environment_round_trips_through_json() {
    let env = eval_ok(
        r#"
values:
  greeting: hello
  count: 3.50
  nested:
    xs:
      - 1
      - two
"#,
    );

    let json = serde_json::to_value(&env).expect("serializable");
    let restored: crate::Environment = serde_json::from_value(json).expect("deserializable");

    assert_eq!(restored.properties["greeting"], env.properties["greeting"]);
    // Number text survives the round trip.
    assert_eq!(restored.properties["count"].to_string_value(false), "3.50");
    assert_eq!(
        serde_json::to_value(&restored.schema).expect("schema json"),
        serde_json::to_value(&env.schema).expect("schema json"),
    );
}
