// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::{
    cleanup, render_environment_variables, secret_values, write_temporary_files,
    ProjectionOptions,
};

use super::eval_ok;

#[test]
fn environment_variables() {
    let env = eval_ok(
        r#"
values:
  environmentVariables:
    ZULU: last
    PORT: 8080
    GREETING: hello world
    SECRET:
      fn::secret: hunter2
  other: ignored
"#,
    );

    let rendered = render_environment_variables(&env, &ProjectionOptions::default());
    assert_eq!(
        rendered,
        [
            "GREETING=hello world",
            "PORT=8080",
            "SECRET=hunter2",
            "ZULU=last",
        ]
    );

    let redacted = render_environment_variables(
        &env,
        &ProjectionOptions {
            redact: true,
            ..Default::default()
        },
    );
    assert!(redacted.contains(&"SECRET=[secret]".to_string()));
    assert!(redacted.contains(&"PORT=8080".to_string()));
}

#[test]
fn quoted_environment_variables() {
    let env = eval_ok(
        "values:\n  environmentVariables:\n    MSG: 'say \"hi\" for $1 `now`'\n",
    );
    let rendered = render_environment_variables(
        &env,
        &ProjectionOptions {
            quote: true,
            ..Default::default()
        },
    );
    assert_eq!(rendered, [r#"MSG="say \"hi\" for \$1 \`now\`""#]);
}

#[test]
fn temporary_files() {
    let env = eval_ok(
        r#"
values:
  files:
    CONFIG: "listen: 8080"
"#,
    );

    let files = write_temporary_files(&env, &ProjectionOptions::default())
        .expect("files written");
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].0, "CONFIG");

    let contents = std::fs::read_to_string(&files[0].1).expect("readable");
    assert_eq!(contents, "listen: 8080");

    cleanup(&files);
    assert!(!files[0].1.exists());

    // Cleaning up twice is fine.
    cleanup(&files);
}

#[test]
fn pretend_files() {
    let env = eval_ok("values:\n  files:\n    CONFIG: contents\n");
    let files = write_temporary_files(
        &env,
        &ProjectionOptions {
            pretend: true,
            ..Default::default()
        },
    )
    .expect("paths synthesized");
    assert_eq!(files.len(), 1);
    assert!(files[0].1.to_string_lossy().contains("CONFIG"));
    assert!(!files[0].1.exists());
}

#[test]
fn secret_value_collection() {
    let env = eval_ok(
        r#"
values:
  password:
    fn::secret: hunter2
  nested:
    fn::secret:
      inner: deep-secret
  short:
    fn::secret: ab
  plain: visible
"#,
    );

    let secrets = secret_values(&env);
    assert!(secrets.contains(&"hunter2".to_string()));
    assert!(secrets.contains(&"deep-secret".to_string()));
    // Too short to usefully mask.
    assert!(!secrets.contains(&"ab".to_string()));
    assert!(!secrets.contains(&"visible".to_string()));
}

#[test]
fn value_at_paths() {
    let env = eval_ok(
        r#"
values:
  obj:
    xs:
      - zero
      - one
"#,
    );
    let v = env.value_at("obj.xs[1]").expect("a value");
    assert_eq!(v.as_str(), Some("one"));
    assert!(env.value_at("obj.missing").is_none());
    assert!(env.value_at("obj.xs[5]").is_none());
}
