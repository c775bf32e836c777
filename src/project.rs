// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Projection of evaluated environments onto a process environment: shell
//! variable assignments, temporary files, and secret redaction.

use std::io::Write;
use std::path::PathBuf;

use crate::environment::Environment;
use crate::value::{Value, ValueRepr};

/// Options for projecting an environment.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProjectionOptions {
    /// Double-quote variable values and escape characters that are special
    /// within double quotes.
    pub quote: bool,

    /// Replace secret values with `[secret]`.
    pub redact: bool,

    /// Synthesize temporary file paths without writing anything.
    pub pretend: bool,
}

/// An error raised while writing temporary files.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Persist(#[from] tempfile::PersistError),
}

/// Renders the environment's `environmentVariables` as `KEY=VALUE`
/// assignments, sorted by key. Unknown values render as empty strings.
pub fn render_environment_variables(env: &Environment, opts: &ProjectionOptions) -> Vec<String> {
    let mut vars: Vec<(String, String)> = env
        .environment_variables()
        .into_iter()
        .map(|(k, v)| (k, projected_string(&v, opts)))
        .collect();
    vars.sort_by(|a, b| a.0.cmp(&b.0));

    vars.into_iter()
        .map(|(k, v)| {
            if opts.quote {
                format!("{k}={}", shell_quote(&v))
            } else {
                format!("{k}={v}")
            }
        })
        .collect()
}

/// Writes the environment's `files` to temporary files and returns, for each
/// entry, the name of the variable that should carry the path and the path
/// itself. With `pretend` set, paths are synthesized and nothing is written.
///
/// Callers own the returned files; use [`cleanup`] to remove them.
pub fn write_temporary_files(
    env: &Environment,
    opts: &ProjectionOptions,
) -> Result<Vec<(String, PathBuf)>, ProjectError> {
    let mut out = Vec::new();
    for (key, v) in env.temporary_files() {
        if opts.pretend {
            out.push((key.clone(), std::env::temp_dir().join(format!(".envelop-{key}"))));
            continue;
        }

        let mut file = tempfile::Builder::new()
            .prefix(&format!(".envelop-{key}-"))
            .tempfile()?;
        file.write_all(projected_string(&v, opts).as_bytes())?;
        let (_, path) = file.keep()?;
        tracing::debug!(variable = %key, path = %path.display(), "wrote temporary file");
        out.push((key, path));
    }
    Ok(out)
}

/// Removes the files written by [`write_temporary_files`]. Files that are
/// already gone are ignored.
pub fn cleanup(files: &[(String, PathBuf)]) {
    for (_, path) in files {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove temporary file");
            }
        }
    }
}

/// Collects the secret string values of the environment, for use in log
/// scrubbers. Strings shorter than three bytes are skipped; masking them
/// reveals more than it hides.
pub fn secret_values(env: &Environment) -> Vec<String> {
    let mut secrets = Vec::new();
    for v in env.properties.values() {
        collect_secrets(v, false, &mut secrets);
    }
    secrets.sort();
    secrets.dedup();
    secrets
}

fn collect_secrets(v: &Value, inherited: bool, out: &mut Vec<String>) {
    let secret = inherited || v.secret;
    match &v.value {
        ValueRepr::String(s) => {
            if secret && s.len() >= 3 {
                out.push(s.clone());
            }
        }
        ValueRepr::Array(elements) => {
            for e in elements {
                collect_secrets(e, secret, out);
            }
        }
        ValueRepr::Object(properties) => {
            for p in properties.values() {
                collect_secrets(p, secret, out);
            }
        }
        _ => {}
    }
}

fn projected_string(v: &Value, opts: &ProjectionOptions) -> String {
    if v.unknown {
        return String::new();
    }
    v.to_string_value(opts.redact)
}

/// Double-quotes a string for a POSIX shell, escaping the characters that
/// stay special within double quotes.
fn shell_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}
