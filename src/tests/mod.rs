// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

mod eval;
mod number;
mod parser;
mod projection;
mod schema;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use indexmap::IndexMap;

use crate::{
    check_environment, eval_environment, Cancel, Decrypter, Diagnostics, Encrypter, Environment,
    EnvironmentLoader, EvalOptions, ExecContext, Provider, ProviderLoader, Schema, Value,
};

/// A provider registry with a single `test` provider that echoes its inputs.
struct TestProviders;

impl ProviderLoader for TestProviders {
    fn load(&self, name: &str) -> Result<Arc<dyn Provider>> {
        match name {
            "test" => Ok(Arc::new(EchoProvider)),
            _ => bail!("unknown provider {name:?}"),
        }
    }
}

struct EchoProvider;

impl Provider for EchoProvider {
    fn schema(&self) -> (Schema, Schema) {
        let mut properties = IndexMap::new();
        properties.insert("address".to_string(), Schema::string());
        (
            Schema::record(properties.clone()),
            Schema::record(properties),
        )
    }

    fn open(&self, inputs: Value, _context: &ExecContext, _cancel: &Cancel) -> Result<Value> {
        Ok(inputs)
    }
}

/// An in-memory environment store.
struct MapEnvironments {
    environments: HashMap<String, String>,
}

impl MapEnvironments {
    fn new(environments: &[(&str, &str)]) -> Self {
        Self {
            environments: environments
                .iter()
                .map(|(name, text)| (name.to_string(), text.to_string()))
                .collect(),
        }
    }
}

impl EnvironmentLoader for MapEnvironments {
    fn load(&self, name: &str, _cancel: &Cancel) -> Result<(Vec<u8>, Option<Arc<dyn Decrypter>>)> {
        match self.environments.get(name) {
            Some(text) => Ok((text.clone().into_bytes(), None)),
            None => bail!("environment {name:?} not found"),
        }
    }
}

/// A crypto stub that stores plaintext as-is.
struct Passthrough;

impl Encrypter for Passthrough {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(plaintext.to_vec())
    }
}

impl Decrypter for Passthrough {
    fn decrypt(&self, ciphertext: &[u8], _cancel: &Cancel) -> Result<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }
}

struct Harness<'a> {
    name: &'a str,
    environments: MapEnvironments,
    context: ExecContext,
    decrypter: Option<Arc<dyn Decrypter>>,
    cancel: Cancel,
    show_secrets: bool,
}

impl Default for Harness<'_> {
    fn default() -> Self {
        Self {
            name: "test",
            environments: MapEnvironments::new(&[]),
            context: ExecContext::default(),
            decrypter: None,
            cancel: Cancel::new(),
            show_secrets: false,
        }
    }
}

impl Harness<'_> {
    fn with_environments(environments: &[(&str, &str)]) -> Self {
        Self {
            environments: MapEnvironments::new(environments),
            ..Self::default()
        }
    }

    fn eval(&self, document: &str) -> (Option<Environment>, Diagnostics) {
        eval_environment(&self.options(document))
    }

    fn check(&self, document: &str) -> (Option<Environment>, Diagnostics) {
        check_environment(&self.options(document))
    }

    fn options<'a>(&'a self, document: &'a str) -> EvalOptions<'a> {
        EvalOptions {
            name: self.name,
            document,
            providers: &TestProviders,
            environments: &self.environments,
            context: self.context.clone(),
            decrypter: self.decrypter.clone(),
            cancel: self.cancel.clone(),
            show_secrets: self.show_secrets,
        }
    }
}

/// Evaluates a standalone document and asserts that it produced no
/// diagnostics.
fn eval_ok(document: &str) -> Environment {
    let (env, diags) = Harness::default().eval(document);
    assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
    env.expect("expected an environment")
}

fn assert_error(diags: &Diagnostics, fragment: &str) {
    assert!(
        diags.iter().any(|d| d.summary.contains(fragment)),
        "no diagnostic contains {fragment:?}: {diags:?}"
    );
}
