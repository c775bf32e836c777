// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::expr::{parse_property_access, Accessor, Expr};
use crate::schema::Schema;
use crate::value::{Value, ValueRepr};

/// The name given to environments evaluated from anonymous definitions.
pub const ANONYMOUS_ENVIRONMENT_NAME: &str = "<yaml>";

/// The result of evaluating an environment definition.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Environment {
    /// The expression that defined each top-level property.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub exprs: IndexMap<String, Expr>,

    /// The evaluated values, keyed by top-level property name.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub properties: IndexMap<String, Value>,

    /// The schema of `properties`.
    #[serde(default)]
    pub schema: Schema,

    /// The execution context values the environment was evaluated with.
    #[serde(
        rename = "executionContext",
        default,
        skip_serializing_if = "IndexMap::is_empty"
    )]
    pub execution_context: IndexMap<String, Value>,
}

impl Environment {
    /// Environment variables defined by the environment: scalar values in
    /// the top-level `environmentVariables` property, coerced to strings.
    /// The results remain Values in order to retain secret- and
    /// unknown-ness.
    pub fn environment_variables(&self) -> IndexMap<String, Value> {
        self.scalar_properties("environmentVariables")
    }

    /// Temporary files defined by the environment: scalar values in the
    /// top-level `files` property. The key of each entry is the name of the
    /// environment variable that should hold the path to the written file.
    pub fn temporary_files(&self) -> IndexMap<String, Value> {
        self.scalar_properties("files")
    }

    fn scalar_properties(&self, key: &str) -> IndexMap<String, Value> {
        let obj = match self.properties.get(key).and_then(Value::as_object) {
            Some(obj) => obj,
            None => return IndexMap::new(),
        };

        let mut out = IndexMap::new();
        for (k, v) in obj {
            match &v.value {
                ValueRepr::Array(_) | ValueRepr::Object(_) => {}
                _ => {
                    let str = v.to_string_value(false);
                    let mut sv = if v.secret {
                        Value::secret(ValueRepr::String(str))
                    } else {
                        Value::new(ValueRepr::String(str))
                    };
                    sv.unknown = v.unknown;
                    out.insert(k.clone(), sv);
                }
            }
        }
        out
    }

    /// Resolves a property path (e.g. `values.foo[1]`) against the
    /// environment's properties.
    pub fn value_at(&self, path: &str) -> Option<&Value> {
        let (accessors, diags) = parse_property_access(&Default::default(), "", path);
        if diags.has_errors() {
            return None;
        }

        let mut accessors = accessors.into_iter();
        let root = match accessors.next()?.accessor {
            Accessor::Key(k) => self.properties.get(&k)?,
            Accessor::Index(_) => return None,
        };

        let mut v = root;
        for a in accessors {
            v = match (&a.accessor, &v.value) {
                (Accessor::Key(k), ValueRepr::Object(m)) => m.get(k)?,
                (Accessor::Index(i), ValueRepr::Array(elems)) => elems.get(*i)?,
                _ => return None,
            };
        }
        Some(v)
    }
}

/// Ambient values available to providers and to `context` interpolations.
///
/// `currentEnvironment` and `rootEnvironment` are injected at evaluation
/// time and may not be supplied by the caller.
#[derive(Clone, Debug, Default)]
pub struct ExecContext {
    values: IndexMap<String, Value>,
}

impl ExecContext {
    pub fn new(values: IndexMap<String, Value>) -> Result<Self> {
        for key in ["currentEnvironment", "rootEnvironment"] {
            if values.contains_key(key) {
                bail!("forbidden context key {key:?}");
            }
        }
        Ok(Self { values })
    }

    /// The caller-supplied context values.
    pub fn values(&self) -> &IndexMap<String, Value> {
        &self.values
    }

    /// The context values visible while evaluating the named environment.
    pub fn values_for(
        &self,
        environment: &str,
        root_environment: &str,
    ) -> IndexMap<String, Value> {
        let root = if root_environment.is_empty() || root_environment == ANONYMOUS_ENVIRONMENT_NAME
        {
            environment
        } else {
            root_environment
        };

        let mut values = self.values.clone();
        values.insert(
            "currentEnvironment".to_string(),
            name_record(environment),
        );
        values.insert("rootEnvironment".to_string(), name_record(root));
        values
    }
}

fn name_record(name: &str) -> Value {
    let mut m = IndexMap::new();
    m.insert(
        "name".to_string(),
        Value::new(ValueRepr::String(name.to_string())),
    );
    Value::new(ValueRepr::Object(m))
}

/// A cooperative cancellation token shared between a caller and an
/// evaluation in progress. Once cancelled, providers are no longer invoked
/// and their results are left unknown.
#[derive(Clone, Debug, Default)]
pub struct Cancel(Arc<AtomicBool>);

impl Cancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
