// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use anyhow::Result;

use crate::environment::{Cancel, ExecContext};
use crate::schema::Schema;
use crate::value::Value;

/// A dynamic source of environment values, invoked via `fn::open`.
///
/// Providers are identified by short names (e.g. `test`, `aws-login`).
/// `fn::open::<name>` and `fn::open` with `provider: <name>` are equivalent;
/// the short form's argument schema is the provider's input schema.
pub trait Provider: Sync {
    /// The provider's input and output schemas, in that order. Both are
    /// compiled by the evaluator before use.
    fn schema(&self) -> (Schema, Schema);

    /// Opens the provider with the given inputs. The inputs are an object
    /// value that has been validated against the input schema and contains
    /// no unknowns. Implementations should return promptly once `cancel`
    /// fires.
    fn open(&self, inputs: Value, context: &ExecContext, cancel: &Cancel) -> Result<Value>;
}

/// Loads providers by name on behalf of the evaluator.
pub trait ProviderLoader: Sync {
    fn load(&self, name: &str) -> Result<Arc<dyn Provider>>;
}

/// Loads imported environment definitions by name on behalf of the
/// evaluator.
///
/// The returned bytes are parsed by the core. The returned decrypter, if
/// any, is used for `fn::secret` ciphertexts within that environment.
/// Implementations should return promptly once `cancel` fires.
pub trait EnvironmentLoader: Sync {
    fn load(
        &self,
        name: &str,
        cancel: &Cancel,
    ) -> Result<(Vec<u8>, Option<Arc<dyn crate::eval::Decrypter>>)>;
}
