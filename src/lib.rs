// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Envelop is an evaluation engine for composable configuration and secret
//! environments.
//!
//! Environments are defined in YAML documents that may import other
//! environments, reference values by path, interpolate strings, open
//! dynamic providers, and carry encrypted secrets. Evaluating a definition
//! with [`eval_environment`] yields an [`Environment`]: the resolved
//! property values, their JSON schema, and the expressions that produced
//! each value. [`check_environment`] performs the same analysis without
//! executing providers or decrypting secrets.
//!
//! ```no_run
//! use envelop::{eval_environment, EvalOptions};
//!
//! # fn run(providers: &dyn envelop::ProviderLoader, environments: &dyn envelop::EnvironmentLoader) {
//! let opts = EvalOptions {
//!     name: "dev",
//!     document: "values:\n  greeting: hello\n  message: ${greeting}, world\n",
//!     providers,
//!     environments,
//!     context: Default::default(),
//!     decrypter: None,
//!     cancel: Default::default(),
//!     show_secrets: false,
//! };
//! let (env, diags) = eval_environment(&opts);
//! # }
//! ```

mod builtins;
mod diagnostics;
mod environment;
mod eval;
mod expr;
mod lexer;
mod number;
mod parser;
mod project;
mod provider;
mod schema;
mod syntax;
mod utils;
mod value;

pub use diagnostics::{Diagnostic, Diagnostics, Pos, Range, Severity};
pub use environment::{Cancel, Environment, ExecContext, ANONYMOUS_ENVIRONMENT_NAME};
pub use eval::{
    check_environment, decode_ciphertext, encode_ciphertext, eval_environment, Decrypter,
    Encrypter, EvalOptions,
};
pub use expr::{Accessor, BuiltinExpr, Expr, ExprRepr, Interpolation, PropertyAccessor};
pub use lexer::Source;
pub use number::Number;
pub use parser::parse_document;
pub use project::{
    cleanup, render_environment_variables, secret_values, write_temporary_files, ProjectError,
    ProjectionOptions,
};
pub use provider::{EnvironmentLoader, Provider, ProviderLoader};
pub use schema::{union, ObjectSchema, Schema};
pub use syntax::{walk, Node, NodeValue, Syntax, Trivia};
pub use value::{Trace, Value, ValueRepr};

#[cfg(test)]
mod tests;
