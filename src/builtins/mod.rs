// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

pub mod encoding;
pub mod json;
pub mod strings;

use std::collections::HashMap;

use anyhow::Result;
use lazy_static::lazy_static;

use crate::schema::Schema;
use crate::value::Value;

pub type BuiltinFcn = fn(&Value) -> Result<Value>;

/// A single-argument builtin function.
///
/// The evaluator validates the argument against `arg_schema`, handles
/// unknown and secret propagation, and only invokes the function with a
/// fully-known value. `decl_schema` is the argument schema recorded on
/// exported expressions; it may be looser than `arg_schema` (e.g.
/// `fn::fromJSON` accepts any exported argument but evaluates strings
/// only). A `result_schema` of `Always` means the result keeps the schema
/// inferred from the returned value.
pub struct Builtin {
    pub arg_schema: fn() -> Schema,
    pub decl_schema: fn() -> Schema,
    pub result_schema: fn() -> Schema,
    pub invoke: BuiltinFcn,
}

lazy_static! {
    pub static ref BUILTINS: HashMap<&'static str, Builtin> = {
        let mut m: HashMap<&'static str, Builtin> = HashMap::new();

        encoding::register(&mut m);
        json::register(&mut m);
        strings::register(&mut m);

        m
    };
}

pub(crate) fn ensure_string(v: &Value) -> Result<&str> {
    v.as_str()
        .ok_or_else(|| anyhow::anyhow!("expected a string"))
}
