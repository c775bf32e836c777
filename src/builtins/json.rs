// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;

use anyhow::{anyhow, Result};

use crate::builtins::{self, ensure_string};
use crate::schema::Schema;
use crate::value::{Value, ValueRepr};

pub fn register(m: &mut HashMap<&'static str, builtins::Builtin>) {
    m.insert(
        "fn::fromJSON",
        builtins::Builtin {
            arg_schema: Schema::string,
            decl_schema: Schema::always,
            result_schema: Schema::always,
            invoke: from_json,
        },
    );
    m.insert(
        "fn::toJSON",
        builtins::Builtin {
            arg_schema: Schema::always,
            decl_schema: Schema::always,
            result_schema: Schema::string,
            invoke: to_json,
        },
    );
}

fn from_json(arg: &Value) -> Result<Value> {
    let text = ensure_string(arg)?;
    let json: serde_json::Value =
        serde_json::from_str(text).map_err(|e| anyhow!("decoding JSON string: {e}"))?;
    Value::from_json(json).map_err(|e| anyhow!("internal error: decoding JSON value: {e}"))
}

fn to_json(arg: &Value) -> Result<Value> {
    let text = serde_json::to_string(&arg.to_json())
        .map_err(|e| anyhow!("failed to encode JSON: {e}"))?;
    Ok(Value::new(ValueRepr::String(text)))
}
