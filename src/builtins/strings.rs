// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;

use anyhow::Result;

use crate::builtins;
use crate::schema::Schema;
use crate::value::{Value, ValueRepr};

pub fn register(m: &mut HashMap<&'static str, builtins::Builtin>) {
    m.insert(
        "fn::toString",
        builtins::Builtin {
            arg_schema: Schema::always,
            decl_schema: Schema::always,
            result_schema: Schema::string,
            invoke: to_string,
        },
    );
}

fn to_string(arg: &Value) -> Result<Value> {
    Ok(Value::new(ValueRepr::String(arg.to_string_value(false))))
}
