// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use data_encoding::BASE64;

use crate::builtins::{self, ensure_string};
use crate::schema::Schema;
use crate::value::{Value, ValueRepr};

pub fn register(m: &mut HashMap<&'static str, builtins::Builtin>) {
    m.insert(
        "fn::fromBase64",
        builtins::Builtin {
            arg_schema: Schema::string,
            decl_schema: Schema::string,
            result_schema: Schema::string,
            invoke: from_base64,
        },
    );
    m.insert(
        "fn::toBase64",
        builtins::Builtin {
            arg_schema: Schema::string,
            decl_schema: Schema::string,
            result_schema: Schema::string,
            invoke: to_base64,
        },
    );
}

fn from_base64(arg: &Value) -> Result<Value> {
    let encoded = ensure_string(arg)?;
    let decoded = BASE64
        .decode(encoded.as_bytes())
        .map_err(|e| anyhow!("decoding base64 string: {e}"))?;
    Ok(Value::new(ValueRepr::String(
        String::from_utf8_lossy(&decoded).into_owned(),
    )))
}

fn to_base64(arg: &Value) -> Result<Value> {
    let plain = ensure_string(arg)?;
    Ok(Value::new(ValueRepr::String(BASE64.encode(plain.as_bytes()))))
}
