// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use core::fmt::Write;
use core::str::FromStr;

use indexmap::IndexMap;
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::diagnostics::Range;
use crate::number::Number;

/// The result of evaluating an expression within an environment definition.
///
/// In addition to its concrete representation, a value records whether it is
/// secret, whether it is unknown (e.g. because a provider could not be
/// executed), and a trace back to the expression that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct Value {
    pub value: ValueRepr,
    pub secret: bool,
    pub unknown: bool,
    pub trace: Trace,
}

/// The concrete representation of a value. Object properties preserve their
/// document order.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum ValueRepr {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
}

/// Provenance for a value: the range of its defining expression and the
/// value it overrode via an import, if any.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub def: Range,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<Box<Value>>,
}

impl Value {
    pub fn new(value: ValueRepr) -> Self {
        Self {
            value,
            secret: false,
            unknown: false,
            trace: Trace::default(),
        }
    }

    pub fn secret(value: ValueRepr) -> Self {
        Self {
            secret: true,
            ..Self::new(value)
        }
    }

    pub fn unknown() -> Self {
        Self {
            unknown: true,
            ..Self::new(ValueRepr::Null)
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            ValueRepr::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, Value>> {
        match &self.value {
            ValueRepr::Object(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match &self.value {
            ValueRepr::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Builds a value from plain JSON. The result carries no secret or
    /// unknown flags and no trace.
    pub fn from_json(v: serde_json::Value) -> anyhow::Result<Value> {
        let repr = match v {
            serde_json::Value::Null => ValueRepr::Null,
            serde_json::Value::Bool(b) => ValueRepr::Bool(b),
            serde_json::Value::Number(n) => ValueRepr::Number(Number::from_str(&n.to_string())?),
            serde_json::Value::String(s) => ValueRepr::String(s),
            serde_json::Value::Array(a) => {
                let mut out = Vec::with_capacity(a.len());
                for v in a {
                    out.push(Value::from_json(v)?);
                }
                ValueRepr::Array(out)
            }
            serde_json::Value::Object(m) => {
                let mut out = IndexMap::with_capacity(m.len());
                for (k, v) in m {
                    out.insert(k, Value::from_json(v)?);
                }
                ValueRepr::Object(out)
            }
        };
        Ok(Value::new(repr))
    }

    /// Converts the value into plain JSON, discarding secret- and
    /// unknown-ness. Unknown values render as the string `"<unknown>"`.
    pub fn to_json(&self) -> serde_json::Value {
        if self.unknown {
            return serde_json::Value::String("<unknown>".to_string());
        }
        match &self.value {
            ValueRepr::Null => serde_json::Value::Null,
            ValueRepr::Bool(b) => serde_json::Value::Bool(*b),
            ValueRepr::Number(n) => match serde_json::Number::from_str(n.as_str()) {
                Ok(n) => serde_json::Value::Number(n),
                Err(_) => serde_json::Value::Null,
            },
            ValueRepr::String(s) => serde_json::Value::String(s.clone()),
            ValueRepr::Array(a) => {
                serde_json::Value::Array(a.iter().map(Value::to_json).collect())
            }
            ValueRepr::Object(m) => serde_json::Value::Object(
                m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Coerces the value to a string. Unknown values render as
    /// `"[unknown]"`; with `redact`, secret values render as `"[secret]"`.
    /// Aggregates render their elements quoted and comma-separated, objects
    /// as `"key"="value"` pairs in document order.
    pub fn to_string_value(&self, redact: bool) -> String {
        if self.secret && redact {
            return "[secret]".to_string();
        }
        if self.unknown {
            return "[unknown]".to_string();
        }
        match &self.value {
            ValueRepr::Null => String::new(),
            ValueRepr::Bool(b) => b.to_string(),
            ValueRepr::Number(n) => n.to_string(),
            ValueRepr::String(s) => s.clone(),
            ValueRepr::Array(a) => {
                let mut out = String::new();
                for (i, v) in a.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    let _ = write!(out, "{:?}", v.to_string_value(redact));
                }
                out
            }
            ValueRepr::Object(m) => {
                let mut out = String::new();
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    let _ = write!(out, "{:?}={:?}", k, v.to_string_value(redact));
                }
                out
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut len = 1;
        if !matches!(self.value, ValueRepr::Null) {
            len += 1;
        }
        if self.secret {
            len += 1;
        }
        if self.unknown {
            len += 1;
        }

        let mut map = serializer.serialize_map(Some(len))?;
        if !matches!(self.value, ValueRepr::Null) {
            map.serialize_entry("value", &self.value)?;
        }
        if self.secret {
            map.serialize_entry("secret", &true)?;
        }
        if self.unknown {
            map.serialize_entry("unknown", &true)?;
        }
        map.serialize_entry("trace", &self.trace)?;
        map.end()
    }
}

impl Serialize for ValueRepr {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            ValueRepr::Null => serializer.serialize_unit(),
            ValueRepr::Bool(b) => serializer.serialize_bool(*b),
            ValueRepr::Number(n) => n.serialize(serializer),
            ValueRepr::String(s) => serializer.serialize_str(s),
            ValueRepr::Array(a) => a.serialize(serializer),
            ValueRepr::Object(m) => m.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawValue {
            #[serde(default)]
            value: Option<serde_json::Value>,
            #[serde(default)]
            secret: bool,
            #[serde(default)]
            unknown: bool,
            #[serde(default)]
            trace: Trace,
        }

        let raw = RawValue::deserialize(deserializer)?;
        let value = match raw.value {
            None => ValueRepr::Null,
            Some(v) => decode_repr(v).map_err(de::Error::custom)?,
        };
        Ok(Value {
            value,
            secret: raw.secret,
            unknown: raw.unknown,
            trace: raw.trace,
        })
    }
}

/// Decodes the `value` field of a serialized Value. Array elements and
/// object properties are themselves serialized Values.
fn decode_repr(v: serde_json::Value) -> anyhow::Result<ValueRepr> {
    match v {
        serde_json::Value::Null => Ok(ValueRepr::Null),
        serde_json::Value::Bool(b) => Ok(ValueRepr::Bool(b)),
        serde_json::Value::Number(n) => Ok(ValueRepr::Number(Number::from_str(&n.to_string())?)),
        serde_json::Value::String(s) => Ok(ValueRepr::String(s)),
        serde_json::Value::Array(a) => {
            let mut out = Vec::with_capacity(a.len());
            for v in a {
                out.push(serde_json::from_value::<Value>(v)?);
            }
            Ok(ValueRepr::Array(out))
        }
        serde_json::Value::Object(m) => {
            let mut out = IndexMap::with_capacity(m.len());
            for (k, v) in m {
                out.insert(k, serde_json::from_value::<Value>(v)?);
            }
            Ok(ValueRepr::Object(out))
        }
    }
}
