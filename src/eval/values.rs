// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use core::fmt::Write;

use indexmap::IndexMap;

use crate::number::Number;
use crate::schema::{ObjectSchema, Schema};
use crate::value::{Trace, Value, ValueRepr};

use super::exprs::ExprId;
use super::Evaluator;

/// An index into the evaluator's value arena. Values are shared freely
/// between expressions (memoization, import bases, accessor traces), so
/// they live in a single arena and are referred to by index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ValId(pub usize);

/// A value in the arena.
#[derive(Debug)]
pub(crate) struct ValData {
    /// The expression that defined this value.
    pub def: ExprId,

    /// The value this value overrides via an import, if any.
    pub base: Option<ValId>,

    pub schema: Schema,
    pub unknown: bool,
    pub secret: bool,
    pub repr: ValKind,
}

#[derive(Clone, Debug, Default)]
pub(crate) enum ValKind {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<ValId>),
    Object(IndexMap<String, ValId>),
}

impl Evaluator<'_> {
    pub(crate) fn new_val(&mut self, data: ValData) -> ValId {
        let id = ValId(self.vals.len());
        self.vals.push(data);
        id
    }

    /// A fresh unknown value defined by the given expression.
    pub(crate) fn new_unknown(&mut self, def: ExprId, schema: Schema) -> ValId {
        self.new_val(ValData {
            def,
            base: None,
            schema,
            unknown: true,
            secret: false,
            repr: ValKind::Null,
        })
    }

    pub(crate) fn contains_unknowns(&self, v: ValId) -> bool {
        let d = &self.vals[v.0];
        if d.unknown {
            return true;
        }
        match &d.repr {
            ValKind::Array(elements) => elements.iter().any(|&e| self.contains_unknowns(e)),
            ValKind::Object(properties) => {
                properties.values().any(|&p| self.contains_unknowns(p))
            }
            _ => false,
        }
    }

    pub(crate) fn contains_secrets(&self, v: ValId) -> bool {
        let d = &self.vals[v.0];
        if d.secret {
            return true;
        }
        match &d.repr {
            ValKind::Array(elements) => elements.iter().any(|&e| self.contains_secrets(e)),
            ValKind::Object(properties) => {
                properties.values().any(|&p| self.contains_secrets(p))
            }
            _ => false,
        }
    }

    /// Marks `v` unknown or secret if any of `others` contain unknown or
    /// secret values.
    pub(crate) fn combine(&mut self, v: ValId, others: &[ValId]) {
        let unknown = others.iter().any(|&o| self.contains_unknowns(o));
        let secret = others.iter().any(|&o| self.contains_secrets(o));
        let d = &mut self.vals[v.0];
        d.unknown |= unknown;
        d.secret |= secret;
    }

    pub(crate) fn val_is_object(&self, v: Option<ValId>) -> bool {
        matches!(
            v.map(|v| &self.vals[v.0].repr),
            Some(ValKind::Object(_))
        )
    }

    /// The keys of an object value and its base chain. Keys are ordered
    /// base-first so that overrides do not reorder properties: a key
    /// declared by an import stays where the import put it.
    pub(crate) fn val_keys(&self, v: ValId) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = Some(v);
        while let Some(c) = current {
            let d = &self.vals[c.0];
            if !matches!(d.repr, ValKind::Object(_)) {
                break;
            }
            chain.push(c);
            current = d.base;
        }

        let mut keys: Vec<String> = Vec::new();
        for &layer in chain.iter().rev() {
            if let ValKind::Object(properties) = &self.vals[layer.0].repr {
                for k in properties.keys() {
                    if !keys.iter().any(|have| have == k) {
                        keys.push(k.clone());
                    }
                }
            }
        }
        keys
    }

    /// Looks up a property on an object value, falling through to its base
    /// chain. Never synthesizes; returns None for unknown receivers.
    pub(crate) fn val_lookup(&self, v: ValId, key: &str) -> Option<ValId> {
        let d = &self.vals[v.0];
        if let ValKind::Object(properties) = &d.repr {
            if let Some(&p) = properties.get(key) {
                return Some(p);
            }
            return d.base.and_then(|b| self.val_lookup(b, key));
        }
        None
    }

    /// Resolves a property on a (possibly unknown) object value. Unknown
    /// receivers yield a synthesized unknown property whose schema is
    /// navigated from the receiver's schema.
    pub(crate) fn val_property(&mut self, v: Option<ValId>, key: &str) -> Option<ValId> {
        let v = v?;
        let d = &self.vals[v.0];
        match &d.repr {
            ValKind::Object(properties) => {
                if let Some(&p) = properties.get(key) {
                    return Some(p);
                }
                let base = d.base;
                self.val_property(base, key)
            }
            _ if d.unknown => {
                let (def, base, schema) = (d.def, d.base, d.schema.property(key));
                let base = self.val_property(base, key);
                Some(self.new_val(ValData {
                    def,
                    base,
                    schema,
                    unknown: true,
                    secret: false,
                    repr: ValKind::Null,
                }))
            }
            _ => None,
        }
    }

    /// Deep-copies a value so that a merge cannot disturb the original.
    pub(crate) fn copy_val(&mut self, v: ValId) -> ValId {
        let repr = self.vals[v.0].repr.clone();
        let repr = match repr {
            ValKind::Array(elements) => {
                ValKind::Array(elements.into_iter().map(|e| self.copy_val(e)).collect())
            }
            ValKind::Object(properties) => ValKind::Object(
                properties
                    .into_iter()
                    .map(|(k, p)| (k, self.copy_val(p)))
                    .collect(),
            ),
            scalar => scalar,
        };
        let d = &self.vals[v.0];
        let data = ValData {
            def: d.def,
            base: d.base,
            schema: d.schema.clone(),
            unknown: d.unknown,
            secret: d.secret,
            repr,
        };
        self.new_val(data)
    }

    /// Merges a base into a value, JSON-merge-patch style: objects merge
    /// key-by-key, everything else overrides. The base attaches beneath any
    /// base the value already has.
    pub(crate) fn merge_val(&mut self, v: ValId, base: Option<ValId>) {
        let base = match base {
            Some(b) if b != v => b,
            _ => return,
        };

        if let Some(own) = self.vals[v.0].base {
            self.merge_val(own, Some(base));
        } else {
            self.vals[v.0].base = Some(base);
            if let ValKind::Object(properties) = self.vals[v.0].repr.clone() {
                for (k, p) in properties {
                    let pb = self.val_property(Some(base), &k);
                    self.merge_val(p, pb);
                }
            }
        }

        if let Some(b) = self.vals[v.0].base {
            let merged = merged_schema(&self.vals[b.0].schema, &self.vals[v.0].schema);
            self.vals[v.0].schema = merged;
        }
    }

    /// Coerces a value to a string the way `Value::to_string_value` does.
    /// Returns the string plus whether the value contained unknowns or
    /// secrets.
    pub(crate) fn val_to_string(&self, v: ValId) -> (String, bool, bool) {
        let d = &self.vals[v.0];
        if d.unknown {
            return (String::new(), true, d.secret);
        }
        match &d.repr {
            ValKind::Null => (String::new(), false, d.secret),
            ValKind::Bool(b) => (b.to_string(), false, d.secret),
            ValKind::Number(n) => (n.to_string(), false, d.secret),
            ValKind::String(s) => (s.clone(), false, d.secret),
            ValKind::Array(elements) => {
                let mut out = String::new();
                let mut unknown = false;
                let mut secret = d.secret;
                for (i, &e) in elements.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    let (s, u, sec) = self.val_to_string(e);
                    unknown |= u;
                    secret |= sec;
                    let _ = write!(out, "{s:?}");
                }
                (out, unknown, secret)
            }
            ValKind::Object(_) => {
                let mut out = String::new();
                let mut unknown = false;
                let mut secret = d.secret;
                for (i, k) in self.val_keys(v).iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    let (s, u, sec) = match self.val_lookup(v, k) {
                        Some(p) => self.val_to_string(p),
                        None => (String::new(), false, false),
                    };
                    unknown |= u;
                    secret |= sec;
                    let _ = write!(out, "{k:?}={s:?}");
                }
                (out, unknown, secret)
            }
        }
    }

    /// Converts an arena value into its public form. Base values carry no
    /// environment of their own in their ranges once exported; missing
    /// environments fall back to `<import>`.
    pub(crate) fn export_val(&self, v: ValId, environment: &str) -> Value {
        let d = &self.vals[v.0];

        let repr = if d.unknown {
            ValueRepr::Null
        } else {
            match &d.repr {
                ValKind::Null => ValueRepr::Null,
                ValKind::Bool(b) => ValueRepr::Bool(*b),
                ValKind::Number(n) => ValueRepr::Number(n.clone()),
                ValKind::String(s) => ValueRepr::String(s.clone()),
                ValKind::Array(elements) => ValueRepr::Array(
                    elements
                        .iter()
                        .map(|&e| self.export_val(e, environment))
                        .collect(),
                ),
                ValKind::Object(_) => {
                    let mut properties = IndexMap::new();
                    for k in self.val_keys(v) {
                        if let Some(p) = self.val_lookup(v, &k) {
                            let exported = self.export_val(p, environment);
                            properties.insert(k, exported);
                        }
                    }
                    ValueRepr::Object(properties)
                }
            }
        };

        Value {
            value: repr,
            secret: d.secret,
            unknown: d.unknown,
            trace: Trace {
                def: self.def_range(d.def, environment),
                base: d
                    .base
                    .map(|b| Box::new(self.export_val(b, "<import>"))),
            },
        }
    }

    /// Converts a public value (e.g. a provider's output or a builtin's
    /// result) into an arena value defined by the given expression.
    pub(crate) fn unexport(&mut self, v: &Value, def: ExprId) -> ValId {
        let secret = v.secret || self.exprs[def.0].secret;

        let (repr, schema) = match &v.value {
            ValueRepr::Null => (ValKind::Null, Schema::null()),
            ValueRepr::Bool(b) => (
                ValKind::Bool(*b),
                Schema::boolean().with_const(serde_json::Value::Bool(*b)),
            ),
            ValueRepr::Number(n) => {
                let schema = match serde_json::to_value(n) {
                    Ok(c) => Schema::number().with_const(c),
                    Err(_) => Schema::number(),
                };
                (ValKind::Number(n.clone()), schema)
            }
            ValueRepr::String(s) => (
                ValKind::String(s.clone()),
                Schema::string().with_const(serde_json::Value::String(s.clone())),
            ),
            ValueRepr::Array(elements) => {
                let mut ids = Vec::with_capacity(elements.len());
                let mut items = Vec::with_capacity(elements.len());
                for e in elements {
                    let id = self.unexport(e, def);
                    items.push(self.vals[id.0].schema.clone());
                    ids.push(id);
                }
                (ValKind::Array(ids), Schema::tuple(items))
            }
            ValueRepr::Object(properties) => {
                let mut ids = IndexMap::with_capacity(properties.len());
                let mut props = IndexMap::with_capacity(properties.len());
                for (k, p) in properties {
                    let id = self.unexport(p, def);
                    props.insert(k.clone(), self.vals[id.0].schema.clone());
                    ids.insert(k.clone(), id);
                }
                (ValKind::Object(ids), Schema::record(props))
            }
        };

        let schema = if secret { schema.with_secret() } else { schema };
        self.new_val(ValData {
            def,
            base: None,
            schema,
            unknown: v.unknown,
            secret,
            repr,
        })
    }
}

/// Merges an override's schema atop its base's. Two object schemas merge
/// property-by-property; any other combination resolves to the override.
pub(crate) fn merged_schema(base: &Schema, top: &Schema) -> Schema {
    if base.type_() != "object" || top.type_() != "object" {
        return top.clone();
    }
    let (bo, to) = match (base.as_object(), top.as_object()) {
        (Some(bo), Some(to)) => (bo, to),
        _ => return top.clone(),
    };

    let mut properties: IndexMap<String, Schema> = bo.properties.clone();
    for (k, tp) in &to.properties {
        let merged = match properties.get(k) {
            Some(bp) => merged_schema(bp, tp),
            None => tp.clone(),
        };
        properties.insert(k.clone(), merged);
    }

    let additional = match (
        bo.additional_properties.as_deref(),
        to.additional_properties.as_deref(),
    ) {
        (Some(_), Some(_)) => Some(Schema::always()),
        (Some(b), None) => Some(b.clone()),
        (None, Some(t)) => Some(t.clone()),
        (None, None) => None,
    };

    let mut o = ObjectSchema::default();
    o.type_ = "object".to_string();
    let mut required: Vec<String> = properties.keys().cloned().collect();
    required.sort();
    o.required = required;
    o.properties = properties;
    o.additional_properties = additional.map(Box::new);
    o.secret = bo.secret || to.secret;
    Schema::Object(Box::new(o))
}
