// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use core::fmt::{self, Formatter};
use std::sync::OnceLock;

use anyhow::{anyhow, bail, Result};
use indexmap::IndexMap;
use regex::Regex;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::number::Number;

/// A JSON-Schema-compatible type for environment values.
///
/// The `Never` and `Always` sentinels are distinct variants rather than an
/// empty object: `Never` matches nothing, `Always` matches anything, and
/// both round-trip to the JSON Schema boolean forms `false` and `true`.
#[derive(Clone, Debug, Default)]
pub enum Schema {
    Never,
    #[default]
    Always,
    Object(Box<ObjectSchema>),
}

/// The object form of a schema.
///
/// Numeric keywords are held as arbitrary-precision decimals and length
/// keywords as decimal text; both are checked, and the pattern compiled,
/// by [`Schema::compile`] rather than at construction.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ObjectSchema {
    // Core vocabulary
    #[serde(rename = "$defs", default, skip_serializing_if = "IndexMap::is_empty")]
    pub defs: IndexMap<String, Schema>,

    // Applicator vocabulary
    #[serde(rename = "$ref", default, skip_serializing_if = "String::is_empty")]
    pub ref_: String,
    #[serde(rename = "anyOf", default, skip_serializing_if = "Vec::is_empty")]
    pub any_of: Vec<Schema>,
    #[serde(rename = "oneOf", default, skip_serializing_if = "Vec::is_empty")]
    pub one_of: Vec<Schema>,
    #[serde(rename = "prefixItems", default, skip_serializing_if = "Vec::is_empty")]
    pub prefix_items: Vec<Schema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Schema>>,
    #[serde(
        rename = "additionalProperties",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub additional_properties: Option<Box<Schema>>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub properties: IndexMap<String, Schema>,

    // Validation vocabulary
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(rename = "const", default, skip_serializing_if = "Option::is_none")]
    pub const_: Option<serde_json::Value>,
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub enum_: Vec<serde_json::Value>,
    #[serde(rename = "multipleOf", default, skip_serializing_if = "Option::is_none")]
    pub multiple_of: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<Number>,
    #[serde(
        rename = "exclusiveMaximum",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub exclusive_maximum: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<Number>,
    #[serde(
        rename = "exclusiveMinimum",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub exclusive_minimum: Option<Number>,
    #[serde(rename = "maxLength", default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<Number>,
    #[serde(rename = "minLength", default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<Number>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pattern: String,
    #[serde(rename = "maxItems", default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<Number>,
    #[serde(rename = "minItems", default, skip_serializing_if = "Option::is_none")]
    pub min_items: Option<Number>,
    #[serde(rename = "uniqueItems", default, skip_serializing_if = "is_false")]
    pub unique_items: bool,
    #[serde(
        rename = "maxProperties",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub max_properties: Option<Number>,
    #[serde(
        rename = "minProperties",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub min_properties: Option<Number>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(
        rename = "dependentRequired",
        default,
        skip_serializing_if = "IndexMap::is_empty"
    )]
    pub dependent_required: IndexMap<String, Vec<String>>,

    // Metadata vocabulary
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deprecated: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<serde_json::Value>,

    // Environment extensions
    #[serde(default, skip_serializing_if = "is_false")]
    pub secret: bool,

    #[serde(skip)]
    compiled_pattern: OnceLock<Result<Option<Regex>, String>>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Schema {
    pub fn never() -> Schema {
        Schema::Never
    }

    pub fn always() -> Schema {
        Schema::Always
    }

    pub fn null() -> Schema {
        Schema::typed("null")
    }

    pub fn boolean() -> Schema {
        Schema::typed("boolean")
    }

    pub fn number() -> Schema {
        Schema::typed("number")
    }

    pub fn string() -> Schema {
        Schema::typed("string")
    }

    /// An array whose elements all match `items`.
    pub fn array(items: Schema) -> Schema {
        let mut o = ObjectSchema::typed("array");
        o.items = Some(Box::new(items));
        Schema::Object(Box::new(o))
    }

    /// A fixed-length array: trailing items match nothing.
    pub fn tuple(prefix_items: Vec<Schema>) -> Schema {
        let mut o = ObjectSchema::typed("array");
        o.prefix_items = prefix_items;
        o.items = Some(Box::new(Schema::Never));
        Schema::Object(Box::new(o))
    }

    /// An open object with the given properties.
    pub fn object(properties: IndexMap<String, Schema>) -> Schema {
        let mut o = ObjectSchema::typed("object");
        o.properties = properties;
        Schema::Object(Box::new(o))
    }

    /// A closed object: every listed property is required and no others are
    /// permitted.
    pub fn record(properties: IndexMap<String, Schema>) -> Schema {
        let mut o = ObjectSchema::typed("object");
        let mut required: Vec<String> = properties.keys().cloned().collect();
        required.sort();
        o.required = required;
        o.properties = properties;
        o.additional_properties = Some(Box::new(Schema::Never));
        Schema::Object(Box::new(o))
    }

    pub fn reference(ref_: impl Into<String>) -> Schema {
        let mut o = ObjectSchema::default();
        o.ref_ = ref_.into();
        Schema::Object(Box::new(o))
    }

    pub fn any_of(schemas: Vec<Schema>) -> Schema {
        let mut o = ObjectSchema::default();
        o.any_of = schemas;
        Schema::Object(Box::new(o))
    }

    pub fn one_of(schemas: Vec<Schema>) -> Schema {
        let mut o = ObjectSchema::default();
        o.one_of = schemas;
        Schema::Object(Box::new(o))
    }

    fn typed(type_: &str) -> Schema {
        Schema::Object(Box::new(ObjectSchema::typed(type_)))
    }

    pub fn is_never(&self) -> bool {
        matches!(self, Schema::Never)
    }

    pub fn is_always(&self) -> bool {
        matches!(self, Schema::Always)
    }

    pub fn as_object(&self) -> Option<&ObjectSchema> {
        match self {
            Schema::Object(o) => Some(o),
            _ => None,
        }
    }

    /// The declared primitive type, if any.
    pub fn type_(&self) -> &str {
        match self {
            Schema::Object(o) => &o.type_,
            _ => "",
        }
    }

    pub fn is_secret(&self) -> bool {
        matches!(self, Schema::Object(o) if o.secret)
    }

    // -- fluent modifiers --------------------------------------------------
    //
    // Modifiers on the sentinels are no-ops: there is nothing to refine.

    fn modify(mut self, f: impl FnOnce(&mut ObjectSchema)) -> Schema {
        if let Schema::Object(o) = &mut self {
            f(o);
        }
        self
    }

    pub fn with_const(self, v: serde_json::Value) -> Schema {
        self.modify(|o| o.const_ = Some(v))
    }

    pub fn with_enum(self, vs: Vec<serde_json::Value>) -> Schema {
        self.modify(|o| o.enum_ = vs)
    }

    pub fn with_pattern(self, pattern: impl Into<String>) -> Schema {
        self.modify(|o| o.pattern = pattern.into())
    }

    pub fn with_minimum(self, n: Number) -> Schema {
        self.modify(|o| o.minimum = Some(n))
    }

    pub fn with_maximum(self, n: Number) -> Schema {
        self.modify(|o| o.maximum = Some(n))
    }

    pub fn with_min_length(self, n: usize) -> Schema {
        self.modify(|o| o.min_length = Some(n.into()))
    }

    pub fn with_max_length(self, n: usize) -> Schema {
        self.modify(|o| o.max_length = Some(n.into()))
    }

    pub fn with_min_items(self, n: usize) -> Schema {
        self.modify(|o| o.min_items = Some(n.into()))
    }

    pub fn with_max_items(self, n: usize) -> Schema {
        self.modify(|o| o.max_items = Some(n.into()))
    }

    pub fn with_unique_items(self) -> Schema {
        self.modify(|o| o.unique_items = true)
    }

    pub fn with_required(self, names: Vec<String>) -> Schema {
        self.modify(|o| o.required = names)
    }

    pub fn with_dependent_required(self, deps: IndexMap<String, Vec<String>>) -> Schema {
        self.modify(|o| o.dependent_required = deps)
    }

    pub fn with_additional_properties(self, s: Schema) -> Schema {
        self.modify(|o| o.additional_properties = Some(Box::new(s)))
    }

    pub fn with_defs(self, defs: IndexMap<String, Schema>) -> Schema {
        self.modify(|o| o.defs = defs)
    }

    pub fn with_title(self, title: impl Into<String>) -> Schema {
        self.modify(|o| o.title = title.into())
    }

    pub fn with_description(self, description: impl Into<String>) -> Schema {
        self.modify(|o| o.description = description.into())
    }

    pub fn with_default(self, v: serde_json::Value) -> Schema {
        self.modify(|o| o.default = Some(v))
    }

    pub fn with_deprecated(self) -> Schema {
        self.modify(|o| o.deprecated = true)
    }

    pub fn with_secret(self) -> Schema {
        self.modify(|o| o.secret = true)
    }

    // -- navigation --------------------------------------------------------

    fn array_item(&self, index: usize) -> Schema {
        match self.as_object() {
            Some(o) if o.type_ == "array" => {
                if index < o.prefix_items.len() {
                    o.prefix_items[index].clone()
                } else {
                    o.items.as_deref().cloned().unwrap_or(Schema::Never)
                }
            }
            _ => Schema::Never,
        }
    }

    /// The schema of the element at the given index. Returns
    /// `prefixItems[index]` when in range, else `items`; `Never` for
    /// non-array schemas. Unions over `anyOf`/`oneOf` alternatives.
    pub fn item(&self, index: usize) -> Schema {
        let mut one_of = Vec::new();
        if let Some(o) = self.as_object() {
            one_of.extend(o.any_of.iter().map(|x| x.item(index)));
            one_of.extend(o.one_of.iter().map(|x| x.item(index)));
        }
        one_of.push(self.array_item(index));
        union(one_of)
    }

    fn object_property(&self, name: &str) -> Schema {
        match self.as_object() {
            Some(o) if o.type_ == "object" => match o.properties.get(name) {
                Some(p) => p.clone(),
                None => o
                    .additional_properties
                    .as_deref()
                    .cloned()
                    .unwrap_or(Schema::Never),
            },
            _ => Schema::Never,
        }
    }

    /// The schema of the named property. Returns `properties[name]` when
    /// present, else `additionalProperties`; `Never` for non-object
    /// schemas. Unions over `anyOf`/`oneOf` alternatives.
    pub fn property(&self, name: &str) -> Schema {
        let mut one_of = Vec::new();
        if let Some(o) = self.as_object() {
            one_of.extend(o.any_of.iter().map(|x| x.property(name)));
            one_of.extend(o.one_of.iter().map(|x| x.property(name)));
        }
        one_of.push(self.object_property(name));
        union(one_of)
    }

    /// Resolves a `$ref` against this schema's `$defs`. Only fragment
    /// references of the form `#/$defs/name` are supported.
    pub fn resolve_ref<'a>(&'a self, ref_: &str) -> Result<&'a Schema> {
        let name = ref_.strip_prefix("#/$defs/").ok_or_else(|| {
            anyhow!("only fragment references of the form #/$defs/ref are supported")
        })?;
        if name.contains('/') {
            bail!("only fragment references of the form #/$defs/ref are supported");
        }
        self.as_object()
            .and_then(|o| o.defs.get(name))
            .ok_or_else(|| anyhow!("unknown subschema {ref_}"))
    }

    /// Checks references, length keywords, and the pattern, compiling and
    /// caching the latter. Nested schemas are checked recursively against
    /// this schema's `$defs`.
    pub fn compile(&self) -> Result<()> {
        self.compile_in(self)
    }

    fn compile_in(&self, root: &Schema) -> Result<()> {
        let o = match self.as_object() {
            Some(o) => o,
            None => return Ok(()),
        };

        if !o.ref_.is_empty() {
            root.resolve_ref(&o.ref_)?;
        }

        for s in o.defs.values() {
            s.compile_in(root)?;
        }
        for s in o.any_of.iter().chain(&o.one_of).chain(&o.prefix_items) {
            s.compile_in(root)?;
        }
        if let Some(items) = &o.items {
            items.compile_in(root)?;
        }
        if let Some(additional) = &o.additional_properties {
            additional.compile_in(root)?;
        }
        for s in o.properties.values() {
            s.compile_in(root)?;
        }

        for (keyword, n) in [
            ("maxLength", &o.max_length),
            ("minLength", &o.min_length),
            ("maxItems", &o.max_items),
            ("minItems", &o.min_items),
            ("maxProperties", &o.max_properties),
            ("minProperties", &o.min_properties),
        ] {
            if let Some(n) = n {
                if n.to_usize().is_none() {
                    bail!("{keyword} must be a non-negative integer, got {n}");
                }
            }
        }

        o.compiled_pattern(&o.pattern)?;
        Ok(())
    }
}

impl ObjectSchema {
    fn typed(type_: &str) -> ObjectSchema {
        ObjectSchema {
            type_: type_.to_string(),
            ..ObjectSchema::default()
        }
    }

    fn compiled_pattern(&self, pattern: &str) -> Result<Option<&Regex>> {
        let compiled = self.compiled_pattern.get_or_init(|| {
            if pattern.is_empty() {
                return Ok(None);
            }
            Regex::new(pattern).map(Some).map_err(|e| e.to_string())
        });
        match compiled {
            Ok(re) => Ok(re.as_ref()),
            Err(e) => bail!("invalid pattern: {e}"),
        }
    }

    /// The compiled form of `pattern`, or None if no pattern is set.
    pub fn pattern_regex(&self) -> Result<Option<&Regex>> {
        self.compiled_pattern(&self.pattern)
    }
}

/// Collapses a list of alternatives: `Never`s are dropped, a single
/// survivor is returned as-is, and anything else becomes a `oneOf`.
pub fn union(schemas: Vec<Schema>) -> Schema {
    let mut one_of: Vec<Schema> = schemas.into_iter().filter(|s| !s.is_never()).collect();
    match one_of.len() {
        0 => Schema::Never,
        1 => one_of.pop().unwrap_or(Schema::Never),
        _ => Schema::one_of(one_of),
    }
}

impl Serialize for Schema {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Schema::Never => serializer.serialize_bool(false),
            Schema::Always => serializer.serialize_bool(true),
            Schema::Object(o) => o.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Schema {
    fn deserialize<D>(deserializer: D) -> Result<Schema, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = serde_json::Value::deserialize(deserializer)?;
        match v {
            serde_json::Value::Bool(true) => Ok(Schema::Always),
            serde_json::Value::Bool(false) => Ok(Schema::Never),
            v => {
                let o: ObjectSchema = serde_json::from_value(v).map_err(de::Error::custom)?;
                Ok(Schema::Object(Box::new(o)))
            }
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => f.write_str("<invalid schema>"),
        }
    }
}
