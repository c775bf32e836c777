// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use indexmap::IndexMap;

use crate::diagnostics::Range;
use crate::expr::{Accessor, BuiltinExpr, Expr, ExprRepr, Interpolation, PropertyAccessor};
use crate::number::Number;
use crate::schema::Schema;

use super::values::ValId;
use super::Evaluator;

/// An index into the evaluator's expression arena. Expressions form a graph
/// (imports and property accesses both introduce sharing), so they are held
/// in a single arena and referred to by index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ExprId(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ExprState {
    Declared,
    Evaluating,
    Done,
}

/// An expression in the arena, together with its evaluation state.
#[derive(Debug)]
pub(crate) struct ExprData {
    /// The dotted path of the expression within its environment.
    pub path: String,
    pub range: Range,
    pub repr: ExprKind,

    /// The schema of the expression's result. Starts with the declared
    /// schema and is replaced with the result's schema once evaluated.
    pub schema: Schema,
    pub state: ExprState,

    /// True for the plaintext of `fn::secret` and everything declared
    /// beneath it; the flag spreads to the result when the expression is
    /// evaluated.
    pub secret: bool,

    /// The value this expression overrides via an import, if any.
    pub base: Option<ValId>,

    /// The memoized result.
    pub value: Option<ValId>,

    /// Ranges of the object's keys, if this is an object expression.
    pub key_ranges: IndexMap<String, Range>,
}

#[derive(Clone, Debug)]
pub(crate) enum ExprKind {
    /// A placeholder for an expression that failed to parse.
    Missing,
    Literal(LiteralKind),
    Interpolate(Vec<InterpPart>),
    Symbol(Vec<BoundAccessor>),
    List(Vec<ExprId>),
    Object(IndexMap<String, ExprId>),
    Builtin(Box<BuiltinCall>),
}

#[derive(Clone, Debug)]
pub(crate) enum LiteralKind {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
}

/// One segment of an interpolated string.
#[derive(Clone, Debug)]
pub(crate) struct InterpPart {
    pub text: String,
    pub access: Option<Vec<BoundAccessor>>,
}

/// An accessor that records the value it resolved to during evaluation.
#[derive(Clone, Debug)]
pub(crate) struct BoundAccessor {
    pub accessor: Accessor,
    pub range: Range,
    pub value: Option<ValId>,
}

#[derive(Clone, Debug)]
pub(crate) enum BuiltinCall {
    Open(OpenCall),
    Secret(SecretCall),
    Join(JoinCall),
    Unary(UnaryCall),
}

/// A call to `fn::open` or its short form `fn::open::<provider>`.
#[derive(Clone, Debug)]
pub(crate) struct OpenCall {
    pub name: String,
    pub name_range: Range,
    pub arg_range: Range,
    pub provider: ExprId,
    pub provider_name: String,
    pub inputs: ExprId,

    /// The provider's input schema. `Always` until the provider is loaded.
    pub input_schema: Schema,
}

#[derive(Clone, Debug)]
pub(crate) struct SecretCall {
    pub name_range: Range,
    pub arg_range: Range,
    pub arg: SecretArg,
}

#[derive(Clone, Debug)]
pub(crate) enum SecretArg {
    Plaintext(ExprId),
    Ciphertext { expr: ExprId, text: String },
}

#[derive(Clone, Debug)]
pub(crate) struct JoinCall {
    pub name_range: Range,
    pub arg_range: Range,
    pub delimiter: ExprId,
    pub values: ExprId,
}

/// A call to one of the registered single-argument builtins
/// (`fn::fromBase64`, `fn::fromJSON`, etc.).
#[derive(Clone, Debug)]
pub(crate) struct UnaryCall {
    pub name: String,
    pub name_range: Range,
    pub arg: ExprId,
}

impl Evaluator<'_> {
    /// The range of an expression, substituting an environment-only range
    /// for synthesized expressions that carry no location of their own.
    pub(crate) fn def_range(&self, x: ExprId, environment: &str) -> Range {
        let r = &self.exprs[x.0].range;
        if r.environment.is_empty() {
            Range::environment_only(environment)
        } else {
            r.clone()
        }
    }

    /// Converts an arena expression into its public, serializable form.
    pub(crate) fn export_expr(&self, x: ExprId, environment: &str) -> Expr {
        let d = &self.exprs[x.0];

        let repr = match &d.repr {
            ExprKind::Missing => ExprRepr::Literal(serde_json::Value::Null),
            ExprKind::Literal(lit) => ExprRepr::Literal(match lit {
                LiteralKind::Null => serde_json::Value::Null,
                LiteralKind::Bool(b) => serde_json::Value::Bool(*b),
                LiteralKind::Number(n) => {
                    serde_json::to_value(n).unwrap_or(serde_json::Value::Null)
                }
                LiteralKind::String(s) => serde_json::Value::String(s.clone()),
            }),
            ExprKind::Interpolate(parts) => ExprRepr::Interpolate(
                parts
                    .iter()
                    .map(|p| Interpolation {
                        text: p.text.clone(),
                        value: p
                            .access
                            .as_ref()
                            .map(|a| self.export_accessors(a, environment))
                            .unwrap_or_default(),
                    })
                    .collect(),
            ),
            ExprKind::Symbol(accessors) => {
                ExprRepr::Symbol(self.export_accessors(accessors, environment))
            }
            ExprKind::List(elements) => ExprRepr::List(
                elements
                    .iter()
                    .map(|&e| self.export_expr(e, environment))
                    .collect(),
            ),
            ExprKind::Object(properties) => ExprRepr::Object(
                properties
                    .iter()
                    .map(|(k, &p)| (k.clone(), self.export_expr(p, environment)))
                    .collect(),
            ),
            ExprKind::Builtin(call) => {
                ExprRepr::Builtin(Box::new(self.export_builtin(call, environment)))
            }
        };

        Expr {
            range: self.def_range(x, environment),
            schema: d.schema.clone(),
            base: d.base.map(|b| {
                Box::new(self.export_expr(self.vals[b.0].def, environment))
            }),
            key_ranges: d.key_ranges.clone(),
            repr,
        }
    }

    fn export_accessors(
        &self,
        accessors: &[BoundAccessor],
        environment: &str,
    ) -> Vec<PropertyAccessor> {
        accessors
            .iter()
            .map(|a| PropertyAccessor {
                accessor: a.accessor.clone(),
                value: match a.value {
                    Some(v) => self.def_range(self.vals[v.0].def, environment),
                    None => Range::environment_only(environment),
                },
            })
            .collect()
    }

    fn export_builtin(&self, call: &BuiltinCall, environment: &str) -> BuiltinExpr {
        match call {
            BuiltinCall::Open(open) => {
                if open.name == "fn::open" {
                    // The long form exposes the provider name and inputs as
                    // the two properties of the argument object.
                    let mut properties = IndexMap::new();
                    properties.insert("provider".to_string(), Schema::string());
                    properties.insert("inputs".to_string(), open.input_schema.clone());

                    let mut arg = IndexMap::new();
                    arg.insert(
                        "provider".to_string(),
                        self.export_expr(open.provider, environment),
                    );
                    arg.insert(
                        "inputs".to_string(),
                        self.export_expr(open.inputs, environment),
                    );

                    BuiltinExpr {
                        name: open.name.clone(),
                        name_range: open.name_range.clone(),
                        arg_schema: Schema::record(properties),
                        arg: Expr::new(
                            open.arg_range.clone(),
                            Schema::always(),
                            ExprRepr::Object(arg),
                        ),
                    }
                } else {
                    BuiltinExpr {
                        name: open.name.clone(),
                        name_range: open.name_range.clone(),
                        arg_schema: open.input_schema.clone(),
                        arg: self.export_expr(open.inputs, environment),
                    }
                }
            }
            BuiltinCall::Secret(secret) => {
                let arg = match &secret.arg {
                    SecretArg::Plaintext(p) => self.export_expr(*p, environment),
                    SecretArg::Ciphertext { expr, .. } => {
                        let mut arg = IndexMap::new();
                        arg.insert(
                            "ciphertext".to_string(),
                            self.export_expr(*expr, environment),
                        );
                        Expr::new(
                            secret.arg_range.clone(),
                            Schema::always(),
                            ExprRepr::Object(arg),
                        )
                    }
                };
                BuiltinExpr {
                    name: "fn::secret".to_string(),
                    name_range: secret.name_range.clone(),
                    arg_schema: Schema::always(),
                    arg,
                }
            }
            BuiltinCall::Join(join) => BuiltinExpr {
                name: "fn::join".to_string(),
                name_range: join.name_range.clone(),
                arg_schema: Schema::tuple(vec![
                    Schema::string(),
                    Schema::array(Schema::string()),
                ]),
                arg: Expr::new(
                    join.arg_range.clone(),
                    Schema::always(),
                    ExprRepr::List(vec![
                        self.export_expr(join.delimiter, environment),
                        self.export_expr(join.values, environment),
                    ]),
                ),
            },
            BuiltinCall::Unary(unary) => {
                let arg_schema = crate::builtins::BUILTINS
                    .get(unary.name.as_str())
                    .map(|b| (b.decl_schema)())
                    .unwrap_or_default();
                BuiltinExpr {
                    name: unary.name.clone(),
                    name_range: unary.name_range.clone(),
                    arg_schema,
                    arg: self.export_expr(unary.arg, environment),
                }
            }
        }
    }
}
