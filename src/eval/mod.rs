// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The environment evaluator.
//!
//! Evaluation proceeds in two phases. Declaration walks the parsed document
//! and builds an expression graph: every value becomes an expression, object
//! properties are linked to the values they override via imports, and
//! single-key `fn::` objects are decoded into builtin calls. Evaluation then
//! resolves the graph lazily: expressions are evaluated on first reference
//! and memoized, which makes forward references cheap and turns reference
//! cycles into diagnostics rather than hangs.

mod crypt;
mod exprs;
mod validate;
mod values;

pub use crypt::{decode_ciphertext, encode_ciphertext, Decrypter, Encrypter};

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::builtins::BUILTINS;
use crate::diagnostics::{Diagnostic, Diagnostics, Range};
use crate::environment::{Cancel, Environment, ExecContext, ANONYMOUS_ENVIRONMENT_NAME};
use crate::expr::{parse_interpolation, Accessor, ExprRepr, ParsedAccessor};
use crate::lexer::Source;
use crate::parser::parse_document;
use crate::schema::Schema;
use crate::provider::{EnvironmentLoader, ProviderLoader};
use crate::syntax::{node_error, Node, NodeValue};
use crate::utils::{join_key, nearest};
use crate::value::{Value, ValueRepr};

use exprs::{
    BoundAccessor, BuiltinCall, ExprData, ExprId, ExprKind, ExprState, InterpPart, JoinCall,
    LiteralKind, OpenCall, SecretArg, SecretCall, UnaryCall,
};
use validate::Validator;
use values::{merged_schema, ValData, ValId, ValKind};

/// Options for evaluating a single environment definition.
pub struct EvalOptions<'a> {
    /// The name of the environment being evaluated. Empty names evaluate as
    /// anonymous environments.
    pub name: &'a str,

    /// The YAML text of the environment definition.
    pub document: &'a str,

    /// Resolves the providers named by `fn::open` expressions.
    pub providers: &'a dyn ProviderLoader,

    /// Resolves the environments named by `imports`.
    pub environments: &'a dyn EnvironmentLoader,

    /// Ambient values made available under `context`.
    pub context: ExecContext,

    /// Decrypts `fn::secret` ciphertext in the root definition. Imported
    /// definitions use the decrypter returned by their loader.
    pub decrypter: Option<Arc<dyn Decrypter>>,

    /// Cooperative cancellation. Once cancelled, providers are no longer
    /// invoked and their results are left unknown.
    pub cancel: Cancel,

    /// When true, decrypted secrets appear in the result. Secrets remain
    /// flagged as secret either way.
    pub show_secrets: bool,
}

/// Evaluates an environment definition, executing providers and decrypting
/// secrets. Returns the evaluated environment, or None if the definition
/// was empty or failed to parse, along with any diagnostics.
pub fn eval_environment(opts: &EvalOptions) -> (Option<Environment>, Diagnostics) {
    eval_document(opts, false)
}

/// Checks an environment definition without executing providers or
/// decrypting secrets; their results are left unknown, with schemas intact
/// so that downstream references still typecheck.
pub fn check_environment(opts: &EvalOptions) -> (Option<Environment>, Diagnostics) {
    eval_document(opts, true)
}

fn eval_document(opts: &EvalOptions, validating: bool) -> (Option<Environment>, Diagnostics) {
    let name = if opts.name.is_empty() {
        ANONYMOUS_ENVIRONMENT_NAME
    } else {
        opts.name
    };

    let mut diags = Diagnostics::new();
    let source = match Source::from_contents(name.to_string(), opts.document.to_string()) {
        Ok(source) => source,
        Err(e) => {
            diags.push(Diagnostic::error(None, e.to_string(), ""));
            return (None, diags);
        }
    };

    let (node, parse_diags) = parse_document(name, &source);
    diags.extend(parse_diags);
    let node = match node {
        Some(node) if !diags.has_errors() => node,
        _ => return (None, diags),
    };

    let (doc, split_diags) = split_document(&node);
    diags.extend(split_diags);
    let doc = match doc {
        Some(doc) if !diags.has_errors() => doc,
        _ => return (None, diags),
    };
    if doc.is_empty() {
        return (None, diags);
    }

    let mut ev = Evaluator::new(opts, validating, name);
    let out = ev.eval_env(name, &doc, opts.decrypter.clone());
    diags.extend(std::mem::take(&mut ev.diags));

    let schema = match ev.vals[out.value.0].base {
        Some(base) => merged_schema(&ev.vals[base.0].schema, &ev.vals[out.value.0].schema),
        None => ev.vals[out.value.0].schema.clone(),
    };

    let exprs = match ev.export_expr(out.root, name).repr {
        ExprRepr::Object(exprs) => exprs,
        _ => IndexMap::new(),
    };
    let properties = match ev.export_val(out.value, name).value {
        ValueRepr::Object(properties) => properties,
        _ => IndexMap::new(),
    };
    let execution_context = match ev.export_val(out.context, name).value {
        ValueRepr::Object(context) => context,
        _ => IndexMap::new(),
    };

    let env = Environment {
        exprs,
        properties,
        schema,
        execution_context,
    };
    (Some(env), diags)
}

/// The top-level sections of an environment definition.
struct DocumentParts<'a> {
    imports: Vec<ImportDecl>,
    values: Option<&'a Node>,
}

struct ImportDecl {
    name: String,
    range: Range,
    path: String,
}

impl DocumentParts<'_> {
    fn is_empty(&self) -> bool {
        self.imports.is_empty()
            && self
                .values
                .and_then(Node::as_object)
                .is_none_or(|entries| entries.is_empty())
    }
}

fn split_document(node: &Node) -> (Option<DocumentParts<'_>>, Diagnostics) {
    let mut diags = Diagnostics::new();
    let entries = match &node.repr {
        NodeValue::Null => return (None, diags),
        NodeValue::Object(entries) => entries,
        _ => {
            diags.push(node_error(
                node,
                format!("expected an object, got {}", node.type_name()),
            ));
            return (None, diags);
        }
    };

    let mut parts = DocumentParts {
        imports: Vec::new(),
        values: None,
    };
    for (key_node, value_node) in entries {
        let key = match key_node.as_str() {
            Some(key) => key,
            None => {
                diags.push(node_error(key_node, "object keys must be strings"));
                continue;
            }
        };
        match key {
            "imports" => match &value_node.repr {
                NodeValue::Null => {}
                NodeValue::Array(entries) => {
                    for entry in entries {
                        match entry.as_str() {
                            Some(name) => parts.imports.push(ImportDecl {
                                name: name.to_string(),
                                range: entry.range().clone(),
                                path: entry.path().to_string(),
                            }),
                            None => diags.push(node_error(entry, "import names must be strings")),
                        }
                    }
                }
                _ => diags.push(node_error(
                    value_node,
                    format!("imports must be a list, got {}", value_node.type_name()),
                )),
            },
            "values" => match &value_node.repr {
                NodeValue::Null => {}
                NodeValue::Object(_) => parts.values = Some(value_node),
                _ => diags.push(node_error(
                    value_node,
                    format!("values must be an object, got {}", value_node.type_name()),
                )),
            },
            other => diags.push(Diagnostic::warning(
                Some(key_node.range().clone()),
                format!("unknown top-level key {other:?}"),
                key_node.path(),
            )),
        }
    }
    (Some(parts), diags)
}

/// Per-environment evaluation state shared between the root definition and
/// everything it imports.
pub(crate) struct Evaluator<'a> {
    validating: bool,
    show_secrets: bool,
    root_name: String,

    providers: &'a dyn ProviderLoader,
    environments: &'a dyn EnvironmentLoader,
    context: &'a ExecContext,
    cancel: &'a Cancel,

    imports: HashMap<String, Imported>,

    pub(crate) exprs: Vec<ExprData>,
    pub(crate) vals: Vec<ValData>,
    pub(crate) diags: Diagnostics,
}

struct Imported {
    evaluating: bool,
    value: Option<ValId>,
}

/// State for one environment definition within an evaluation: the root
/// definition or one of its (transitive) imports.
struct EnvFrame {
    name: String,
    decrypter: Option<Arc<dyn Decrypter>>,

    my_context: ValId,
    my_imports: ValId,

    /// The object expression holding the environment's top-level values.
    root: ExprId,
}

struct EvaluatedEnv {
    root: ExprId,
    value: ValId,
    context: ValId,
}

impl<'a> Evaluator<'a> {
    fn new(opts: &'a EvalOptions<'a>, validating: bool, root_name: &str) -> Evaluator<'a> {
        Evaluator {
            validating,
            show_secrets: opts.show_secrets,
            root_name: root_name.to_string(),
            providers: opts.providers,
            environments: opts.environments,
            context: &opts.context,
            cancel: &opts.cancel,
            imports: HashMap::new(),
            exprs: Vec::new(),
            vals: Vec::new(),
            diags: Diagnostics::new(),
        }
    }

    fn decrypt_secrets(&self) -> bool {
        !self.validating || self.show_secrets
    }

    fn new_expr(&mut self, data: ExprData) -> ExprId {
        let id = ExprId(self.exprs.len());
        self.exprs.push(data);
        id
    }

    fn expr_error(&mut self, x: ExprId, summary: String) {
        let d = &self.exprs[x.0];
        self.diags
            .push(Diagnostic::error(Some(d.range.clone()), summary, d.path.clone()));
    }

    fn expr_warning(&mut self, x: ExprId, summary: String) {
        let d = &self.exprs[x.0];
        self.diags
            .push(Diagnostic::warning(Some(d.range.clone()), summary, d.path.clone()));
    }

    fn access_error(&mut self, range: &Range, path: &str, summary: impl Into<String>) {
        self.diags
            .push(Diagnostic::error(Some(range.clone()), summary, path));
    }

    // -- environments ------------------------------------------------------

    fn eval_env(
        &mut self,
        name: &str,
        doc: &DocumentParts,
        decrypter: Option<Arc<dyn Decrypter>>,
    ) -> EvaluatedEnv {
        self.imports.insert(
            name.to_string(),
            Imported {
                evaluating: true,
                value: None,
            },
        );

        let my_context = self.evaluate_context(name);
        let (my_imports, base) = self.evaluate_imports(name, &doc.imports);

        let mut properties = IndexMap::new();
        let mut key_ranges = IndexMap::new();
        let entries: &[(Node, Node)] = doc.values.and_then(Node::as_object).unwrap_or(&[]);
        for (key_node, value_node) in entries {
            let key = match key_node.as_str() {
                Some(key) => key.to_string(),
                None => {
                    self.diags.push(node_error(key_node, "object keys must be strings"));
                    continue;
                }
            };
            if matches!(key.as_str(), "imports" | "context" | "environments") {
                self.diags
                    .push(node_error(key_node, format!("{key:?} is a reserved key")));
                continue;
            }
            if properties.contains_key(&key) {
                self.diags
                    .push(node_error(key_node, format!("duplicate key {key:?}")));
                continue;
            }
            let property_base = self.val_property(base, &key);
            let x = self.declare(key.clone(), Some(value_node), property_base);
            key_ranges.insert(key.clone(), key_node.range().clone());
            properties.insert(key, x);
        }

        let root = self.new_expr(ExprData {
            path: String::new(),
            range: Range::environment_only(name),
            repr: ExprKind::Object(properties),
            schema: Schema::object(IndexMap::new()).with_additional_properties(Schema::always()),
            state: ExprState::Declared,
            secret: false,
            base,
            value: None,
            key_ranges,
        });

        let mut frame = EnvFrame {
            name: name.to_string(),
            decrypter,
            my_context,
            my_imports,
            root,
        };
        let value = self.evaluate_expr(&mut frame, root, &Schema::always());

        if let Some(imported) = self.imports.get_mut(name) {
            imported.evaluating = false;
            imported.value = Some(value);
        }

        EvaluatedEnv {
            root,
            value,
            context: my_context,
        }
    }

    fn evaluate_context(&mut self, name: &str) -> ValId {
        let def = self.new_expr(ExprData {
            path: "context".to_string(),
            range: Range::environment_only(name),
            repr: ExprKind::Symbol(vec![BoundAccessor {
                accessor: Accessor::Key("context".to_string()),
                range: Range::environment_only(name),
                value: None,
            }]),
            schema: Schema::always(),
            state: ExprState::Done,
            secret: false,
            base: None,
            value: None,
            key_ranges: IndexMap::new(),
        });

        let root_name = self.root_name.clone();
        let context_values = self.context.values_for(name, &root_name);
        let value = self.unexport(&Value::new(ValueRepr::Object(context_values)), def);
        self.exprs[def.0].schema = self.vals[value.0].schema.clone();
        self.exprs[def.0].value = Some(value);
        value
    }

    fn evaluate_imports(&mut self, name: &str, imports: &[ImportDecl]) -> (ValId, Option<ValId>) {
        let mut base: Option<ValId> = None;
        let mut map: IndexMap<String, ValId> = IndexMap::new();
        for decl in imports {
            let value = match self.evaluate_import(decl) {
                Some(value) => value,
                None => continue,
            };
            map.insert(decl.name.clone(), value);

            // Later imports override earlier ones.
            let copied = self.copy_val(value);
            self.merge_val(copied, base);
            base = Some(copied);
        }

        let mut properties = IndexMap::new();
        for (k, &v) in &map {
            properties.insert(k.clone(), self.vals[v.0].schema.clone());
        }
        let schema = Schema::record(properties);
        let def = self.new_expr(ExprData {
            path: "imports".to_string(),
            range: Range::environment_only(name),
            repr: ExprKind::Symbol(vec![BoundAccessor {
                accessor: Accessor::Key("imports".to_string()),
                range: Range::environment_only(name),
                value: None,
            }]),
            schema: schema.clone(),
            state: ExprState::Done,
            secret: false,
            base: None,
            value: None,
            key_ranges: IndexMap::new(),
        });
        let value = self.new_val(ValData {
            def,
            base: None,
            schema,
            unknown: false,
            secret: false,
            repr: ValKind::Object(map),
        });
        self.exprs[def.0].value = Some(value);
        (value, base)
    }

    fn evaluate_import(&mut self, decl: &ImportDecl) -> Option<ValId> {
        if let Some(imported) = self.imports.get(&decl.name) {
            if imported.evaluating {
                self.diags.push(Diagnostic::error(
                    Some(decl.range.clone()),
                    format!("cyclic import of {}", decl.name),
                    decl.path.clone(),
                ));
                return None;
            }
            return imported.value;
        }

        if self.cancel.is_cancelled() {
            self.diags.push(Diagnostic::warning(
                Some(decl.range.clone()),
                "evaluation cancelled".to_string(),
                decl.path.clone(),
            ));
            return None;
        }

        tracing::debug!(environment = %decl.name, "loading imported environment");
        let (bytes, decrypter) = match self.environments.load(&decl.name, self.cancel) {
            Ok(loaded) => loaded,
            Err(e) => {
                self.diags.push(Diagnostic::error(
                    Some(decl.range.clone()),
                    e.to_string(),
                    decl.path.clone(),
                ));
                return None;
            }
        };
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                self.diags.push(Diagnostic::error(
                    Some(decl.range.clone()),
                    e.to_string(),
                    decl.path.clone(),
                ));
                return None;
            }
        };
        let source = match Source::from_contents(decl.name.clone(), text) {
            Ok(source) => source,
            Err(e) => {
                self.diags.push(Diagnostic::error(
                    Some(decl.range.clone()),
                    e.to_string(),
                    decl.path.clone(),
                ));
                return None;
            }
        };

        let (node, parse_diags) = parse_document(&decl.name, &source);
        let failed = parse_diags.has_errors();
        self.diags.extend(parse_diags);
        let node = match node {
            Some(node) if !failed => node,
            _ => return None,
        };

        let (doc, split_diags) = split_document(&node);
        let failed = split_diags.has_errors();
        self.diags.extend(split_diags);
        let doc = match doc {
            Some(doc) if !failed => doc,
            _ => return None,
        };

        let out = self.eval_env(&decl.name, &doc, decrypter);
        Some(out.value)
    }

    // -- declaration -------------------------------------------------------

    fn declare(&mut self, path: String, node: Option<&Node>, base: Option<ValId>) -> ExprId {
        let node = match node {
            Some(node) => node,
            None => {
                return self.new_expr(ExprData {
                    path,
                    range: Range::default(),
                    repr: ExprKind::Missing,
                    schema: Schema::always(),
                    state: ExprState::Declared,
                    secret: false,
                    base,
                    value: None,
                    key_ranges: IndexMap::new(),
                })
            }
        };
        let range = node.range().clone();

        let (repr, schema) = match &node.repr {
            NodeValue::Null => (ExprKind::Literal(LiteralKind::Null), Schema::null()),
            NodeValue::Boolean(b) => (
                ExprKind::Literal(LiteralKind::Bool(*b)),
                Schema::boolean().with_const(serde_json::Value::Bool(*b)),
            ),
            NodeValue::Number(n) => {
                let schema = match serde_json::to_value(n) {
                    Ok(c) => Schema::number().with_const(c),
                    Err(_) => Schema::number(),
                };
                (ExprKind::Literal(LiteralKind::Number(n.clone())), schema)
            }
            NodeValue::String(s) => self.declare_string(&range, node.path(), s),
            NodeValue::Array(elements) => {
                let ids = elements
                    .iter()
                    .enumerate()
                    .map(|(i, e)| self.declare(format!("{path}[{i}]"), Some(e), None))
                    .collect();
                (ExprKind::List(ids), Schema::array(Schema::always()))
            }
            NodeValue::Object(entries) => {
                if entries.len() == 1 {
                    if let Some((repr, schema)) =
                        self.decode_builtin(&path, &entries[0].0, &entries[0].1)
                    {
                        return self.new_expr(ExprData {
                            path,
                            range,
                            repr,
                            schema,
                            state: ExprState::Declared,
                            secret: false,
                            base,
                            value: None,
                            key_ranges: IndexMap::new(),
                        });
                    }
                }

                let mut properties = IndexMap::new();
                let mut key_ranges = IndexMap::new();
                for (key_node, value_node) in entries {
                    let key = match key_node.as_str() {
                        Some(key) => key.to_string(),
                        None => {
                            self.diags
                                .push(node_error(key_node, "object keys must be strings"));
                            continue;
                        }
                    };
                    if properties.contains_key(&key) {
                        self.diags
                            .push(node_error(key_node, format!("duplicate key {key:?}")));
                        continue;
                    }
                    let property_base = self.val_property(base, &key);
                    let p = self.declare(join_key(&path, &key), Some(value_node), property_base);
                    key_ranges.insert(key.clone(), key_node.range().clone());
                    properties.insert(key, p);
                }
                return self.new_expr(ExprData {
                    path,
                    range,
                    repr: ExprKind::Object(properties),
                    schema: Schema::object(IndexMap::new())
                        .with_additional_properties(Schema::always()),
                    state: ExprState::Declared,
                    secret: false,
                    base,
                    value: None,
                    key_ranges,
                });
            }
        };

        self.new_expr(ExprData {
            path,
            range,
            repr,
            schema,
            state: ExprState::Declared,
            secret: false,
            base,
            value: None,
            key_ranges: IndexMap::new(),
        })
    }

    /// Classifies a string scalar: a plain literal, a bare reference
    /// (`${a.b}`), or an interpolation.
    fn declare_string(&mut self, range: &Range, node_path: &str, s: &str) -> (ExprKind, Schema) {
        let (mut parts, parse_diags) = parse_interpolation(range, node_path, s);
        if parse_diags.has_errors() {
            self.diags.extend(parse_diags);
            return (ExprKind::Missing, Schema::always());
        }

        if parts.is_empty() {
            return (
                ExprKind::Literal(LiteralKind::String(s.to_string())),
                Schema::string().with_const(serde_json::Value::String(s.to_string())),
            );
        }
        if parts.len() == 1 {
            let only = &mut parts[0];
            match only.access.take() {
                None => {
                    let text = std::mem::take(&mut only.text);
                    let schema =
                        Schema::string().with_const(serde_json::Value::String(text.clone()));
                    return (ExprKind::Literal(LiteralKind::String(text)), schema);
                }
                Some(access) if only.text.is_empty() => {
                    return (ExprKind::Symbol(bind_accessors(access)), Schema::always());
                }
                Some(access) => only.access = Some(access),
            }
        }

        let parts = parts
            .into_iter()
            .map(|p| InterpPart {
                text: p.text,
                access: p.access.map(bind_accessors),
            })
            .collect();
        (ExprKind::Interpolate(parts), Schema::string())
    }

    /// Decodes a single-key `fn::` object into a builtin call. Returns None
    /// when the key names no builtin or the argument is malformed; the
    /// caller falls back to a plain object, and malformed arguments leave a
    /// diagnostic behind.
    fn decode_builtin(
        &mut self,
        path: &str,
        key_node: &Node,
        value_node: &Node,
    ) -> Option<(ExprKind, Schema)> {
        let key = key_node.as_str()?;
        let name_range = key_node.range().clone();
        let arg_range = value_node.range().clone();

        match key {
            "fn::open" => {
                if value_node.as_object().is_none() {
                    self.diags.push(node_error(
                        value_node,
                        "the argument to fn::open must be an object containing 'provider' and 'inputs'",
                    ));
                    return None;
                }
                let provider_node = match value_node.get("provider") {
                    Some(node) => node,
                    None => {
                        self.diags
                            .push(node_error(value_node, "missing provider name ('provider')"));
                        return None;
                    }
                };
                let inputs_node = match value_node.get("inputs") {
                    Some(node) => node,
                    None => {
                        self.diags
                            .push(node_error(value_node, "missing provider inputs ('inputs')"));
                        return None;
                    }
                };

                let provider = self.declare(join_key(path, "provider"), Some(provider_node), None);
                let provider_name = match &self.exprs[provider.0].repr {
                    ExprKind::Literal(LiteralKind::String(s)) => s.clone(),
                    _ => {
                        self.diags.push(node_error(
                            provider_node,
                            "provider name must be a string literal",
                        ));
                        return None;
                    }
                };
                let inputs = self.declare(join_key(path, "inputs"), Some(inputs_node), None);
                Some((
                    ExprKind::Builtin(Box::new(BuiltinCall::Open(OpenCall {
                        name: key.to_string(),
                        name_range,
                        arg_range,
                        provider,
                        provider_name,
                        inputs,
                        input_schema: Schema::always(),
                    }))),
                    Schema::always(),
                ))
            }
            "fn::secret" => {
                if let Some(entries) = value_node.as_object() {
                    if entries.len() == 1 && entries[0].0.as_str() == Some("ciphertext") {
                        let ct =
                            self.declare(join_key(path, "ciphertext"), Some(&entries[0].1), None);
                        if let ExprKind::Literal(LiteralKind::String(text)) = &self.exprs[ct.0].repr
                        {
                            let text = text.clone();
                            self.exprs[ct.0].secret = true;
                            return Some((
                                ExprKind::Builtin(Box::new(BuiltinCall::Secret(SecretCall {
                                    name_range,
                                    arg_range,
                                    arg: SecretArg::Ciphertext { expr: ct, text },
                                }))),
                                Schema::string(),
                            ));
                        }
                    }
                }
                let plaintext = self.declare(path.to_string(), Some(value_node), None);
                self.mark_secret(plaintext);
                Some((
                    ExprKind::Builtin(Box::new(BuiltinCall::Secret(SecretCall {
                        name_range,
                        arg_range,
                        arg: SecretArg::Plaintext(plaintext),
                    }))),
                    Schema::string(),
                ))
            }
            "fn::join" => {
                let elements = match value_node.as_array() {
                    Some(elements) if elements.len() == 2 => elements,
                    _ => {
                        self.diags.push(node_error(
                            value_node,
                            "the argument to fn::join must be a two-valued list",
                        ));
                        return None;
                    }
                };
                let delimiter = self.declare(format!("{path}[0]"), Some(&elements[0]), None);
                let values = self.declare(format!("{path}[1]"), Some(&elements[1]), None);
                Some((
                    ExprKind::Builtin(Box::new(BuiltinCall::Join(JoinCall {
                        name_range,
                        arg_range,
                        delimiter,
                        values,
                    }))),
                    Schema::string(),
                ))
            }
            _ if BUILTINS.contains_key(key) => {
                let builtin = BUILTINS.get(key)?;
                let arg = self.declare(path.to_string(), Some(value_node), None);
                Some((
                    ExprKind::Builtin(Box::new(BuiltinCall::Unary(UnaryCall {
                        name: key.to_string(),
                        name_range,
                        arg,
                    }))),
                    (builtin.result_schema)(),
                ))
            }
            _ if key.starts_with("fn::open::") && key.len() > "fn::open::".len() => {
                let provider_name = key["fn::open::".len()..].to_string();
                if matches!(value_node.repr, NodeValue::Null) {
                    self.diags
                        .push(node_error(value_node, "missing provider inputs"));
                    return None;
                }
                let provider = self.new_expr(ExprData {
                    path: join_key(path, "provider"),
                    range: name_range.clone(),
                    repr: ExprKind::Literal(LiteralKind::String(provider_name.clone())),
                    schema: Schema::string()
                        .with_const(serde_json::Value::String(provider_name.clone())),
                    state: ExprState::Declared,
                    secret: false,
                    base: None,
                    value: None,
                    key_ranges: IndexMap::new(),
                });
                let inputs = self.declare(path.to_string(), Some(value_node), None);
                Some((
                    ExprKind::Builtin(Box::new(BuiltinCall::Open(OpenCall {
                        name: key.to_string(),
                        name_range,
                        arg_range,
                        provider,
                        provider_name,
                        inputs,
                        input_schema: Schema::always(),
                    }))),
                    Schema::always(),
                ))
            }
            _ => {
                if key.to_ascii_lowercase().starts_with("fn::") {
                    self.diags
                        .push(node_error(key_node, "'fn::' is a reserved prefix"));
                }
                None
            }
        }
    }

    /// Marks an expression and its structural children secret. `fn::secret`
    /// over a container marks every element, so a reference into the
    /// container stays secret.
    fn mark_secret(&mut self, x: ExprId) {
        self.exprs[x.0].secret = true;
        let children: Vec<ExprId> = match &self.exprs[x.0].repr {
            ExprKind::List(elements) => elements.clone(),
            ExprKind::Object(properties) => properties.values().copied().collect(),
            _ => Vec::new(),
        };
        for child in children {
            self.mark_secret(child);
        }
    }

    // -- evaluation --------------------------------------------------------

    fn evaluate_expr(&mut self, f: &mut EnvFrame, x: ExprId, accept: &Schema) -> ValId {
        match self.exprs[x.0].state {
            ExprState::Done => {
                if let Some(value) = self.exprs[x.0].value {
                    return value;
                }
                return self.new_unknown(x, Schema::always());
            }
            ExprState::Evaluating => {
                let path = self.exprs[x.0].path.clone();
                self.expr_error(x, format!("cyclic reference to {path}"));
                return self.new_unknown(x, Schema::always());
            }
            ExprState::Declared => self.exprs[x.0].state = ExprState::Evaluating,
        }

        let kind = self.exprs[x.0].repr.clone();
        let value = match kind {
            ExprKind::Missing => {
                let schema = self.exprs[x.0].schema.clone();
                self.new_unknown(x, schema)
            }
            ExprKind::Literal(lit) => {
                let schema = self.exprs[x.0].schema.clone();
                let repr = match lit {
                    LiteralKind::Null => ValKind::Null,
                    LiteralKind::Bool(b) => ValKind::Bool(b),
                    LiteralKind::Number(n) => ValKind::Number(n),
                    LiteralKind::String(s) => ValKind::String(s),
                };
                self.new_val(ValData {
                    def: x,
                    base: None,
                    schema,
                    unknown: false,
                    secret: false,
                    repr,
                })
            }
            ExprKind::Interpolate(mut parts) => {
                let value = self.evaluate_interpolate(f, x, &mut parts);
                self.exprs[x.0].repr = ExprKind::Interpolate(parts);
                value
            }
            ExprKind::Symbol(mut accessors) => {
                let value = self.evaluate_property_access(f, x, &mut accessors, accept);
                self.exprs[x.0].repr = ExprKind::Symbol(accessors);
                value
            }
            ExprKind::List(elements) => {
                let mut ids = Vec::with_capacity(elements.len());
                let mut items = Vec::with_capacity(elements.len());
                for (i, &e) in elements.iter().enumerate() {
                    let v = self.evaluate_expr(f, e, &accept.item(i));
                    items.push(self.vals[v.0].schema.clone());
                    ids.push(v);
                }
                self.new_val(ValData {
                    def: x,
                    base: None,
                    schema: Schema::tuple(items),
                    unknown: false,
                    secret: false,
                    repr: ValKind::Array(ids),
                })
            }
            ExprKind::Object(properties) => {
                let mut ids = IndexMap::with_capacity(properties.len());
                let mut props = IndexMap::with_capacity(properties.len());
                for (k, &p) in &properties {
                    let v = self.evaluate_expr(f, p, &accept.property(k));
                    props.insert(k.clone(), self.vals[v.0].schema.clone());
                    ids.insert(k.clone(), v);
                }
                self.new_val(ValData {
                    def: x,
                    base: None,
                    schema: Schema::record(props),
                    unknown: false,
                    secret: false,
                    repr: ValKind::Object(ids),
                })
            }
            ExprKind::Builtin(call) => {
                let (value, call) = self.evaluate_builtin(f, x, *call);
                self.exprs[x.0].repr = ExprKind::Builtin(Box::new(call));
                value
            }
        };

        if self.exprs[x.0].secret {
            self.vals[value.0].secret = true;
        }
        let base = self.exprs[x.0].base;
        self.merge_val(value, base);
        self.exprs[x.0].schema = self.vals[value.0].schema.clone();
        self.exprs[x.0].value = Some(value);
        self.exprs[x.0].state = ExprState::Done;
        value
    }

    /// Evaluates an expression and validates the result against the given
    /// schema. Returns the value and whether validation passed.
    fn evaluate_typed_expr(
        &mut self,
        f: &mut EnvFrame,
        x: ExprId,
        accept: &Schema,
    ) -> (ValId, bool) {
        let value = self.evaluate_expr(f, x, accept);
        let mut validator = Validator::default();
        let ok = validator.validate_value(self, value, accept);
        self.diags.extend(validator.diags);
        (value, ok)
    }

    fn evaluate_interpolate(
        &mut self,
        f: &mut EnvFrame,
        x: ExprId,
        parts: &mut [InterpPart],
    ) -> ValId {
        let mut out = String::new();
        let mut unknown = false;
        let mut secret = false;
        for part in parts.iter_mut() {
            out.push_str(&part.text);
            if let Some(access) = part.access.as_mut() {
                let v = self.evaluate_property_access(f, x, access, &Schema::always());
                let (s, u, sec) = self.val_to_string(v);
                unknown |= u;
                secret |= sec;
                if !u {
                    out.push_str(&s);
                }
            }
        }

        let schema = self.exprs[x.0].schema.clone();
        self.new_val(ValData {
            def: x,
            base: None,
            schema,
            unknown,
            secret,
            repr: ValKind::String(out),
        })
    }

    // -- property access ---------------------------------------------------

    fn evaluate_property_access(
        &mut self,
        f: &mut EnvFrame,
        x: ExprId,
        accessors: &mut Vec<BoundAccessor>,
        accept: &Schema,
    ) -> ValId {
        let resolved = self.evaluate_expr_access(f, x, accessors, accept);
        // Copy so that merging the consumer's base cannot disturb the
        // referenced value.
        let copied = self.copy_val(resolved);
        self.vals[copied.0].def = x;
        copied
    }

    fn evaluate_expr_access(
        &mut self,
        f: &mut EnvFrame,
        x: ExprId,
        accessors: &mut Vec<BoundAccessor>,
        accept: &Schema,
    ) -> ValId {
        let path = self.exprs[x.0].path.clone();
        if accessors.is_empty() {
            return self.new_unknown(x, Schema::always());
        }

        match accessors[0].accessor.as_key() {
            Some("imports") => {
                let receiver = f.my_imports;
                accessors[0].value = Some(receiver);
                return self.evaluate_value_access(x, &path, receiver, accessors, 1);
            }
            Some("context") => {
                let receiver = f.my_context;
                accessors[0].value = Some(receiver);
                return self.evaluate_value_access(x, &path, receiver, accessors, 1);
            }
            _ => {}
        }

        let mut receiver = f.root;
        let mut i = 0;
        while i < accessors.len() {
            let repr = self.exprs[receiver.0].repr.clone();
            match repr {
                ExprKind::List(elements) => {
                    let idx =
                        match self.array_index(&accessors[i], &path, Some(elements.len())) {
                            Some(idx) => idx,
                            None => return self.invalid_access(x, accessors, i),
                        };
                    receiver = elements[idx];
                }
                ExprKind::Object(properties) => {
                    let key = match self.object_key(&accessors[i], &path) {
                        Some(key) => key,
                        None => return self.invalid_access(x, accessors, i),
                    };
                    match properties.get(&key) {
                        Some(&p) => receiver = p,
                        None => {
                            let base = self.exprs[receiver.0].base;
                            if self.val_is_object(base) {
                                if let Some(b) = base {
                                    return self
                                        .evaluate_value_access(x, &path, b, accessors, i);
                                }
                            }
                            let mut candidates: Vec<String> =
                                properties.keys().cloned().collect();
                            if let Some(b) = base {
                                for k in self.val_keys(b) {
                                    if !candidates.contains(&k) {
                                        candidates.push(k);
                                    }
                                }
                            }
                            let range = accessors[i].range.clone();
                            self.unknown_property_error(&range, &path, &key, &candidates);
                            return self.invalid_access(x, accessors, i);
                        }
                    }
                }
                ExprKind::Builtin(call) => {
                    // References reach through `fn::secret` to its
                    // plaintext; the secret flag follows along.
                    if let BuiltinCall::Secret(SecretCall {
                        arg: SecretArg::Plaintext(p),
                        ..
                    }) = *call
                    {
                        receiver = p;
                        continue;
                    }
                    let rv = self.evaluate_expr(f, receiver, accept);
                    return self.evaluate_value_access(x, &path, rv, accessors, i);
                }
                _ => {
                    let rv = self.evaluate_expr(f, receiver, accept);
                    return self.evaluate_value_access(x, &path, rv, accessors, i);
                }
            }

            // Record a trace value for the accessor without forcing the
            // intermediate expression to evaluate.
            let base = self.exprs[receiver.0].base;
            let schema = self.exprs[receiver.0].schema.clone();
            let trace = self.new_val(ValData {
                def: receiver,
                base,
                schema,
                unknown: false,
                secret: false,
                repr: ValKind::Null,
            });
            accessors[i].value = Some(trace);
            i += 1;
        }
        self.evaluate_expr(f, receiver, accept)
    }

    fn evaluate_value_access(
        &mut self,
        x: ExprId,
        path: &str,
        mut receiver: ValId,
        accessors: &mut Vec<BoundAccessor>,
        mut i: usize,
    ) -> ValId {
        while i < accessors.len() {
            if self.vals[receiver.0].unknown {
                let schema = self.vals[receiver.0].schema.clone();
                return self.evaluate_unknown_access(x, path, schema, accessors, i);
            }
            let repr = self.vals[receiver.0].repr.clone();
            match repr {
                ValKind::Array(elements) => {
                    let idx =
                        match self.array_index(&accessors[i], path, Some(elements.len())) {
                            Some(idx) => idx,
                            None => return self.invalid_access(x, accessors, i),
                        };
                    receiver = elements[idx];
                }
                ValKind::Object(properties) => {
                    let key = match self.object_key(&accessors[i], path) {
                        Some(key) => key,
                        None => return self.invalid_access(x, accessors, i),
                    };
                    match properties.get(&key) {
                        Some(&p) => receiver = p,
                        None => {
                            let base = self.vals[receiver.0].base;
                            if self.val_is_object(base) {
                                if let Some(b) = base {
                                    receiver = b;
                                    continue;
                                }
                            }
                            let candidates = self.val_keys(receiver);
                            let range = accessors[i].range.clone();
                            self.unknown_property_error(&range, path, &key, &candidates);
                            return self.invalid_access(x, accessors, i);
                        }
                    }
                }
                _ => {
                    let range = accessors[i].range.clone();
                    self.access_error(&range, path, "receiver must be an array or an object");
                    return self.invalid_access(x, accessors, i);
                }
            }
            accessors[i].value = Some(receiver);
            i += 1;
        }
        receiver
    }

    /// Navigates the remaining accessors through an unknown receiver's
    /// schema, synthesizing unknown values along the way.
    fn evaluate_unknown_access(
        &mut self,
        x: ExprId,
        path: &str,
        mut schema: Schema,
        accessors: &mut [BoundAccessor],
        mut i: usize,
    ) -> ValId {
        let mut last = None;
        while i < accessors.len() {
            if !schema.is_always() {
                match schema.type_() {
                    "array" => {
                        // Only a fixed-length array schema can bound-check
                        // the index.
                        let len = schema.as_object().and_then(|o| {
                            match o.items.as_deref() {
                                Some(items) if items.is_never() => Some(o.prefix_items.len()),
                                _ => None,
                            }
                        });
                        let idx = match self.array_index(&accessors[i], path, len) {
                            Some(idx) => idx,
                            None => return self.invalid_access(x, accessors, i),
                        };
                        schema = schema.item(idx);
                    }
                    "object" => {
                        let key = match self.object_key(&accessors[i], path) {
                            Some(key) => key,
                            None => return self.invalid_access(x, accessors, i),
                        };
                        schema = schema.property(&key);
                    }
                    _ => {
                        let range = accessors[i].range.clone();
                        self.access_error(
                            &range,
                            path,
                            "receiver must be an array or an object",
                        );
                        return self.invalid_access(x, accessors, i);
                    }
                }
            }
            let v = self.new_unknown(x, schema.clone());
            accessors[i].value = Some(v);
            last = Some(v);
            i += 1;
        }
        match last {
            Some(v) => v,
            None => self.new_unknown(x, schema),
        }
    }

    /// Fills the remaining accessors with unknown values after an access
    /// error so that exported traces stay complete.
    fn invalid_access(
        &mut self,
        x: ExprId,
        accessors: &mut [BoundAccessor],
        i: usize,
    ) -> ValId {
        let mut last = None;
        for j in i..accessors.len() {
            let v = self.new_unknown(x, Schema::always());
            accessors[j].value = Some(v);
            last = Some(v);
        }
        match last {
            Some(v) => v,
            None => self.new_unknown(x, Schema::always()),
        }
    }

    fn array_index(
        &mut self,
        accessor: &BoundAccessor,
        path: &str,
        len: Option<usize>,
    ) -> Option<usize> {
        match &accessor.accessor {
            Accessor::Key(_) => {
                self.access_error(
                    &accessor.range,
                    path,
                    "cannot access an array element using a property name",
                );
                None
            }
            Accessor::Index(i) => match len {
                Some(n) if *i >= n => {
                    self.access_error(
                        &accessor.range,
                        path,
                        format!("array index {i} out-of-bounds for array of length {n}"),
                    );
                    None
                }
                _ => Some(*i),
            },
        }
    }

    fn object_key(&mut self, accessor: &BoundAccessor, path: &str) -> Option<String> {
        match &accessor.accessor {
            Accessor::Key(k) => Some(k.clone()),
            Accessor::Index(_) => {
                self.access_error(
                    &accessor.range,
                    path,
                    "cannot access an object property using an integer index",
                );
                None
            }
        }
    }

    fn unknown_property_error(
        &mut self,
        range: &Range,
        path: &str,
        key: &str,
        candidates: &[String],
    ) {
        use core::fmt::Write;

        let mut msg = format!("{key:?} does not exist");
        match nearest(key, candidates.iter().map(String::as_str)) {
            Some(m) => {
                let _ = write!(msg, "; did you mean {m:?}?");
            }
            None => msg.push('.'),
        }
        if !candidates.is_empty() {
            let _ = write!(msg, " Existing fields are: {}", candidates.join(", "));
        }
        self.diags
            .push(Diagnostic::error(Some(range.clone()), msg, path));
    }

    // -- builtins ----------------------------------------------------------

    fn evaluate_builtin(
        &mut self,
        f: &mut EnvFrame,
        x: ExprId,
        call: BuiltinCall,
    ) -> (ValId, BuiltinCall) {
        match call {
            BuiltinCall::Open(open) => {
                let (value, open) = self.evaluate_builtin_open(f, x, open);
                (value, BuiltinCall::Open(open))
            }
            BuiltinCall::Secret(secret) => {
                let value = self.evaluate_builtin_secret(f, x, &secret);
                (value, BuiltinCall::Secret(secret))
            }
            BuiltinCall::Join(join) => {
                let value = self.evaluate_builtin_join(f, x, &join);
                (value, BuiltinCall::Join(join))
            }
            BuiltinCall::Unary(unary) => {
                let value = self.evaluate_builtin_unary(f, x, &unary);
                (value, BuiltinCall::Unary(unary))
            }
        }
    }

    fn evaluate_builtin_open(
        &mut self,
        f: &mut EnvFrame,
        x: ExprId,
        mut call: OpenCall,
    ) -> (ValId, OpenCall) {
        tracing::debug!(provider = %call.provider_name, "opening provider");
        let provider = match self.providers.load(&call.provider_name) {
            Ok(provider) => Some(provider),
            Err(e) => {
                self.expr_error(x, e.to_string());
                None
            }
        };
        if let Some(provider) = &provider {
            let (inputs_schema, outputs_schema) = provider.schema();
            match inputs_schema.compile() {
                Ok(()) => call.input_schema = inputs_schema,
                Err(e) => {
                    self.expr_error(x, format!("internal error: invalid input schema ({e})"))
                }
            }
            match outputs_schema.compile() {
                Ok(()) => self.exprs[x.0].schema = outputs_schema,
                Err(e) => self.expr_error(x, format!("internal error: invalid schema ({e})")),
            }
        }

        let schema = self.exprs[x.0].schema.clone();
        let accept = call.input_schema.clone();
        let (inputs, inputs_ok) = self.evaluate_typed_expr(f, call.inputs, &accept);

        let cancelled = self.cancel.is_cancelled();
        if cancelled {
            self.expr_warning(x, "evaluation cancelled".to_string());
        }
        let provider = match provider {
            Some(provider)
                if inputs_ok
                    && !self.contains_unknowns(inputs)
                    && !self.validating
                    && !cancelled =>
            {
                provider
            }
            _ => return (self.new_unknown(x, schema), call),
        };

        let exported = self.export_val(inputs, &f.name);
        match provider.open(exported, self.context, self.cancel) {
            Ok(output) => {
                let value = self.unexport(&output, x);
                (value, call)
            }
            Err(e) => {
                self.expr_error(x, e.to_string());
                (self.new_unknown(x, schema), call)
            }
        }
    }

    fn evaluate_builtin_secret(
        &mut self,
        f: &mut EnvFrame,
        x: ExprId,
        call: &SecretCall,
    ) -> ValId {
        match &call.arg {
            SecretArg::Plaintext(plaintext) => {
                let plaintext = *plaintext;
                self.evaluate_expr(f, plaintext, &Schema::always())
            }
            SecretArg::Ciphertext { text, .. } => {
                let text = text.clone();
                let schema = Schema::string().with_secret();

                let secret_unknown = |ev: &mut Self| {
                    let v = ev.new_unknown(x, Schema::string().with_secret());
                    ev.vals[v.0].secret = true;
                    v
                };

                let ciphertext = match decode_ciphertext(&text) {
                    Ok(ciphertext) => ciphertext,
                    Err(e) => {
                        self.expr_error(x, format!("invalid ciphertext: {e}"));
                        return secret_unknown(self);
                    }
                };
                if !self.decrypt_secrets() {
                    return secret_unknown(self);
                }
                if self.cancel.is_cancelled() {
                    self.expr_warning(x, "evaluation cancelled".to_string());
                    return secret_unknown(self);
                }
                let decrypter = match &f.decrypter {
                    Some(decrypter) => Arc::clone(decrypter),
                    None => {
                        self.expr_error(x, "decrypting: no decrypter available".to_string());
                        return secret_unknown(self);
                    }
                };

                tracing::debug!("decrypting secret");
                match decrypter.decrypt(&ciphertext, self.cancel) {
                    Ok(plaintext) => {
                        let s = String::from_utf8_lossy(&plaintext).into_owned();
                        self.new_val(ValData {
                            def: x,
                            base: None,
                            schema,
                            unknown: false,
                            secret: true,
                            repr: ValKind::String(s),
                        })
                    }
                    Err(e) => {
                        self.expr_error(x, format!("decrypting: {e}"));
                        secret_unknown(self)
                    }
                }
            }
        }
    }

    fn evaluate_builtin_join(&mut self, f: &mut EnvFrame, x: ExprId, call: &JoinCall) -> ValId {
        let (delimiter, delimiter_ok) =
            self.evaluate_typed_expr(f, call.delimiter, &Schema::string());
        let (values, values_ok) =
            self.evaluate_typed_expr(f, call.values, &Schema::array(Schema::string()));

        let value = self.new_val(ValData {
            def: x,
            base: None,
            schema: Schema::string(),
            unknown: !delimiter_ok || !values_ok,
            secret: false,
            repr: ValKind::Null,
        });
        self.combine(value, &[delimiter, values]);
        if self.vals[value.0].unknown {
            return value;
        }

        let sep = match &self.vals[delimiter.0].repr {
            ValKind::String(s) => s.clone(),
            _ => String::new(),
        };
        let parts: Vec<String> = match &self.vals[values.0].repr {
            ValKind::Array(elements) => elements
                .iter()
                .map(|&e| match &self.vals[e.0].repr {
                    ValKind::String(s) => s.clone(),
                    _ => String::new(),
                })
                .collect(),
            _ => Vec::new(),
        };
        self.vals[value.0].repr = ValKind::String(parts.join(&sep));
        value
    }

    fn evaluate_builtin_unary(&mut self, f: &mut EnvFrame, x: ExprId, call: &UnaryCall) -> ValId {
        let builtin = match BUILTINS.get(call.name.as_str()) {
            Some(builtin) => builtin,
            None => {
                let schema = self.exprs[x.0].schema.clone();
                return self.new_unknown(x, schema);
            }
        };
        let accept = (builtin.arg_schema)();
        let invoke = builtin.invoke;
        let result_schema = (builtin.result_schema)();

        let (arg, arg_ok) = self.evaluate_typed_expr(f, call.arg, &accept);
        let schema = self.exprs[x.0].schema.clone();
        let secret = self.contains_secrets(arg);

        if !arg_ok || self.contains_unknowns(arg) {
            let v = self.new_unknown(x, schema);
            self.vals[v.0].secret = secret;
            return v;
        }

        let exported = self.export_val(arg, &f.name);
        match invoke(&exported) {
            Ok(output) => {
                let v = self.unexport(&output, x);
                self.vals[v.0].secret |= secret;
                if !result_schema.is_always() {
                    self.vals[v.0].schema = result_schema;
                }
                v
            }
            Err(e) => {
                self.expr_error(x, e.to_string());
                let v = self.new_unknown(x, schema);
                self.vals[v.0].secret = secret;
                v
            }
        }
    }
}

fn bind_accessors(accessors: Vec<ParsedAccessor>) -> Vec<BoundAccessor> {
    accessors
        .into_iter()
        .map(|a| BoundAccessor {
            accessor: a.accessor,
            range: a.range,
            value: None,
        })
        .collect()
}
