// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use core::str::FromStr;

use crate::diagnostics::Diagnostic;
use crate::number::Number;
use crate::schema::{ObjectSchema, Schema};
use crate::utils::join_key;

use super::exprs::{ExprId, ExprKind};
use super::values::{ValId, ValKind};
use super::Evaluator;

/// Validates values (and, for unknown values, their declared schemas)
/// against an accepting schema. Diagnostics accumulate on the validator so
/// that speculative checks (`anyOf` alternatives) can be discarded.
#[derive(Default)]
pub(crate) struct Validator {
    pub diags: Vec<Diagnostic>,
}

/// Where a validation failure should be reported. When the failing element
/// has no expression of its own (e.g. a property of a provider result), the
/// diagnostic is anchored at the nearest enclosing expression and prefixed
/// with the path from there to the element.
#[derive(Clone)]
struct Loc {
    x: ExprId,
    path: String,
    prefix: bool,
}

impl Loc {
    fn of(ev: &Evaluator, v: ValId) -> Loc {
        Loc {
            x: ev.vals[v.0].def,
            path: String::new(),
            prefix: false,
        }
    }

    fn index(&self, ev: &Evaluator, i: usize) -> Loc {
        if let ExprKind::List(elements) = &ev.exprs[self.x.0].repr {
            if let Some(&e) = elements.get(i) {
                return Loc {
                    x: e,
                    path: String::new(),
                    prefix: false,
                };
            }
        }
        Loc {
            x: self.x,
            path: format!("{}[{i}]", self.path),
            prefix: true,
        }
    }

    fn property(&self, ev: &Evaluator, key: &str) -> Loc {
        if let ExprKind::Object(properties) = &ev.exprs[self.x.0].repr {
            if let Some(&p) = properties.get(key) {
                return Loc {
                    x: p,
                    path: String::new(),
                    prefix: false,
                };
            }
        }
        Loc {
            x: self.x,
            path: join_key(&self.path, key),
            prefix: true,
        }
    }
}

impl Validator {
    /// Checks a value against a schema, anchoring diagnostics at the
    /// value's defining expression. Returns false if validation failed.
    pub(crate) fn validate_value(&mut self, ev: &Evaluator, v: ValId, accept: &Schema) -> bool {
        let loc = Loc::of(ev, v);
        if let Err(e) = accept.compile() {
            return self.errorf(ev, &loc, format!("internal error: invalid schema: {e}"));
        }
        self.validate_element(ev, v, accept, Some(accept), &loc)
    }

    fn errorf(&mut self, ev: &Evaluator, loc: &Loc, msg: String) -> bool {
        let summary = if loc.prefix && !loc.path.is_empty() {
            format!("{}: {msg}", loc.path)
        } else {
            msg
        };
        let d = &ev.exprs[loc.x.0];
        let subject = if d.range.environment.is_empty() {
            None
        } else {
            Some(d.range.clone())
        };
        self.diags
            .push(Diagnostic::error(subject, summary, d.path.clone()));
        false
    }

    fn validate_element(
        &mut self,
        ev: &Evaluator,
        v: ValId,
        root: &Schema,
        accept: Option<&Schema>,
        loc: &Loc,
    ) -> bool {
        let accept = match accept {
            None | Some(Schema::Always) => return true,
            Some(a) => a,
        };
        if accept.is_never() {
            return self.errorf(ev, loc, "no value satisfies this schema".to_string());
        }
        if ev.vals[v.0].unknown {
            let x = &ev.vals[v.0].schema;
            return self.validate_schema_type(ev, Some(x), Some(accept), root, loc);
        }
        let o = match accept.as_object() {
            Some(o) => o,
            None => return true,
        };

        let mut ok = true;
        if !o.ref_.is_empty() {
            if let Ok(resolved) = root.resolve_ref(&o.ref_) {
                ok &= self.validate_element(ev, v, root, Some(resolved), loc);
            }
        }
        if !o.any_of.is_empty() {
            ok &= self.validate_any_of(ev, v, root, &o.any_of, loc);
        }
        if !o.one_of.is_empty() {
            ok &= self.validate_one_of(ev, v, root, &o.one_of, loc);
        }
        if let Some(c) = &o.const_ {
            if !equals_const(ev, v, c) {
                ok = self.errorf(ev, loc, format!("expected {c}"));
            }
        }
        if !o.enum_.is_empty() && !o.enum_.iter().any(|c| equals_const(ev, v, c)) {
            let options: Vec<String> = o.enum_.iter().map(|c| c.to_string()).collect();
            ok = self.errorf(ev, loc, format!("expected one of {}", options.join(", ")));
        }
        ok &= self.validate_type(ev, v, root, o, loc);
        ok
    }

    fn validate_any_of(
        &mut self,
        ev: &Evaluator,
        v: ValId,
        root: &Schema,
        any_of: &[Schema],
        loc: &Loc,
    ) -> bool {
        for s in any_of {
            let mut trial = Validator::default();
            if trial.validate_element(ev, v, root, Some(s), loc) {
                return true;
            }
        }
        self.errorf(ev, loc, "at least one subschema must match".to_string())
    }

    fn validate_one_of(
        &mut self,
        ev: &Evaluator,
        v: ValId,
        root: &Schema,
        one_of: &[Schema],
        loc: &Loc,
    ) -> bool {
        let mut matched = 0;
        for s in one_of {
            let mut trial = Validator::default();
            if trial.validate_element(ev, v, root, Some(s), loc) {
                matched += 1;
            }
        }
        match matched {
            1 => true,
            0 => self.errorf(ev, loc, "exactly one subschema must match".to_string()),
            _ => self.errorf(ev, loc, "exactly one subschema may match".to_string()),
        }
    }

    fn validate_type(
        &mut self,
        ev: &Evaluator,
        v: ValId,
        root: &Schema,
        o: &ObjectSchema,
        loc: &Loc,
    ) -> bool {
        match &ev.vals[v.0].repr {
            ValKind::Null => self.check_type(ev, o, "null", loc),
            ValKind::Bool(_) => self.check_type(ev, o, "boolean", loc),
            ValKind::Number(n) => {
                if o.type_ == "integer" && !n.is_integer() {
                    return self.errorf(ev, loc, "expected an integer".to_string());
                }
                let mut ok = self.check_type(ev, o, "number", loc);
                ok &= self.validate_number(ev, n, o, loc);
                ok
            }
            ValKind::String(s) => {
                let mut ok = self.check_type(ev, o, "string", loc);
                ok &= self.validate_string(ev, s, o, loc);
                ok
            }
            ValKind::Array(elements) => {
                let elements = elements.clone();
                let mut ok = self.check_type(ev, o, "array", loc);
                ok &= self.validate_array(ev, &elements, root, o, loc);
                ok
            }
            ValKind::Object(_) => {
                let mut ok = self.check_type(ev, o, "object", loc);
                ok &= self.validate_object(ev, v, root, o, loc);
                ok
            }
        }
    }

    fn check_type(&mut self, ev: &Evaluator, o: &ObjectSchema, actual: &str, loc: &Loc) -> bool {
        if o.type_.is_empty() || o.type_ == actual {
            return true;
        }
        if o.type_ == "integer" && actual == "number" {
            // Integrality is checked separately.
            return true;
        }
        self.errorf(ev, loc, format!("expected {}", type_article(&o.type_)))
    }

    fn validate_number(
        &mut self,
        ev: &Evaluator,
        n: &Number,
        o: &ObjectSchema,
        loc: &Loc,
    ) -> bool {
        let mut ok = true;
        if let Some(m) = &o.multiple_of {
            let q = n.to_f64() / m.to_f64();
            if (q - q.round()).abs() > 1e-9 {
                ok = self.errorf(ev, loc, format!("expected a multiple of {m}"));
            }
        }
        if let Some(max) = &o.maximum {
            if n > max {
                ok = self.errorf(
                    ev,
                    loc,
                    format!("expected a number less than or equal to {max}"),
                );
            }
        }
        if let Some(max) = &o.exclusive_maximum {
            if n >= max {
                ok = self.errorf(ev, loc, format!("expected a number less than {max}"));
            }
        }
        if let Some(min) = &o.minimum {
            if n < min {
                ok = self.errorf(
                    ev,
                    loc,
                    format!("expected a number greater than or equal to {min}"),
                );
            }
        }
        if let Some(min) = &o.exclusive_minimum {
            if n <= min {
                ok = self.errorf(ev, loc, format!("expected a number greater than {min}"));
            }
        }
        ok
    }

    fn validate_string(&mut self, ev: &Evaluator, s: &str, o: &ObjectSchema, loc: &Loc) -> bool {
        let mut ok = true;
        if let Some(max) = o.max_length.as_ref().and_then(Number::to_usize) {
            if s.len() > max {
                ok = self.errorf(ev, loc, format!("expected a string of at most {max} bytes"));
            }
        }
        if let Some(min) = o.min_length.as_ref().and_then(Number::to_usize) {
            if s.len() < min {
                ok = self.errorf(
                    ev,
                    loc,
                    format!("expected a string of at least {min} bytes"),
                );
            }
        }
        if let Ok(Some(re)) = o.pattern_regex() {
            if !re.is_match(s) {
                ok = self.errorf(
                    ev,
                    loc,
                    format!("expected a string matching {:?}", o.pattern),
                );
            }
        }
        ok
    }

    fn validate_array(
        &mut self,
        ev: &Evaluator,
        elements: &[ValId],
        root: &Schema,
        o: &ObjectSchema,
        loc: &Loc,
    ) -> bool {
        let mut ok = true;
        if let Some(max) = o.max_items.as_ref().and_then(Number::to_usize) {
            if elements.len() > max {
                ok = self.errorf(ev, loc, format!("expected an array of at most {max} items"));
            }
        }
        if let Some(min) = o.min_items.as_ref().and_then(Number::to_usize) {
            if elements.len() < min {
                ok = self.errorf(
                    ev,
                    loc,
                    format!("expected an array of at least {min} items"),
                );
            }
        }
        if o.unique_items {
            'outer: for (i, &a) in elements.iter().enumerate() {
                for &b in &elements[i + 1..] {
                    if val_equals(ev, a, b) {
                        ok = self.errorf(ev, loc, "array items must be unique".to_string());
                        break 'outer;
                    }
                }
            }
        }
        for (i, &e) in elements.iter().enumerate() {
            let accept = if i < o.prefix_items.len() {
                Some(&o.prefix_items[i])
            } else {
                o.items.as_deref()
            };
            ok &= self.validate_element(ev, e, root, accept, &loc.index(ev, i));
        }
        ok
    }

    fn validate_object(
        &mut self,
        ev: &Evaluator,
        v: ValId,
        root: &Schema,
        o: &ObjectSchema,
        loc: &Loc,
    ) -> bool {
        let keys = ev.val_keys(v);

        let mut ok = true;
        if let Some(max) = o.max_properties.as_ref().and_then(Number::to_usize) {
            if keys.len() > max {
                ok = self.errorf(
                    ev,
                    loc,
                    format!("expected an object with at most {max} properties"),
                );
            }
        }
        if let Some(min) = o.min_properties.as_ref().and_then(Number::to_usize) {
            if keys.len() < min {
                ok = self.errorf(
                    ev,
                    loc,
                    format!("expected an object with at least {min} properties"),
                );
            }
        }

        for k in &keys {
            let child = match ev.val_lookup(v, k) {
                Some(c) => c,
                None => continue,
            };
            let accept = match o.properties.get(k) {
                Some(p) => Some(p),
                None => o.additional_properties.as_deref(),
            };
            ok &= self.validate_element(ev, child, root, accept, &loc.property(ev, k));
        }

        for r in &o.required {
            if !keys.iter().any(|k| k == r) {
                ok = self.errorf(ev, loc, format!("missing required property {r:?}"));
            }
        }
        for (k, deps) in &o.dependent_required {
            if keys.iter().any(|have| have == k) {
                for d in deps {
                    if !keys.iter().any(|have| have == d) {
                        ok = self.errorf(
                            ev,
                            loc,
                            format!("property {k:?} requires property {d:?}"),
                        );
                    }
                }
            }
        }
        ok
    }

    /// Checks a declared schema against an accepting schema. Used for
    /// unknown values, whose concrete shape is unavailable: only provable
    /// conflicts are reported so that unknowns never fail spuriously.
    fn validate_schema_type(
        &mut self,
        ev: &Evaluator,
        x: Option<&Schema>,
        accept: Option<&Schema>,
        root: &Schema,
        loc: &Loc,
    ) -> bool {
        let accept = match accept {
            None | Some(Schema::Always) => return true,
            Some(a) => a,
        };
        if accept.is_never() {
            return self.errorf(ev, loc, "no value satisfies this schema".to_string());
        }
        let x = match x {
            None | Some(Schema::Always) => return true,
            Some(x) => x,
        };
        if x.is_never() {
            return self.errorf(ev, loc, "no value satisfies this schema".to_string());
        }
        let (xo, ao) = match (x.as_object(), accept.as_object()) {
            (Some(xo), Some(ao)) => (xo, ao),
            _ => return true,
        };

        let mut ok = true;
        if !ao.ref_.is_empty() {
            if let Ok(resolved) = root.resolve_ref(&ao.ref_) {
                ok &= self.validate_schema_type(ev, Some(x), Some(resolved), root, loc);
            }
        }

        // Alternatives on the declared side must all be acceptable;
        // alternatives on the accepting side need only one plausible match.
        if !xo.any_of.is_empty() || !xo.one_of.is_empty() {
            for alt in xo.any_of.iter().chain(&xo.one_of) {
                ok &= self.validate_schema_type(ev, Some(alt), Some(accept), root, loc);
            }
            return ok;
        }
        if !ao.any_of.is_empty() || !ao.one_of.is_empty() {
            let plausible = ao.any_of.iter().chain(&ao.one_of).any(|alt| {
                let mut trial = Validator::default();
                trial.validate_schema_type(ev, Some(x), Some(alt), root, loc)
            });
            if !plausible {
                ok = self.errorf(ev, loc, "at least one subschema must match".to_string());
            }
            return ok;
        }

        if !xo.type_.is_empty() && !ao.type_.is_empty() && !types_compatible(&xo.type_, &ao.type_)
        {
            return self.errorf(ev, loc, format!("expected {}", type_article(&ao.type_)));
        }

        if let (Some(xc), Some(ac)) = (&xo.const_, &ao.const_) {
            if !json_number_eq(xc, ac) {
                ok = self.errorf(ev, loc, format!("expected {ac}"));
            }
        }
        if let Some(xc) = &xo.const_ {
            if !ao.enum_.is_empty() && !ao.enum_.iter().any(|c| json_number_eq(xc, c)) {
                let options: Vec<String> = ao.enum_.iter().map(|c| c.to_string()).collect();
                ok = self.errorf(ev, loc, format!("expected one of {}", options.join(", ")));
            }
            // A declared constant pins the value; check it like a concrete
            // element where possible.
            match xc {
                serde_json::Value::Number(n) => {
                    if let Ok(n) = Number::from_str(&n.to_string()) {
                        ok &= self.validate_number(ev, &n, ao, loc);
                    }
                }
                serde_json::Value::String(s) => {
                    ok &= self.validate_string(ev, s, ao, loc);
                }
                _ => {}
            }
        }

        match ao.type_.as_str() {
            "array" => ok &= self.validate_schema_array(ev, xo, ao, root, loc),
            "object" => ok &= self.validate_schema_object(ev, xo, ao, root, loc),
            _ => {}
        }
        ok
    }

    fn validate_schema_array(
        &mut self,
        ev: &Evaluator,
        xo: &ObjectSchema,
        ao: &ObjectSchema,
        root: &Schema,
        loc: &Loc,
    ) -> bool {
        let mut ok = true;
        for (i, px) in xo.prefix_items.iter().enumerate() {
            let accept = if i < ao.prefix_items.len() {
                Some(&ao.prefix_items[i])
            } else {
                ao.items.as_deref()
            };
            ok &= self.validate_schema_type(ev, Some(px), accept, root, &loc.index(ev, i));
        }
        if let Some(items) = xo.items.as_deref() {
            if !items.is_never() {
                ok &= self.validate_schema_type(ev, Some(items), ao.items.as_deref(), root, loc);
            } else {
                // The declared array has a fixed length.
                let n = xo.prefix_items.len();
                if let Some(min) = ao.min_items.as_ref().and_then(Number::to_usize) {
                    if n < min {
                        ok = self.errorf(
                            ev,
                            loc,
                            format!("expected an array of at least {min} items"),
                        );
                    }
                }
                if let Some(max) = ao.max_items.as_ref().and_then(Number::to_usize) {
                    if n > max {
                        ok = self.errorf(
                            ev,
                            loc,
                            format!("expected an array of at most {max} items"),
                        );
                    }
                }
            }
        }
        ok
    }

    fn validate_schema_object(
        &mut self,
        ev: &Evaluator,
        xo: &ObjectSchema,
        ao: &ObjectSchema,
        root: &Schema,
        loc: &Loc,
    ) -> bool {
        let mut ok = true;
        for (k, px) in &xo.properties {
            let accept = match ao.properties.get(k) {
                Some(p) => Some(p),
                None => ao.additional_properties.as_deref(),
            };
            ok &= self.validate_schema_type(ev, Some(px), accept, root, &loc.property(ev, k));
        }

        // A closed declared object provably lacks any property it does not
        // list.
        let closed = matches!(xo.additional_properties.as_deref(), Some(s) if s.is_never());
        if closed {
            for r in &ao.required {
                if !xo.properties.contains_key(r) {
                    ok = self.errorf(ev, loc, format!("missing required property {r:?}"));
                }
            }
        }
        ok
    }
}

fn types_compatible(x: &str, accept: &str) -> bool {
    if x == accept {
        return true;
    }
    // Integers are numbers; integrality of an unknown number is unprovable
    // either way.
    matches!((x, accept), ("integer", "number") | ("number", "integer"))
}

fn type_article(type_: &str) -> String {
    match type_ {
        "null" => "null".to_string(),
        "boolean" => "a boolean".to_string(),
        "number" => "a number".to_string(),
        "integer" => "an integer".to_string(),
        "string" => "a string".to_string(),
        "array" => "an array".to_string(),
        "object" => "an object".to_string(),
        other => other.to_string(),
    }
}

/// Structural equality between a value and a plain JSON constant. Unknown
/// values never equal a constant.
fn equals_const(ev: &Evaluator, v: ValId, c: &serde_json::Value) -> bool {
    let d = &ev.vals[v.0];
    if d.unknown {
        return false;
    }
    match (&d.repr, c) {
        (ValKind::Null, serde_json::Value::Null) => true,
        (ValKind::Bool(b), serde_json::Value::Bool(cb)) => b == cb,
        (ValKind::Number(n), serde_json::Value::Number(cn)) => {
            Number::from_str(&cn.to_string()).is_ok_and(|cn| *n == cn)
        }
        (ValKind::String(s), serde_json::Value::String(cs)) => s == cs,
        (ValKind::Array(elements), serde_json::Value::Array(cs)) => {
            elements.len() == cs.len()
                && elements
                    .iter()
                    .zip(cs)
                    .all(|(&e, ce)| equals_const(ev, e, ce))
        }
        (ValKind::Object(_), serde_json::Value::Object(cm)) => {
            let keys = ev.val_keys(v);
            keys.len() == cm.len()
                && cm.iter().all(|(k, cv)| {
                    ev.val_lookup(v, k)
                        .is_some_and(|p| equals_const(ev, p, cv))
                })
        }
        _ => false,
    }
}

/// Structural equality between two values, ignoring secret- and
/// unknown-ness. Unknown values compare unequal to everything.
fn val_equals(ev: &Evaluator, a: ValId, b: ValId) -> bool {
    let (da, db) = (&ev.vals[a.0], &ev.vals[b.0]);
    if da.unknown || db.unknown {
        return false;
    }
    match (&da.repr, &db.repr) {
        (ValKind::Null, ValKind::Null) => true,
        (ValKind::Bool(x), ValKind::Bool(y)) => x == y,
        (ValKind::Number(x), ValKind::Number(y)) => x == y,
        (ValKind::String(x), ValKind::String(y)) => x == y,
        (ValKind::Array(x), ValKind::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(&e, &f)| val_equals(ev, e, f))
        }
        (ValKind::Object(_), ValKind::Object(_)) => {
            let (ka, kb) = (ev.val_keys(a), ev.val_keys(b));
            ka.len() == kb.len()
                && ka.iter().all(|k| {
                    match (ev.val_lookup(a, k), ev.val_lookup(b, k)) {
                        (Some(x), Some(y)) => val_equals(ev, x, y),
                        _ => false,
                    }
                })
        }
        _ => false,
    }
}

/// Equality between JSON constants with numbers compared by numeric value
/// rather than textual form.
fn json_number_eq(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    match (a, b) {
        (serde_json::Value::Number(x), serde_json::Value::Number(y)) => {
            match (
                Number::from_str(&x.to_string()),
                Number::from_str(&y.to_string()),
            ) {
                (Ok(x), Ok(y)) => x == y,
                _ => false,
            }
        }
        _ => a == b,
    }
}
