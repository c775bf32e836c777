// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::diagnostics::{Diagnostic, Diagnostics, Pos, Range};
use crate::schema::Schema;

/// Information about an expression in an environment definition.
///
/// This is the public, serializable form: the evaluator records one `Expr`
/// per definition so that tools can map evaluated values back to the
/// expressions that produced them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Expr {
    /// The range of the expression.
    pub range: Range,

    /// The schema of the expression's result.
    #[serde(default)]
    pub schema: Schema,

    /// The expression this expression overrides via an import, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<Box<Expr>>,

    /// Ranges of the object's keys, if this is an object expression.
    #[serde(
        rename = "keyRanges",
        default,
        skip_serializing_if = "IndexMap::is_empty"
    )]
    pub key_ranges: IndexMap<String, Range>,

    #[serde(flatten)]
    pub repr: ExprRepr,
}

/// The payload of an expression.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExprRepr {
    /// A literal value: null, a boolean, a number, or a string.
    Literal(serde_json::Value),

    /// A string interpolation.
    Interpolate(Vec<Interpolation>),

    /// A reference to another value.
    Symbol(Vec<PropertyAccessor>),

    /// A list of expressions.
    List(Vec<Expr>),

    /// Keyed expressions in document order.
    Object(IndexMap<String, Expr>),

    /// A call to a builtin function.
    Builtin(Box<BuiltinExpr>),
}

impl Expr {
    pub fn new(range: Range, schema: Schema, repr: ExprRepr) -> Self {
        Self {
            range,
            schema,
            base: None,
            key_ranges: IndexMap::new(),
            repr,
        }
    }
}

/// One part of an interpolated string: literal text followed by an optional
/// resolved reference.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Interpolation {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub value: Vec<PropertyAccessor>,
}

/// An element index or a property name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Accessor {
    #[serde(rename = "index")]
    Index(usize),
    #[serde(rename = "key")]
    Key(String),
}

impl Accessor {
    pub fn as_key(&self) -> Option<&str> {
        match self {
            Accessor::Key(k) => Some(k),
            Accessor::Index(_) => None,
        }
    }
}

/// An accessor paired with the range of the expression that defines the
/// value it resolved to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PropertyAccessor {
    #[serde(flatten)]
    pub accessor: Accessor,

    /// The range of the defining expression.
    pub value: Range,
}

/// A call to a builtin function.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuiltinExpr {
    pub name: String,

    #[serde(rename = "nameRange")]
    pub name_range: Range,

    #[serde(rename = "argSchema")]
    pub arg_schema: Schema,

    pub arg: Expr,
}

// ---------------------------------------------------------------------------
// Interpolation and property-access parsing
// ---------------------------------------------------------------------------

/// An accessor with its source range, produced by parsing.
#[derive(Clone, Debug)]
pub(crate) struct ParsedAccessor {
    pub accessor: Accessor,
    pub range: Range,
}

/// One parsed segment of an interpolated string.
#[derive(Clone, Debug)]
pub(crate) struct ParsedPart {
    pub text: String,
    pub access: Option<Vec<ParsedAccessor>>,
}

/// Splits an interpolated string into parts. `$$` escapes a dollar sign;
/// `${...}` introduces a property access. On a parse failure the
/// diagnostics are returned and the parts are empty.
pub(crate) fn parse_interpolation(
    range: &Range,
    path: &str,
    value: &str,
) -> (Vec<ParsedPart>, Diagnostics) {
    let mut parts = Vec::new();
    let mut text = String::new();

    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'$' {
            text.push('$');
            i += 2;
        } else if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            let mut parser = AccessParser {
                range,
                path,
                value,
                offset: i + 2,
                accessors: Vec::new(),
                diags: Diagnostics::new(),
            };
            let (rest, accessors, diags) = parser.parse();
            if diags.has_errors() {
                return (Vec::new(), diags);
            }
            parts.push(ParsedPart {
                text: std::mem::take(&mut text),
                access: Some(accessors),
            });
            i = rest;
        } else {
            // Consume one UTF-8 character.
            let ch_len = value[i..].chars().next().map(char::len_utf8).unwrap_or(1);
            text.push_str(&value[i..i + ch_len]);
            i += ch_len;
        }
    }
    if !text.is_empty() {
        parts.push(ParsedPart { text, access: None });
    }
    (parts, Diagnostics::new())
}

/// Parses a property access string (`a.b["c d"][0]`) into accessors.
/// Returns the accessors and any diagnostics; errors never abort parsing,
/// so partial results are available for tooling.
pub(crate) fn parse_property_access(
    range: &Range,
    path: &str,
    value: &str,
) -> (Vec<ParsedAccessor>, Diagnostics) {
    let mut parser = AccessParser {
        range,
        path,
        value,
        offset: 0,
        accessors: Vec::new(),
        diags: Diagnostics::new(),
    };

    // The access is not brace-delimited here, so parse until the input is
    // exhausted rather than until a closing brace.
    while parser.offset < value.len() {
        match value.as_bytes()[parser.offset] {
            b'.' => {
                parser.offset += 1;
                let name = parser.parse_name(parser.offset - 1);
                parser.accessors.push(name);
            }
            b'[' => {
                parser.offset += 1;
                let sub = parser.parse_subscript(parser.offset - 1);
                parser.accessors.push(sub);
            }
            _ => {
                let start = parser.offset;
                let name = parser.parse_name(start);
                parser.accessors.push(name);
            }
        }
    }
    if parser.accessors.is_empty() {
        let r = parser.range_from(0);
        parser.diags.push(Diagnostic::error(
            Some(r),
            "property name must not be empty",
            path,
        ));
    }
    (parser.accessors, parser.diags)
}

struct AccessParser<'a> {
    range: &'a Range,
    path: &'a str,
    value: &'a str,
    offset: usize,
    accessors: Vec<ParsedAccessor>,
    diags: Diagnostics,
}

impl<'a> AccessParser<'a> {
    /// Parses a brace-delimited property access. Returns the offset just
    /// past the closing brace, the accessors, and any diagnostics.
    fn parse(&mut self) -> (usize, Vec<ParsedAccessor>, Diagnostics) {
        loop {
            match self.peek() {
                None => {
                    self.error(self.offset, "missing closing brace '}' in interpolation");
                    return self.finish(self.offset);
                }
                Some(b'}') => {
                    let at = self.next();
                    return self.finish(at);
                }
                Some(b'.') => {
                    let at = self.next();
                    let name = self.parse_name(at);
                    self.accessors.push(name);
                }
                Some(b'[') => {
                    let at = self.next();
                    let sub = self.parse_subscript(at);
                    self.accessors.push(sub);
                }
                Some(c) if (c as char).is_whitespace() => {
                    self.error(self.offset, "missing closing brace '}' in interpolation");
                    return self.finish(self.offset);
                }
                Some(_) => {
                    let start = self.offset;
                    let name = self.parse_name(start);
                    self.accessors.push(name);
                }
            }
        }
    }

    fn finish(&mut self, start: usize) -> (usize, Vec<ParsedAccessor>, Diagnostics) {
        if self.accessors.is_empty() {
            self.error(start, "property name must not be empty");
            self.accessors.push(ParsedAccessor {
                accessor: Accessor::Key(String::new()),
                range: self.range_from(start),
            });
        }
        (
            self.offset,
            std::mem::take(&mut self.accessors),
            std::mem::take(&mut self.diags),
        )
    }

    fn peek(&self) -> Option<u8> {
        self.value.as_bytes().get(self.offset).copied()
    }

    fn next(&mut self) -> usize {
        let at = self.offset;
        self.offset += 1;
        at
    }

    fn terminates_name(c: u8) -> bool {
        c == b'.' || c == b'[' || c == b'}' || (c as char).is_whitespace()
    }

    /// Maps a byte offset within the scalar to a document position. The
    /// mapping assumes the scalar occupies a single line; for quoted or
    /// folded scalars the result is approximate.
    fn pos_at(&self, offset: usize) -> Pos {
        let begin = self.range.begin;
        Pos::new(begin.line, begin.column + offset, begin.byte + offset)
    }

    fn range_from(&self, start: usize) -> Range {
        Range::new(
            self.range.environment.clone(),
            self.pos_at(start),
            self.pos_at(self.offset),
        )
    }

    fn error(&mut self, start: usize, msg: impl Into<String>) {
        let r = Range::new(
            self.range.environment.clone(),
            self.pos_at(start),
            self.pos_at(self.offset),
        );
        self.diags.push(Diagnostic::error(Some(r), msg, self.path));
    }

    /// Parses a property name (e.g. `foo`).
    fn parse_name(&mut self, start: usize) -> ParsedAccessor {
        let name_start = self.offset;
        while let Some(c) = self.peek() {
            if Self::terminates_name(c) {
                break;
            }
            self.next();
        }
        let name = &self.value[name_start..self.offset];
        if name.is_empty() {
            self.error(start, "property name must not be empty");
        }
        ParsedAccessor {
            accessor: Accessor::Key(name.to_string()),
            range: self.range_from(start),
        }
    }

    /// Parses a subscript accessor (e.g. `["foo"]` or `[1]`). The opening
    /// bracket has been consumed; consumes the terminating `]`, if any.
    fn parse_subscript(&mut self, start: usize) -> ParsedAccessor {
        let accessor = match self.peek() {
            None => {
                self.error(start, "subscript is missing closing bracket ']'");
                return ParsedAccessor {
                    accessor: Accessor::Key(String::new()),
                    range: self.range_from(start),
                };
            }
            Some(b'"') => {
                self.next();
                Accessor::Key(self.parse_string_subscript(start))
            }
            Some(_) => self.parse_index_subscript(start),
        };

        match self.peek() {
            Some(b']') => {
                self.next();
            }
            _ => self.error(start, "subscript is missing closing bracket ']'"),
        }
        ParsedAccessor {
            accessor,
            range: self.range_from(start),
        }
    }

    /// Parses a quoted key subscript. The opening quote has been consumed;
    /// ends on an unescaped `"` or end of input.
    fn parse_string_subscript(&mut self, start: usize) -> String {
        let mut key = Vec::new();
        loop {
            let c = match self.peek() {
                None => {
                    self.error(start + 1, "key subscript is missing closing quote '\"'");
                    return String::from_utf8_lossy(&key).into_owned();
                }
                Some(c) => c,
            };
            self.next();

            if c == b'"' {
                if key.is_empty() {
                    self.error(start + 1, "key subscript must not be empty");
                }
                return String::from_utf8_lossy(&key).into_owned();
            }
            if c == b'\\' {
                if let Some(b'"') = self.peek() {
                    self.next();
                    key.push(b'"');
                    continue;
                }
            }
            key.push(c);
        }
    }

    /// Parses a numeric subscript. Ends on `]`, a name terminator, or end
    /// of input; does not consume the terminator.
    fn parse_index_subscript(&mut self, start: usize) -> Accessor {
        let index_start = self.offset;
        while let Some(c) = self.peek() {
            if c == b']' || Self::terminates_name(c) {
                break;
            }
            self.next();
        }
        let index_str = &self.value[index_start..self.offset];

        match index_str.parse::<usize>() {
            Ok(index) => {
                if self.accessors.is_empty() {
                    self.error(
                        start,
                        "the first accessor must be a property name or key subscript, not a numeric subscript",
                    );
                }
                Accessor::Index(index)
            }
            Err(_) => {
                self.error(start + 1, "numeric subscript must be a positive base-10 integer");
                Accessor::Key(index_str.to_string())
            }
        }
    }
}
