// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::diagnostics::{Diagnostic, Range};
use crate::number::Number;

/// Source information attached to a syntax node: its range and its
/// structural path within the document (e.g. `values/foo/1`).
#[derive(Clone, Debug, Default)]
pub struct Syntax {
    pub range: Range,
    pub path: String,
}

/// Comments attached to a node. The evaluator ignores trivia; it is carried
/// for tools that rewrite documents.
#[derive(Clone, Debug, Default)]
pub struct Trivia {
    pub head: Vec<String>,
    pub line: Option<String>,
}

impl Trivia {
    pub fn is_empty(&self) -> bool {
        self.head.is_empty() && self.line.is_none()
    }
}

/// A node in the document syntax tree. Numbers are preserved as their
/// textual form to avoid precision loss.
#[derive(Clone, Debug)]
pub struct Node {
    pub syntax: Syntax,
    pub trivia: Trivia,
    pub repr: NodeValue,
}

#[derive(Clone, Debug)]
pub enum NodeValue {
    Null,
    Boolean(bool),
    Number(Number),
    String(String),
    Array(Vec<Node>),
    /// Entries in document order. Keys are string nodes.
    Object(Vec<(Node, Node)>),
}

impl Node {
    pub fn new(syntax: Syntax, repr: NodeValue) -> Self {
        Self {
            syntax,
            trivia: Trivia::default(),
            repr,
        }
    }

    pub fn range(&self) -> &Range {
        &self.syntax.range
    }

    pub fn path(&self) -> &str {
        &self.syntax.path
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.repr {
            NodeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&[(Node, Node)]> {
        match &self.repr {
            NodeValue::Object(entries) => Some(entries),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Node]> {
        match &self.repr {
            NodeValue::Array(elements) => Some(elements),
            _ => None,
        }
    }

    /// Looks up the value for the given key if this node is an object.
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.as_object()?
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }

    pub fn type_name(&self) -> &'static str {
        match &self.repr {
            NodeValue::Null => "null",
            NodeValue::Boolean(_) => "a boolean",
            NodeValue::Number(_) => "a number",
            NodeValue::String(_) => "a string",
            NodeValue::Array(_) => "an array",
            NodeValue::Object(_) => "an object",
        }
    }
}

/// Builds an error-level diagnostic anchored to the given node.
pub fn node_error(node: &Node, summary: impl Into<String>) -> Diagnostic {
    Diagnostic::error(Some(node.range().clone()), summary, node.path())
}

/// Post-order traversal. The visitor receives each node after its children
/// have been visited and may replace it; an error short-circuits the walk.
pub fn walk<F>(node: Node, visit: &mut F) -> Result<Node, Diagnostic>
where
    F: FnMut(Node) -> Result<Node, Diagnostic>,
{
    let Node {
        syntax,
        trivia,
        repr,
    } = node;

    let repr = match repr {
        NodeValue::Array(elements) => {
            let mut walked = Vec::with_capacity(elements.len());
            for element in elements {
                walked.push(walk(element, visit)?);
            }
            NodeValue::Array(walked)
        }
        NodeValue::Object(entries) => {
            let mut walked = Vec::with_capacity(entries.len());
            for (key, value) in entries {
                walked.push((walk(key, visit)?, walk(value, visit)?));
            }
            NodeValue::Object(walked)
        }
        scalar => scalar,
    };

    visit(Node {
        syntax,
        trivia,
        repr,
    })
}
