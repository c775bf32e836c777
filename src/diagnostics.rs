// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use core::fmt;

use serde::{Deserialize, Serialize};

/// A position within an environment definition.
///
/// Lines and columns are counted starting at 1. `byte` is the UTF-8 byte
/// offset into the document at which the position begins; callers should
/// treat it as opaque and authoritative only when paired with a
/// range-carrying diagnostic.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pos {
    pub line: usize,
    pub column: usize,
    pub byte: usize,
}

impl Pos {
    pub fn new(line: usize, column: usize, byte: usize) -> Self {
        Self { line, column, byte }
    }
}

/// A range within an environment definition. The environment is a logical
/// name, not a filesystem path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub environment: String,
    pub begin: Pos,
    pub end: Pos,
}

impl Range {
    pub fn new(environment: impl Into<String>, begin: Pos, end: Pos) -> Self {
        Self {
            environment: environment.into(),
            begin,
            end,
        }
    }

    /// A range that refers to an environment but no particular location
    /// within it. Used for synthesized expressions.
    pub fn environment_only(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            ..Self::default()
        }
    }

    /// Returns true if the range contains the given position.
    pub fn contains(&self, pos: Pos) -> bool {
        if pos.byte >= self.begin.byte && pos.byte < self.end.byte {
            return true;
        }
        if pos.line < self.begin.line || pos.line > self.end.line {
            return false;
        }
        if self.begin.line == self.end.line {
            return pos.line == self.begin.line
                && pos.column >= self.begin.column
                && pos.column < self.end.column;
        }
        true
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.environment, self.begin.line, self.begin.column
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A warning or an error to be presented to the user. Diagnostics are data:
/// the evaluator accumulates them and returns them alongside its (possibly
/// partial) result rather than propagating errors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,

    /// The source range the diagnostic refers to, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Range>,

    /// The structural path of the originating node (e.g. `values/foo/1`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
}

impl Diagnostic {
    /// Creates a new error-level diagnostic from the given subject, summary,
    /// and path.
    pub fn error(subject: Option<Range>, summary: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            summary: summary.into(),
            subject,
            path: path.into(),
        }
    }

    /// Creates a new warning-level diagnostic from the given subject,
    /// summary, and path.
    pub fn warning(
        subject: Option<Range>,
        summary: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            summary: summary.into(),
            subject,
            path: path.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subject {
            Some(range) => write!(f, "{}: {}", range, self.summary),
            None if !self.path.is_empty() => write!(f, "{}: {}", self.path, self.summary),
            None => f.write_str(&self.summary),
        }
    }
}

/// A list of diagnostics.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostics(pub Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diag: Diagnostic) {
        self.0.push(diag);
    }

    /// Appends the given diagnostics, preserving order.
    pub fn extend(&mut self, diags: impl IntoIterator<Item = Diagnostic>) {
        self.0.extend(diags);
    }

    /// Returns true if the list contains any error-level diagnostics.
    pub fn has_errors(&self) -> bool {
        self.0.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> core::slice::Iter<'_, Diagnostic> {
        self.0.iter()
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = core::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl From<Vec<Diagnostic>> for Diagnostics {
    fn from(diags: Vec<Diagnostic>) -> Self {
        Self(diags)
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [] => f.write_str("no diagnostics"),
            [d] => d.fmt(f),
            _ => {
                // Errors precede warnings; within a severity, insertion
                // order is preserved.
                let mut sorted: Vec<&Diagnostic> = self.0.iter().collect();
                sorted.sort_by_key(|d| d.severity);
                for d in sorted {
                    match d.severity {
                        Severity::Error => write!(f, "\n-error: {d}")?,
                        Severity::Warning => write!(f, "\n-warning: {d}")?,
                    }
                }
                Ok(())
            }
        }
    }
}
