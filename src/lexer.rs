// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use core::fmt::{self, Debug, Formatter};
use std::rc::Rc;

use anyhow::{anyhow, bail, Result};

#[derive(Clone)]
struct SourceInternal {
    pub file: String,
    pub contents: String,
    pub lines: Vec<(usize, usize)>,
}

/// An environment document held in memory, with a line index for rendering
/// caret-style messages.
#[derive(Clone)]
pub struct Source {
    src: Rc<SourceInternal>,
}

impl Debug for Source {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        self.src.file.fmt(f)
    }
}

impl Source {
    pub fn from_contents(file: String, contents: String) -> Result<Source> {
        let max_size = u32::MAX as usize - 2;
        if contents.len() > max_size {
            bail!("{file} exceeds maximum allowed environment document size {max_size}");
        }
        let mut lines = vec![];
        let mut prev_ch = ' ';
        let mut prev_pos = 0usize;
        let mut start = 0usize;
        for (i, ch) in contents.char_indices() {
            if ch == '\n' {
                let end = match prev_ch {
                    '\r' => prev_pos,
                    _ => i,
                };
                lines.push((start, end));
                start = i + 1;
            }
            prev_ch = ch;
            prev_pos = i;
        }

        if start < contents.len() {
            lines.push((start, contents.len()));
        } else if contents.is_empty() {
            lines.push((0, 0));
        } else {
            let s = contents.len() - 1;
            lines.push((s, s));
        }
        Ok(Self {
            src: Rc::new(SourceInternal {
                file,
                contents,
                lines,
            }),
        })
    }

    pub fn file(&self) -> &String {
        &self.src.file
    }

    pub fn contents(&self) -> &String {
        &self.src.contents
    }

    pub fn line_count(&self) -> usize {
        self.src.lines.len()
    }

    /// Returns the text of the given zero-based line.
    pub fn line(&self, idx: usize) -> &str {
        if idx < self.src.lines.len() {
            let (start, end) = self.src.lines[idx];
            &self.src.contents[start..end]
        } else {
            ""
        }
    }

    /// Returns the byte offset at which the given zero-based line begins.
    pub fn line_start(&self, idx: usize) -> usize {
        if idx < self.src.lines.len() {
            self.src.lines[idx].0
        } else {
            self.src.contents.len()
        }
    }

    pub fn message(&self, line: usize, col: usize, kind: &str, msg: &str) -> String {
        if line > self.src.lines.len() {
            return format!("{}: invalid line {} specified", self.src.file, line);
        }

        let line_str = format!("{line}");
        let line_num_width = line_str.len() + 1;
        let col_spaces = col.saturating_sub(1);

        format!(
            "\n--> {}:{}:{}\n{:<line_num_width$}|\n\
		{:<line_num_width$}| {}\n\
		{:<line_num_width$}| {:<col_spaces$}^\n\
		{}: {}",
            self.src.file,
            line,
            col,
            "",
            line,
            self.line(line - 1),
            "",
            "",
            kind,
            msg
        )
    }

    pub fn error(&self, line: usize, col: usize, msg: &str) -> anyhow::Error {
        anyhow!(self.message(line, col, "error", msg))
    }
}

/// A content line of the document: its indentation, the byte range of its
/// content with any trailing comment stripped, and the comment itself.
#[derive(Clone, Debug)]
pub struct Line {
    /// One-based line number.
    pub number: usize,
    /// Indentation in bytes (spaces only; tabs are rejected by the scanner).
    pub indent: usize,
    /// Byte offset of the first content character.
    pub start: usize,
    /// Byte offset one past the last content character.
    pub end: usize,
    /// The comment text (without `#`), if the line carries one.
    pub comment: Option<String>,
    /// True if the line has no content other than a comment.
    pub blank: bool,
}

/// Splits a source into content lines, stripping comments. A `#` begins a
/// comment at the start of content or when preceded by whitespace, except
/// inside single- or double-quoted scalars.
pub fn scan_lines(source: &Source) -> Vec<Line> {
    let mut out = Vec::with_capacity(source.line_count());
    for idx in 0..source.line_count() {
        let text = source.line(idx);
        let line_start = source.line_start(idx);

        let indent = text.len() - text.trim_start_matches(' ').len();
        let content = &text[indent..];

        let mut comment = None;
        let mut end = text.len();
        let mut quote: Option<char> = None;
        let mut prev = ' ';
        let mut escaped = false;
        for (i, ch) in content.char_indices() {
            match quote {
                Some('\'') => {
                    if ch == '\'' {
                        quote = None;
                    }
                }
                Some(_) => {
                    if escaped {
                        escaped = false;
                    } else if ch == '\\' {
                        escaped = true;
                    } else if ch == '"' {
                        quote = None;
                    }
                }
                None => {
                    if ch == '\'' || ch == '"' {
                        quote = Some(ch);
                    } else if ch == '#' && (i == 0 || prev == ' ' || prev == '\t') {
                        comment = Some(content[i + 1..].trim().to_string());
                        end = indent + i;
                        break;
                    }
                }
            }
            prev = ch;
        }

        let content_end = line_start + text[..end].trim_end().len();
        let content_start = line_start + indent;
        out.push(Line {
            number: idx + 1,
            indent,
            start: content_start,
            end: content_end.max(content_start),
            comment,
            blank: content_end <= content_start,
        });
    }
    out
}
