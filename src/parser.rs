// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use core::str::FromStr;

use crate::diagnostics::{Diagnostic, Diagnostics, Pos, Range};
use crate::lexer::{scan_lines, Line, Source};
use crate::number::{is_valid_number, Number};
use crate::syntax::{Node, NodeValue, Syntax, Trivia};

/// Parses an environment document into a syntax tree.
///
/// The input grammar is the subset of YAML that environment definitions use:
/// block mappings and sequences, flow collections (a JSON superset), plain
/// and quoted scalars, and comments. Anchors, aliases, tags, block scalars,
/// and multiple documents are rejected with diagnostics. Every node carries
/// a source range and structural path.
pub fn parse_document(environment: &str, source: &Source) -> (Option<Node>, Diagnostics) {
    let mut parser = Parser {
        source,
        env: environment.to_string(),
        lines: scan_lines(source),
        diags: Diagnostics::new(),
    };
    let node = parser.parse();
    (node, parser.diags)
}

struct Parser<'a> {
    source: &'a Source,
    env: String,
    lines: Vec<Line>,
    diags: Diagnostics,
}

impl<'a> Parser<'a> {
    fn parse(&mut self) -> Option<Node> {
        for idx in 0..self.lines.len() {
            if self.source.line(idx).starts_with('\t') {
                let p = self.pos(idx, self.source.line_start(idx));
                self.error(p, p, "", "tab characters may not be used for indentation");
                return None;
            }
        }

        let mut first = match self.next_content(0) {
            Some(li) => li,
            None => {
                let p = Pos::new(1, 1, 0);
                return Some(Node::new(
                    Syntax {
                        range: Range::new(self.env.clone(), p, p),
                        path: String::new(),
                    },
                    NodeValue::Null,
                ));
            }
        };

        // A leading document marker is tolerated; further markers are not.
        if self.content(first) == "---" {
            match self.next_content(first + 1) {
                Some(li) => first = li,
                None => {
                    let p = self.pos(first, self.lines[first].start);
                    return Some(Node::new(
                        Syntax {
                            range: Range::new(self.env.clone(), p, p),
                            path: String::new(),
                        },
                        NodeValue::Null,
                    ));
                }
            }
        }

        let start = self.lines[first].start;
        let (node, next) = self.parse_block_at(first, start, "");

        if let Some(extra) = self.next_content(next) {
            if self.content(extra) == "---" {
                let p = self.pos(extra, self.lines[extra].start);
                self.error(p, p, "", "multiple documents are not supported");
            } else {
                let p = self.pos(extra, self.lines[extra].start);
                self.error(p, p, "", "unexpected content after the end of the document");
            }
        }

        Some(node)
    }

    // -- line navigation ---------------------------------------------------

    fn next_content(&self, from: usize) -> Option<usize> {
        (from..self.lines.len()).find(|&i| !self.lines[i].blank)
    }

    fn content(&self, li: usize) -> &str {
        let line = &self.lines[li];
        &self.source.contents()[line.start..line.end]
    }

    fn line_col(&self, li: usize, byte: usize) -> usize {
        byte - self.source.line_start(self.lines[li].number - 1)
    }

    fn pos(&self, li: usize, byte: usize) -> Pos {
        Pos::new(self.lines[li].number, self.line_col(li, byte) + 1, byte)
    }

    fn rest(&self, li: usize, byte: usize) -> &str {
        let line = &self.lines[li];
        &self.source.contents()[byte.min(line.end)..line.end]
    }

    fn skip_spaces(&self, li: usize, byte: usize) -> usize {
        let rest = self.rest(li, byte);
        byte + (rest.len() - rest.trim_start_matches(' ').len())
    }

    // -- diagnostics -------------------------------------------------------

    fn error(&mut self, begin: Pos, end: Pos, path: &str, summary: impl Into<String>) {
        self.diags.push(Diagnostic::error(
            Some(Range::new(self.env.clone(), begin, end)),
            summary,
            path,
        ));
    }

    fn node(&self, begin: Pos, end: Pos, path: &str, repr: NodeValue) -> Node {
        Node::new(
            Syntax {
                range: Range::new(self.env.clone(), begin, end),
                path: path.to_string(),
            },
            repr,
        )
    }

    fn null_at(&self, li: usize, byte: usize, path: &str) -> Node {
        let p = self.pos(li, byte);
        self.node(p, p, path, NodeValue::Null)
    }

    // -- block context -----------------------------------------------------

    /// Parses a value whose first character is at the given position in
    /// block context. Returns the node and the index of the first line after
    /// the construct.
    fn parse_block_at(&mut self, li: usize, byte: usize, path: &str) -> (Node, usize) {
        let rest = self.rest(li, byte);

        if rest == "-" || rest.starts_with("- ") {
            return self.parse_sequence(li, byte, path);
        }

        match rest.as_bytes().first() {
            Some(b'"') | Some(b'\'') => {
                // Either a quoted scalar or a quoted mapping key.
                let (text, end) = self.parse_quoted(li, byte, path);
                let after = self.skip_spaces(li, end);
                if self.rest(li, after).starts_with(':')
                    && matches!(self.rest(li, after).as_bytes().get(1), None | Some(b' '))
                {
                    return self.parse_mapping(li, byte, path);
                }
                let node = self.node(
                    self.pos(li, byte),
                    self.pos(li, end),
                    path,
                    NodeValue::String(text),
                );
                self.expect_line_end(li, after, path);
                return (node, li + 1);
            }
            Some(b'[') | Some(b'{') => {
                let (node, cur) = self.parse_flow(li, byte, path);
                let after = self.skip_spaces(cur.0, cur.1);
                self.expect_line_end(cur.0, after, path);
                return (node, cur.0 + 1);
            }
            Some(b'|') | Some(b'>') => {
                let p = self.pos(li, byte);
                self.error(p, p, path, "block scalars are not supported");
                let next = self.skip_deeper(li + 1, self.line_col(li, byte));
                return (self.null_at(li, byte, path), next);
            }
            Some(b'&') | Some(b'*') | Some(b'!') => {
                let p = self.pos(li, byte);
                self.error(p, p, path, "anchors, aliases, and tags are not supported");
                return (self.null_at(li, self.lines[li].end, path), li + 1);
            }
            _ => {}
        }

        if find_plain_key_colon(rest).is_some() {
            return self.parse_mapping(li, byte, path);
        }

        // A plain scalar value occupying the remainder of the line.
        let node = self.plain_scalar(li, byte, self.lines[li].end, path);
        (node, li + 1)
    }

    /// Skips lines indented deeper than the given column. Used for error
    /// recovery so a single diagnostic is not repeated for every line of an
    /// unsupported construct.
    fn skip_deeper(&self, from: usize, col: usize) -> usize {
        let mut li = from;
        while li < self.lines.len() {
            let line = &self.lines[li];
            if !line.blank && line.indent <= col {
                break;
            }
            li += 1;
        }
        li
    }

    fn parse_mapping(&mut self, li: usize, byte: usize, path: &str) -> (Node, usize) {
        let key_col = self.line_col(li, byte);
        let begin = self.pos(li, byte);
        let mut end = begin;

        let mut entries: Vec<(Node, Node)> = Vec::new();
        let mut cur_li = li;
        let mut cur_byte = byte;
        let mut after;

        loop {
            let head = self.head_trivia(cur_li);
            let line_comment = self.lines[cur_li].comment.clone();

            let (mut key_node, value_node, next) = self.parse_mapping_entry(cur_li, cur_byte, path);
            after = next;
            key_node.trivia = Trivia {
                head,
                line: line_comment,
            };
            end = value_node.range().end.max(key_node.range().end).max(end);
            if entries
                .iter()
                .any(|(k, _)| k.as_str() == key_node.as_str() && key_node.as_str().is_some())
            {
                let r = key_node.range().clone();
                self.error(
                    r.begin,
                    r.end,
                    path,
                    format!("duplicate key {:?}", key_node.as_str().unwrap_or("")),
                );
            } else {
                entries.push((key_node, value_node));
            }

            // Find the next sibling key.
            let nli = match self.next_content(next) {
                Some(nli) => nli,
                None => break,
            };
            let line = &self.lines[nli];
            if line.indent < key_col {
                break;
            }
            if line.indent > key_col {
                let p = self.pos(nli, line.start);
                self.error(p, p, path, "unexpected indentation");
                let resume = self.skip_deeper(nli, key_col);
                match self.next_content(resume) {
                    Some(i) if self.lines[i].indent == key_col => {
                        cur_li = i;
                        cur_byte = self.lines[cur_li].start;
                        continue;
                    }
                    _ => {
                        after = resume;
                        break;
                    }
                }
            }
            let rest = self.content(nli);
            if rest == "-" || rest.starts_with("- ") {
                break;
            }
            cur_li = nli;
            cur_byte = line.start;
        }

        (self.node(begin, end, path, NodeValue::Object(entries)), after)
    }

    fn parse_mapping_entry(
        &mut self,
        li: usize,
        byte: usize,
        path: &str,
    ) -> (Node, Node, usize) {
        let rest = self.rest(li, byte);

        // Parse the key.
        let (key_text, key_end) = match rest.as_bytes().first() {
            Some(b'"') | Some(b'\'') => self.parse_quoted(li, byte, path),
            _ => match find_plain_key_colon(rest) {
                Some(colon) => {
                    let text = rest[..colon].trim_end().to_string();
                    (text.clone(), byte + rest[..colon].trim_end().len())
                }
                None => {
                    let text = rest.trim_end().to_string();
                    let p = self.pos(li, byte);
                    self.error(p, p, path, "expected a mapping key");
                    (text, self.lines[li].end)
                }
            },
        };

        let child_path = join_path(path, &key_text);
        let key_node = self.node(
            self.pos(li, byte),
            self.pos(li, key_end),
            &child_path,
            NodeValue::String(key_text),
        );

        // Expect the `:` separator.
        let colon = self.skip_spaces(li, key_end);
        if !self.rest(li, colon).starts_with(':') {
            let p = self.pos(li, colon);
            self.error(p, p, &child_path, "expected `:` after mapping key");
            return (key_node, self.null_at(li, colon, &child_path), li + 1);
        }

        let vb = self.skip_spaces(li, colon + 1);
        if vb < self.lines[li].end {
            // Inline value on the same line.
            let (value, cur) = self.parse_inline_value(li, vb, &child_path);
            return (key_node, value, cur);
        }

        // Value is on the following lines, indented past the key.
        let key_col = self.line_col(li, byte);
        match self.next_content(li + 1) {
            Some(nli) if self.lines[nli].indent > key_col => {
                let start = self.lines[nli].start;
                let (value, next) = self.parse_block_at(nli, start, &child_path);
                (key_node, value, next)
            }
            _ => (key_node, self.null_at(li, colon + 1, &child_path), li + 1),
        }
    }

    /// Parses a value that begins mid-line (after `key:` or `- `).
    fn parse_inline_value(&mut self, li: usize, byte: usize, path: &str) -> (Node, usize) {
        let rest = self.rest(li, byte);
        match rest.as_bytes().first() {
            Some(b'[') | Some(b'{') => {
                let (node, cur) = self.parse_flow(li, byte, path);
                let after = self.skip_spaces(cur.0, cur.1);
                self.expect_line_end(cur.0, after, path);
                (node, cur.0 + 1)
            }
            Some(b'"') | Some(b'\'') => {
                let (text, end) = self.parse_quoted(li, byte, path);
                let node = self.node(
                    self.pos(li, byte),
                    self.pos(li, end),
                    path,
                    NodeValue::String(text),
                );
                let after = self.skip_spaces(li, end);
                self.expect_line_end(li, after, path);
                (node, li + 1)
            }
            Some(b'|') | Some(b'>') => {
                let p = self.pos(li, byte);
                self.error(p, p, path, "block scalars are not supported");
                let next = self.skip_deeper(li + 1, self.lines[li].indent);
                (self.null_at(li, byte, path), next)
            }
            Some(b'&') | Some(b'*') | Some(b'!') => {
                let p = self.pos(li, byte);
                self.error(p, p, path, "anchors, aliases, and tags are not supported");
                (self.null_at(li, self.lines[li].end, path), li + 1)
            }
            _ => {
                let node = self.plain_scalar(li, byte, self.lines[li].end, path);
                (node, li + 1)
            }
        }
    }

    fn parse_sequence(&mut self, li: usize, byte: usize, path: &str) -> (Node, usize) {
        let item_col = self.line_col(li, byte);
        let begin = self.pos(li, byte);
        let mut end = begin;

        let mut elements: Vec<Node> = Vec::new();
        let mut cur_li = li;
        let mut after;

        loop {
            let line = &self.lines[cur_li];
            let dash_byte = self.source.line_start(line.number - 1) + item_col;
            let child_path = format!("{}{}{}", path, if path.is_empty() { "" } else { "/" }, elements.len());

            let vb = self.skip_spaces(cur_li, dash_byte + 1);
            let (element, next) = if vb < self.lines[cur_li].end {
                self.parse_block_at(cur_li, vb, &child_path)
            } else {
                match self.next_content(cur_li + 1) {
                    Some(nli) if self.lines[nli].indent > item_col => {
                        let start = self.lines[nli].start;
                        self.parse_block_at(nli, start, &child_path)
                    }
                    _ => (self.null_at(cur_li, dash_byte + 1, &child_path), cur_li + 1),
                }
            };
            end = element.range().end.max(end);
            elements.push(element);
            after = next;

            let nli = match self.next_content(next) {
                Some(nli) => nli,
                None => break,
            };
            let line = &self.lines[nli];
            if line.indent != item_col {
                break;
            }
            let rest = self.content(nli);
            if !(rest == "-" || rest.starts_with("- ")) {
                break;
            }
            cur_li = nli;
        }

        (
            self.node(begin, end, path, NodeValue::Array(elements)),
            after,
        )
    }

    // -- flow context ------------------------------------------------------

    /// Parses a flow collection or scalar beginning at the given position.
    /// Flow collections may span lines; the returned cursor points one past
    /// the final character consumed.
    fn parse_flow(&mut self, li: usize, byte: usize, path: &str) -> (Node, (usize, usize)) {
        match self.rest(li, byte).as_bytes().first() {
            Some(b'[') => self.parse_flow_sequence(li, byte, path),
            Some(b'{') => self.parse_flow_mapping(li, byte, path),
            Some(b'"') | Some(b'\'') => {
                let (text, end) = self.parse_quoted(li, byte, path);
                let node = self.node(
                    self.pos(li, byte),
                    self.pos(li, end),
                    path,
                    NodeValue::String(text),
                );
                (node, (li, end))
            }
            _ => {
                let rest = self.rest(li, byte);
                let len = rest
                    .char_indices()
                    .find(|&(_, c)| matches!(c, ',' | ']' | '}'))
                    .map(|(i, _)| i)
                    .unwrap_or(rest.len());
                let text_end = byte + rest[..len].trim_end().len();
                let node = self.plain_scalar(li, byte, text_end, path);
                (node, (li, text_end))
            }
        }
    }

    /// Advances the flow cursor past whitespace, continuing onto following
    /// lines. Returns None at end of input.
    fn flow_skip_ws(&self, mut li: usize, mut byte: usize) -> Option<(usize, usize)> {
        loop {
            byte = self.skip_spaces(li, byte);
            if byte < self.lines[li].end {
                return Some((li, byte));
            }
            li = self.next_content(li + 1)?;
            byte = self.lines[li].start;
        }
    }

    fn parse_flow_sequence(&mut self, li: usize, byte: usize, path: &str) -> (Node, (usize, usize)) {
        let begin = self.pos(li, byte);
        let mut elements = Vec::new();
        let (mut cli, mut cb) = (li, byte + 1);

        loop {
            let (eli, eb) = match self.flow_skip_ws(cli, cb) {
                Some(c) => c,
                None => {
                    self.error(begin, begin, path, "unterminated flow sequence");
                    let end = self.last_pos();
                    return (
                        self.node(begin, end, path, NodeValue::Array(elements)),
                        (self.lines.len() - 1, self.lines[self.lines.len() - 1].end),
                    );
                }
            };
            if self.rest(eli, eb).starts_with(']') {
                let end = self.pos(eli, eb + 1);
                return (
                    self.node(begin, end, path, NodeValue::Array(elements)),
                    (eli, eb + 1),
                );
            }

            let child_path = format!(
                "{}{}{}",
                path,
                if path.is_empty() { "" } else { "/" },
                elements.len()
            );
            let (element, cur) = self.parse_flow(eli, eb, &child_path);
            elements.push(element);

            let (sli, sb) = match self.flow_skip_ws(cur.0, cur.1) {
                Some(c) => c,
                None => {
                    self.error(begin, begin, path, "unterminated flow sequence");
                    let end = self.last_pos();
                    return (
                        self.node(begin, end, path, NodeValue::Array(elements)),
                        (self.lines.len() - 1, self.lines[self.lines.len() - 1].end),
                    );
                }
            };
            match self.rest(sli, sb).as_bytes().first() {
                Some(b',') => {
                    cli = sli;
                    cb = sb + 1;
                }
                Some(b']') => {
                    let end = self.pos(sli, sb + 1);
                    return (
                        self.node(begin, end, path, NodeValue::Array(elements)),
                        (sli, sb + 1),
                    );
                }
                _ => {
                    let p = self.pos(sli, sb);
                    self.error(p, p, path, "expected `,` or `]` in flow sequence");
                    cli = sli;
                    cb = sb + 1;
                }
            }
        }
    }

    fn parse_flow_mapping(&mut self, li: usize, byte: usize, path: &str) -> (Node, (usize, usize)) {
        let begin = self.pos(li, byte);
        let mut entries: Vec<(Node, Node)> = Vec::new();
        let (mut cli, mut cb) = (li, byte + 1);

        loop {
            let (kli, kb) = match self.flow_skip_ws(cli, cb) {
                Some(c) => c,
                None => {
                    self.error(begin, begin, path, "unterminated flow mapping");
                    let end = self.last_pos();
                    return (
                        self.node(begin, end, path, NodeValue::Object(entries)),
                        (self.lines.len() - 1, self.lines[self.lines.len() - 1].end),
                    );
                }
            };
            if self.rest(kli, kb).starts_with('}') {
                let end = self.pos(kli, kb + 1);
                return (
                    self.node(begin, end, path, NodeValue::Object(entries)),
                    (kli, kb + 1),
                );
            }

            // Key: quoted or plain up to `:`.
            let (key_text, key_end) = match self.rest(kli, kb).as_bytes().first() {
                Some(b'"') | Some(b'\'') => self.parse_quoted(kli, kb, path),
                _ => {
                    let rest = self.rest(kli, kb);
                    let len = rest
                        .char_indices()
                        .find(|&(_, c)| matches!(c, ':' | ',' | '}' | ']'))
                        .map(|(i, _)| i)
                        .unwrap_or(rest.len());
                    (rest[..len].trim_end().to_string(), kb + rest[..len].trim_end().len())
                }
            };
            let child_path = join_path(path, &key_text);
            let key_node = self.node(
                self.pos(kli, kb),
                self.pos(kli, key_end),
                &child_path,
                NodeValue::String(key_text),
            );

            let colon = match self.flow_skip_ws(kli, key_end) {
                Some((l, b)) if self.rest(l, b).starts_with(':') => (l, b),
                Some((l, b)) => {
                    let p = self.pos(l, b);
                    self.error(p, p, &child_path, "expected `:` in flow mapping");
                    (l, b.saturating_sub(1))
                }
                None => {
                    self.error(begin, begin, path, "unterminated flow mapping");
                    let end = self.last_pos();
                    entries.push((key_node, self.null_at(kli, key_end, &child_path)));
                    return (
                        self.node(begin, end, path, NodeValue::Object(entries)),
                        (self.lines.len() - 1, self.lines[self.lines.len() - 1].end),
                    );
                }
            };

            let (vli, vb) = match self.flow_skip_ws(colon.0, colon.1 + 1) {
                Some(c) => c,
                None => {
                    self.error(begin, begin, path, "unterminated flow mapping");
                    let end = self.last_pos();
                    entries.push((key_node, self.null_at(colon.0, colon.1, &child_path)));
                    return (
                        self.node(begin, end, path, NodeValue::Object(entries)),
                        (self.lines.len() - 1, self.lines[self.lines.len() - 1].end),
                    );
                }
            };
            let (value, cur) = self.parse_flow(vli, vb, &child_path);
            entries.push((key_node, value));

            let (sli, sb) = match self.flow_skip_ws(cur.0, cur.1) {
                Some(c) => c,
                None => {
                    self.error(begin, begin, path, "unterminated flow mapping");
                    let end = self.last_pos();
                    return (
                        self.node(begin, end, path, NodeValue::Object(entries)),
                        (self.lines.len() - 1, self.lines[self.lines.len() - 1].end),
                    );
                }
            };
            match self.rest(sli, sb).as_bytes().first() {
                Some(b',') => {
                    cli = sli;
                    cb = sb + 1;
                }
                Some(b'}') => {
                    let end = self.pos(sli, sb + 1);
                    return (
                        self.node(begin, end, path, NodeValue::Object(entries)),
                        (sli, sb + 1),
                    );
                }
                _ => {
                    let p = self.pos(sli, sb);
                    self.error(p, p, path, "expected `,` or `}` in flow mapping");
                    cli = sli;
                    cb = sb + 1;
                }
            }
        }
    }

    // -- scalars -----------------------------------------------------------

    /// Parses a quoted scalar. Returns the unescaped text and the byte
    /// offset one past the closing quote.
    fn parse_quoted(&mut self, li: usize, byte: usize, path: &str) -> (String, usize) {
        let rest = self.rest(li, byte).to_string();
        let quote = rest.chars().next().unwrap_or('"');
        let mut out = String::new();
        let mut chars = rest.char_indices().skip(1).peekable();

        while let Some((i, ch)) = chars.next() {
            if quote == '\'' {
                if ch == '\'' {
                    if let Some(&(_, '\'')) = chars.peek() {
                        chars.next();
                        out.push('\'');
                        continue;
                    }
                    return (out, byte + i + 1);
                }
                out.push(ch);
                continue;
            }

            match ch {
                '"' => return (out, byte + i + 1),
                '\\' => match chars.next() {
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 't')) => out.push('\t'),
                    Some((_, 'r')) => out.push('\r'),
                    Some((_, 'b')) => out.push('\u{8}'),
                    Some((_, 'f')) => out.push('\u{c}'),
                    Some((_, '0')) => out.push('\0'),
                    Some((_, '"')) => out.push('"'),
                    Some((_, '\'')) => out.push('\''),
                    Some((_, '\\')) => out.push('\\'),
                    Some((_, '/')) => out.push('/'),
                    Some((j, 'u')) => {
                        let hex = rest.get(j + 1..j + 5).unwrap_or("");
                        match u32::from_str_radix(hex, 16).ok().and_then(char::from_u32) {
                            Some(c) => out.push(c),
                            None => {
                                let p = self.pos(li, byte + j);
                                self.error(p, p, path, "invalid unicode escape");
                            }
                        }
                        for _ in 0..4 {
                            chars.next();
                        }
                    }
                    Some((j, other)) => {
                        let p = self.pos(li, byte + j);
                        self.error(p, p, path, format!("invalid escape `\\{other}`"));
                    }
                    None => break,
                },
                _ => out.push(ch),
            }
        }

        let p = self.pos(li, byte);
        self.error(p, p, path, "unterminated quoted scalar");
        (out, self.lines[li].end)
    }

    /// Classifies a plain scalar as null, boolean, number, or string.
    fn plain_scalar(&mut self, li: usize, byte: usize, end: usize, path: &str) -> Node {
        let text = self.source.contents()[byte..end].trim_end();
        let end = byte + text.len();
        let begin_pos = self.pos(li, byte);
        let end_pos = self.pos(li, end);

        let repr = match text {
            "" | "null" | "~" => NodeValue::Null,
            "true" => NodeValue::Boolean(true),
            "false" => NodeValue::Boolean(false),
            _ if is_valid_number(text) => match Number::from_str(text) {
                Ok(n) => NodeValue::Number(n),
                Err(_) => NodeValue::String(text.to_string()),
            },
            _ => NodeValue::String(text.to_string()),
        };
        self.node(begin_pos, end_pos, path, repr)
    }

    // -- helpers -----------------------------------------------------------

    fn expect_line_end(&mut self, li: usize, byte: usize, path: &str) {
        if byte < self.lines[li].end {
            let p = self.pos(li, byte);
            self.error(p, p, path, "unexpected trailing content");
        }
    }

    /// Comments on blank lines immediately preceding the given line.
    fn head_trivia(&self, li: usize) -> Vec<String> {
        let mut head = Vec::new();
        let mut i = li;
        while i > 0 {
            let prev = &self.lines[i - 1];
            match (&prev.blank, &prev.comment) {
                (true, Some(comment)) => head.push(comment.clone()),
                _ => break,
            }
            i -= 1;
        }
        head.reverse();
        head
    }

    fn last_pos(&self) -> Pos {
        match self.lines.last() {
            Some(line) => Pos::new(line.number, line.end - self.source.line_start(line.number - 1) + 1, line.end),
            None => Pos::new(1, 1, 0),
        }
    }
}

/// Finds the byte offset of a `:` that separates a plain mapping key from
/// its value: the first `:` followed by a space or end of line, outside
/// quotes and flow collections.
fn find_plain_key_colon(content: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let bytes = content.as_bytes();
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
            None => match ch {
                '\'' | '"' => quote = Some(ch),
                '[' | '{' => depth += 1,
                ']' | '}' => depth = depth.saturating_sub(1),
                ':' if depth == 0 => {
                    if i + 1 >= bytes.len() || bytes[i + 1] == b' ' {
                        return Some(i);
                    }
                }
                _ => {}
            },
        }
    }
    None
}

/// Joins a structural path segment: `values` + `foo` -> `values/foo`.
pub(crate) fn join_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}/{key}")
    }
}
