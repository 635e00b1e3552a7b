//! YAML emitter and comment reader.
//!
//! Values are parsed with `serde_yaml` (cargo feature `yaml`); writing is done
//! here so per-path comments and the header survive. Two-space indentation,
//! `- ` sequence items and block literals for multi-line strings.

use crate::document::{Comments, Document, Mapping, Value, join_path};

use super::scalar::{comment_text, take_quoted, yaml_scalar, yaml_string};

const INDENT: usize = 2;

#[cfg(feature = "yaml")]
pub(super) fn parse(text: &str) -> Result<Value, String> {
    serde_yaml::from_str::<Value>(text).map_err(|e| e.to_string())
}

/// Render a document as YAML text.
pub(super) fn emit(doc: &Document) -> String {
    let mut out = String::new();
    if !doc.header().is_empty() {
        for line in doc.header() {
            push_comment(&mut out, 0, line);
        }
        out.push('\n');
    }
    if doc.root().is_empty() {
        out.push_str("{}\n");
    } else {
        emit_map(&mut out, doc.root(), 0, "", doc.comments());
    }
    out
}

fn push_comment(out: &mut String, indent: usize, line: &str) {
    out.push_str(&" ".repeat(indent));
    if line.is_empty() {
        out.push_str("#\n");
    } else {
        out.push_str("# ");
        out.push_str(line);
        out.push('\n');
    }
}

fn push_comments(out: &mut String, indent: usize, path: &str, comments: &Comments) {
    if let Some(lines) = comments.get(path) {
        for line in lines {
            push_comment(out, indent, line);
        }
    }
}

fn emit_map(out: &mut String, map: &Mapping, indent: usize, prefix: &str, comments: &Comments) {
    let pad = " ".repeat(indent);
    for (key, value) in map {
        let path = join_path(prefix, key);
        push_comments(out, indent, &path, comments);
        out.push_str(&pad);
        out.push_str(&yaml_string(key));
        out.push(':');
        emit_value_after_key(out, value, indent, &path, comments);
    }
}

/// Emit the value part of `key:` or `-`, including the newline.
fn emit_value_after_key(
    out: &mut String,
    value: &Value,
    indent: usize,
    path: &str,
    comments: &Comments,
) {
    match value {
        Value::Map(map) if map.is_empty() => out.push_str(" {}\n"),
        Value::List(items) if items.is_empty() => out.push_str(" []\n"),
        Value::Map(map) => {
            out.push('\n');
            emit_map(out, map, indent + INDENT, path, comments);
        }
        Value::List(items) => {
            out.push('\n');
            emit_list(out, items, indent + INDENT, path, comments);
        }
        Value::String(s) if block_literal_fits(s) => {
            emit_block_literal(out, s, indent + INDENT);
        }
        scalar => {
            out.push(' ');
            out.push_str(&yaml_scalar(scalar));
            out.push('\n');
        }
    }
}

fn emit_list(out: &mut String, items: &[Value], indent: usize, prefix: &str, comments: &Comments) {
    let pad = " ".repeat(indent);
    for (idx, item) in items.iter().enumerate() {
        let path = format!("{prefix}[{idx}]");
        push_comments(out, indent, &path, comments);
        match item {
            Value::Map(map) if !map.is_empty() => {
                let mut body = String::new();
                emit_map(&mut body, map, indent + INDENT, &path, comments);
                let first_is_comment = body.trim_start().starts_with('#');
                if first_is_comment {
                    out.push_str(&pad);
                    out.push_str("-\n");
                    out.push_str(&body);
                } else {
                    // Hoist the first entry onto the dash line.
                    out.push_str(&pad);
                    out.push_str("- ");
                    out.push_str(&body[indent + INDENT..]);
                }
            }
            Value::List(inner) if !inner.is_empty() => {
                out.push_str(&pad);
                out.push_str("-\n");
                emit_list(out, inner, indent + INDENT, &path, comments);
            }
            other => {
                out.push_str(&pad);
                out.push('-');
                emit_value_after_key(out, other, indent, &path, comments);
            }
        }
    }
}

/// Multi-line strings whose first line starts flush can use `|`.
fn block_literal_fits(s: &str) -> bool {
    if !s.contains('\n') || s.contains('\r') {
        return false;
    }
    let first = s.lines().next().unwrap_or("");
    if first.is_empty() || first.starts_with(' ') || first.starts_with('\t') {
        return false;
    }
    !s.chars().any(|c| c.is_control() && c != '\n' && c != '\t')
}

fn emit_block_literal(out: &mut String, s: &str, indent: usize) {
    let trailing = s.len() - s.trim_end_matches('\n').len();
    let chomp = match trailing {
        0 => "|-",
        1 => "|",
        _ => "|+",
    };
    out.push(' ');
    out.push_str(chomp);
    out.push('\n');

    let pad = " ".repeat(indent);
    let body = s.strip_suffix('\n').unwrap_or(s);
    for line in body.split('\n') {
        if !line.is_empty() {
            out.push_str(&pad);
            out.push_str(line);
        }
        out.push('\n');
    }
}

/// One open level of the block structure while reading.
enum Frame {
    Key { indent: usize, key: String },
    Item { indent: usize, index: usize },
}

impl Frame {
    fn indent(&self) -> usize {
        match self {
            Frame::Key { indent, .. } | Frame::Item { indent, .. } => *indent,
        }
    }
}

fn frame_path(stack: &[Frame]) -> String {
    stack.iter().fold(String::new(), |path, frame| match frame {
        Frame::Key { key, .. } => join_path(&path, key),
        Frame::Item { index, .. } => format!("{path}[{index}]"),
    })
}

/// Recover the header and per-path comments from YAML text.
///
/// Comments are attached to the next mapping key or sequence item, addressed
/// as in `servers[1].host`. A comment block at the top followed by a blank
/// line is the header.
pub(super) fn harvest(text: &str) -> (Vec<String>, Comments) {
    let mut header = Vec::new();
    let mut comments = Comments::new();
    let mut pending: Vec<String> = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut seen_key = false;
    let mut block_owner: Option<usize> = None;

    for raw in text.lines() {
        let trimmed = raw.trim_start();
        let indent = raw.len() - trimmed.len();

        if let Some(owner) = block_owner {
            if trimmed.is_empty() || indent > owner {
                continue;
            }
            block_owner = None;
        }

        if trimmed.is_empty() {
            if !seen_key && header.is_empty() && !pending.is_empty() {
                header = std::mem::take(&mut pending);
            }
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix('#') {
            pending.push(comment_text(rest, "").to_string());
            continue;
        }
        if trimmed == "---" || trimmed == "..." {
            continue;
        }
        seen_key = true;

        let mut line = trimmed;
        let mut column = indent;
        if line.starts_with("- ") || line == "-" {
            while stack.last().is_some_and(|frame| frame.indent() > column) {
                stack.pop();
            }
            let index = match stack.last() {
                Some(Frame::Item { indent, index }) if *indent == column => {
                    let next = index + 1;
                    stack.pop();
                    next
                }
                _ => 0,
            };
            stack.push(Frame::Item { indent: column, index });
            if !pending.is_empty() {
                comments.insert(frame_path(&stack), std::mem::take(&mut pending));
            }

            // The first key of a mapping item shares the dash line.
            let rest = line[1..].trim_start();
            if rest.is_empty() || rest.starts_with("- ") {
                continue;
            }
            column = raw.len() - rest.len();
            line = rest;
            if split_key(line).is_none() {
                if line.starts_with('|') || line.starts_with('>') {
                    block_owner = Some(indent);
                }
                continue;
            }
        }

        let Some((key, rest)) = split_key(line) else {
            pending.clear();
            continue;
        };
        while stack.last().is_some_and(|frame| frame.indent() >= column) {
            stack.pop();
        }
        let path = join_path(&frame_path(&stack), &key);
        if !pending.is_empty() {
            comments.insert(path, std::mem::take(&mut pending));
        }

        let value = rest.trim();
        if value.starts_with('|') || value.starts_with('>') {
            block_owner = Some(column);
        }
        stack.push(Frame::Key { indent: column, key });
    }

    (header, comments)
}

/// Split `key: value` into its key and the text after the colon.
fn split_key(line: &str) -> Option<(String, &str)> {
    if line.starts_with('"') || line.starts_with('\'') {
        let (key, rest) = take_quoted(line)?;
        let rest = rest.trim_start().strip_prefix(':')?;
        return Some((key, rest));
    }
    let idx = line.find(": ").or_else(|| line.strip_suffix(':').map(|s| s.len()))?;
    Some((line[..idx].trim_end().to_string(), &line[idx + 1..]))
}
