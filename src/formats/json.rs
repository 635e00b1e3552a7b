//! JSON and JSONC.
//!
//! Plain JSON goes through `serde_json` both ways and carries no comments.
//! JSONC is read with `serde_json5` and written by a small emitter that puts
//! `// ` comments above keys and the header above the opening brace.

use crate::document::{Comments, Document, Mapping, Value, join_path};

use super::scalar::{comment_text, float_text, quote};

const INDENT: &str = "  ";

pub(super) fn parse_json(text: &str) -> Result<Value, String> {
    serde_json::from_str::<Value>(text).map_err(|e| e.to_string())
}

pub(super) fn parse_jsonc(text: &str) -> Result<Value, String> {
    serde_json5::from_str::<Value>(text).map_err(|e| e.to_string())
}

pub(super) fn emit_json(doc: &Document) -> Result<String, String> {
    let mut text =
        serde_json::to_string_pretty(&Value::Map(doc.root().clone())).map_err(|e| e.to_string())?;
    text.push('\n');
    Ok(text)
}

/// Render a document as JSONC text.
pub(super) fn emit_jsonc(doc: &Document) -> String {
    let mut out = String::new();
    for line in doc.header() {
        push_comment(&mut out, 0, line);
    }
    emit_map(&mut out, doc.root(), 0, "", doc.comments());
    out.push('\n');
    out
}

fn push_comment(out: &mut String, depth: usize, line: &str) {
    out.push_str(&INDENT.repeat(depth));
    if line.is_empty() {
        out.push_str("//\n");
    } else {
        out.push_str("// ");
        out.push_str(line);
        out.push('\n');
    }
}

fn push_comments(out: &mut String, depth: usize, path: &str, comments: &Comments) {
    if let Some(lines) = comments.get(path) {
        for line in lines {
            push_comment(out, depth, line);
        }
    }
}

fn emit_map(out: &mut String, map: &Mapping, depth: usize, prefix: &str, comments: &Comments) {
    if map.is_empty() {
        out.push_str("{}");
        return;
    }
    out.push_str("{\n");
    let last = map.len() - 1;
    for (idx, (key, value)) in map.iter().enumerate() {
        let path = join_path(prefix, key);
        push_comments(out, depth + 1, &path, comments);
        out.push_str(&INDENT.repeat(depth + 1));
        out.push_str(&quote(key));
        out.push_str(": ");
        emit_value(out, value, depth + 1, &path, comments);
        if idx != last {
            out.push(',');
        }
        out.push('\n');
    }
    out.push_str(&INDENT.repeat(depth));
    out.push('}');
}

fn emit_list(out: &mut String, items: &[Value], depth: usize, prefix: &str, comments: &Comments) {
    if items.is_empty() {
        out.push_str("[]");
        return;
    }
    out.push_str("[\n");
    let last = items.len() - 1;
    for (idx, item) in items.iter().enumerate() {
        let path = format!("{prefix}[{idx}]");
        push_comments(out, depth + 1, &path, comments);
        out.push_str(&INDENT.repeat(depth + 1));
        emit_value(out, item, depth + 1, &path, comments);
        if idx != last {
            out.push(',');
        }
        out.push('\n');
    }
    out.push_str(&INDENT.repeat(depth));
    out.push(']');
}

fn emit_value(out: &mut String, value: &Value, depth: usize, path: &str, comments: &Comments) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(&b.to_string()),
        Value::Int(i) => out.push_str(&i.to_string()),
        Value::Float(f) if f.is_nan() => out.push_str("NaN"),
        Value::Float(f) if f.is_infinite() => {
            out.push_str(if *f > 0.0 { "Infinity" } else { "-Infinity" })
        }
        Value::Float(f) => out.push_str(&float_text(*f)),
        Value::String(s) => out.push_str(&quote(s)),
        Value::List(items) => emit_list(out, items, depth, path, comments),
        Value::Map(map) => emit_map(out, map, depth, path, comments),
    }
}

enum Frame {
    /// Object whose keys are tracked under this path prefix.
    Object { prefix: Option<String>, expect_key: bool, key: Option<String> },
    /// Array whose items are tracked as `prefix[index]`.
    Array { prefix: Option<String>, index: usize, started: bool },
}

/// Recover the header and per-key comments from JSONC text.
///
/// Comments before the root `{` form the header; comments before a key
/// attach to that key's path, and comments before an array item attach
/// to `path[index]`.
pub(super) fn harvest(text: &str) -> (Vec<String>, Comments) {
    let mut header = Vec::new();
    let mut comments = Comments::new();
    let mut pending: Vec<String> = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut rest = text;

    while let Some(c) = rest.chars().next() {
        if let Some(after) = rest.strip_prefix("//") {
            let end = after.find('\n').unwrap_or(after.len());
            pending.push(comment_text(after[..end].trim_end(), "").to_string());
            rest = &after[end..];
            continue;
        }
        if let Some(after) = rest.strip_prefix("/*") {
            let end = after.find("*/").unwrap_or(after.len());
            for line in after[..end].lines() {
                let line = line.trim();
                let line = line.strip_prefix('*').map(str::trim_start).unwrap_or(line);
                if !line.is_empty() {
                    pending.push(line.to_string());
                }
            }
            rest = after.get(end + 2..).unwrap_or("");
            continue;
        }

        if !c.is_whitespace() && c != ',' && c != ']' {
            begin_item(&mut stack, &mut comments, &mut pending);
        }

        match c {
            '"' | '\'' => {
                let (text_value, tail) = read_string(rest);
                rest = tail;
                record_key(&mut stack, &mut comments, &mut pending, text_value);
                continue;
            }
            '{' => {
                let prefix = match stack.last_mut() {
                    None => {
                        header = std::mem::take(&mut pending);
                        Some(String::new())
                    }
                    Some(frame) => child_prefix(frame),
                };
                pending.clear();
                stack.push(Frame::Object { prefix, expect_key: true, key: None });
            }
            '[' => {
                let prefix = stack.last().and_then(child_prefix);
                pending.clear();
                stack.push(Frame::Array { prefix, index: 0, started: false });
            }
            '}' | ']' => {
                pending.clear();
                stack.pop();
            }
            ',' => match stack.last_mut() {
                Some(Frame::Object { expect_key, .. }) => *expect_key = true,
                Some(Frame::Array { index, started, .. }) => {
                    *index += 1;
                    *started = false;
                }
                None => {}
            },
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let end = rest
                    .find(|ch: char| !(ch.is_alphanumeric() || ch == '_' || ch == '$'))
                    .unwrap_or(rest.len());
                let ident = rest[..end].to_string();
                rest = &rest[end..];
                record_key(&mut stack, &mut comments, &mut pending, ident);
                continue;
            }
            _ => {}
        }
        rest = &rest[c.len_utf8()..];
    }

    (header, comments)
}

/// Path of a container opened at the current position of `frame`.
fn child_prefix(frame: &Frame) -> Option<String> {
    match frame {
        Frame::Object { prefix: Some(prefix), key: Some(key), .. } => Some(join_path(prefix, key)),
        Frame::Array { prefix: Some(prefix), index, .. } => Some(format!("{prefix}[{index}]")),
        _ => None,
    }
}

/// Mark the start of the next array item, attaching pending comments to it.
fn begin_item(stack: &mut [Frame], comments: &mut Comments, pending: &mut Vec<String>) {
    let Some(Frame::Array { prefix, index, started }) = stack.last_mut() else {
        return;
    };
    if *started {
        return;
    }
    *started = true;
    if let Some(prefix) = prefix {
        if !pending.is_empty() {
            comments.insert(format!("{prefix}[{index}]"), std::mem::take(pending));
        }
    }
    pending.clear();
}

/// Treat a string or identifier as a key when the enclosing object expects one.
fn record_key(
    stack: &mut [Frame],
    comments: &mut Comments,
    pending: &mut Vec<String>,
    text: String,
) {
    let Some(Frame::Object { prefix, expect_key, key }) = stack.last_mut() else {
        return;
    };
    if !*expect_key {
        return;
    }
    *expect_key = false;
    if let Some(prefix) = prefix {
        let path = join_path(prefix, &text);
        if !pending.is_empty() {
            comments.insert(path, std::mem::take(pending));
        }
    }
    pending.clear();
    *key = Some(text);
}

/// Read a quoted string, returning its raw contents and the remainder.
fn read_string(input: &str) -> (String, &str) {
    let mut chars = input.char_indices();
    let Some((_, open)) = chars.next() else {
        return (String::new(), input);
    };
    let mut escaped = false;
    for (idx, c) in chars {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == open {
            let raw = &input[1..idx];
            let text = super::scalar::take_quoted(&input[..idx + 1])
                .map(|(text, _)| text)
                .unwrap_or_else(|| raw.to_string());
            return (text, &input[idx + 1..]);
        }
    }
    (input[1..].to_string(), "")
}
