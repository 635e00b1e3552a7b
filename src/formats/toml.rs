//! TOML emitter and comment reader.
//!
//! Values are parsed with the `toml` crate (cargo feature `toml`). The
//! emitter writes scalars and inline arrays of a table first, then its
//! sub-tables as `[a.b]` sections, and lists of mappings as repeated
//! `[[a.b]]` tables. TOML has no null: null entries are left out.

use std::collections::HashMap;

use crate::document::{Comments, Document, Mapping, Value, join_path};

use super::scalar::{comment_text, float_text, quote, take_quoted, toml_key};

#[cfg(feature = "toml")]
pub(super) fn parse(text: &str) -> Result<Value, String> {
    ::toml::from_str::<Value>(text).map_err(|e| e.to_string())
}

/// Render a document as TOML text.
pub(super) fn emit(doc: &Document) -> String {
    let mut out = String::new();
    if !doc.header().is_empty() {
        for line in doc.header() {
            push_comment(&mut out, line);
        }
        out.push('\n');
    }
    emit_table(&mut out, doc.root(), &[], "", doc.comments());
    out
}

fn push_comment(out: &mut String, line: &str) {
    if line.is_empty() {
        out.push_str("#\n");
    } else {
        out.push_str("# ");
        out.push_str(line);
        out.push('\n');
    }
}

fn push_comments(out: &mut String, path: &str, comments: &Comments) {
    if let Some(lines) = comments.get(path) {
        for line in lines {
            push_comment(out, line);
        }
    }
}

fn is_table_array(items: &[Value]) -> bool {
    !items.is_empty() && items.iter().all(|item| matches!(item, Value::Map(_)))
}

/// Emit one table body followed by its sub-tables.
///
/// `keys` is the table header path; `path` is the comment path, which
/// differs inside array tables (`items[0].name`).
fn emit_table(out: &mut String, map: &Mapping, keys: &[String], path: &str, comments: &Comments) {
    let mut tables = Vec::new();

    for (key, value) in map {
        let child_path = join_path(path, key);
        match value {
            Value::Null => {}
            Value::Map(_) => tables.push((key, value)),
            Value::List(items) if is_table_array(items) => tables.push((key, value)),
            scalar_or_inline => {
                push_comments(out, &child_path, comments);
                out.push_str(&toml_key(key));
                out.push_str(" = ");
                out.push_str(&inline_value(scalar_or_inline));
                out.push('\n');
            }
        }
    }

    for (key, value) in tables {
        let child_path = join_path(path, key);
        let mut child_keys = keys.to_vec();
        child_keys.push(key.clone());
        let header = child_keys
            .iter()
            .map(|k| toml_key(k))
            .collect::<Vec<_>>()
            .join(".");

        match value {
            Value::Map(child) => {
                if !out.is_empty() {
                    out.push('\n');
                }
                push_comments(out, &child_path, comments);
                out.push('[');
                out.push_str(&header);
                out.push_str("]\n");
                emit_table(out, child, &child_keys, &child_path, comments);
            }
            Value::List(items) => {
                for (idx, item) in items.iter().enumerate() {
                    let Value::Map(child) = item else { continue };
                    if !out.is_empty() {
                        out.push('\n');
                    }
                    if idx == 0 {
                        push_comments(out, &child_path, comments);
                    }
                    let item_path = format!("{child_path}[{idx}]");
                    push_comments(out, &item_path, comments);
                    out.push_str("[[");
                    out.push_str(&header);
                    out.push_str("]]\n");
                    emit_table(out, child, &child_keys, &item_path, comments);
                }
            }
            _ => {}
        }
    }
}

fn inline_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) if f.is_nan() => "nan".to_string(),
        Value::Float(f) if f.is_infinite() => {
            if *f > 0.0 { "inf" } else { "-inf" }.to_string()
        }
        Value::Float(f) => float_text(*f),
        Value::String(s) => quote(s),
        Value::List(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter(|item| !item.is_null())
                .map(inline_value)
                .collect();
            format!("[{}]", parts.join(", "))
        }
        Value::Map(map) => {
            let parts: Vec<String> = map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| format!("{} = {}", toml_key(k), inline_value(v)))
                .collect();
            if parts.is_empty() {
                "{}".to_string()
            } else {
                format!("{{ {} }}", parts.join(", "))
            }
        }
    }
}

/// Recover the header and per-key comments from TOML text.
///
/// Keys inside `[[array]]` tables are addressed by item, as in
/// `jobs[1].label`. Comments above the first `[[array]]` header belong to the
/// array itself.
pub(super) fn harvest(text: &str) -> (Vec<String>, Comments) {
    let mut header = Vec::new();
    let mut comments = Comments::new();
    let mut pending: Vec<String> = Vec::new();
    let mut table = String::new();
    // Current item index of every array table seen, by header keys.
    let mut items: HashMap<Vec<String>, usize> = HashMap::new();
    let mut seen_key = false;
    let mut in_multiline = false;

    for raw in text.lines() {
        let line = raw.trim();

        if in_multiline {
            if line.matches("\"\"\"").count() % 2 == 1 || line.matches("'''").count() % 2 == 1 {
                in_multiline = false;
            }
            continue;
        }
        if line.is_empty() {
            if !seen_key && header.is_empty() && !pending.is_empty() {
                header = std::mem::take(&mut pending);
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix('#') {
            pending.push(comment_text(rest, "").to_string());
            continue;
        }
        seen_key = true;

        if let Some(inner) = line.strip_prefix("[[") {
            let keys = split_dotted(inner.split("]]").next().unwrap_or(""));
            let Some((last, parent)) = keys.split_last() else {
                pending.clear();
                continue;
            };
            let idx = items.get(&keys).map_or(0, |idx| idx + 1);
            // A new item starts fresh nested arrays.
            items.retain(|other, _| !(other.len() > keys.len() && other.starts_with(&keys)));
            let list_path = join_path(&table_path(parent, &items), last);
            items.insert(keys.clone(), idx);
            table = table_path(&keys, &items);
            if !pending.is_empty() {
                let owner = if idx == 0 { list_path } else { table.clone() };
                comments.insert(owner, std::mem::take(&mut pending));
            }
            continue;
        }
        if let Some(inner) = line.strip_prefix('[') {
            let keys = split_dotted(inner.split(']').next().unwrap_or(""));
            table = table_path(&keys, &items);
            if !pending.is_empty() {
                comments.insert(table.clone(), std::mem::take(&mut pending));
            }
            continue;
        }

        let Some((key_part, value_part)) = split_assignment(line) else {
            pending.clear();
            continue;
        };
        let value_part = value_part.trim_start();
        if (value_part.starts_with("\"\"\"") && value_part.matches("\"\"\"").count() == 1)
            || (value_part.starts_with("'''") && value_part.matches("'''").count() == 1)
        {
            in_multiline = true;
        }

        let path = join_path(&table, &split_dotted(key_part).join("."));
        if !pending.is_empty() {
            comments.insert(path, std::mem::take(&mut pending));
        }
    }

    (header, comments)
}

/// Comment path of a table header, with the current item index after every
/// array table on the way.
fn table_path(keys: &[String], items: &HashMap<Vec<String>, usize>) -> String {
    let mut path = String::new();
    for depth in 1..=keys.len() {
        path = join_path(&path, &keys[depth - 1]);
        if let Some(idx) = items.get(&keys[..depth]) {
            path = format!("{path}[{idx}]");
        }
    }
    path
}

/// Split `key = value` at the first `=` outside quotes.
fn split_assignment(line: &str) -> Option<(&str, &str)> {
    let mut quote_char: Option<char> = None;
    for (idx, c) in line.char_indices() {
        match (quote_char, c) {
            (None, '"' | '\'') => quote_char = Some(c),
            (Some(q), c) if c == q => quote_char = None,
            (None, '=') => return Some((line[..idx].trim(), &line[idx + 1..])),
            _ => {}
        }
    }
    None
}

/// Split a dotted key, honouring quoted segments.
fn split_dotted(input: &str) -> Vec<String> {
    let mut keys = Vec::new();
    let mut rest = input.trim();
    while !rest.is_empty() {
        if rest.starts_with('"') || rest.starts_with('\'') {
            match take_quoted(rest) {
                Some((key, tail)) => {
                    keys.push(key);
                    rest = tail.trim_start();
                }
                None => break,
            }
        } else {
            let end = rest.find('.').unwrap_or(rest.len());
            keys.push(rest[..end].trim().to_string());
            rest = &rest[end..];
        }
        rest = rest.strip_prefix('.').unwrap_or(rest).trim_start();
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        let mut doc = Document::new();
        doc.set_header(vec!["Service config".into()]);
        doc.set_commented("name", Value::from("svc"), &["Display name".into()]);
        doc.set("ports", Value::List(vec![Value::Int(80), Value::Int(443)]));
        doc.set_commented("db.url", Value::from("postgres://x"), &["Connection".into()]);
        doc.set("db.pool.size", Value::Int(4));
        doc.set_comment("db", vec!["Database".into()]);

        let mut first = Mapping::new();
        first.insert("id".into(), Value::Int(1));
        let mut second = Mapping::new();
        second.insert("id".into(), Value::Int(2));
        second.insert("label".into(), Value::Null);
        doc.set("jobs", Value::List(vec![Value::Map(first), Value::Map(second)]));
        doc
    }

    #[test]
    fn test_emit_layout() {
        let expected = "\
# Service config

# Display name
name = \"svc\"
ports = [80, 443]

# Database
[db]
# Connection
url = \"postgres://x\"

[db.pool]
size = 4

[[jobs]]
id = 1

[[jobs]]
id = 2
";
        assert_eq!(emit(&sample()), expected);
    }

    #[test]
    fn test_harvest_recovers_comments() {
        let (header, comments) = harvest(&emit(&sample()));
        assert_eq!(header, vec!["Service config"]);
        assert_eq!(comments["name"], vec!["Display name"]);
        assert_eq!(comments["db"], vec!["Database"]);
        assert_eq!(comments["db.url"], vec!["Connection"]);
    }

    #[test]
    fn test_array_table_comments_survive() {
        let mut doc = sample();
        doc.set_comment("jobs", vec!["Scheduled jobs".into()]);
        doc.set_comment("jobs[0].id", vec!["First id".into()]);
        doc.set_comment("jobs[1]", vec!["Runs last".into()]);
        doc.set_comment("jobs[1].id", vec!["Second id".into()]);

        let text = emit(&doc);
        assert!(text.contains("# Scheduled jobs\n[[jobs]]\n# First id\nid = 1\n"));
        assert!(text.contains("# Runs last\n[[jobs]]\n# Second id\nid = 2\n"));

        let (_, comments) = harvest(&text);
        assert_eq!(comments["jobs"], vec!["Scheduled jobs"]);
        assert_eq!(comments["jobs[0].id"], vec!["First id"]);
        assert_eq!(comments["jobs[1]"], vec!["Runs last"]);
        assert_eq!(comments["jobs[1].id"], vec!["Second id"]);
    }

    #[test]
    fn test_nested_array_tables_restart_per_item() {
        let text = "\
[[stages]]
name = \"a\"

[[stages.steps]]
# Only step of a
run = \"x\"

[[stages]]
name = \"b\"

[[stages.steps]]
# First step of b
run = \"y\"

[stages.meta]
# Owner of b
owner = \"ops\"
";
        let (_, comments) = harvest(text);
        assert_eq!(comments["stages[0].steps[0].run"], vec!["Only step of a"]);
        assert_eq!(comments["stages[1].steps[0].run"], vec!["First step of b"]);
        assert_eq!(comments["stages[1].meta.owner"], vec!["Owner of b"]);
    }

    #[test]
    fn test_split_dotted_quoted() {
        assert_eq!(split_dotted(r#"a."b.c".d"#), vec!["a", "b.c", "d"]);
    }

    #[test]
    fn test_inline_tables_in_mixed_arrays() {
        let mut map = Mapping::new();
        map.insert("k".into(), Value::Bool(true));
        let value = Value::List(vec![Value::Int(1), Value::Map(map)]);
        assert_eq!(inline_value(&value), "[1, { k = true }]");
    }

    #[cfg(feature = "toml")]
    #[test]
    fn test_emit_parses_back() {
        let doc = sample();
        let parsed = parse(&emit(&doc)).unwrap();
        let mut expected = doc.root().clone();
        // Nulls have no TOML representation.
        if let Some(Value::List(jobs)) = expected.get_mut("jobs") {
            jobs[1].as_map_mut().unwrap().shift_remove("label");
        }
        assert_eq!(parsed, Value::Map(expected));
    }

    #[cfg(feature = "toml")]
    #[test]
    fn test_datetime_reads_as_text() {
        let parsed = parse("when = 1979-05-27T07:32:00Z\n").unwrap();
        assert_eq!(
            parsed.as_map().unwrap()["when"],
            Value::from("1979-05-27T07:32:00Z")
        );
    }
}
