//! Scalar rendering shared by the hand-rolled emitters.

use crate::document::Value;

/// Double-quote a string with JSON-compatible escapes.
///
/// The output is also a valid YAML double-quoted scalar and a valid TOML
/// basic string.
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if c.is_control() => out.push_str(&format!("\\u{:04X}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Float text that always reads back as a float.
pub fn float_text(f: f64) -> String {
    // `{:?}` keeps a fractional part or an exponent (`1.0`, `1e100`).
    format!("{f:?}")
}

/// Read one quoted string from the start of `input`.
///
/// Handles double quotes with backslash escapes and single quotes with
/// doubled-quote escapes. Returns the unescaped text and the remainder.
pub fn take_quoted(input: &str) -> Option<(String, &str)> {
    let mut chars = input.char_indices();
    let (_, open) = chars.next()?;
    if open != '"' && open != '\'' {
        return None;
    }

    let mut out = String::new();
    while let Some((idx, c)) = chars.next() {
        if c == open {
            if open == '\'' && input[idx + 1..].starts_with('\'') {
                chars.next();
                out.push('\'');
                continue;
            }
            return Some((out, &input[idx + 1..]));
        }
        if c == '\\' && open == '"' {
            let (_, escaped) = chars.next()?;
            match escaped {
                'n' => out.push('\n'),
                'r' => out.push('\r'),
                't' => out.push('\t'),
                'b' => out.push('\u{08}'),
                'f' => out.push('\u{0c}'),
                'u' => {
                    let start = idx + 2;
                    let hex = input.get(start..start + 4)?;
                    let code = u32::from_str_radix(hex, 16).ok()?;
                    out.push(char::from_u32(code)?);
                    for _ in 0..4 {
                        chars.next();
                    }
                }
                other => out.push(other),
            }
            continue;
        }
        out.push(c);
    }
    None
}

/// Strip a comment marker and one following space.
pub fn comment_text<'a>(line: &'a str, marker: &str) -> &'a str {
    let rest = line.strip_prefix(marker).unwrap_or(line);
    rest.strip_prefix(' ').unwrap_or(rest)
}

/// Render a scalar for YAML. Lists and maps are handled by the emitter.
pub fn yaml_scalar(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) if f.is_nan() => ".nan".to_string(),
        Value::Float(f) if f.is_infinite() => {
            if *f > 0.0 { ".inf" } else { "-.inf" }.to_string()
        }
        Value::Float(f) => float_text(*f),
        Value::String(s) => yaml_string(s),
        Value::List(_) | Value::Map(_) => String::new(),
    }
}

/// Render a string plain when YAML would read it back unchanged.
pub fn yaml_string(s: &str) -> String {
    if is_plain_yaml(s) {
        s.to_string()
    } else {
        quote(s)
    }
}

const YAML_RESERVED: &[&str] = &[
    "true", "false", "null", "~", "yes", "no", "on", "off", "y", "n",
];

fn is_plain_yaml(s: &str) -> bool {
    let Some(first) = s.chars().next() else {
        return false;
    };
    if s.trim() != s || YAML_RESERVED.contains(&s.to_ascii_lowercase().as_str()) {
        return false;
    }
    // Anything number-like is quoted rather than guessed at.
    if first.is_ascii_digit() || matches!(first, '+' | '-' | '.') {
        return false;
    }
    if "?:,[]{}#&*!|>'\"%@`".contains(first) {
        return false;
    }
    if s.contains(": ") || s.contains(" #") || s.ends_with(':') {
        return false;
    }
    !s.chars().any(|c| c.is_control())
}

/// Render a mapping key for TOML: bare when possible.
pub fn toml_key(key: &str) -> String {
    let bare = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if bare { key.to_string() } else { quote(key) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote("a\"b\\c\n"), r#""a\"b\\c\n""#);
        assert_eq!(quote("\u{7f}"), r#""\u007F""#);
    }

    #[test]
    fn test_take_quoted_roundtrip() {
        let quoted = quote("tab\there \"q\" \u{1}");
        let line = format!("{quoted}: 1");
        let (text, rest) = take_quoted(&line).unwrap();
        assert_eq!(text, "tab\there \"q\" \u{1}");
        assert_eq!(rest, ": 1");
    }

    #[test]
    fn test_take_single_quoted() {
        let (text, rest) = take_quoted("'it''s' = 2").unwrap();
        assert_eq!(text, "it's");
        assert_eq!(rest, " = 2");
    }

    #[test]
    fn test_yaml_plain_detection() {
        assert_eq!(yaml_string("hello world"), "hello world");
        assert_eq!(yaml_string("yes"), "\"yes\"");
        assert_eq!(yaml_string("123"), "\"123\"");
        assert_eq!(yaml_string(""), "\"\"");
        assert_eq!(yaml_string("a: b"), "\"a: b\"");
        assert_eq!(yaml_string("#tag"), "\"#tag\"");
        assert_eq!(yaml_string(" padded"), "\" padded\"");
    }

    #[test]
    fn test_float_text_keeps_fraction() {
        assert_eq!(float_text(1.0), "1.0");
        assert_eq!(float_text(0.25), "0.25");
        assert_eq!(yaml_scalar(&Value::Float(f64::NEG_INFINITY)), "-.inf");
    }

    #[test]
    fn test_toml_key() {
        assert_eq!(toml_key("plain_key-1"), "plain_key-1");
        assert_eq!(toml_key("has space"), "\"has space\"");
        assert_eq!(toml_key("a.b"), "\"a.b\"");
    }
}
