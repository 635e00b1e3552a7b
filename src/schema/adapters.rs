//! Value adapters and list item processors.
//!
//! Adapters sit between the on-disk representation and the canonical value a
//! field's [`ConfigValue`](super::ConfigValue) impl understands. They work on
//! [`Value`]s so the binder can apply them to whole fields, list elements or
//! mapping keys alike.

use crate::document::Value;

/// Converts between on-disk and canonical values.
pub trait ValueAdapter: Send + Sync {
    /// Disk to canonical. `None` rejects the value.
    fn deserialize(&self, raw: &Value) -> Option<Value>;

    /// Canonical to disk.
    fn serialize(&self, value: &Value) -> Value;
}

/// Restricts a string to a fixed set of names, matched case-insensitively and
/// stored in canonical spelling.
#[derive(Debug, Clone)]
pub struct EnumAdapter {
    names: Vec<String>,
}

impl EnumAdapter {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

impl ValueAdapter for EnumAdapter {
    fn deserialize(&self, raw: &Value) -> Option<Value> {
        let text = raw.scalar_text()?;
        let text = text.trim();
        self.names
            .iter()
            .find(|name| name.eq_ignore_ascii_case(text))
            .map(|name| Value::String(name.clone()))
    }

    fn serialize(&self, value: &Value) -> Value {
        self.deserialize(value).unwrap_or_else(|| value.clone())
    }
}

/// Human-readable durations on disk, integer milliseconds in memory.
///
/// Accepts `250ms`, `30s`, `5m`, `2h`, `1d` or a bare number of
/// milliseconds. Writes the largest unit that divides the value exactly.
#[derive(Debug, Clone, Copy, Default)]
pub struct DurationAdapter;

const UNITS: &[(&str, i64)] = &[
    ("d", 86_400_000),
    ("h", 3_600_000),
    ("m", 60_000),
    ("s", 1_000),
    ("ms", 1),
];

impl DurationAdapter {
    /// Parse a duration string into milliseconds.
    pub fn parse_millis(text: &str) -> Option<i64> {
        let text = text.trim().to_ascii_lowercase();
        let split = text
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(text.len());
        let (number, unit) = text.split_at(split);
        let unit = unit.trim();
        let factor = if unit.is_empty() {
            1
        } else {
            UNITS.iter().find(|(name, _)| *name == unit)?.1
        };
        if number.contains('.') {
            let n: f64 = number.parse().ok()?;
            Some((n * factor as f64).round() as i64)
        } else {
            number.parse::<i64>().ok()?.checked_mul(factor)
        }
    }

    /// Render milliseconds with the largest exact unit.
    pub fn format_millis(millis: i64) -> String {
        if millis == 0 {
            return "0ms".to_string();
        }
        for (name, factor) in UNITS {
            if millis % factor == 0 {
                return format!("{}{name}", millis / factor);
            }
        }
        format!("{millis}ms")
    }
}

impl ValueAdapter for DurationAdapter {
    fn deserialize(&self, raw: &Value) -> Option<Value> {
        match raw {
            Value::Int(ms) => Some(Value::Int(*ms)),
            Value::Float(f) if f.is_finite() => Some(Value::Int(f.round() as i64)),
            Value::String(s) => DurationAdapter::parse_millis(s).map(Value::Int),
            _ => None,
        }
    }

    fn serialize(&self, value: &Value) -> Value {
        match value.as_i64() {
            Some(ms) => Value::String(DurationAdapter::format_millis(ms)),
            None => value.clone(),
        }
    }
}

/// What to do with one list element on read.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    /// Keep this (possibly rewritten) element.
    Keep(Value),
    /// Replace with the element at the same index of the field's default
    /// list, or drop it when there is none.
    UseDefault,
    Drop,
}

/// Inspects list elements as they are read.
pub trait ListItemProcessor: Send + Sync {
    fn process(&self, index: usize, item: &Value) -> ItemOutcome;
}

impl<F> ListItemProcessor for F
where
    F: Fn(usize, &Value) -> ItemOutcome + Send + Sync,
{
    fn process(&self, index: usize, item: &Value) -> ItemOutcome {
        self(index, item)
    }
}
