//! Typed conversion between Rust values and document [`Value`]s.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::path::PathBuf;

use indexmap::IndexMap;

use crate::document::{Mapping, Value, apply_path};

/// A type that can be stored at a schema path.
pub trait ConfigValue: Sized + Clone + Send + Sync + 'static {
    fn to_value(&self) -> Value;

    fn from_value(value: &Value) -> Result<Self, String>;

    /// Intrinsic zero for an unset field that is absent and has no default.
    fn zero() -> Option<Self> {
        None
    }

    /// Whether values of this type can be "not set" at all. Only such fields
    /// fall back to defaults; every other field keeps its in-memory value.
    fn can_be_unset() -> bool {
        false
    }

    /// Whether the in-memory value counts as "not set".
    fn is_unset(&self) -> bool {
        false
    }
}

/// A type usable as a mapping key.
pub trait MapKey: Sized + Clone + Send + Sync + 'static {
    fn to_key(&self) -> String;

    fn from_key(key: &str) -> Result<Self, String>;
}

fn mismatch(expected: &str, found: &Value) -> String {
    format!("expected {expected}, found {}", found.kind())
}

impl ConfigValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }

    fn from_value(value: &Value) -> Result<Self, String> {
        Ok(value.clone())
    }

    fn can_be_unset() -> bool {
        true
    }

    fn is_unset(&self) -> bool {
        self.is_null()
    }
}

impl ConfigValue for bool {
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(format!("'{s}' is not a boolean")),
            },
            other => Err(mismatch("a boolean", other)),
        }
    }
}

macro_rules! int_value {
    ($($ty:ty),* $(,)?) => {$(
        impl ConfigValue for $ty {
            fn to_value(&self) -> Value {
                i64::try_from(*self)
                    .map(Value::Int)
                    .unwrap_or(Value::Float(*self as f64))
            }

            fn from_value(value: &Value) -> Result<Self, String> {
                let n = match value {
                    Value::Int(i) => *i,
                    Value::Float(f) if f.fract() == 0.0 && f.is_finite() => *f as i64,
                    Value::String(s) => s
                        .trim()
                        .parse::<i64>()
                        .map_err(|_| format!("'{s}' is not an integer"))?,
                    other => return Err(mismatch("an integer", other)),
                };
                <$ty>::try_from(n)
                    .map_err(|_| format!("{n} is out of range for {}", stringify!($ty)))
            }
        }

        impl MapKey for $ty {
            fn to_key(&self) -> String {
                self.to_string()
            }

            fn from_key(key: &str) -> Result<Self, String> {
                key.trim()
                    .parse()
                    .map_err(|_| format!("'{key}' is not a valid {}", stringify!($ty)))
            }
        }
    )*};
}

int_value!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

macro_rules! float_value {
    ($($ty:ty),*) => {$(
        impl ConfigValue for $ty {
            fn to_value(&self) -> Value {
                Value::Float(*self as f64)
            }

            fn from_value(value: &Value) -> Result<Self, String> {
                match value {
                    Value::Int(i) => Ok(*i as $ty),
                    Value::Float(f) => Ok(*f as $ty),
                    Value::String(s) => s
                        .trim()
                        .parse::<$ty>()
                        .map_err(|_| format!("'{s}' is not a number")),
                    other => Err(mismatch("a number", other)),
                }
            }
        }
    )*};
}

float_value!(f32, f64);

impl ConfigValue for String {
    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }

    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::String(s) => Ok(s.clone()),
            Value::Bool(_) | Value::Int(_) | Value::Float(_) => {
                value.scalar_text().ok_or_else(|| mismatch("a string", value))
            }
            other => Err(mismatch("a string", other)),
        }
    }
}

impl MapKey for String {
    fn to_key(&self) -> String {
        self.clone()
    }

    fn from_key(key: &str) -> Result<Self, String> {
        Ok(key.to_string())
    }
}

impl ConfigValue for PathBuf {
    fn to_value(&self) -> Value {
        Value::String(self.to_string_lossy().into_owned())
    }

    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::String(s) => Ok(PathBuf::from(s)),
            other => Err(mismatch("a path", other)),
        }
    }
}

impl MapKey for bool {
    fn to_key(&self) -> String {
        self.to_string()
    }

    fn from_key(key: &str) -> Result<Self, String> {
        bool::from_value(&Value::String(key.to_string()))
    }
}

impl<T: ConfigValue> ConfigValue for Option<T> {
    fn to_value(&self) -> Value {
        self.as_ref().map_or(Value::Null, T::to_value)
    }

    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }

    fn can_be_unset() -> bool {
        true
    }

    fn is_unset(&self) -> bool {
        self.is_none()
    }
}

impl<T: ConfigValue> ConfigValue for Vec<T> {
    fn to_value(&self) -> Value {
        Value::List(self.iter().map(T::to_value).collect())
    }

    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::List(items) => items
                .iter()
                .enumerate()
                .map(|(idx, item)| T::from_value(item).map_err(|e| format!("[{idx}]: {e}")))
                .collect(),
            other => Err(mismatch("a list", other)),
        }
    }
}

fn map_entries<K: MapKey, V: ConfigValue>(
    value: &Value,
) -> Result<impl Iterator<Item = Result<(K, V), String>> + '_, String> {
    let Value::Map(map) = value else {
        return Err(mismatch("a mapping", value));
    };
    Ok(map.iter().map(|(key, item)| {
        let k = K::from_key(key)?;
        let v = V::from_value(item).map_err(|e| format!("{key}: {e}"))?;
        Ok((k, v))
    }))
}

impl<K: MapKey + Hash + Eq, V: ConfigValue> ConfigValue for IndexMap<K, V> {
    fn to_value(&self) -> Value {
        Value::Map(self.iter().map(|(k, v)| (k.to_key(), v.to_value())).collect())
    }

    fn from_value(value: &Value) -> Result<Self, String> {
        map_entries(value)?.collect()
    }
}

impl<K: MapKey + Ord, V: ConfigValue> ConfigValue for BTreeMap<K, V> {
    fn to_value(&self) -> Value {
        Value::Map(self.iter().map(|(k, v)| (k.to_key(), v.to_value())).collect())
    }

    fn from_value(value: &Value) -> Result<Self, String> {
        map_entries(value)?.collect()
    }
}

impl<K: MapKey + Hash + Eq, V: ConfigValue> ConfigValue for HashMap<K, V> {
    fn to_value(&self) -> Value {
        // Sorted so repeated saves produce the same file.
        let mut entries: Vec<(String, Value)> =
            self.iter().map(|(k, v)| (k.to_key(), v.to_value())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Value::Map(entries.into_iter().collect())
    }

    fn from_value(value: &Value) -> Result<Self, String> {
        map_entries(value)?.collect()
    }
}

/// String map stored under dotted keys.
///
/// Reading flattens nested mappings (`a: {b: x}` becomes `"a.b" = "x"`);
/// writing expands dotted keys back into nested mappings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatStrings(pub IndexMap<String, String>);

impl FlatStrings {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn flatten_into(out: &mut IndexMap<String, String>, prefix: &str, map: &Mapping) {
    for (key, value) in map {
        let path = crate::document::join_path(prefix, key);
        match value {
            Value::Map(nested) => flatten_into(out, &path, nested),
            Value::Null | Value::List(_) => {}
            scalar => {
                if let Some(text) = scalar.scalar_text() {
                    out.insert(path, text);
                }
            }
        }
    }
}

impl ConfigValue for FlatStrings {
    fn to_value(&self) -> Value {
        let mut root = Mapping::new();
        for (key, value) in &self.0 {
            apply_path(&mut root, key, Value::String(value.clone()));
        }
        Value::Map(root)
    }

    fn from_value(value: &Value) -> Result<Self, String> {
        let Value::Map(map) = value else {
            return Err(mismatch("a mapping", value));
        };
        let mut out = IndexMap::new();
        flatten_into(&mut out, "", map);
        Ok(FlatStrings(out))
    }
}

/// Declare a string-named enum usable as a config value and map key.
///
/// Names are matched case-insensitively on read; the first variant is the
/// default.
///
/// ```ignore
/// config_enum! {
///     pub enum Mode { Fast => "fast", Safe => "safe" }
/// }
/// ```
#[macro_export]
macro_rules! config_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $first:ident => $first_text:literal
            $(, $variant:ident => $text:literal)* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        $vis enum $name {
            #[default]
            $first,
            $($variant,)*
        }

        impl $name {
            /// Every accepted name, in declaration order.
            pub const NAMES: &'static [&'static str] = &[$first_text $(, $text)*];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $name::$first => $first_text,
                    $($name::$variant => $text,)*
                }
            }

            pub fn parse_name(raw: &str) -> Option<Self> {
                let raw = raw.trim();
                if raw.eq_ignore_ascii_case($first_text) {
                    return Some($name::$first);
                }
                $(
                    if raw.eq_ignore_ascii_case($text) {
                        return Some($name::$variant);
                    }
                )*
                None
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl $crate::schema::ConfigValue for $name {
            fn to_value(&self) -> $crate::document::Value {
                $crate::document::Value::String(self.as_str().to_string())
            }

            fn from_value(value: &$crate::document::Value) -> Result<Self, String> {
                let raw = value
                    .as_str()
                    .ok_or_else(|| format!("expected one of {:?}, found {}", Self::NAMES, value.kind()))?;
                Self::parse_name(raw)
                    .ok_or_else(|| format!("'{raw}' is not one of {:?}", Self::NAMES))
            }
        }

        impl $crate::schema::MapKey for $name {
            fn to_key(&self) -> String {
                self.as_str().to_string()
            }

            fn from_key(key: &str) -> Result<Self, String> {
                Self::parse_name(key).ok_or_else(|| format!("'{key}' is not one of {:?}", Self::NAMES))
            }
        }
    };
}

/// Make a [`Schematic`](crate::schema::Schematic) type usable as a list
/// element or map value, (de)serialized through its own schema.
#[macro_export]
macro_rules! structured_value {
    ($ty:ty) => {
        impl $crate::schema::ConfigValue for $ty {
            fn to_value(&self) -> $crate::document::Value {
                $crate::document::Value::Map($crate::binder::to_mapping(self))
            }

            fn from_value(value: &$crate::document::Value) -> Result<Self, String> {
                match value {
                    $crate::document::Value::Map(map) => {
                        $crate::binder::from_mapping::<$ty>(map).map_err(|e| e.to_string())
                    }
                    other => Err(format!("expected a mapping, found {}", other.kind())),
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::config_enum! {
        pub enum Mode { Fast => "fast", Safe => "safe" }
    }

    #[test]
    fn test_integers_accept_integral_floats_and_text() {
        assert_eq!(u16::from_value(&Value::Float(80.0)), Ok(80));
        assert_eq!(i32::from_value(&Value::from(" 42 ")), Ok(42));
        assert!(u8::from_value(&Value::Int(300)).is_err());
        assert!(i32::from_value(&Value::Bool(true)).is_err());
    }

    #[test]
    fn test_option_is_the_only_unset_state() {
        assert!(Option::<i32>::None.is_unset());
        assert!(!Some(0).is_unset());
        assert!(!0i32.is_unset());
        assert_eq!(Option::<i32>::zero(), None);
        assert_eq!(Option::<i32>::from_value(&Value::Null), Ok(None));
    }

    #[test]
    fn test_enum_is_case_insensitive() {
        assert_eq!(Mode::from_value(&Value::from("SAFE")), Ok(Mode::Safe));
        assert_eq!(Mode::default(), Mode::Fast);
        assert_eq!(Mode::Safe.to_value(), Value::from("safe"));
        assert!(Mode::from_value(&Value::from("slow")).is_err());
    }

    #[test]
    fn test_map_keys_convert() {
        let mut map = Mapping::new();
        map.insert("1".into(), Value::from("one"));
        map.insert("2".into(), Value::from("two"));
        let parsed: BTreeMap<u32, String> = ConfigValue::from_value(&Value::Map(map)).unwrap();
        assert_eq!(parsed[&2], "two");

        let mut keyed = IndexMap::new();
        keyed.insert(Mode::Safe, 3u8);
        assert_eq!(
            keyed.to_value().as_map().unwrap().keys().next().map(String::as_str),
            Some("safe")
        );
    }

    #[test]
    fn test_flat_strings() {
        let mut inner = Mapping::new();
        inner.insert("greeting".into(), Value::from("hi"));
        inner.insert("count".into(), Value::Int(2));
        let mut root = Mapping::new();
        root.insert("en".into(), Value::Map(inner));
        root.insert("plain".into(), Value::from("x"));

        let flat = FlatStrings::from_value(&Value::Map(root.clone())).unwrap();
        assert_eq!(flat.get("en.greeting"), Some("hi"));
        assert_eq!(flat.get("en.count"), Some("2"));
        assert_eq!(flat.get("plain"), Some("x"));

        let back = flat.to_value();
        assert_eq!(
            crate::document::navigate(back.as_map().unwrap(), "en.greeting"),
            Some(&Value::from("hi"))
        );
    }

    #[test]
    fn test_hash_map_output_is_sorted() {
        let mut map = HashMap::new();
        map.insert("b".to_string(), 2i64);
        map.insert("a".to_string(), 1i64);
        let keys: Vec<_> = map.to_value().as_map().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}
