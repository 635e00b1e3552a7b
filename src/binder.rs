//! Binds schema-described objects to and from documents.
//!
//! Reading a field that is absent or `null` keeps a value that is already
//! set, then tries the field's default, then the type's intrinsic zero, and
//! only then fails if the field is required. Present values go through the field's
//! list processor and adapters before typed conversion. Values are cloned out
//! of the document, so the live object never aliases the tree.

use crate::document::{Document, Mapping, Value, join_path, navigate};
use crate::error::{ConfigError, ConfigResult};
use crate::schema::{DefaultValue, Field, FieldKind, ItemOutcome, Schema, Schematic};

/// Bind every field of `schema` from `map` into `target`.
///
/// With `sections`, only fields whose top-level key is listed are touched.
pub fn bind<T: 'static>(
    schema: &Schema<T>,
    target: &mut T,
    map: &Mapping,
    sections: Option<&[String]>,
) -> ConfigResult<()> {
    bind_at(schema, target, map, "", sections)
}

/// Like [`bind`], with `prefix` naming where `map` sits in the document.
pub fn bind_at<T: 'static>(
    schema: &Schema<T>,
    target: &mut T,
    map: &Mapping,
    prefix: &str,
    sections: Option<&[String]>,
) -> ConfigResult<()> {
    let empty = Mapping::new();
    for field in schema.fields() {
        if let Some(sections) = sections {
            if !sections.iter().any(|s| s == field.top_level()) {
                continue;
            }
        }
        let full_path = join_path(prefix, &field.path);
        let raw = navigate(map, &field.path);

        match &field.kind {
            FieldKind::Section(section) => {
                let nested = match raw {
                    Some(Value::Map(nested)) => nested,
                    None | Some(Value::Null) => &empty,
                    Some(other) => {
                        tracing::warn!(
                            "[binder] expected a section at {full_path}, found {}; using defaults",
                            other.kind()
                        );
                        &empty
                    }
                };
                section.bind(target, nested, &full_path)?;
            }
            FieldKind::Value(_) => match raw {
                None | Some(Value::Null) => bind_absent(schema, field, target, &full_path)?,
                Some(raw) => bind_present(schema, field, target, raw, &full_path)?,
            },
        }
    }
    Ok(())
}

fn bind_present<T: 'static>(
    schema: &Schema<T>,
    field: &Field<T>,
    target: &mut T,
    raw: &Value,
    full_path: &str,
) -> ConfigResult<()> {
    let FieldKind::Value(accessor) = &field.kind else {
        return Ok(());
    };
    let converted = prepare_incoming(schema, field, target, raw)
        .ok_or_else(|| "rejected by adapter".to_string())
        .and_then(|value| accessor.set(target, &value));

    let Err(reason) = converted else {
        return Ok(());
    };

    if !accessor.is_unset(target) {
        tracing::warn!("[binder] invalid value at {full_path}: {reason}; keeping current value");
        return Ok(());
    }
    if apply_default(schema, field, target) || accessor.set_zero(target) {
        tracing::warn!("[binder] invalid value at {full_path}: {reason}; using default");
        return Ok(());
    }
    if field.required {
        return Err(ConfigError::InvalidValue {
            path: full_path.to_string(),
            reason,
        });
    }
    tracing::warn!("[binder] invalid value at {full_path}: {reason}; leaving unset");
    Ok(())
}

fn bind_absent<T: 'static>(
    schema: &Schema<T>,
    field: &Field<T>,
    target: &mut T,
    full_path: &str,
) -> ConfigResult<()> {
    let FieldKind::Value(accessor) = &field.kind else {
        return Ok(());
    };
    if !accessor.is_unset(target) {
        return Ok(());
    }
    if apply_default(schema, field, target) || accessor.set_zero(target) {
        return Ok(());
    }
    if field.required {
        return Err(ConfigError::MissingRequired {
            path: full_path.to_string(),
        });
    }
    Ok(())
}

/// Evaluate a field's default against the current state of `target`.
fn default_value<T: 'static>(schema: &Schema<T>, field: &Field<T>, target: &T) -> Option<Value> {
    match field.default.as_ref()? {
        DefaultValue::Literal(value) => Some(value.clone()),
        DefaultValue::Provider(provide) => Some(provide()),
        DefaultValue::Sibling { path, derive } => {
            let sibling = schema.field(path)?;
            let FieldKind::Value(accessor) = &sibling.kind else {
                return None;
            };
            derive(&accessor.get(target))
        }
    }
}

fn apply_default<T: 'static>(schema: &Schema<T>, field: &Field<T>, target: &mut T) -> bool {
    let FieldKind::Value(accessor) = &field.kind else {
        return false;
    };
    let Some(value) = default_value(schema, field, target) else {
        return false;
    };
    match accessor.set(target, &value) {
        Ok(()) => true,
        Err(reason) => {
            tracing::warn!("[binder] default for {} is invalid: {reason}", field.path);
            false
        }
    }
}

/// Run the list processor and adapters over a raw document value.
fn prepare_incoming<T: 'static>(
    schema: &Schema<T>,
    field: &Field<T>,
    target: &T,
    raw: &Value,
) -> Option<Value> {
    let mut value = raw.clone();

    if let (Some(processor), Value::List(items)) = (&field.list_processor, &value) {
        let defaults = default_value(schema, field, target);
        let default_items = defaults.as_ref().and_then(Value::as_list);
        let mut kept = Vec::with_capacity(items.len());
        for (idx, item) in items.iter().enumerate() {
            match processor.process(idx, item) {
                ItemOutcome::Keep(item) => kept.push(item),
                ItemOutcome::UseDefault => {
                    if let Some(fallback) = default_items.and_then(|d| d.get(idx)) {
                        kept.push(fallback.clone());
                    }
                }
                ItemOutcome::Drop => {}
            }
        }
        value = Value::List(kept);
    }

    if let Some(adapter) = &field.key_adapter {
        if let Value::Map(map) = &value {
            let mut adapted = Mapping::new();
            for (key, item) in map {
                match adapter
                    .deserialize(&Value::String(key.clone()))
                    .and_then(|k| k.scalar_text())
                {
                    Some(key) => {
                        adapted.insert(key, item.clone());
                    }
                    None => tracing::warn!(
                        "[binder] dropping key '{key}' under {}: rejected by adapter",
                        field.path
                    ),
                }
            }
            value = Value::Map(adapted);
        }
    }

    if let Some(adapter) = &field.element_adapter {
        value = match value {
            Value::List(items) => Value::List(
                items
                    .iter()
                    .enumerate()
                    .filter_map(|(idx, item)| {
                        let adapted = adapter.deserialize(item);
                        if adapted.is_none() {
                            tracing::warn!(
                                "[binder] dropping {}[{idx}]: rejected by adapter",
                                field.path
                            );
                        }
                        adapted
                    })
                    .collect(),
            ),
            Value::Map(map) => Value::Map(
                map.iter()
                    .filter_map(|(key, item)| {
                        let adapted = adapter.deserialize(item);
                        if adapted.is_none() {
                            tracing::warn!(
                                "[binder] dropping {}.{key}: rejected by adapter",
                                field.path
                            );
                        }
                        adapted.map(|v| (key.clone(), v))
                    })
                    .collect(),
            ),
            other => other,
        };
    }

    match &field.adapter {
        Some(adapter) => adapter.deserialize(&value),
        None => Some(value),
    }
}

/// Run the adapters in the write direction.
fn prepare_outgoing<T>(field: &Field<T>, value: Value) -> Value {
    let mut value = match &field.adapter {
        Some(adapter) => adapter.serialize(&value),
        None => value,
    };

    if let Some(adapter) = &field.element_adapter {
        value = match value {
            Value::List(items) => Value::List(items.iter().map(|v| adapter.serialize(v)).collect()),
            Value::Map(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, adapter.serialize(&v)))
                    .collect(),
            ),
            other => other,
        };
    }

    if let Some(adapter) = &field.key_adapter {
        if let Value::Map(map) = value {
            value = Value::Map(
                map.into_iter()
                    .map(|(k, v)| {
                        let key = adapter
                            .serialize(&Value::String(k.clone()))
                            .scalar_text()
                            .unwrap_or(k);
                        (key, v)
                    })
                    .collect(),
            );
        }
    }
    value
}

/// Write every non-transient field of `source` into `doc`, with comments.
pub fn unbind<T: 'static>(schema: &Schema<T>, source: &T, doc: &mut Document) {
    unbind_at(schema, source, doc, "", false);
}

/// Like [`unbind`], under `prefix`. Unset values are not written.
pub fn unbind_at<T: 'static>(
    schema: &Schema<T>,
    source: &T,
    doc: &mut Document,
    prefix: &str,
    include_transient: bool,
) {
    for field in schema.fields() {
        if field.transient && !include_transient {
            continue;
        }
        let full_path = join_path(prefix, &field.path);
        match &field.kind {
            FieldKind::Section(section) => {
                if doc.section(&full_path).is_none() {
                    doc.set(&full_path, Value::Map(Mapping::new()));
                }
                if !field.comment.is_empty() {
                    doc.set_comment(&full_path, field.comment.clone());
                }
                section.unbind(source, doc, &full_path, include_transient);
            }
            FieldKind::Value(accessor) => {
                let value = accessor.get(source);
                if value.is_null() {
                    continue;
                }
                let value = prepare_outgoing(field, value);
                doc.set_commented(&full_path, value, &field.comment);
            }
        }
    }
}

/// Every field, transient ones included, as a plain mapping.
///
/// Used to detect which top-level keys a reload changed.
pub fn snapshot<T: 'static>(schema: &Schema<T>, source: &T) -> Mapping {
    let mut doc = Document::new();
    unbind_at(schema, source, &mut doc, "", true);
    doc.into_root()
}

/// Serialize a schematic value to a mapping, without comments.
pub fn to_mapping<S: Schematic>(value: &S) -> Mapping {
    let mut doc = Document::new();
    unbind_at(&S::schema(), value, &mut doc, "", false);
    doc.into_root()
}

/// Build a schematic value from a mapping, starting from its defaults.
pub fn from_mapping<S: Schematic>(map: &Mapping) -> ConfigResult<S> {
    let mut value = S::default();
    bind(&S::schema(), &mut value, map, None)?;
    Ok(value)
}
