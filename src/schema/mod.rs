//! Static schema descriptors for configuration types.
//!
//! A configuration type lists its fields once, in order, with the path each
//! one lives at and how it is bound:
//!
//! ```ignore
//! impl Schematic for Server {
//!     fn schema() -> Schema<Self> {
//!         Schema::<Self>::builder()
//!             .value("host", |s| &s.host, |s| &mut s.host)
//!             .comment("Address to bind")
//!             .value("timeout", |s| &s.timeout, |s| &mut s.timeout)
//!             .adapter(DurationAdapter)
//!             .default(DefaultValue::Literal(Value::Int(30_000)))
//!             .section("tls", |s| &s.tls, |s| &mut s.tls)
//!             .build()
//!     }
//! }
//! ```
//!
//! The binder walks this list; nothing is discovered at runtime. Defaults and
//! `required` only make sense on fields that can be unset, such as `Option`.

mod adapters;
mod value;

pub use adapters::{DurationAdapter, EnumAdapter, ItemOutcome, ListItemProcessor, ValueAdapter};
pub use value::{ConfigValue, FlatStrings, MapKey};

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::binder;
use crate::document::{Document, Mapping, VERSION_KEY, Value};
use crate::error::{ConfigError, ConfigResult};

/// A type described by a [`Schema`].
pub trait Schematic: Clone + Default + Send + Sync + 'static {
    fn schema() -> Schema<Self>;
}

/// A top-level configuration type backed by one file.
pub trait Config: Schematic {
    fn file() -> FileSpec;
}

/// Where and how a configuration type is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct FileSpec {
    /// Path template relative to the config root. May contain `{ext}` and
    /// named `{placeholders}`.
    pub template: String,
    /// Write defaults when the file does not exist yet.
    pub auto_create: bool,
    /// Comment block written at the top of the file.
    pub header: Vec<String>,
    pub reloadable: Option<Reloadable>,
}

/// Explicit-reload behaviour of a type.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reloadable {
    /// Top-level sections that may be reloaded on their own. Empty means any.
    pub sections: Vec<String>,
    /// Run change listeners after explicit reloads.
    pub notify_on_change: bool,
}

impl FileSpec {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            auto_create: true,
            header: Vec::new(),
            reloadable: None,
        }
    }

    pub fn header<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.header = lines.into_iter().map(Into::into).collect();
        self
    }

    pub fn no_auto_create(mut self) -> Self {
        self.auto_create = false;
        self
    }

    pub fn reloadable<I, S>(mut self, sections: I, notify_on_change: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reloadable = Some(Reloadable {
            sections: sections.into_iter().map(Into::into).collect(),
            notify_on_change,
        });
        self
    }
}

/// Fallback used when a field is absent from the document.
#[derive(Clone)]
pub enum DefaultValue {
    Literal(Value),
    Provider(fn() -> Value),
    /// Derived from another field of the same section, after that field is
    /// bound.
    Sibling {
        path: String,
        derive: fn(&Value) -> Option<Value>,
    },
}

impl std::fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DefaultValue::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            DefaultValue::Provider(_) => f.write_str("Provider(..)"),
            DefaultValue::Sibling { path, .. } => {
                f.debug_struct("Sibling").field("path", path).finish_non_exhaustive()
            }
        }
    }
}

/// Reads and writes one typed field of `T` as a [`Value`].
pub(crate) trait Accessor<T>: Send + Sync {
    fn get(&self, target: &T) -> Value;
    fn set(&self, target: &mut T, value: &Value) -> Result<(), String>;
    fn can_be_unset(&self) -> bool;
    fn is_unset(&self, target: &T) -> bool;
    fn set_zero(&self, target: &mut T) -> bool;
}

struct TypedAccessor<T, F> {
    get: fn(&T) -> &F,
    get_mut: fn(&mut T) -> &mut F,
}

impl<T: 'static, F: ConfigValue> Accessor<T> for TypedAccessor<T, F> {
    fn get(&self, target: &T) -> Value {
        (self.get)(target).to_value()
    }

    fn set(&self, target: &mut T, value: &Value) -> Result<(), String> {
        *(self.get_mut)(target) = F::from_value(value)?;
        Ok(())
    }

    fn can_be_unset(&self) -> bool {
        F::can_be_unset()
    }

    fn is_unset(&self, target: &T) -> bool {
        (self.get)(target).is_unset()
    }

    fn set_zero(&self, target: &mut T) -> bool {
        match F::zero() {
            Some(zero) => {
                *(self.get_mut)(target) = zero;
                true
            }
            None => false,
        }
    }
}

/// Binds a nested schema-described section of `T`.
pub(crate) trait SectionAccessor<T>: Send + Sync {
    fn bind(&self, target: &mut T, map: &Mapping, prefix: &str) -> ConfigResult<()>;
    fn unbind(&self, target: &T, doc: &mut Document, prefix: &str, include_transient: bool);
}

struct NestedSection<T, S> {
    get: fn(&T) -> &S,
    get_mut: fn(&mut T) -> &mut S,
    _marker: PhantomData<fn() -> S>,
}

impl<T: 'static, S: Schematic> SectionAccessor<T> for NestedSection<T, S> {
    fn bind(&self, target: &mut T, map: &Mapping, prefix: &str) -> ConfigResult<()> {
        let schema = S::schema();
        binder::bind_at(&schema, (self.get_mut)(target), map, prefix, None)
    }

    fn unbind(&self, target: &T, doc: &mut Document, prefix: &str, include_transient: bool) {
        let schema = S::schema();
        binder::unbind_at(&schema, (self.get)(target), doc, prefix, include_transient);
    }
}

pub(crate) enum FieldKind<T> {
    Value(Box<dyn Accessor<T>>),
    Section(Box<dyn SectionAccessor<T>>),
}

/// One entry of a schema.
pub struct Field<T> {
    pub(crate) path: String,
    pub(crate) kind: FieldKind<T>,
    pub(crate) required: bool,
    pub(crate) default: Option<DefaultValue>,
    pub(crate) comment: Vec<String>,
    pub(crate) transient: bool,
    pub(crate) adapter: Option<Arc<dyn ValueAdapter>>,
    pub(crate) element_adapter: Option<Arc<dyn ValueAdapter>>,
    pub(crate) key_adapter: Option<Arc<dyn ValueAdapter>>,
    pub(crate) list_processor: Option<Arc<dyn ListItemProcessor>>,
}

impl<T> Field<T> {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// First segment of the path: the top-level key this field lives under.
    pub fn top_level(&self) -> &str {
        self.path.split('.').next().unwrap_or(&self.path)
    }

    pub fn is_section(&self) -> bool {
        matches!(self.kind, FieldKind::Section(_))
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub fn comment(&self) -> &[String] {
        &self.comment
    }
}

/// Ordered field list for `T`.
pub struct Schema<T> {
    type_name: &'static str,
    fields: Vec<Field<T>>,
}

impl<T: 'static> Schema<T> {
    pub fn builder() -> SchemaBuilder<T> {
        SchemaBuilder {
            fields: Vec::new(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn fields(&self) -> &[Field<T>] {
        &self.fields
    }

    pub fn field(&self, path: &str) -> Option<&Field<T>> {
        self.fields.iter().find(|f| f.path == path)
    }

    /// Top-level keys declared by this schema, in order, without repeats.
    pub fn top_level_keys(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.fields
            .iter()
            .map(Field::top_level)
            .filter(|key| seen.insert(*key))
            .collect()
    }

    /// Reject empty or duplicate paths, use of the version key, and defaults
    /// or `required` markers that could never apply.
    ///
    /// A field that cannot be unset always keeps its in-memory value, so a
    /// default on it is only allowed as the item source of a list processor.
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |reason: String| ConfigError::InvalidSchema {
            type_name: self.type_name,
            reason,
        };
        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.path.is_empty() {
                return Err(invalid("field with an empty path".to_string()));
            }
            if field.path.split('.').any(str::is_empty) {
                return Err(invalid(format!("empty segment in path '{}'", field.path)));
            }
            if field.top_level() == VERSION_KEY {
                return Err(invalid(format!("'{VERSION_KEY}' is reserved")));
            }
            if !seen.insert(field.path.as_str()) {
                return Err(invalid(format!("duplicate path '{}'", field.path)));
            }
            let FieldKind::Value(accessor) = &field.kind else {
                continue;
            };
            if accessor.can_be_unset() {
                continue;
            }
            if field.required {
                return Err(invalid(format!(
                    "'{}' is required but can never be missing; declare it as an Option",
                    field.path
                )));
            }
            if field.default.is_some() && field.list_processor.is_none() {
                return Err(invalid(format!(
                    "default on '{}' never applies; declare the field as an Option",
                    field.path
                )));
            }
        }
        Ok(())
    }
}

/// Builds a [`Schema`]. Modifiers apply to the most recently added field.
pub struct SchemaBuilder<T> {
    fields: Vec<Field<T>>,
}

impl<T: 'static> SchemaBuilder<T> {
    fn push(mut self, path: &str, kind: FieldKind<T>) -> Self {
        self.fields.push(Field {
            path: path.to_string(),
            kind,
            required: false,
            default: None,
            comment: Vec::new(),
            transient: false,
            adapter: None,
            element_adapter: None,
            key_adapter: None,
            list_processor: None,
        });
        self
    }

    fn last(mut self, apply: impl FnOnce(&mut Field<T>)) -> Self {
        if let Some(field) = self.fields.last_mut() {
            apply(field);
        }
        self
    }

    /// A typed value at `path`.
    pub fn value<F: ConfigValue>(
        self,
        path: &str,
        get: fn(&T) -> &F,
        get_mut: fn(&mut T) -> &mut F,
    ) -> Self {
        self.push(
            path,
            FieldKind::Value(Box::new(TypedAccessor { get, get_mut })),
        )
    }

    /// A nested section described by its own schema.
    pub fn section<S: Schematic>(
        self,
        path: &str,
        get: fn(&T) -> &S,
        get_mut: fn(&mut T) -> &mut S,
    ) -> Self {
        self.push(
            path,
            FieldKind::Section(Box::new(NestedSection {
                get,
                get_mut,
                _marker: PhantomData,
            })),
        )
    }

    pub fn required(self) -> Self {
        self.last(|f| f.required = true)
    }

    pub fn default(self, default: DefaultValue) -> Self {
        self.last(|f| f.default = Some(default))
    }

    /// Comment lines written above the field. Repeated calls append.
    pub fn comment(self, text: &str) -> Self {
        self.last(|f| f.comment.extend(text.lines().map(str::to_string)))
    }

    /// Read from the document but never written back.
    pub fn transient(self) -> Self {
        self.last(|f| f.transient = true)
    }

    pub fn adapter(self, adapter: impl ValueAdapter + 'static) -> Self {
        self.last(|f| f.adapter = Some(Arc::new(adapter)))
    }

    /// Adapter applied to each list element or mapping value.
    pub fn element_adapter(self, adapter: impl ValueAdapter + 'static) -> Self {
        self.last(|f| f.element_adapter = Some(Arc::new(adapter)))
    }

    /// Adapter applied to each mapping key.
    pub fn key_adapter(self, adapter: impl ValueAdapter + 'static) -> Self {
        self.last(|f| f.key_adapter = Some(Arc::new(adapter)))
    }

    pub fn list_processor(self, processor: impl ListItemProcessor + 'static) -> Self {
        self.last(|f| f.list_processor = Some(Arc::new(processor)))
    }

    pub fn build(self) -> Schema<T> {
        Schema {
            type_name: std::any::type_name::<T>(),
            fields: self.fields,
        }
    }
}
