//! In-memory document model.
//!
//! A [`Document`] is the root [`Mapping`] of one configuration file plus an
//! optional header and a side table of per-path comments. Paths are dotted
//! (`database.pool.size`) and resolve strictly segment by segment through
//! nested mappings: stepping through a scalar or list is "not found".

mod value;

pub use value::{Mapping, Value};

use indexmap::IndexMap;

/// Reserved top-level key holding the schema version.
pub const VERSION_KEY: &str = "config-version";

/// Comment lines keyed by dotted path.
pub type Comments = IndexMap<String, Vec<String>>;

/// One configuration file's contents, header and comments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    root: Mapping,
    header: Vec<String>,
    comments: Comments,
}

impl Document {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing root mapping.
    pub fn from_root(root: Mapping) -> Self {
        Self {
            root,
            ..Self::default()
        }
    }

    pub fn root(&self) -> &Mapping {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Mapping {
        &mut self.root
    }

    pub fn into_root(self) -> Mapping {
        self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn set_header(&mut self, lines: Vec<String>) {
        self.header = lines;
    }

    pub fn comments(&self) -> &Comments {
        &self.comments
    }

    pub fn comment(&self, path: &str) -> Option<&[String]> {
        self.comments.get(path).map(Vec::as_slice)
    }

    /// Attach comment lines to a path. Empty input clears the comment.
    pub fn set_comment(&mut self, path: &str, lines: Vec<String>) {
        if lines.is_empty() {
            self.comments.shift_remove(path);
        } else {
            self.comments.insert(path.to_string(), lines);
        }
    }

    /// Merge comments from another table, prefixing each path.
    pub fn add_comments(&mut self, comments: &Comments, prefix: &str) {
        for (path, lines) in comments {
            if lines.is_empty() {
                continue;
            }
            let full = join_path(prefix, path);
            self.comments.insert(full, lines.clone());
        }
    }

    /// Look up a dotted path.
    pub fn get(&self, path: &str) -> Option<&Value> {
        navigate(&self.root, path)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut Value> {
        navigate_mut(&mut self.root, path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Mapping stored at `path`, if the path resolves to one.
    pub fn section(&self, path: &str) -> Option<&Mapping> {
        self.get(path).and_then(Value::as_map)
    }

    /// Set a value, creating intermediate mappings. Non-mapping values in
    /// the way are replaced.
    pub fn set(&mut self, path: &str, value: Value) {
        apply_path(&mut self.root, path, value);
    }

    /// Set a value and attach comment lines to its path.
    pub fn set_commented(&mut self, path: &str, value: Value, comment: &[String]) {
        self.set(path, value);
        if !comment.is_empty() {
            self.comments.insert(path.to_string(), comment.to_vec());
        }
    }

    /// Remove the value at `path`, returning it.
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        let (parent, last) = match path.rsplit_once('.') {
            Some((parent, last)) => (Some(parent), last),
            None => (None, path),
        };
        let map = match parent {
            Some(parent) => navigate_mut(&mut self.root, parent)?.as_map_mut()?,
            None => &mut self.root,
        };
        map.shift_remove(last)
    }

    /// Stored schema version, if any.
    pub fn version(&self) -> Option<&Value> {
        self.root.get(VERSION_KEY)
    }

    /// Stamp the schema version as the first key of the document.
    pub fn set_version(&mut self, version: &str) {
        self.root.shift_remove(VERSION_KEY);
        self.root
            .shift_insert(0, VERSION_KEY.to_string(), Value::String(version.to_string()));
    }
}

/// Join a prefix and a key with a dot, skipping empty prefixes.
pub fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Resolve a dotted path through nested mappings.
pub fn navigate<'a>(root: &'a Mapping, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = root.get(first)?;
    for segment in segments {
        current = current.as_map()?.get(segment)?;
    }
    Some(current)
}

fn navigate_mut<'a>(root: &'a mut Mapping, path: &str) -> Option<&'a mut Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = root.get_mut(first)?;
    for segment in segments {
        current = current.as_map_mut()?.get_mut(segment)?;
    }
    Some(current)
}

/// Write `value` at a dotted path, replacing non-mappings along the way.
pub fn apply_path(root: &mut Mapping, path: &str, value: Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let last = segments.pop().unwrap_or(path);
    let mut current = root;
    for segment in segments {
        let slot = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Map(Mapping::new()));
        if !matches!(slot, Value::Map(_)) {
            *slot = Value::Map(Mapping::new());
        }
        current = match slot {
            Value::Map(map) => map,
            _ => unreachable!("slot was just replaced with a mapping"),
        };
    }
    current.insert(last.to_string(), value);
}
