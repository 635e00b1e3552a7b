//! Versioned document migrations.
//!
//! Each configuration type owns a [`MigrationChain`]: steps keyed by the
//! version they start from. Loading walks the chain from the stored version
//! (or `"0"` when the document has none) until no step applies or a version
//! repeats, then stamps the result under [`VERSION_KEY`].

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use crate::document::{Document, Mapping, VERSION_KEY, Value};

/// Version assumed for documents without a version key.
pub const INITIAL_VERSION: &str = "0";

/// One step of a migration chain. Transforms the raw document in place.
pub trait Migration: Send + Sync {
    fn from_version(&self) -> &str;
    fn to_version(&self) -> &str;
    fn migrate(&self, root: &mut Mapping);
}

type Transform = Box<dyn Fn(&mut Mapping) + Send + Sync>;

/// A migration step built from a closure.
pub struct FnMigration {
    from: String,
    to: String,
    transform: Transform,
}

impl FnMigration {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        transform: impl Fn(&mut Mapping) + Send + Sync + 'static,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            transform: Box::new(transform),
        }
    }
}

impl Migration for FnMigration {
    fn from_version(&self) -> &str {
        &self.from
    }

    fn to_version(&self) -> &str {
        &self.to
    }

    fn migrate(&self, root: &mut Mapping) {
        (self.transform)(root)
    }
}

impl fmt::Debug for FnMigration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMigration")
            .field("from", &self.from)
            .field("to", &self.to)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
struct Step {
    to: String,
    migration: Arc<dyn Migration>,
}

/// What a migration run did to a document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationOutcome {
    /// Version the document ended at, when the type has versions at all.
    pub version: Option<String>,
    /// At least one step ran.
    pub migrated: bool,
    /// The document was modified and should be written back.
    pub changed: bool,
    /// Diagnostics emitted during the run, also logged as warnings.
    pub warnings: Vec<String>,
}

/// Per-type set of migration steps.
#[derive(Clone, Default)]
pub struct MigrationChain {
    // Keyed by source version, in registration order.
    steps: IndexMap<String, Step>,
    latest: Option<String>,
}

impl MigrationChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// The version a fully migrated document ends at.
    pub fn latest(&self) -> Option<&str> {
        self.latest.as_deref()
    }

    /// Add a step. A step with the same source version replaces the old one.
    pub fn register(&mut self, migration: impl Migration + 'static) {
        self.register_arc(Arc::new(migration));
    }

    pub fn register_arc(&mut self, migration: Arc<dyn Migration>) {
        let from = normalize_version(&Value::from(migration.from_version()));
        let to = normalize_version(&Value::from(migration.to_version()));
        let (Some(from), Some(to)) = (from, to) else {
            tracing::warn!("[migration] skipping step with an empty version identifier");
            return;
        };
        // A replaced step keeps its slot in the registration order.
        if self.steps.insert(from.clone(), Step { to, migration }).is_some() {
            tracing::warn!("[migration] replaced step from version {from}");
        }
        self.recompute_latest();
    }

    /// The unique target that is never a source. Otherwise the last distinct
    /// target in registration order.
    fn recompute_latest(&mut self) {
        let sources: HashSet<&str> = self.steps.keys().map(String::as_str).collect();
        let targets: IndexSet<&str> = self.steps.values().map(|s| s.to.as_str()).collect();
        let endpoints: Vec<&str> = targets
            .iter()
            .copied()
            .filter(|to| !sources.contains(to))
            .collect();

        if let [only] = endpoints.as_slice() {
            self.latest = Some(only.to_string());
            return;
        }
        self.latest = targets.last().map(|to| to.to_string());
        if let (Some(latest), true) = (&self.latest, endpoints.len() > 1) {
            tracing::warn!(
                "[migration] multiple migration endpoints {endpoints:?}; using version {latest}"
            );
        }
    }

    /// Run the chain over `doc`.
    ///
    /// `created_new` marks a document that was just written from defaults; such
    /// a document is stamped with the latest version without running steps.
    pub fn apply(&self, doc: &mut Document, created_new: bool, type_name: &str) -> MigrationOutcome {
        let mut outcome = MigrationOutcome::default();
        let stored = doc.version().and_then(normalize_version);

        if stored.is_none() && created_new {
            if let Some(latest) = &self.latest {
                doc.set_version(latest);
                outcome.version = Some(latest.clone());
                outcome.changed = true;
                return outcome;
            }
        }

        let mut current = stored.clone().unwrap_or_else(|| INITIAL_VERSION.to_string());
        let mut visited = HashSet::new();
        loop {
            if !visited.insert(current.clone()) {
                outcome.warn(format!(
                    "migration cycle detected for {type_name} at version {current}"
                ));
                break;
            }
            let Some(step) = self.steps.get(&current) else {
                break;
            };
            step.migration.migrate(doc.root_mut());
            tracing::debug!("[migration] {type_name}: {current} -> {}", step.to);
            current = step.to.clone();
            outcome.migrated = true;
        }

        match (&stored, &self.latest) {
            (None, Some(_)) if outcome.migrated => outcome.warn(format!(
                "{type_name} had no '{VERSION_KEY}'; migrated from version {INITIAL_VERSION}, \
                 set the version explicitly to skip this"
            )),
            (None, Some(_)) => outcome.warn(format!(
                "{type_name} is missing '{VERSION_KEY}'; add a migration from version \
                 {INITIAL_VERSION} or set the version explicitly"
            )),
            (Some(stored), Some(latest)) if !outcome.migrated && stored != latest => {
                outcome.warn(format!(
                    "{type_name} is at version {stored} but the latest is {latest}; missing migration?"
                ))
            }
            _ => {}
        }

        if outcome.migrated {
            doc.set_version(&current);
            outcome.changed = true;
        }
        if outcome.migrated || stored.is_some() || self.latest.is_some() {
            outcome.version = Some(current);
        }
        outcome
    }
}

impl MigrationOutcome {
    fn warn(&mut self, message: String) {
        tracing::warn!("[migration] {message}");
        self.warnings.push(message);
    }
}

impl fmt::Debug for MigrationChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let edges: Vec<(&str, &str)> = self
            .steps
            .iter()
            .map(|(from, step)| (from.as_str(), step.to.as_str()))
            .collect();
        f.debug_struct("MigrationChain")
            .field("steps", &edges)
            .field("latest", &self.latest)
            .finish()
    }
}

/// Canonical text of a stored version: integral numbers without a fraction,
/// strings trimmed. Empty or non-scalar values have no version.
pub fn normalize_version(raw: &Value) -> Option<String> {
    let text = match raw {
        Value::Int(n) => n.to_string(),
        Value::Float(f) if f.fract() == 0.0 && f.is_finite() => (*f as i64).to_string(),
        Value::Float(f) => f.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(edges: &[(&str, &str)]) -> MigrationChain {
        let mut chain = MigrationChain::new();
        for (from, to) in edges {
            let marker = format!("step_{from}_{to}");
            chain.register(FnMigration::new(*from, *to, move |root: &mut Mapping| {
                root.insert(marker.clone(), Value::Bool(true));
            }));
        }
        chain
    }

    #[test]
    fn test_latest_is_unique_endpoint() {
        assert_eq!(chain(&[("0", "1"), ("1", "2")]).latest(), Some("2"));
        assert_eq!(chain(&[("1", "2"), ("0", "1")]).latest(), Some("2"));
        assert_eq!(MigrationChain::new().latest(), None);
    }

    #[test]
    fn test_latest_with_multiple_endpoints_is_last_registered() {
        let chain = chain(&[("0", "1"), ("a", "b")]);
        assert_eq!(chain.latest(), Some("b"));
    }

    #[test]
    fn test_ambiguous_latest_is_last_registered_target() {
        // Endpoints are "1" and "b", but "a" was the last target registered.
        let mixed = chain(&[("0", "1"), ("a", "b"), ("c", "a")]);
        assert_eq!(mixed.latest(), Some("a"));

        let cycle = chain(&[("a", "b"), ("b", "a")]);
        assert_eq!(cycle.latest(), Some("a"));
    }

    #[test]
    fn test_replacing_step_keeps_its_position() {
        let mut chain = chain(&[("0", "1"), ("x", "y")]);
        chain.register(FnMigration::new("0", "2", |_: &mut Mapping| {}));

        assert_eq!(chain.len(), 2);
        assert_eq!(chain.latest(), Some("y"));
        assert_eq!(
            format!("{chain:?}"),
            r#"MigrationChain { steps: [("0", "2"), ("x", "y")], latest: Some("y") }"#
        );
    }

    #[test]
    fn test_walks_from_implicit_zero() {
        let chain = chain(&[("0", "1"), ("1", "2")]);
        let mut doc = Document::new();
        doc.set("name", Value::from("x"));

        let outcome = chain.apply(&mut doc, false, "App");

        assert!(outcome.migrated);
        assert!(outcome.changed);
        assert_eq!(outcome.version.as_deref(), Some("2"));
        assert_eq!(doc.version(), Some(&Value::from("2")));
        assert!(doc.contains("step_0_1"));
        assert!(doc.contains("step_1_2"));
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(doc.root().keys().next().map(String::as_str), Some(VERSION_KEY));
    }

    #[test]
    fn test_new_file_jumps_to_latest() {
        let chain = chain(&[("0", "1"), ("1", "2")]);
        let mut doc = Document::new();
        let outcome = chain.apply(&mut doc, true, "App");

        assert!(!outcome.migrated);
        assert!(outcome.changed);
        assert!(outcome.warnings.is_empty());
        assert_eq!(outcome.version.as_deref(), Some("2"));
        assert_eq!(doc.version(), Some(&Value::from("2")));
        assert!(!doc.contains("step_0_1"));
    }

    #[test]
    fn test_existing_file_without_version_warns() {
        let chain = chain(&[("1", "2")]);
        let mut doc = Document::new();
        let outcome = chain.apply(&mut doc, false, "App");

        assert!(!outcome.changed);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("missing"));
        assert_eq!(doc.version(), None);
    }

    #[test]
    fn test_cycle_halts() {
        let chain = chain(&[("1", "2"), ("2", "1")]);
        let mut doc = Document::new();
        doc.set_version("1");

        let outcome = chain.apply(&mut doc, false, "App");

        assert!(outcome.migrated);
        assert_eq!(outcome.version.as_deref(), Some("1"));
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("cycle"));
    }

    #[test]
    fn test_unbridged_version_warns() {
        let chain = chain(&[("0", "1"), ("1", "2")]);
        let mut doc = Document::new();
        doc.set(VERSION_KEY, Value::Int(7));

        let outcome = chain.apply(&mut doc, false, "App");

        assert!(!outcome.migrated);
        assert_eq!(outcome.version.as_deref(), Some("7"));
        assert!(outcome.warnings[0].contains("latest is 2"));
    }

    #[test]
    fn test_normalize_version() {
        assert_eq!(normalize_version(&Value::Int(3)), Some("3".into()));
        assert_eq!(normalize_version(&Value::Float(3.0)), Some("3".into()));
        assert_eq!(normalize_version(&Value::Float(1.5)), Some("1.5".into()));
        assert_eq!(normalize_version(&Value::from("  2 ")), Some("2".into()));
        assert_eq!(normalize_version(&Value::from("")), None);
        assert_eq!(normalize_version(&Value::Null), None);
    }
}
