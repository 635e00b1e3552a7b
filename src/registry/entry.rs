//! One registered configuration file and its live instance.

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};

use super::{ConfigHandle, ConfigKey};
use crate::binder;
use crate::document::{Comments, Document};
use crate::error::ConfigResult;
use crate::formats::{self, Format};
use crate::migration::{MigrationChain, normalize_version};
use crate::resolver::FormatDecision;
use crate::schema::{Config, Reloadable};

const IDLE: u8 = 0;
const SCHEDULED: u8 = 1;
const RUNNING: u8 = 2;
const RUNNING_DIRTY: u8 = 3;

/// Single-flight gate for watch-triggered reloads.
///
/// Any number of requests while a reload is queued collapse into it; any
/// number while one is running collapse into exactly one follow-up run.
#[derive(Debug, Default)]
pub(crate) struct ReloadGate(AtomicU8);

impl ReloadGate {
    /// Record a change. Returns `true` when the caller must queue a reload.
    pub(crate) fn request(&self) -> bool {
        let mut state = self.0.load(Ordering::Acquire);
        loop {
            let next = match state {
                IDLE => SCHEDULED,
                RUNNING => RUNNING_DIRTY,
                _ => return false,
            };
            match self
                .0
                .compare_exchange(state, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next == SCHEDULED,
                Err(actual) => state = actual,
            }
        }
    }

    /// The queued reload starts running.
    pub(crate) fn start(&self) {
        self.0.store(RUNNING, Ordering::Release);
    }

    /// The running reload finished. Returns `true` when changes arrived
    /// meanwhile and the reload must run once more.
    pub(crate) fn finish(&self) -> bool {
        match self
            .0
            .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => false,
            Err(_) => {
                self.0.store(RUNNING, Ordering::Release);
                true
            }
        }
    }

    /// Drop a request that could not be queued.
    pub(crate) fn reset(&self) {
        self.0.store(IDLE, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn is_idle(&self) -> bool {
        self.0.load(Ordering::Acquire) == IDLE
    }
}

/// What the process last knew about the backing file.
#[derive(Debug, Default)]
struct FileState {
    last_modified: Option<SystemTime>,
    version: Option<String>,
    header: Vec<String>,
    comments: Comments,
}

/// Type-erased view of an entry for the registry maps.
pub(crate) trait AnyEntry: Send + Sync {
    fn key(&self) -> &ConfigKey;
    fn path(&self) -> &Path;
    fn gate(&self) -> &ReloadGate;
    fn reloadable(&self) -> Option<Reloadable>;
    fn reload(
        &self,
        chain: Option<&MigrationChain>,
        sections: Option<&[String]>,
    ) -> ConfigResult<Vec<String>>;
    fn save(&self, chain: Option<&MigrationChain>) -> ConfigResult<()>;
    fn reload_count(&self) -> usize;
    fn set_watched(&self, watched: bool);
    fn is_watched(&self) -> bool;
    /// The live `RwLock<T>`, for listeners.
    fn instance_any(&self) -> Arc<dyn Any + Send + Sync>;
    fn as_any(&self) -> &dyn Any;
}

pub(crate) struct Entry<T> {
    key: ConfigKey,
    path: PathBuf,
    format: Format,
    instance: Arc<RwLock<T>>,
    io: Mutex<FileState>,
    gate: ReloadGate,
    reloads: AtomicUsize,
    watched: AtomicBool,
}

impl<T: Config> Entry<T> {
    /// Load the file a decision points at, migrating format and schema
    /// version as needed, and write the result back when it changed.
    pub(crate) fn open(
        key: ConfigKey,
        decision: &FormatDecision,
        chain: Option<&MigrationChain>,
    ) -> ConfigResult<Self> {
        let spec = T::file();
        let schema = T::schema();

        let (mut doc, mut persist, created) = match (&decision.source, decision.source_format) {
            (Some(source), Some(format)) => (read_document(source, format)?, true, false),
            _ if decision.target.exists() => (
                read_document(&decision.target, decision.target_format)?,
                false,
                false,
            ),
            _ if spec.auto_create => (Document::new(), true, true),
            _ => (Document::new(), false, false),
        };

        let stored = doc.version().and_then(normalize_version);
        let outcome = chain
            .map(|chain| chain.apply(&mut doc, created, schema.type_name()))
            .unwrap_or_default();
        persist |= outcome.changed;

        let mut value = T::default();
        binder::bind(&schema, &mut value, doc.root(), None)?;

        let entry = Self {
            key,
            path: decision.target.clone(),
            format: decision.target_format,
            instance: Arc::new(RwLock::new(value)),
            io: Mutex::new(FileState {
                last_modified: modified(&decision.target),
                version: outcome.version.or(stored),
                header: doc.header().to_vec(),
                comments: doc.comments().clone(),
            }),
            gate: ReloadGate::default(),
            reloads: AtomicUsize::new(0),
            watched: AtomicBool::new(false),
        };

        if persist {
            let mut state = entry.io.lock();
            let value = entry.instance.read().clone();
            entry.write_locked(&mut state, &value)?;
        }
        if let Some(source) = &decision.source {
            crate::log_event!(
                "registry",
                "migrated format",
                "{} -> {}",
                source.display(),
                entry.path.display()
            );
        } else if created {
            crate::debug_event!("registry", "created", "{}", entry.path.display());
        }
        Ok(entry)
    }

    pub(crate) fn handle(&self) -> ConfigHandle<T> {
        ConfigHandle {
            instance: self.instance.clone(),
            key: self.key.clone(),
            path: self.path.clone(),
        }
    }

    fn render(&self, state: &FileState, value: &T) -> Document {
        let spec = T::file();
        let mut doc = Document::new();
        doc.set_header(if spec.header.is_empty() {
            state.header.clone()
        } else {
            spec.header
        });
        doc.add_comments(&state.comments, "");
        if let Some(version) = &state.version {
            doc.set_version(version);
        }
        binder::unbind(&T::schema(), value, &mut doc);
        doc
    }

    fn write_locked(&self, state: &mut FileState, value: &T) -> ConfigResult<()> {
        let doc = self.render(state, value);
        formats::write_as(&self.path, self.format, &doc)?;
        state.last_modified = modified(&self.path);
        crate::debug_event!("registry", "wrote", "{}", self.path.display());
        Ok(())
    }

    fn reload_locked(
        &self,
        state: &mut FileState,
        chain: Option<&MigrationChain>,
        sections: Option<&[String]>,
    ) -> ConfigResult<Vec<String>> {
        let schema = T::schema();
        let mut doc = read_document(&self.path, self.format)?;
        let stored = doc.version().and_then(normalize_version);
        let outcome = chain
            .map(|chain| chain.apply(&mut doc, false, schema.type_name()))
            .unwrap_or_default();

        let current = self.instance.read().clone();
        let mut next = current.clone();
        binder::bind(&schema, &mut next, doc.root(), sections)?;

        let before = binder::snapshot(&schema, &current);
        let after = binder::snapshot(&schema, &next);
        let changed: Vec<String> = schema
            .top_level_keys()
            .into_iter()
            .filter(|key| before.get(*key) != after.get(*key))
            .map(str::to_string)
            .collect();

        state.version = outcome.version.or(stored);
        state.header = doc.header().to_vec();
        state.comments = doc.comments().clone();
        state.last_modified = modified(&self.path);

        if !changed.is_empty() {
            *self.instance.write() = next.clone();
        }
        if outcome.changed {
            self.write_locked(state, &next)?;
        }
        self.reloads.fetch_add(1, Ordering::Relaxed);
        Ok(changed)
    }
}

impl<T: Config> AnyEntry for Entry<T> {
    fn key(&self) -> &ConfigKey {
        &self.key
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn gate(&self) -> &ReloadGate {
        &self.gate
    }

    fn reloadable(&self) -> Option<Reloadable> {
        T::file().reloadable
    }

    fn reload(
        &self,
        chain: Option<&MigrationChain>,
        sections: Option<&[String]>,
    ) -> ConfigResult<Vec<String>> {
        let mut state = self.io.lock();
        self.reload_locked(&mut state, chain, sections)
            .inspect_err(|e| {
                tracing::error!("[registry] reload of {} failed: {e}", self.path.display())
            })
    }

    fn save(&self, chain: Option<&MigrationChain>) -> ConfigResult<()> {
        let mut state = self.io.lock();

        let external = match (modified(&self.path), state.last_modified) {
            (Some(disk), Some(known)) => disk > known,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if external {
            crate::log_event!(
                "registry",
                "external edit",
                "reloading {} before save",
                self.path.display()
            );
            self.reload_locked(&mut state, chain, None).inspect_err(|e| {
                tracing::error!("[registry] save of {} aborted: {e}", self.path.display())
            })?;
        }

        let value = self.instance.read().clone();
        self.write_locked(&mut state, &value).inspect_err(|e| {
            tracing::error!("[registry] save of {} failed: {e}", self.path.display())
        })
    }

    fn reload_count(&self) -> usize {
        self.reloads.load(Ordering::Relaxed)
    }

    fn set_watched(&self, watched: bool) {
        self.watched.store(watched, Ordering::Release);
    }

    fn is_watched(&self) -> bool {
        self.watched.load(Ordering::Acquire)
    }

    fn instance_any(&self) -> Arc<dyn Any + Send + Sync> {
        self.instance.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Read a document, treating malformed content as empty.
fn read_document(path: &Path, format: Format) -> ConfigResult<Document> {
    match formats::read_as(path, format) {
        Err(e) if e.is_parse() => {
            tracing::warn!("[registry] {e}; treating it as empty");
            Ok(Document::new())
        }
        other => other,
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_coalesces_while_scheduled() {
        let gate = ReloadGate::default();
        assert!(gate.request());
        for _ in 0..10 {
            assert!(!gate.request());
        }
        gate.start();
        assert!(!gate.finish());
        assert!(gate.is_idle());
    }

    #[test]
    fn test_gate_running_records_one_follow_up() {
        let gate = ReloadGate::default();
        assert!(gate.request());
        gate.start();

        for _ in 0..10 {
            assert!(!gate.request());
        }

        assert!(gate.finish(), "one follow-up reload");
        assert!(!gate.finish(), "and only one");
        assert!(gate.is_idle());
        assert!(gate.request());
    }

    #[test]
    fn test_gate_reset() {
        let gate = ReloadGate::default();
        assert!(gate.request());
        gate.reset();
        assert!(gate.request());
    }
}
