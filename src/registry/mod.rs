//! Registry of live configuration instances.
//!
//! [`ConfigManager`] maps (type, resolved file) to one shared instance and
//! drives loading, saving and reloading through the resolver, migration
//! engine and binder. When watching is enabled it also owns the directory
//! watches and the reload worker, both started on first use.

mod dispatch;
mod entry;

pub use dispatch::{InlineDispatcher, MainThreadDispatcher, QueueDispatcher, Task};

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{ConfigError, ConfigResult};
use crate::migration::{Migration, MigrationChain};
use crate::resolver::{
    EXT_PLACEHOLDER, FormatPreferences, Resolver, apply_placeholders, placeholders_from_pairs,
};
use crate::schema::Config;
use crate::settings::EngineSettings;
use crate::watcher::{EventSink, ReloadScheduler, WatchService};

use entry::{AnyEntry, Entry};

/// Registration identity: configuration type plus resolved relative path.
#[derive(Clone)]
pub struct ConfigKey {
    type_id: TypeId,
    type_name: &'static str,
    path: String,
}

impl ConfigKey {
    fn of<T: 'static>(path: &str) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            path: path.to_string(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Path relative to the config root, `/`-separated.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl PartialEq for ConfigKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.path == other.path
    }
}

impl Eq for ConfigKey {}

impl Hash for ConfigKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.path.hash(state);
    }
}

impl fmt::Debug for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.type_name, self.path)
    }
}

/// Shared reference to a registered configuration instance.
///
/// Reloads update the instance in place, so a handle always sees the
/// current values.
pub struct ConfigHandle<T> {
    instance: Arc<RwLock<T>>,
    key: ConfigKey,
    path: PathBuf,
}

impl<T> Clone for ConfigHandle<T> {
    fn clone(&self) -> Self {
        Self {
            instance: self.instance.clone(),
            key: self.key.clone(),
            path: self.path.clone(),
        }
    }
}

impl<T> fmt::Debug for ConfigHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigHandle")
            .field("key", &self.key)
            .field("path", &self.path)
            .finish()
    }
}

impl<T: Clone> ConfigHandle<T> {
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.instance.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.instance.write()
    }

    /// Snapshot of the current values.
    pub fn get(&self) -> T {
        self.instance.read().clone()
    }

    pub fn update(&self, apply: impl FnOnce(&mut T)) {
        apply(&mut self.instance.write());
    }

    pub fn key(&self) -> &ConfigKey {
        &self.key
    }

    /// Absolute path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Both handles refer to the same live instance.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.instance, &other.instance)
    }
}

type Listener = Arc<dyn Fn(&dyn Any, &[String]) + Send + Sync>;

#[derive(Default)]
struct WatchState {
    service: Option<Arc<WatchService>>,
    scheduler: Option<Arc<ReloadScheduler>>,
    disabled: bool,
}

struct Inner {
    me: Weak<Inner>,
    resolver: Resolver,
    settings: EngineSettings,
    dispatcher: Arc<dyn MainThreadDispatcher>,
    entries: DashMap<ConfigKey, Arc<dyn AnyEntry>>,
    /// Registration order per type; the first key is the primary instance.
    by_type: DashMap<TypeId, Vec<ConfigKey>>,
    /// Absolute file path -> keys registered against it.
    files: DashMap<PathBuf, Vec<ConfigKey>>,
    migrations: DashMap<TypeId, Arc<MigrationChain>>,
    listeners: DashMap<TypeId, Vec<Listener>>,
    watch: Mutex<WatchState>,
    closed: AtomicBool,
}

/// Builder for [`ConfigManager`].
pub struct ManagerBuilder {
    root: PathBuf,
    settings: EngineSettings,
    dispatcher: Arc<dyn MainThreadDispatcher>,
}

impl ManagerBuilder {
    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<dyn MainThreadDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn watch(mut self, enabled: bool) -> Self {
        self.settings.watch = enabled;
        self
    }

    /// Create the root directory if needed and resolve it to a canonical path.
    pub fn build(self) -> ConfigResult<ConfigManager> {
        std::fs::create_dir_all(&self.root).map_err(|e| ConfigError::io(&self.root, e))?;
        let root = self
            .root
            .canonicalize()
            .map_err(|e| ConfigError::io(&self.root, e))?;
        let resolver = Resolver::new(root, FormatPreferences::from_settings(&self.settings));

        let inner = Arc::new_cyclic(|me| Inner {
            me: me.clone(),
            resolver,
            settings: self.settings,
            dispatcher: self.dispatcher,
            entries: DashMap::new(),
            by_type: DashMap::new(),
            files: DashMap::new(),
            migrations: DashMap::new(),
            listeners: DashMap::new(),
            watch: Mutex::new(WatchState::default()),
            closed: AtomicBool::new(false),
        });
        crate::debug_event!("registry", "root", "{}", inner.resolver.root().display());
        Ok(ConfigManager { inner })
    }
}

/// Owns every registered configuration entry under one root directory.
///
/// Cloning is cheap and shares the registry. Watches and the reload worker
/// stop on [`ConfigManager::shutdown`] or when the last clone is dropped.
#[derive(Clone)]
pub struct ConfigManager {
    inner: Arc<Inner>,
}

impl ConfigManager {
    /// Manager with default settings and an inline dispatcher.
    pub fn new(root: impl Into<PathBuf>) -> ConfigResult<Self> {
        Self::builder(root).build()
    }

    pub fn builder(root: impl Into<PathBuf>) -> ManagerBuilder {
        ManagerBuilder {
            root: root.into(),
            settings: EngineSettings::default(),
            dispatcher: Arc::new(InlineDispatcher),
        }
    }

    /// Canonical config root.
    pub fn root(&self) -> &Path {
        self.inner.resolver.root()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    pub fn resolver(&self) -> &Resolver {
        &self.inner.resolver
    }

    /// Add a migration step for `T`.
    pub fn register_migration<T: Config>(&self, migration: impl Migration + 'static) {
        let mut slot = self.inner.migrations.entry(TypeId::of::<T>()).or_default();
        Arc::make_mut(slot.value_mut()).register(migration);
    }

    /// Version a fully migrated `T` document ends at.
    pub fn latest_version<T: Config>(&self) -> Option<String> {
        self.inner
            .chain_for(TypeId::of::<T>())
            .and_then(|chain| chain.latest().map(str::to_string))
    }

    pub fn register<T: Config>(&self) -> ConfigResult<ConfigHandle<T>> {
        self.register_with::<T>(&IndexMap::new())
    }

    /// Register with placeholders given as `key, value` pairs.
    pub fn register_with_pairs<T: Config>(&self, pairs: &[&str]) -> ConfigResult<ConfigHandle<T>> {
        self.register_with::<T>(&placeholders_from_pairs(pairs)?)
    }

    /// Resolve, load and memoize `T`. Registering the same type at the same
    /// resolved path again returns the existing instance without touching
    /// the disk.
    pub fn register_with<T: Config>(
        &self,
        placeholders: &IndexMap<String, String>,
    ) -> ConfigResult<ConfigHandle<T>> {
        let inner = &self.inner;
        inner.warn_main_thread("register");

        let schema = T::schema();
        schema.validate()?;

        let spec = T::file();
        let template = apply_placeholders(&spec.template, placeholders);
        let explicit = placeholders.get(EXT_PLACEHOLDER).map(String::as_str);
        let resolver = Resolver::new(
            inner.resolver.root(),
            inner.resolver.preferences().with_explicit_default(explicit),
        );
        let decision = resolver.resolve(&template)?;
        let key = ConfigKey::of::<T>(&decision.relative);

        if let Some(existing) = inner.entries.get(&key) {
            return handle_of::<T>(existing.value().as_ref());
        }

        let chain = inner.chain_for(TypeId::of::<T>());
        let entry: Arc<dyn AnyEntry> = Arc::new(Entry::<T>::open(
            key.clone(),
            &decision,
            chain.as_deref(),
        )?);

        let entry = match inner.entries.entry(key.clone()) {
            MapEntry::Occupied(existing) => return handle_of::<T>(existing.get().as_ref()),
            MapEntry::Vacant(slot) => slot.insert(entry).value().clone(),
        };
        inner
            .by_type
            .entry(TypeId::of::<T>())
            .or_default()
            .push(key.clone());
        inner
            .files
            .entry(entry.path().to_path_buf())
            .or_default()
            .push(key.clone());
        entry.set_watched(inner.watch_file(entry.path()));

        crate::log_event!("registry", "registered", "{key:?}");
        handle_of::<T>(entry.as_ref())
    }

    /// Primary (first registered) instance of `T`.
    pub fn get<T: Config>(&self) -> Option<ConfigHandle<T>> {
        let key = self.inner.by_type.get(&TypeId::of::<T>())?.first()?.clone();
        let entry = self.inner.entries.get(&key)?;
        handle_of::<T>(entry.value().as_ref()).ok()
    }

    /// Every registered instance of `T`, in registration order.
    pub fn handles<T: Config>(&self) -> Vec<ConfigHandle<T>> {
        self.inner
            .entries_of(TypeId::of::<T>())
            .iter()
            .filter_map(|entry| handle_of::<T>(entry.as_ref()).ok())
            .collect()
    }

    pub fn is_registered<T: Config>(&self, handle: &ConfigHandle<T>) -> bool {
        self.inner.entries.contains_key(&handle.key)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Write one instance back to its file.
    ///
    /// If the file changed on disk since this process last read or wrote it,
    /// it is reloaded first so the external edit is not overwritten.
    pub fn save_handle<T: Config>(&self, handle: &ConfigHandle<T>) -> ConfigResult<()> {
        self.inner.warn_main_thread("save");
        let entry = self.inner.entry(&handle.key)?;
        let chain = self.inner.chain_for(handle.key.type_id);
        entry.save(chain.as_deref())
    }

    /// Save every instance of `T`.
    pub fn save<T: Config>(&self) -> ConfigResult<()> {
        self.inner.warn_main_thread("save");
        let chain = self.inner.chain_for(TypeId::of::<T>());
        let mut first_err = None;
        for entry in self.inner.entries_of(TypeId::of::<T>()) {
            if let Err(e) = entry.save(chain.as_deref()) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Re-read one instance in place. Returns whether any value changed.
    pub fn reload_handle<T: Config>(&self, handle: &ConfigHandle<T>) -> ConfigResult<bool> {
        self.inner.warn_main_thread("reload");
        let entry = self.inner.entry(&handle.key)?;
        self.inner.reload_explicit(&entry, None)
    }

    /// Reload every instance of `T`.
    pub fn reload<T: Config>(&self) -> ConfigResult<bool> {
        self.reload_type(TypeId::of::<T>(), None)
    }

    /// Reload only the fields under the given top-level sections.
    ///
    /// When `T` declares reloadable sections, asking for any other section
    /// aborts with a warning and reloads nothing.
    pub fn reload_sections<T: Config>(&self, sections: &[&str]) -> ConfigResult<bool> {
        if let Some(reloadable) = T::file().reloadable {
            let allowed = |section: &str| {
                reloadable.sections.is_empty() || reloadable.sections.iter().any(|r| r == section)
            };
            if let Some(denied) = sections.iter().find(|s| !allowed(**s)) {
                tracing::warn!(
                    "[registry] section '{denied}' of {} is not reloadable",
                    std::any::type_name::<T>()
                );
                return Ok(false);
            }
        }
        let sections: Vec<String> = sections.iter().map(|s| s.to_string()).collect();
        self.reload_type(TypeId::of::<T>(), Some(&sections))
    }

    fn reload_type(&self, type_id: TypeId, sections: Option<&[String]>) -> ConfigResult<bool> {
        self.inner.warn_main_thread("reload");
        let mut changed = false;
        let mut first_err = None;
        for entry in self.inner.entries_of(type_id) {
            match self.inner.reload_explicit(&entry, sections) {
                Ok(c) => changed |= c,
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }
        first_err.map_or(Ok(changed), Err)
    }

    /// Reload everything. Failures are logged and skipped; returns how many
    /// instances changed.
    pub fn reload_all(&self) -> usize {
        self.inner.warn_main_thread("reload");
        let entries: Vec<Arc<dyn AnyEntry>> =
            self.inner.entries.iter().map(|e| e.value().clone()).collect();
        entries
            .iter()
            .filter(|entry| matches!(self.inner.reload_explicit(entry, None), Ok(true)))
            .count()
    }

    /// Listen for changes to any instance of `T`.
    ///
    /// The listener receives the instance and the top-level keys that
    /// changed. It runs through the main-thread dispatcher after every
    /// watch-triggered reload that changed something, and after explicit
    /// reloads of types declared reloadable with `notify_on_change`.
    pub fn on_change<T: Config>(&self, listener: impl Fn(&T, &[String]) + Send + Sync + 'static) {
        let erased: Listener = Arc::new(move |any: &dyn Any, changed: &[String]| {
            if let Some(instance) = any.downcast_ref::<RwLock<T>>() {
                listener(&instance.read(), changed);
            }
        });
        self.inner
            .listeners
            .entry(TypeId::of::<T>())
            .or_default()
            .push(erased);
    }

    /// Remove one instance and release its watch.
    pub fn unload<T: Config>(&self, handle: &ConfigHandle<T>) -> bool {
        self.inner.unload(&handle.key)
    }

    /// Remove every instance of `T`. Returns how many were removed.
    pub fn unload_type<T: Config>(&self) -> usize {
        let keys = self
            .inner
            .by_type
            .get(&TypeId::of::<T>())
            .map(|keys| keys.value().clone())
            .unwrap_or_default();
        keys.iter().filter(|key| self.inner.unload(key)).count()
    }

    /// Completed reloads of one instance, explicit or scheduled.
    pub fn reload_count<T: Config>(&self, handle: &ConfigHandle<T>) -> usize {
        self.inner
            .entries
            .get(&handle.key)
            .map_or(0, |entry| entry.reload_count())
    }

    /// Watches are installed and realtime reload is active.
    pub fn is_watching(&self) -> bool {
        let state = self.inner.watch.lock();
        state.service.is_some() && !state.disabled
    }

    /// Stop watching and the reload worker. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

fn handle_of<T: Config>(entry: &dyn AnyEntry) -> ConfigResult<ConfigHandle<T>> {
    entry
        .as_any()
        .downcast_ref::<Entry<T>>()
        .map(Entry::handle)
        .ok_or(ConfigError::NotRegistered {
            type_name: std::any::type_name::<T>(),
        })
}

impl Inner {
    fn warn_main_thread(&self, op: &str) {
        if self.dispatcher.is_main_thread() {
            tracing::warn!("[registry] {op} performs disk I/O on the main thread");
        }
    }

    fn chain_for(&self, type_id: TypeId) -> Option<Arc<MigrationChain>> {
        self.migrations.get(&type_id).map(|chain| chain.value().clone())
    }

    fn entry(&self, key: &ConfigKey) -> ConfigResult<Arc<dyn AnyEntry>> {
        self.entries
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or(ConfigError::NotRegistered {
                type_name: key.type_name,
            })
    }

    fn entries_of(&self, type_id: TypeId) -> Vec<Arc<dyn AnyEntry>> {
        let keys = self
            .by_type
            .get(&type_id)
            .map(|keys| keys.value().clone())
            .unwrap_or_default();
        keys.iter()
            .filter_map(|key| self.entries.get(key).map(|e| e.value().clone()))
            .collect()
    }

    fn reload_explicit(
        &self,
        entry: &Arc<dyn AnyEntry>,
        sections: Option<&[String]>,
    ) -> ConfigResult<bool> {
        let chain = self.chain_for(entry.key().type_id);
        let changed = entry.reload(chain.as_deref(), sections)?;
        if changed.is_empty() {
            return Ok(false);
        }
        crate::debug_event!("registry", "reloaded", "{:?} {changed:?}", entry.key());
        if entry.reloadable().is_some_and(|r| r.notify_on_change) {
            self.notify(entry, changed);
        }
        Ok(true)
    }

    /// Hand listeners for the entry's type to the dispatcher.
    fn notify(&self, entry: &Arc<dyn AnyEntry>, changed: Vec<String>) {
        let Some(listeners) = self
            .listeners
            .get(&entry.key().type_id)
            .map(|l| l.value().clone())
        else {
            return;
        };
        let instance = entry.instance_any();
        self.dispatcher.run_on_main(Box::new(move || {
            for listener in &listeners {
                listener(instance.as_ref(), &changed);
            }
        }));
    }

    /// Start watching the directory of `path`. Returns whether it is watched.
    fn watch_file(&self, path: &Path) -> bool {
        if !self.settings.watch || self.closed.load(Ordering::SeqCst) {
            return false;
        }
        if !path.parent().is_some_and(Path::is_dir) {
            crate::debug_event!("watcher", "skipped", "{} has no directory yet", path.display());
            return false;
        }

        let failure = {
            let mut state = self.watch.lock();
            if state.disabled {
                return false;
            }
            let service = match &state.service {
                Some(service) => Ok(service.clone()),
                None => WatchService::start(Arc::new(Router {
                    inner: self.me.clone(),
                }))
                .map(|service| {
                    let service = Arc::new(service);
                    state.service = Some(service.clone());
                    service
                }),
            };
            match service.and_then(|service| service.watch_file(path)) {
                Ok(()) => return true,
                Err(e) => {
                    tracing::warn!("[watcher] realtime reload disabled: {e}");
                    state.disabled = true;
                    state.service.take()
                }
            }
        };

        // Outside the lock: the observer may be waiting on it.
        if let Some(service) = failure {
            service.shutdown();
        }
        false
    }

    fn scheduler(&self) -> Option<Arc<ReloadScheduler>> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        let mut state = self.watch.lock();
        if let Some(scheduler) = &state.scheduler {
            return Some(scheduler.clone());
        }
        let delay = Duration::from_millis(self.settings.reload_delay_ms);
        match ReloadScheduler::start(delay) {
            Ok(scheduler) => {
                let scheduler = Arc::new(scheduler);
                state.scheduler = Some(scheduler.clone());
                Some(scheduler)
            }
            Err(e) => {
                tracing::error!("[watcher] cannot start reload worker: {e}");
                None
            }
        }
    }

    /// Route a changed file to the entries registered against it.
    fn file_changed(&self, path: &Path) {
        let Some(keys) = self.files.get(path).map(|keys| keys.value().clone()) else {
            return;
        };
        for key in keys {
            self.schedule_reload(&key);
        }
    }

    fn schedule_reload(&self, key: &ConfigKey) {
        let Some(entry) = self.entries.get(key).map(|e| e.value().clone()) else {
            return;
        };
        if !entry.gate().request() {
            crate::debug_event!("watcher", "coalesced", "{key:?}");
            return;
        }
        let Some(scheduler) = self.scheduler() else {
            entry.gate().reset();
            return;
        };

        let me = self.me.clone();
        let job_key = key.clone();
        let delay = scheduler.delay();
        if let Err(e) = scheduler.submit(move || run_scheduled_reload(me, job_key, delay)) {
            entry.gate().reset();
            tracing::warn!("[watcher] cannot schedule reload of {key:?}: {e}");
        }
    }

    fn unload(&self, key: &ConfigKey) -> bool {
        let Some((_, entry)) = self.entries.remove(key) else {
            return false;
        };
        if let Some(mut keys) = self.by_type.get_mut(&key.type_id) {
            keys.retain(|k| k != key);
        }
        self.by_type.remove_if(&key.type_id, |_, keys| keys.is_empty());
        if let Some(mut keys) = self.files.get_mut(entry.path()) {
            keys.retain(|k| k != key);
        }
        self.files.remove_if(entry.path(), |_, keys| keys.is_empty());

        if entry.is_watched() {
            let service = self.watch.lock().service.clone();
            if let Some(service) = service {
                service.unwatch_file(entry.path());
            }
        }
        crate::log_event!("registry", "unloaded", "{key:?}");
        true
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let (service, scheduler) = {
            let mut state = self.watch.lock();
            (state.service.take(), state.scheduler.take())
        };

        if let Some(service) = &service {
            service.stop();
        }
        if let Some(scheduler) = &scheduler {
            let grace = Duration::from_millis(self.settings.shutdown_grace_ms);
            scheduler.shutdown(grace);
        }
        if let Some(service) = &service {
            service.close();
        }
        for entry in self.entries.iter() {
            entry.set_watched(false);
        }
        crate::debug_event!("registry", "shutdown");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_scheduled_reload(inner: Weak<Inner>, key: ConfigKey, delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let Some(entry) = inner.entries.get(&key).map(|e| e.value().clone()) else {
        return;
    };

    entry.gate().start();
    loop {
        // A panicking migration or listener counts as a failed run; the gate
        // must still reach `finish` or the entry never reloads again.
        let run = panic::catch_unwind(AssertUnwindSafe(|| {
            let chain = inner.chain_for(key.type_id);
            match entry.reload(chain.as_deref(), None) {
                Ok(changed) if !changed.is_empty() => {
                    crate::log_event!("watcher", "reloaded", "{key:?} {changed:?}");
                    inner.notify(&entry, changed);
                }
                Ok(_) => crate::debug_event!("watcher", "unchanged", "{key:?}"),
                // Logged by the entry; the previous values stay in place.
                Err(_) => {}
            }
        }));
        if run.is_err() {
            tracing::error!("[watcher] reload of {key:?} panicked; keeping previous values");
        }
        if !entry.gate().finish() {
            break;
        }
    }
}

/// Routes observer events into the registry without keeping it alive.
struct Router {
    inner: Weak<Inner>,
}

impl EventSink for Router {
    fn on_change(&self, path: &Path) {
        if let Some(inner) = self.inner.upgrade() {
            inner.file_changed(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Value;
    use crate::migration::FnMigration;
    use crate::schema::{FileSpec, Schema, Schematic};
    use tempfile::TempDir;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Limits {
        rate: u32,
        burst: u32,
    }

    impl Schematic for Limits {
        fn schema() -> Schema<Self> {
            Schema::<Self>::builder()
                .value("rate", |l| &l.rate, |l| &mut l.rate)
                .value("burst", |l| &l.burst, |l| &mut l.burst)
                .build()
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Service {
        name: String,
        limits: Limits,
    }

    impl Default for Service {
        fn default() -> Self {
            Self {
                name: "svc".to_string(),
                limits: Limits { rate: 10, burst: 20 },
            }
        }
    }

    impl Schematic for Service {
        fn schema() -> Schema<Self> {
            Schema::<Self>::builder()
                .value("name", |s| &s.name, |s| &mut s.name)
                .section("limits", |s| &s.limits, |s| &mut s.limits)
                .build()
        }
    }

    impl Config for Service {
        fn file() -> FileSpec {
            FileSpec::new("services/{name}.{ext}").reloadable(["limits"], true)
        }
    }

    fn manager(dir: &TempDir) -> ConfigManager {
        ConfigManager::builder(dir.path()).watch(false).build().unwrap()
    }

    #[test]
    fn test_placeholders_select_distinct_entries() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        let a = manager.register_with_pairs::<Service>(&["name", "a"]).unwrap();
        let b = manager.register_with_pairs::<Service>(&["name", "b"]).unwrap();
        let a_again = manager.register_with_pairs::<Service>(&["name", "a"]).unwrap();

        assert!(a.ptr_eq(&a_again));
        assert!(!a.ptr_eq(&b));
        assert_eq!(manager.handles::<Service>().len(), 2);
        assert!(manager.get::<Service>().unwrap().ptr_eq(&a));
        assert!(a.path().ends_with("services/a.yml") || a.path().ends_with("services/a.jsonc"));
    }

    #[test]
    fn test_odd_pairs_rejected() {
        let dir = TempDir::new().unwrap();
        let err = manager(&dir)
            .register_with_pairs::<Service>(&["name"])
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPath { .. }));
    }

    #[test]
    fn test_unload_promotes_next_primary() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let a = manager.register_with_pairs::<Service>(&["name", "a"]).unwrap();
        let b = manager.register_with_pairs::<Service>(&["name", "b"]).unwrap();

        assert!(manager.unload(&a));
        assert!(!manager.unload(&a));
        assert!(manager.get::<Service>().unwrap().ptr_eq(&b));
        assert_eq!(manager.unload_type::<Service>(), 1);
        assert!(manager.get::<Service>().is_none());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_section_reload_respects_declared_sections() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let handle = manager.register_with_pairs::<Service>(&["name", "a"]).unwrap();
        assert!(!manager.reload_sections::<Service>(&["name"]).unwrap());

        let mut doc = crate::formats::read(handle.path()).unwrap();
        doc.set("name", Value::from("renamed"));
        doc.set("limits.rate", Value::Int(99));
        crate::formats::write(handle.path(), &doc).unwrap();

        assert!(manager.reload_sections::<Service>(&["limits"]).unwrap());
        let current = handle.get();
        assert_eq!(current.limits.rate, 99);
        assert_eq!(current.name, "svc");
    }

    #[test]
    fn test_explicit_reload_notifies_reloadable_type() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let handle = manager.register_with_pairs::<Service>(&["name", "a"]).unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        manager.on_change::<Service>(move |service, changed| {
            tx.send((service.limits.burst, changed.to_vec())).unwrap();
        });

        let mut doc = crate::formats::read(handle.path()).unwrap();
        doc.set("limits.burst", Value::Int(5));
        crate::formats::write(handle.path(), &doc).unwrap();

        assert!(manager.reload_handle(&handle).unwrap());
        let (burst, changed) = rx.try_recv().unwrap();
        assert_eq!(burst, 5);
        assert_eq!(changed, vec!["limits".to_string()]);

        assert!(!manager.reload_handle(&handle).unwrap());
        assert!(rx.try_recv().is_err());
        assert_eq!(manager.reload_count(&handle), 2);
    }

    #[test]
    fn test_queue_dispatcher_defers_listeners() {
        let dir = TempDir::new().unwrap();
        let dispatcher = Arc::new(QueueDispatcher::new());
        let manager = ConfigManager::builder(dir.path())
            .watch(false)
            .dispatcher(dispatcher.clone())
            .build()
            .unwrap();
        let handle = manager.register_with_pairs::<Service>(&["name", "q"]).unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        manager.on_change::<Service>(move |_, _| tx.send(()).unwrap());

        handle.update(|s| s.limits.rate = 1);
        manager.save_handle(&handle).unwrap();
        handle.update(|s| s.limits.rate = 2);
        assert!(manager.reload_handle(&handle).unwrap());

        assert!(rx.try_recv().is_err());
        assert_eq!(dispatcher.run_pending(), 1);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_scheduled_reload_coalesces() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let handle = manager.register_with_pairs::<Service>(&["name", "w"]).unwrap();

        // Hold the worker so every request lands while one is queued.
        let scheduler = manager.inner.scheduler().unwrap();
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
        scheduler
            .submit(move || {
                let _ = release_rx.recv_timeout(Duration::from_secs(5));
            })
            .unwrap();

        for _ in 0..10 {
            manager.inner.file_changed(handle.path());
        }
        release_tx.send(()).unwrap();

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        scheduler.submit(move || done_tx.send(()).unwrap()).unwrap();
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert_eq!(manager.reload_count(&handle), 1);
    }

    fn wait_for_worker(manager: &ConfigManager) {
        let scheduler = manager.inner.scheduler().unwrap();
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        scheduler.submit(move || done_tx.send(()).unwrap()).unwrap();
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    fn write_doc(path: &Path, version: Option<&str>, entries: &[(&str, Value)]) {
        let mut doc = crate::document::Document::new();
        if let Some(version) = version {
            doc.set_version(version);
        }
        for (key, value) in entries {
            doc.set(key, value.clone());
        }
        crate::formats::write(path, &doc).unwrap();
    }

    #[test]
    fn test_panicking_reload_keeps_entry_reloadable() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        manager.register_migration::<Service>(FnMigration::new("0", "1", |root| {
            if root.contains_key("boom") {
                panic!("cannot migrate this document");
            }
        }));
        let handle = manager.register_with_pairs::<Service>(&["name", "p"]).unwrap();

        write_doc(handle.path(), None, &[("boom", Value::Bool(true))]);
        manager.inner.file_changed(handle.path());
        wait_for_worker(&manager);
        assert_eq!(handle.get(), Service::default());
        assert_eq!(manager.reload_count(&handle), 0);

        write_doc(handle.path(), Some("1"), &[("limits.rate", Value::Int(7))]);
        manager.inner.file_changed(handle.path());
        wait_for_worker(&manager);

        assert_eq!(handle.get().limits.rate, 7);
        assert_eq!(manager.reload_count(&handle), 1);
    }

    #[test]
    fn test_changes_during_reload_run_one_follow_up() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);
        let (started_tx, started_rx) = crossbeam_channel::bounded::<()>(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
        manager.register_migration::<Service>(FnMigration::new("0", "1", move |root| {
            if root.shift_remove("slow").is_some() {
                started_tx.send(()).unwrap();
                let _ = release_rx.recv_timeout(Duration::from_secs(5));
            }
        }));
        let handle = manager.register_with_pairs::<Service>(&["name", "s"]).unwrap();

        write_doc(
            handle.path(),
            None,
            &[("slow", Value::Bool(true)), ("limits.rate", Value::Int(1))],
        );
        manager.inner.file_changed(handle.path());
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        for _ in 0..10 {
            manager.inner.file_changed(handle.path());
        }
        release_tx.send(()).unwrap();
        wait_for_worker(&manager);

        assert_eq!(manager.reload_count(&handle), 2);
        assert_eq!(handle.get().limits.rate, 1);
    }
}
