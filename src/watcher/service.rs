//! Native directory watches and the observer thread.
//!
//! One `notify::RecommendedWatcher` serves every watched directory. Its
//! callback only forwards events into a channel; a dedicated observer thread
//! blocks on that channel and hands each changed path to an [`EventSink`].
//! The sink must return quickly, so slow work belongs on the reload worker.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;

use super::dir_registry::DirRegistry;
use super::error::WatchError;

/// Receives changed paths from the observer thread.
pub trait EventSink: Send + Sync + 'static {
    fn on_change(&self, path: &Path);
}

enum Signal {
    Fs(notify::Result<Event>),
    Shutdown,
}

/// Directory watch subscriptions plus the observer thread that drains them.
pub struct WatchService {
    watcher: Mutex<Option<RecommendedWatcher>>,
    dirs: Mutex<DirRegistry>,
    signals: Sender<Signal>,
    observer: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl WatchService {
    /// Create the native watcher and spawn the observer thread.
    pub fn start(sink: Arc<dyn EventSink>) -> Result<Self, WatchError> {
        let (signals, rx) = crossbeam_channel::unbounded();

        let forward = signals.clone();
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = forward.send(Signal::Fs(res));
        })?;

        let observer = thread::Builder::new()
            .name("confkit-observer".to_string())
            .spawn(move || observe(rx, sink))
            .map_err(|e| WatchError::SpawnFailed {
                thread: "observer",
                reason: e.to_string(),
            })?;

        crate::debug_event!("watcher", "started");
        Ok(Self {
            watcher: Mutex::new(Some(watcher)),
            dirs: Mutex::new(DirRegistry::new()),
            signals,
            observer: Mutex::new(Some(observer)),
            stopped: AtomicBool::new(false),
        })
    }

    /// Watch the directory containing `file`, installing the native watch on
    /// first use.
    pub fn watch_file(&self, file: &Path) -> Result<(), WatchError> {
        let mut dirs = self.dirs.lock();
        let Some(dir) = dirs.acquire(file) else {
            return Ok(());
        };

        let mut watcher = self.watcher.lock();
        let Some(watcher) = watcher.as_mut() else {
            dirs.forget(&dir);
            return Err(WatchError::ChannelClosed);
        };
        match watcher.watch(&dir, RecursiveMode::NonRecursive) {
            Ok(()) => {
                crate::debug_event!("watcher", "watching", "{}", dir.display());
                Ok(())
            }
            Err(e) => {
                dirs.forget(&dir);
                Err(WatchError::PathWatchFailed {
                    path: dir,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Release one file; the directory watch goes away with its last file.
    pub fn unwatch_file(&self, file: &Path) {
        let mut dirs = self.dirs.lock();
        let Some(dir) = dirs.release(file) else {
            return;
        };
        if let Some(watcher) = self.watcher.lock().as_mut() {
            match watcher.unwatch(&dir) {
                Ok(()) => crate::debug_event!("watcher", "unwatched", "{}", dir.display()),
                Err(e) => tracing::debug!("[watcher] unwatch {} failed: {e}", dir.display()),
            }
        }
    }

    pub fn is_watching(&self, dir: &Path) -> bool {
        self.dirs.lock().contains(dir)
    }

    pub fn watched_dirs(&self) -> usize {
        self.dirs.lock().dir_count()
    }

    /// Stop the observer thread. Events arriving afterwards are ignored.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.signals.send(Signal::Shutdown);

        if let Some(handle) = self.observer.lock().take() {
            // A sink running on the observer itself cannot join it; the loop
            // exits once the current event returns.
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::error!("[watcher] observer thread panicked");
            }
        }
    }

    /// Close the native watch handle and forget every directory.
    pub fn close(&self) {
        if self.watcher.lock().take().is_some() {
            crate::debug_event!("watcher", "closed");
        }
        self.dirs.lock().clear();
    }

    /// Stop the observer and close the native watch. Idempotent.
    pub fn shutdown(&self) {
        self.stop();
        self.close();
    }
}

impl Drop for WatchService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn observe(rx: Receiver<Signal>, sink: Arc<dyn EventSink>) {
    for signal in rx.iter() {
        match signal {
            Signal::Shutdown => break,
            Signal::Fs(Ok(event)) => {
                if matches!(event.kind, EventKind::Access(_)) {
                    continue;
                }
                for path in &event.paths {
                    sink.on_change(path);
                }
            }
            Signal::Fs(Err(e)) => {
                tracing::warn!("[watcher] file watch error: {e}");
            }
        }
    }
}
