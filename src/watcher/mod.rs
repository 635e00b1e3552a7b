//! File watching and scheduled reloads for registered configuration files.
//!
//! # Architecture
//!
//! ```text
//! notify::RecommendedWatcher (one per manager)
//!   - NonRecursive watch per directory, refcounted by DirRegistry
//!         |
//!    observer thread  -- EventSink::on_change(path) -->  registry
//!                                                          |
//!                                  single-flight gate per entry
//!                                                          |
//!                                               ReloadScheduler worker
//! ```

mod dir_registry;
mod error;
mod scheduler;
mod service;

pub use dir_registry::DirRegistry;
pub use error::WatchError;
pub use scheduler::{Job, ReloadScheduler};
pub use service::{EventSink, WatchService};
