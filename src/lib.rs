//! File-backed typed configuration.
//!
//! A [`Config`] type declares its fields through a [`Schema`] and its file
//! through a [`FileSpec`]. [`ConfigManager`] resolves the file (switching
//! formats when asked to), migrates old documents, binds them into shared
//! instances and, when enabled, reloads them as the files change on disk.

pub mod binder;
pub mod cli;
pub mod document;
pub mod error;
pub mod formats;
pub mod logging;
pub mod migration;
pub mod registry;
pub mod resolver;
pub mod schema;
pub mod settings;
pub mod watcher;

pub use document::{Document, Mapping, Value};
pub use error::{ConfigError, ConfigResult};
pub use formats::Format;
pub use migration::{FnMigration, Migration, MigrationChain, MigrationOutcome};
pub use registry::{
    ConfigHandle, ConfigKey, ConfigManager, InlineDispatcher, MainThreadDispatcher,
    ManagerBuilder, QueueDispatcher,
};
pub use resolver::{FormatDecision, FormatPreferences, Resolver};
pub use schema::{Config, DefaultValue, FileSpec, Reloadable, Schema, Schematic};
pub use settings::EngineSettings;
