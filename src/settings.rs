//! Settings for the configuration engine itself.
//!
//! Layered the usual way:
//! - Default values
//! - TOML file (`confkit.toml` in the working directory, or an explicit path)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Variables are prefixed with `CONFKIT_` and use double underscores to
//! separate nested levels:
//! - `CONFKIT_WATCH=false` sets `watch`
//! - `CONFKIT_RELOAD_DELAY_MS=250` sets `reload_delay_ms`
//! - `CONFKIT_LOGGING__DEFAULT=debug` sets `logging.default`
//!
//! `CONFKIT_CONFIG_FORMAT` is not a setting: it is the format preference read
//! by the resolver, below the `format` setting in precedence.

use figment::{
    Figment,
    providers::{Env, Format as _, Serialized, Toml},
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::formats::Format;

/// Default settings file name.
pub const SETTINGS_FILE: &str = "confkit.toml";

/// Prefix for settings environment variables.
pub const ENV_PREFIX: &str = "CONFKIT_";

/// Environment variable holding the process-wide preferred extension.
pub const FORMAT_ENV: &str = "CONFKIT_CONFIG_FORMAT";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EngineSettings {
    /// Platform default extension used when nothing else decides the format
    #[serde(default = "default_extension")]
    pub default_extension: String,

    /// Process-wide preferred extension
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// Watch registered files and reload them on external edits
    #[serde(default = "default_true")]
    pub watch: bool,

    /// Settle delay before a scheduled reload reads the file
    #[serde(default = "default_reload_delay_ms")]
    pub reload_delay_ms: u64,

    /// Grace period for in-flight reloads on shutdown
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Log level configuration.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module overrides, e.g. `"confkit::watcher" = "debug"`
    #[serde(default)]
    pub modules: IndexMap<String, String>,
}

fn default_extension() -> String {
    Format::platform_default().extension().to_string()
}
fn default_true() -> bool {
    true
}
fn default_reload_delay_ms() -> u64 {
    100
}
fn default_shutdown_grace_ms() -> u64 {
    5_000
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_extension: default_extension(),
            format: None,
            watch: true,
            reload_delay_ms: default_reload_delay_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: IndexMap::new(),
        }
    }
}

impl EngineSettings {
    /// Load settings from `confkit.toml` (if present) and the environment.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::load_from(SETTINGS_FILE)
    }

    /// Load settings from a specific TOML file and the environment.
    ///
    /// A missing file contributes nothing.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(EngineSettings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(
                Env::prefixed(ENV_PREFIX)
                    .ignore(&["config_format"])
                    .split("__"),
            )
            .extract()
            .map_err(Box::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = EngineSettings::default();
        assert!(settings.watch);
        assert_eq!(settings.reload_delay_ms, 100);
        assert_eq!(settings.shutdown_grace_ms, 5_000);
        assert!(settings.format.is_none());
        assert_eq!(settings.logging.default, "warn");
        if cfg!(feature = "yaml") {
            assert_eq!(settings.default_extension, "yml");
        } else {
            assert_eq!(settings.default_extension, "jsonc");
        }
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("confkit.toml");

        let toml_content = r#"
default_extension = "toml"
format = "json"
watch = false
reload_delay_ms = 10

[logging.modules]
"confkit::watcher" = "trace"
"#;
        fs::write(&config_path, toml_content).unwrap();

        let settings = EngineSettings::load_from(&config_path).unwrap();
        assert_eq!(settings.default_extension, "toml");
        assert_eq!(settings.format.as_deref(), Some("json"));
        assert!(!settings.watch);
        assert_eq!(settings.reload_delay_ms, 10);
        assert_eq!(settings.logging.modules["confkit::watcher"], "trace");
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let settings = EngineSettings::load_from(temp_dir.path().join("absent.toml")).unwrap();
        assert!(settings.watch);
        assert!(settings.format.is_none());
    }

    #[test]
    fn test_env_overrides_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("confkit.toml");
        fs::write(&config_path, "shutdown_grace_ms = 1000\n").unwrap();

        unsafe {
            std::env::set_var("CONFKIT_SHUTDOWN_GRACE_MS", "250");
        }

        let settings = EngineSettings::load_from(&config_path).unwrap();
        assert_eq!(settings.shutdown_grace_ms, 250);

        unsafe {
            std::env::remove_var("CONFKIT_SHUTDOWN_GRACE_MS");
        }
    }
}
