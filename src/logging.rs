//! Compact timestamped logging for the engine and the CLI.
//!
//! The library only emits `tracing` events; installing a subscriber is left
//! to the host. The `confkit` binary calls [`init_with_config`] at startup.
//!
//! # Configuration
//!
//! ```toml
//! [logging]
//! default = "warn"     # quiet by default
//!
//! [logging.modules]
//! "confkit::watcher" = "debug"
//! ```
//!
//! `RUST_LOG` takes precedence over config:
//! ```bash
//! RUST_LOG=debug confkit show settings.yml
//! RUST_LOG=confkit::registry=trace confkit resolve "config/app.{ext}"
//! ```

use std::sync::Once;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::settings::LoggingConfig;

static INIT: Once = Once::new();

/// Compact time format: HH:MM:SS.mmm
struct CompactTime;

impl FormatTime for CompactTime {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%H:%M:%S%.3f"))
    }
}

/// Build the filter directive string from config.
fn filter_directives(config: &LoggingConfig) -> String {
    let mut directives = config.default.clone();
    for (module, level) in &config.modules {
        directives.push_str(&format!(",{module}={level}"));
    }
    directives
}

/// Initialize logging with configuration.
///
/// Only the first call takes effect. `RUST_LOG` wins over `config`.
pub fn init_with_config(config: &LoggingConfig) {
    INIT.call_once(|| {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(filter_directives(config))
        };

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_timer(CompactTime)
            .with_level(true)
            .with_writer(std::io::stderr)
            .with_filter(filter);

        // A host may already have installed a global subscriber.
        let _ = tracing_subscriber::registry().with(fmt_layer).try_init();
    });
}

/// Lifecycle event at `info`: registrations, format migrations, reloads.
///
/// ```ignore
/// log_event!("registry", "migrated format", "{} -> {}", from, to);
/// ```
#[macro_export]
macro_rules! log_event {
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::info!("[{}] {}: {}", $component, $event, format_args!($($arg)*))
    };
}

/// Bookkeeping event at `debug`: watches, writes, coalesced requests.
#[macro_export]
macro_rules! debug_event {
    ($component:expr, $event:expr) => {
        tracing::debug!("[{}] {}", $component, $event)
    };
    ($component:expr, $event:expr, $($arg:tt)*) => {
        tracing::debug!("[{}] {}: {}", $component, $event, format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn test_filter_directives_include_modules() {
        let mut modules = IndexMap::new();
        modules.insert("confkit::watcher".to_string(), "debug".to_string());
        let config = LoggingConfig {
            default: "warn".to_string(),
            modules,
        };
        assert_eq!(filter_directives(&config), "warn,confkit::watcher=debug");
    }

    #[test]
    fn test_init_is_repeatable() {
        let config = LoggingConfig::default();
        init_with_config(&config);
        init_with_config(&config);
    }
}
