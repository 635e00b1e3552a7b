//! CLI argument parsing using clap.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Parse a `name=value` placeholder.
fn parse_placeholder(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected name=value, got '{raw}'")),
    }
}

#[derive(Parser)]
#[command(
    name = "confkit",
    version,
    about = "Inspect, resolve and convert file-backed configuration",
    styles = clap_cargo_style()
)]
pub struct Cli {
    /// Engine settings file (TOML)
    #[arg(long, global = true, env = "CONFKIT_SETTINGS")]
    pub config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show which file and format a path template resolves to
    #[command(after_help = "Example:\n  $ confkit resolve 'plugins/{name}.{ext}' --root ./config --set name=chat")]
    Resolve {
        /// Path template, relative to the root; may contain {ext}
        template: String,

        /// Config root directory
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Default extension for this template
        #[arg(long)]
        ext: Option<String>,

        /// Preferred format, as the process-wide property would set it
        #[arg(long)]
        format: Option<String>,

        /// Placeholder value, repeatable
        #[arg(short, long = "set", value_name = "NAME=VALUE", value_parser = parse_placeholder)]
        placeholders: Vec<(String, String)>,
    },

    /// Convert a configuration file to another format
    Convert {
        /// Source file; its extension selects the format
        input: PathBuf,

        /// Destination file; its extension selects the format
        output: PathBuf,

        /// Overwrite the destination if it exists
        #[arg(short, long)]
        force: bool,
    },

    /// Print a parsed configuration file
    Show {
        file: PathBuf,

        /// Print only the value at this dotted path, as JSON
        #[arg(long)]
        path: Option<String>,
    },
}
