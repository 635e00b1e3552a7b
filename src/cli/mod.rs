//! Command-line interface for the `confkit` binary.

pub mod args;
pub mod commands;

pub use args::{Cli, Commands};
