//! Command implementations for the CLI.

pub mod convert;
pub mod resolve;
pub mod show;
