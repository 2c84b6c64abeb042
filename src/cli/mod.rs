//! CLI module for cherrysync.
//!
//! This module provides the command-line interface for planning and
//! applying manifests and for browsing the Cherry Servers inventory.

mod commands;
mod output;

pub use commands::{Cli, Commands, LogFormat, OutputFormat};
pub use output::OutputFormatter;
