//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::resource::ResourceKind;

/// cherrysync - Declarative Cherry Servers reconciliation.
#[derive(Parser, Debug)]
#[command(name = "cherrysync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the manifest file.
    #[arg(short, long, global = true, env = "CHERRY_MANIFEST")]
    pub file: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Log format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the manifest.
    Validate {
        /// Skip the API token check.
        #[arg(long)]
        offline: bool,

        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Show the operations apply would run, without changing anything.
    Plan,

    /// Reconcile every resource in the manifest.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// List resources of one kind.
    List {
        /// Resource kind (server, floating_ip, ssh_key, volume, project).
        kind: ResourceKind,

        /// Project to list servers, floating IPs or volumes from.
        #[arg(long)]
        project_id: Option<u64>,

        /// Team to list projects from.
        #[arg(long)]
        team_id: Option<u64>,

        /// Only servers in this region.
        #[arg(long)]
        region: Option<String>,

        /// Only servers with this status.
        #[arg(long)]
        status: Option<String>,

        /// Only servers with this hostname.
        #[arg(long)]
        hostname: Option<String>,

        /// Only servers on this plan.
        #[arg(long)]
        plan: Option<String>,

        /// Only servers running this image.
        #[arg(long)]
        image: Option<String>,

        /// Only servers carrying this tag (key=value, repeatable).
        #[arg(long = "tag", value_parser = parse_tag)]
        tags: Vec<(String, String)>,
    },

    /// Show one resource.
    Get {
        /// Resource kind.
        kind: ResourceKind,

        /// Resource ID.
        id: String,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Log format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable log lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Parses a `key=value` tag filter.
fn parse_tag(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("invalid tag '{raw}', expected key=value"))
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
