// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `ngbuild`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "ngbuild",
    version,
    about = "Provision isolated workspaces and run builds for your apps.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Ngbuild.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Ngbuild.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `NGBUILD_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, list integrations and apps, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,

    /// App to run a one-shot build for, or to deliver `--event` to.
    #[arg(long, value_name = "NAME")]
    pub app: Option<String>,

    /// Source reference to build (defaults to the app's `base_repo`).
    #[arg(long, value_name = "REF", requires = "app")]
    pub base_repo: Option<String>,

    /// Optional reference to merge before building.
    #[arg(long, value_name = "REF", requires = "app")]
    pub merge_repo: Option<String>,

    /// JSON change event to dispatch to `--app` instead of a direct build.
    #[arg(long, value_name = "PATH", requires = "app", conflicts_with_all = ["base_repo", "merge_repo"])]
    pub event: Option<PathBuf>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
