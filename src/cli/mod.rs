//! Command-line interface definitions for the `rr` binary.
//!
//! This module centralises the clap parser structures so both the main
//! binary and the build script can reuse them when generating the manual
//! page. It must stay self-contained: the build script includes it with a
//! `#[path]` attribute before the rest of the crate exists.

use clap::Parser;

/// Top-level CLI for the `rr` binary.
#[derive(Debug, Parser)]
#[command(
    name = "rr",
    about = "Run project tasks on a remote host over SSH with rsync mirroring",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Sync the working tree and run a named task on a remote host.
    #[command(name = "run", about = "Sync the working tree and run a named task")]
    Run(RunCommand),
    /// Mirror the working tree to a remote host without running anything.
    #[command(name = "sync", about = "Mirror the working tree to a remote host")]
    Sync(SyncCommand),
    /// Pull the configured artifact set from a remote host.
    #[command(name = "pull", about = "Pull configured artifacts from a remote host")]
    Pull(SyncCommand),
    /// Remove stale per-branch directories on a remote host.
    #[command(name = "clean", about = "Remove stale per-branch remote directories")]
    Clean(CleanCommand),
    /// List configured hosts with their aliases and tags.
    #[command(name = "hosts", about = "List configured hosts")]
    Hosts,
}

/// Arguments for the `rr run` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct RunCommand {
    /// Host to run on; defaults to the first configured host.
    #[arg(long, value_name = "HOST")]
    pub(crate) host: Option<String>,
    /// Select a host by tag instead of by name.
    #[arg(long, value_name = "TAG", conflicts_with = "host")]
    pub(crate) tag: Option<String>,
    /// Task name followed by extra arguments (use -- to separate flags).
    #[arg(required = true, trailing_var_arg = true)]
    pub(crate) task: Vec<String>,
}

/// Arguments for the `rr sync` and `rr pull` subcommands.
#[derive(Debug, Parser)]
pub(crate) struct SyncCommand {
    /// Host to target; defaults to the first configured host.
    #[arg(long, value_name = "HOST")]
    pub(crate) host: Option<String>,
    /// Select a host by tag instead of by name.
    #[arg(long, value_name = "TAG", conflicts_with = "host")]
    pub(crate) tag: Option<String>,
}

/// Arguments for the `rr clean` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct CleanCommand {
    /// Host to clean; defaults to the first configured host.
    #[arg(long, value_name = "HOST")]
    pub(crate) host: Option<String>,
    /// Delete the stale directories instead of only listing them.
    #[arg(long)]
    pub(crate) apply: bool,
}
