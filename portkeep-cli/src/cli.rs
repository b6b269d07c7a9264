//! CLI structure and command definitions.
//!
//! This module defines the main CLI structure using clap's derive macros,
//! including global options and the four subcommands this binary exposes.
//!
//! A CLI invocation is a single, short-lived process, while a
//! [`portkeep::Engine`] reservation only lives as long as the `Engine`
//! instance that made it. `reserve`/`reserve-any` therefore either hand the
//! reserved port to a child command for its lifetime, or hold the
//! reservation open until the user presses Enter — there is no background
//! daemon keeping a reservation alive between separate CLI invocations.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Command-line tool for reserving TCP ports across processes on a host.
#[derive(Parser)]
#[command(name = "portkeep")]
#[command(version, about = "Reserve and inspect TCP ports across processes", long_about = None)]
pub struct Cli {
    /// Enable verbose (debug-level) logging, overriding `PORTKEEP_LOG_MODE`.
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Suppress all logging output, overriding `PORTKEEP_LOG_MODE`.
    #[arg(long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Override the shared lock file's path, relative to the platform
    /// coordination root.
    #[arg(long, value_name = "PATH", global = true, env = "PORTKEEP_LOCK_FILE")]
    pub lock_file: Option<PathBuf>,

    /// Disable the diagnostic busy-port release-check.
    #[arg(long, global = true, env = "DISABLE_PORT_RELEASE_CHECK")]
    pub disable_release_check: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand)]
pub enum Command {
    /// Reserve a specific port.
    Reserve(ReserveCommand),

    /// Reserve any currently reservable port.
    ReserveAny(ReserveAnyCommand),

    /// Probe and immediately release a port's cross-process lock.
    Release(ReleaseCommand),

    /// Show a snapshot of reservable/reserved/restricted port counts.
    List(ListCommand),
}

/// Shared arguments for commands that hold a reservation open.
#[derive(clap::Args)]
pub struct HoldArgs {
    /// Command (and arguments) to run with `PORTKEEP_PORT` set to the
    /// reserved port. If omitted, the reservation is held until a line is
    /// read from stdin (press Enter, or close stdin).
    #[arg(trailing_var_arg = true)]
    pub command: Vec<String>,
}

/// `portkeep reserve`
#[derive(clap::Args)]
pub struct ReserveCommand {
    /// The port to reserve.
    #[arg(long)]
    pub port: u16,

    #[command(flatten)]
    pub hold: HoldArgs,
}

/// `portkeep reserve-any`
#[derive(clap::Args)]
pub struct ReserveAnyCommand {
    #[command(flatten)]
    pub hold: HoldArgs,
}

/// `portkeep release`
#[derive(clap::Args)]
pub struct ReleaseCommand {
    /// The port to probe and release.
    #[arg(long)]
    pub port: u16,
}

/// `portkeep list`
#[derive(clap::Args)]
pub struct ListCommand {
    /// Emit the snapshot as JSON instead of a human-readable table.
    #[arg(long)]
    pub json: bool,
}
