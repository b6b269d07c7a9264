//! Main entry point for the portkeep CLI.
//!
//! This is the command-line interface for the portkeep TCP port reservation
//! engine. It provides four commands:
//! - `reserve`: reserve a specific port
//! - `reserve-any`: reserve any currently reservable port
//! - `release`: probe a port and immediately release its cross-process lock
//! - `list`: show a snapshot of reservable/reserved/restricted port counts

mod cli;
mod error;
mod utils;

use std::io::BufRead;
use std::process::Command as ChildCommand;

use clap::Parser;
use portkeep::{Engine, Port, PortRef};

use cli::{Cli, Command, HoldArgs, ListCommand, ReleaseCommand, ReserveAnyCommand, ReserveCommand};
use error::CliError;

fn main() {
    let cli = Cli::parse();
    let engine = Engine::new(utils::build_engine_config(&cli));

    let result = match &cli.command {
        Command::Reserve(cmd) => reserve(&engine, cmd),
        Command::ReserveAny(cmd) => reserve_any(&engine, cmd),
        Command::Release(cmd) => release(&engine, cmd),
        Command::List(cmd) => list(&engine, cmd),
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

fn reserve(engine: &Engine, cmd: &ReserveCommand) -> Result<(), CliError> {
    let port = Port::try_from(cmd.port).map_err(|e| CliError::InvalidArguments(e.to_string()))?;
    let handle = engine.reserve(port)?.ok_or(CliError::PortUnavailable(cmd.port))?;
    println!("reserved port {}", handle.port().value());
    hold(handle, &cmd.hold)
}

fn reserve_any(engine: &Engine, cmd: &ReserveAnyCommand) -> Result<(), CliError> {
    let handle = engine.reserve_any()?;
    println!("reserved port {}", handle.port().value());
    hold(handle, &cmd.hold)
}

/// Holds a reservation open either for the lifetime of a spawned child
/// command (with `PORTKEEP_PORT` set in its environment) or, if no command
/// was given, until a line is read from stdin.
fn hold(handle: PortRef, hold: &HoldArgs) -> Result<(), CliError> {
    if hold.command.is_empty() {
        let stdin = std::io::stdin();
        let mut line = String::new();
        let _ = stdin.lock().read_line(&mut line);
        handle.close();
        return Ok(());
    }

    let port = handle.port().value();
    let (program, args) = hold.command.split_first().expect("checked non-empty above");
    let status = ChildCommand::new(program)
        .args(args)
        .env("PORTKEEP_PORT", port.to_string())
        .status()?;

    handle.close();

    if status.success() {
        Ok(())
    } else {
        Err(CliError::ChildFailed(status.code().unwrap_or(1)))
    }
}

fn release(engine: &Engine, cmd: &ReleaseCommand) -> Result<(), CliError> {
    let port = Port::try_from(cmd.port).map_err(|e| CliError::InvalidArguments(e.to_string()))?;
    let handle = engine.reserve(port)?.ok_or(CliError::PortUnavailable(cmd.port))?;
    handle.close();
    println!("released port {}", port.value());
    Ok(())
}

fn list(engine: &Engine, cmd: &ListCommand) -> Result<(), CliError> {
    let stats = engine.stats();
    let rendered = if cmd.json {
        utils::format_stats_json(&stats).map_err(|e| CliError::InvalidArguments(e.to_string()))?
    } else {
        utils::format_stats_human(&stats)
    };
    println!("{rendered}");
    Ok(())
}
