//! Build script for portkeep-cli.
//!
//! This script generates a man page at build time using clap_mangen.
//! The generated man page is placed in OUT_DIR for inclusion in release builds.
//!
//! Note: We build a minimal command structure here rather than importing from
//! the main crate, since build scripts cannot depend on the crate being built.

use clap::{Arg, Command};
use clap_mangen::Man;
use std::fs;
use std::path::PathBuf;

/// Build the CLI command structure for man page generation.
///
/// IMPORTANT: Keep this structure synchronized with src/cli.rs
/// When adding/removing/modifying commands, update both files.
fn build_cli() -> Command {
    Command::new("portkeep")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Reserve and inspect TCP ports across processes")
        .long_about(
            "Command-line tool for reserving TCP ports across processes on a host, \
             backed by the portkeep reservation engine",
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .help("Enable verbose (debug-level) logging, overriding PORTKEEP_LOG_MODE")
                .global(true)
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("quiet")
                .long("quiet")
                .help("Suppress all logging output, overriding PORTKEEP_LOG_MODE")
                .global(true)
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("lock-file")
                .long("lock-file")
                .help("Override the shared lock file's path, relative to the platform coordination root")
                .value_name("PATH")
                .global(true)
                .env("PORTKEEP_LOCK_FILE"),
        )
        .arg(
            Arg::new("disable-release-check")
                .long("disable-release-check")
                .help("Disable the diagnostic busy-port release-check")
                .global(true)
                .action(clap::ArgAction::SetTrue)
                .env("DISABLE_PORT_RELEASE_CHECK"),
        )
        .subcommands(vec![
            Command::new("reserve")
                .about("Reserve a specific port")
                .long_about(
                    "Reserve a specific port, holding it until a child command exits or stdin closes",
                ),
            Command::new("reserve-any")
                .about("Reserve any currently reservable port")
                .long_about(
                    "Reserve any currently reservable port, holding it until a child command \
                     exits or stdin closes",
                ),
            Command::new("release")
                .about("Probe and immediately release a port's cross-process lock")
                .long_about(
                    "Vet a port through the full reservation protocol, then release it immediately",
                ),
            Command::new("list")
                .about("Show a snapshot of reservable/reserved/restricted port counts")
                .long_about("Display a point-in-time snapshot of the engine's port occupancy"),
        ])
}

fn main() {
    // Generate man pages at build time
    let out_dir = PathBuf::from(std::env::var("OUT_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).unwrap();

    // Generate the main portkeep.1 man page
    let app = build_cli();
    let man = Man::new(app);
    let mut buffer = Vec::new();
    man.render(&mut buffer).unwrap();

    fs::write(man_dir.join("portkeep.1"), buffer).unwrap();

    println!("cargo:rerun-if-changed=src/cli.rs");
}
