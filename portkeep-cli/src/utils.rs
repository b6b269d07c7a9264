//! Utility functions for CLI operations.
//!
//! This module provides the small amount of glue between parsed CLI
//! arguments and the `portkeep` library: resolving a [`Logger`]/[`LogLevel`]
//! from the `--verbose`/`--quiet` flags, building an [`EngineConfig`] from
//! the global options, and formatting an [`EngineStats`] snapshot for
//! human or JSON output.

use portkeep::{EngineConfig, EngineStats, LogLevel};

use crate::cli::Cli;

/// Resolves the log level implied by the CLI's global flags.
///
/// `--verbose` and `--quiet` are mutually exclusive (enforced by clap), so
/// at most one of them is set. Neither set leaves resolution to
/// `PORTKEEP_LOG_MODE`/the default, matching [`portkeep::init_logger`].
#[must_use]
pub fn resolve_log_level(cli: &Cli) -> Option<LogLevel> {
    if cli.verbose {
        Some(LogLevel::Debug)
    } else if cli.quiet {
        Some(LogLevel::Off)
    } else {
        None
    }
}

/// Builds an [`EngineConfig`] from the CLI's global options.
#[must_use]
pub fn build_engine_config(cli: &Cli) -> EngineConfig {
    let mut builder = EngineConfig::builder();

    if let Some(level) = resolve_log_level(cli) {
        builder = builder.log_level(level);
    }

    if let Some(path) = &cli.lock_file {
        builder = builder.lock_file_relative_path(path.clone());
    }

    if cli.disable_release_check {
        builder = builder.disable_release_check(true);
    }

    builder.build()
}

/// Renders an [`EngineStats`] snapshot as a human-readable table.
#[must_use]
pub fn format_stats_human(stats: &EngineStats) -> String {
    format!(
        "reservable: {}\nreserved:   {}\nrestricted: {}\nlocks held: {}",
        stats.reservable_count, stats.reserved_count, stats.restricted_count, stats.outstanding_locks
    )
}

/// Renders an [`EngineStats`] snapshot as JSON.
///
/// # Errors
///
/// Returns an error if serialization fails, which should not happen for
/// this plain-data struct.
pub fn format_stats_json(stats: &EngineStats) -> Result<String, serde_json::Error> {
    #[derive(serde::Serialize)]
    struct StatsJson {
        reservable_count: u64,
        reserved_count: u64,
        restricted_count: u64,
        outstanding_locks: u64,
    }

    serde_json::to_string_pretty(&StatsJson {
        reservable_count: stats.reservable_count,
        reserved_count: stats.reserved_count,
        restricted_count: stats.restricted_count,
        outstanding_locks: stats.outstanding_locks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_stats_human_includes_all_counts() {
        let stats = EngineStats {
            reservable_count: 10,
            reserved_count: 2,
            restricted_count: 3,
            outstanding_locks: 2,
        };
        let rendered = format_stats_human(&stats);
        assert!(rendered.contains("reservable: 10"));
        assert!(rendered.contains("reserved:   2"));
        assert!(rendered.contains("restricted: 3"));
        assert!(rendered.contains("locks held: 2"));
    }

    #[test]
    fn format_stats_json_round_trips_through_serde_value() {
        let stats = EngineStats {
            reservable_count: 1,
            reserved_count: 0,
            restricted_count: 0,
            outstanding_locks: 0,
        };
        let json = format_stats_json(&stats).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["reservable_count"], 1);
    }
}
