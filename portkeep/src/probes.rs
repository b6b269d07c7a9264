//! Platform probes (C1): discovering the ephemeral port range and any
//! OS-reserved ranges, each computed once per process and memoized.
//!
//! A probe that cannot run (missing file, failed command, unparseable
//! output) yields an empty/default result plus a warning — never an error.
#![forbid(unsafe_code)]

use std::fmt;
use std::process::Command;
use std::sync::OnceLock;

use crate::logging::Logger;

/// An inclusive `[lo, hi]` port range, as produced by a platform probe.
pub type RangePair = (u16, u16);

/// The IANA-documented default ephemeral range, used as a last resort when
/// every platform-specific source fails to parse or execute.
pub const IANA_EPHEMERAL_FALLBACK: RangePair = (49152, 65535);

/// Queries the operating system for ports this process must never reserve:
/// the dynamic/ephemeral allocation range and any explicitly OS-reserved
/// ranges.
///
/// Implementations must memoize their own results: each query runs at most
/// once per process, lazily; [`SystemProbes`] does this with [`OnceLock`].
/// The trait itself stays side-effect-free from the caller's perspective so
/// it can be mocked for tests, e.g. injecting artificially small reservable
/// windows.
pub trait PlatformProbes: fmt::Debug + Send + Sync {
    /// Returns the OS's dynamic/automatic port allocation range.
    fn ephemeral_range(&self) -> RangePair;

    /// Returns the OS's explicit port reservations, if any.
    fn os_reserved_ranges(&self) -> Vec<RangePair>;
}

/// Probe set that reports fixed values, for tests and for injecting
/// artificially small reservable windows).
#[derive(Debug, Clone)]
pub struct StaticProbes {
    ephemeral: RangePair,
    os_reserved: Vec<RangePair>,
}

impl StaticProbes {
    /// Creates a probe set that always reports the given ranges.
    #[must_use]
    pub fn new(ephemeral: RangePair, os_reserved: Vec<RangePair>) -> Self {
        Self {
            ephemeral,
            os_reserved,
        }
    }
}

impl PlatformProbes for StaticProbes {
    fn ephemeral_range(&self) -> RangePair {
        self.ephemeral
    }

    fn os_reserved_ranges(&self) -> Vec<RangePair> {
        self.os_reserved.clone()
    }
}

/// Real platform probes, shelling out to (or reading `/proc`/registry paths
/// on) the host OS. Each query is memoized in a `OnceLock` for the lifetime
/// of this instance: computed once per process, lazily, on first use.
pub struct SystemProbes {
    logger: std::sync::Arc<Logger>,
    ephemeral: OnceLock<RangePair>,
    os_reserved: OnceLock<Vec<RangePair>>,
}

impl fmt::Debug for SystemProbes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemProbes").finish_non_exhaustive()
    }
}

impl SystemProbes {
    /// Creates a new, unmemoized probe set.
    #[must_use]
    pub fn new(logger: std::sync::Arc<Logger>) -> Self {
        Self {
            logger,
            ephemeral: OnceLock::new(),
            os_reserved: OnceLock::new(),
        }
    }
}

impl PlatformProbes for SystemProbes {
    fn ephemeral_range(&self) -> RangePair {
        *self.ephemeral.get_or_init(|| {
            let result = platform::ephemeral_range();
            match result {
                Some(range) => range,
                None => {
                    self.logger.warn(&format!(
                        "could not determine ephemeral port range; falling back to IANA default {}-{}",
                        IANA_EPHEMERAL_FALLBACK.0, IANA_EPHEMERAL_FALLBACK.1
                    ));
                    IANA_EPHEMERAL_FALLBACK
                }
            }
        })
    }

    fn os_reserved_ranges(&self) -> Vec<RangePair> {
        self.os_reserved
            .get_or_init(|| {
                let ranges = platform::os_reserved_ranges();
                if ranges.is_empty() {
                    self.logger.trace("no OS-reserved port ranges found");
                }
                ranges
            })
            .clone()
    }
}

/// Runs `program` with `args` and returns its captured stdout as a `String`,
/// or `None` if the command could not be spawned or exited unsuccessfully.
fn run(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout).ok()
}

/// Parses two whitespace-separated integers out of `text`, in order.
fn parse_two_ints(text: &str) -> Option<(u32, u32)> {
    let mut it = text.split_whitespace().filter_map(|tok| tok.parse::<u32>().ok());
    let a = it.next()?;
    let b = it.next()?;
    Some((a, b))
}

#[cfg(target_os = "linux")]
mod platform {
    use super::{parse_two_ints, run, RangePair};
    use std::fs;

    pub(super) fn ephemeral_range() -> Option<RangePair> {
        let text = fs::read_to_string("/proc/sys/net/ipv4/ip_local_port_range").ok()?;
        let (lo, hi) = parse_two_ints(&text)?;
        Some((u16::try_from(lo).ok()?, u16::try_from(hi).ok()?))
    }

    pub(super) fn os_reserved_ranges() -> Vec<RangePair> {
        let Ok(text) = fs::read_to_string("/proc/sys/net/ipv4/ip_local_reserved_ports") else {
            return Vec::new();
        };
        parse_reserved_list(&text)
    }

    pub(super) fn parse_reserved_list(text: &str) -> Vec<RangePair> {
        let mut ranges = Vec::new();
        for token in text.trim().split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            if let Some((lo, hi)) = token.split_once('-') {
                if let (Ok(lo), Ok(hi)) = (lo.trim().parse::<u16>(), hi.trim().parse::<u16>()) {
                    ranges.push((lo, hi));
                }
            } else if let Ok(port) = token.parse::<u16>() {
                ranges.push((port, port));
            }
        }
        ranges
    }

    #[allow(dead_code)]
    fn unused_run_reference() {
        // `run` is shared infrastructure used by the macOS/Windows/Solaris
        // backends below; keep a reference alive on Linux builds so it is
        // not flagged dead when only this module is compiled in isolation.
        let _ = run;
    }
}

#[cfg(target_os = "macos")]
mod platform {
    use super::{run, RangePair};

    pub(super) fn ephemeral_range() -> Option<RangePair> {
        let text = run("sysctl", &["net.inet.ip.portrange.hifirst", "net.inet.ip.portrange.hilast"])?;
        let mut lo = None;
        let mut hi = None;
        for line in text.lines() {
            let (key, value) = line.split_once(':')?;
            let value: u16 = value.trim().parse().ok()?;
            if key.trim().ends_with("hifirst") {
                lo = Some(value);
            } else if key.trim().ends_with("hilast") {
                hi = Some(value);
            }
        }
        Some((lo?, hi?))
    }

    pub(super) fn os_reserved_ranges() -> Vec<RangePair> {
        Vec::new()
    }
}

#[cfg(target_os = "windows")]
mod platform {
    use super::{run, RangePair};

    pub(super) fn ephemeral_range() -> Option<RangePair> {
        modern_dynamic_port_range().or_else(legacy_max_user_port)
    }

    fn modern_dynamic_port_range() -> Option<RangePair> {
        let text = run("netsh", &["int", "ipv4", "show", "dynamicport", "tcp"])?;
        let mut numerics = text
            .lines()
            .filter_map(|line| line.split(':').nth(1))
            .filter_map(|value| value.trim().parse::<u32>().ok());
        let start = numerics.next()?;
        let count = numerics.next()?;
        let start = u16::try_from(start).ok()?;
        let count = u16::try_from(count).ok()?;
        Some((start, start.saturating_add(count.saturating_sub(1))))
    }

    fn legacy_max_user_port() -> Option<RangePair> {
        use winreg::enums::HKEY_LOCAL_MACHINE;
        use winreg::RegKey;

        let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);
        let params = hklm
            .open_subkey(r"SYSTEM\CurrentControlSet\Services\Tcpip\Parameters")
            .ok()?;
        let max_user_port: u32 = params.get_value("MaxUserPort").unwrap_or(5000);
        Some((1024, u16::try_from(max_user_port).unwrap_or(5000)))
    }

    pub(super) fn os_reserved_ranges() -> Vec<RangePair> {
        let Some(text) = run(
            "netsh",
            &["int", "ipv4", "show", "excludedportrange", "protocol=tcp"],
        ) else {
            return Vec::new();
        };
        parse_excluded_range_table(&text)
    }

    fn parse_excluded_range_table(text: &str) -> Vec<RangePair> {
        let mut ranges = Vec::new();
        for line in text.lines() {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 2 {
                continue;
            }
            if let (Ok(lo), Ok(hi)) = (cols[0].parse::<u16>(), cols[1].parse::<u16>()) {
                ranges.push((lo, hi));
            }
        }
        ranges
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
mod platform {
    use super::{parse_two_ints, run, RangePair};

    pub(super) fn ephemeral_range() -> Option<RangePair> {
        // Solaris/HP-UX: `ndd /dev/tcp tcp_smallest_anon_port` / `tcp_largest_anon_port`.
        if let Some(lo_text) = run("ndd", &["/dev/tcp", "tcp_smallest_anon_port"]) {
            if let Some(hi_text) = run("ndd", &["/dev/tcp", "tcp_largest_anon_port"]) {
                if let (Ok(lo), Ok(hi)) = (lo_text.trim().parse(), hi_text.trim().parse()) {
                    return Some((lo, hi));
                }
            }
        }
        // AIX: `/usr/sbin/no -a` exposes `tcp_ephemeral_low`/`tcp_ephemeral_high`.
        if let Some(text) = run("/usr/sbin/no", &["-a"]) {
            let mut lo = None;
            let mut hi = None;
            for line in text.lines() {
                if let Some((key, value)) = line.split_once('=') {
                    let key = key.trim();
                    let value = value.trim().parse::<u16>().ok();
                    if key == "tcp_ephemeral_low" {
                        lo = value;
                    } else if key == "tcp_ephemeral_high" {
                        hi = value;
                    }
                }
            }
            if let (Some(lo), Some(hi)) = (lo, hi) {
                return Some((lo, hi));
            }
        }
        let _ = parse_two_ints;
        None
    }

    pub(super) fn os_reserved_ranges() -> Vec<RangePair> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_probes_report_fixed_ranges() {
        let probes = StaticProbes::new((60000, 60010), vec![(1100, 1200)]);
        assert_eq!(probes.ephemeral_range(), (60000, 60010));
        assert_eq!(probes.os_reserved_ranges(), vec![(1100, 1200)]);
    }

    #[test]
    fn parse_two_ints_reads_whitespace_separated_pair() {
        assert_eq!(parse_two_ints("32768\t60999\n"), Some((32768, 60999)));
        assert_eq!(parse_two_ints("not a number"), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn linux_reserved_list_parses_singletons_and_ranges() {
        let parsed = platform::parse_reserved_list("22,80,8000-8010,,\n");
        assert_eq!(parsed, vec![(22, 22), (80, 80), (8000, 8010)]);
    }
}
