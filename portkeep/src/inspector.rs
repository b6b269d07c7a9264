//! Busy-port inspector (C2): "what TCP endpoints are bound on this host, and
//! by which process." Used by the diagnostic release-check to detect
//! another process holding a port this process just released.
//!
//! Every platform backend here shells out and parses text output. A parser
//! failure on one line must never abort the whole inspection: record what
//! parsed, skip what didn't, continue.
#![forbid(unsafe_code)]

use std::fmt;
use std::net::IpAddr;
use std::process::Command;

use crate::error::Result;

/// The normalized set of TCP connection states a [`BusyPort`] can report,
/// covering every platform-specific name this inspector's backends emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TcpState {
    /// No connection (used for synthetic/placeholder entries).
    Closed,
    /// Listening for incoming connections.
    Listen,
    /// `SYN` sent, awaiting `SYN-ACK`.
    SynSent,
    /// `SYN` received, awaiting final `ACK`.
    SynReceived,
    /// Connection fully established.
    Established,
    /// Local `FIN` sent, awaiting peer `FIN`/`ACK`.
    FinWait1,
    /// Local `FIN` acknowledged, awaiting peer `FIN`.
    FinWait2,
    /// Peer `FIN` received, local close pending.
    CloseWait,
    /// Simultaneous close in progress.
    Closing,
    /// Local `FIN` sent after receiving peer `FIN`, awaiting final `ACK`.
    LastAck,
    /// Waiting to ensure the peer received the final `ACK`.
    TimeWait,
    /// Transmission control block is about to be deleted (Windows).
    DeleteTcb,
    /// Socket bound but not yet listening (Windows `BOUND`).
    Bound,
    /// Generic "closed" token distinct from [`TcpState::Closed`] on some
    /// platforms (e.g. macOS `nettop`'s literal `close`).
    Close,
    /// Idle state reported by some BSD-derived tools.
    Idle,
    /// A state string this inspector does not recognize.
    Unknown,
}

impl TcpState {
    /// Parses a platform-reported state string into a [`TcpState`].
    ///
    /// `case_insensitive` should be `true` for Windows sources (PowerShell's
    /// `Get-NetTCPConnection` `State` values are not reliably cased) and
    /// `false` elsewhere.
    #[must_use]
    pub fn parse(raw: &str, case_insensitive: bool) -> Self {
        let key: std::borrow::Cow<'_, str> = if case_insensitive {
            raw.to_ascii_uppercase().into()
        } else {
            raw.into()
        };
        let key = key.trim();

        for (state, aliases) in Self::alias_table() {
            let matches = aliases.iter().any(|alias| {
                if case_insensitive {
                    alias.eq_ignore_ascii_case(key)
                } else {
                    *alias == key
                }
            });
            if matches {
                return state;
            }
        }
        Self::Unknown
    }

    fn alias_table() -> &'static [(Self, &'static [&'static str])] {
        &[
            (Self::Listen, &["LISTEN", "LISTENING"]),
            (Self::SynSent, &["SYN_SENT", "SYNSENT"]),
            (Self::SynReceived, &["SYN_RECEIVED", "SYN_RCVD", "SYNRECEIVED"]),
            (Self::Established, &["ESTABLISHED"]),
            (Self::FinWait1, &["FIN_WAIT_1", "FINWAIT1", "FIN_WAIT1"]),
            (Self::FinWait2, &["FIN_WAIT_2", "FINWAIT2", "FIN_WAIT2"]),
            (Self::CloseWait, &["CLOSE_WAIT", "CLOSEWAIT"]),
            (Self::Closing, &["CLOSING"]),
            (Self::LastAck, &["LAST_ACK", "LASTACK"]),
            (Self::TimeWait, &["TIME_WAIT", "TIMEWAIT", "TIME WAIT"]),
            (Self::DeleteTcb, &["DELETE_TCB", "DELETETCB"]),
            (Self::Bound, &["BOUND"]),
            (Self::Close, &["CLOSE"]),
            (Self::Idle, &["IDLE"]),
            (Self::Closed, &["CLOSED"]),
        ]
    }
}

/// One half of a TCP connection tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    /// The IP address, or the "any" address of the relevant version for a
    /// `*` entry.
    pub ip: IpAddr,
    /// The port number, or `0` for a `*` entry.
    pub port: u16,
}

impl Endpoint {
    /// Parses an endpoint string in either `lsof`'s `host:port` /
    /// `[host]:port` form or `nettop`'s `host.port` form.
    ///
    /// Returns `None` if `text` cannot be interpreted as an endpoint; the
    /// caller is expected to skip (not abort on) such lines.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if let Some(rest) = text.strip_prefix('[') {
            // Bracketed IPv6: "[::1]:8080" or "[*]:0".
            let (host, after) = rest.split_once(']')?;
            let port_str = after.strip_prefix(':')?;
            let ip = parse_host(host, true)?;
            let port = parse_port(port_str)?;
            return Some(Self { ip, port });
        }

        if let Some((host, port_str)) = text.rsplit_once(':') {
            // Plain "host:port", IPv4 or a bare "*".
            if let Some(ip) = parse_host(host, false) {
                if let Some(port) = parse_port(port_str) {
                    return Some(Self { ip, port });
                }
            }
        }

        // `nettop`'s period-separated form, e.g. "192.168.1.5.54321" or
        // "fe80::1.54321". Split on the last period.
        let (host, port_str) = text.rsplit_once('.')?;
        let is_v6 = host.contains(':');
        let ip = parse_host(host, is_v6)?;
        let port = parse_port(port_str)?;
        Some(Self { ip, port })
    }
}

fn parse_host(host: &str, is_v6: bool) -> Option<IpAddr> {
    if host == "*" {
        return Some(if is_v6 {
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        } else {
            IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)
        });
    }
    host.parse().ok()
}

fn parse_port(port: &str) -> Option<u16> {
    if port == "*" {
        return Some(0);
    }
    port.parse().ok()
}

/// One TCP endpoint observed as bound on the host, with owning-process
/// metadata where the backend could determine it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusyPort {
    /// The owning process ID.
    pub pid: u64,
    /// The local address/port of the connection.
    pub local_endpoint: Endpoint,
    /// The remote address/port, zeroed for listeners.
    pub remote_endpoint: Endpoint,
    /// The normalized connection state.
    pub state: TcpState,
    /// A short process/command name (e.g. `lsof`'s `COMMAND` column).
    pub short_command: String,
    /// The full command line, if the backend captured one.
    pub command_line: Option<String>,
}

/// Busy-port inspection, abstracted so the diagnostic release-check can be
/// driven by a mock in tests.
pub trait BusyPortInspector: fmt::Debug + Send + Sync {
    /// Lists every TCP endpoint currently bound on the host.
    ///
    /// # Errors
    ///
    /// Returns an error only if the backend's own shell-out infrastructure
    /// fails in a way that isn't just "no matches" (e.g. the inspector
    /// binary is missing entirely and a retry also failed).
    fn busy_ports(&self) -> Result<Vec<BusyPort>>;

    /// Lists TCP endpoints bound to a specific local port.
    ///
    /// The default implementation filters [`BusyPortInspector::busy_ports`];
    /// platform backends may override this to pass a narrower filter
    /// straight to the underlying command.
    fn busy_ports_on(&self, port: u16) -> Result<Vec<BusyPort>> {
        Ok(self
            .busy_ports()?
            .into_iter()
            .filter(|bp| bp.local_endpoint.port == port)
            .collect())
    }
}

/// A fixed-response inspector for tests and for driving the release-check
/// scenarios deterministically.
#[derive(Debug, Clone, Default)]
pub struct MockInspector {
    ports: Vec<BusyPort>,
}

impl MockInspector {
    /// Creates a mock that always reports `ports`.
    #[must_use]
    pub fn new(ports: Vec<BusyPort>) -> Self {
        Self { ports }
    }

    /// Creates a mock that reports no busy ports at all. Used to exercise
    /// the "empty result disables further checks" behavior.
    #[must_use]
    pub fn empty() -> Self {
        Self { ports: Vec::new() }
    }
}

impl BusyPortInspector for MockInspector {
    fn busy_ports(&self) -> Result<Vec<BusyPort>> {
        Ok(self.ports.clone())
    }
}

/// Runs `program` with `args`, returning captured stdout on success.
///
/// `treat_empty_as_success`: some backends (`lsof`) exit `1` when there are
/// simply no matching processes; the caller decides whether that is "no
/// matches" or a real failure.
fn run(program: &str, args: &[&str]) -> Option<(bool, String, String)> {
    let output = Command::new(program).args(args).output().ok()?;
    Some((
        output.status.success(),
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    ))
}

/// Real, platform-specific busy-port inspection.
#[derive(Debug, Clone, Default)]
pub struct SystemInspector;

impl BusyPortInspector for SystemInspector {
    fn busy_ports(&self) -> Result<Vec<BusyPort>> {
        platform::busy_ports(None)
    }

    fn busy_ports_on(&self, port: u16) -> Result<Vec<BusyPort>> {
        platform::busy_ports(Some(port))
    }
}

#[cfg(target_os = "linux")]
mod platform {
    use super::{run, BusyPort, Endpoint, Result, TcpState};
    use std::collections::HashMap;

    pub(super) fn busy_ports(port: Option<u16>) -> Result<Vec<BusyPort>> {
        let filter = match port {
            Some(p) => format!(":{p}"),
            None => "TCP".to_string(),
        };
        let attempt = run_lsof(&filter, true);
        let (success, stdout, _stderr) = match attempt {
            Some(triple) => triple,
            None => return Ok(Vec::new()),
        };

        if !success {
            if stdout.trim().is_empty() {
                // lsof exits 1 with empty output when nothing matches.
                return Ok(Vec::new());
            }
            // Retry once without sudo elevation.
            if let Some((success2, stdout2, _)) = run_lsof(&filter, false) {
                if success2 || !stdout2.trim().is_empty() {
                    return Ok(merge_with_ps(parse_lsof(&stdout2)));
                }
            }
            return Ok(Vec::new());
        }

        Ok(merge_with_ps(parse_lsof(&stdout)))
    }

    fn run_lsof(filter: &str, with_sudo: bool) -> Option<(bool, String, String)> {
        let inet_filter = format!("-i{filter}");
        if with_sudo {
            run(
                "sudo",
                &[
                    "--non-interactive",
                    "--",
                    "lsof",
                    "-nP",
                    &inet_filter,
                    "-F",
                    "0pPRgLnTftc",
                    "+c0",
                    "-w",
                ],
            )
        } else {
            run(
                "lsof",
                &["-nP", &inet_filter, "-F", "0pPRgLnTftc", "+c0", "-w"],
            )
        }
    }

    /// A single process/connection group parsed out of `lsof -F`'s
    /// NUL-separated, tagged-field output.
    #[derive(Default, Clone)]
    struct LsofRecord {
        pid: Option<u64>,
        command: Option<String>,
        local: Option<String>,
        remote: Option<String>,
        state: Option<String>,
        protocol: Option<String>,
    }

    fn parse_lsof(stdout: &str) -> Vec<BusyPort> {
        let mut results = Vec::new();
        let mut current_pid: Option<u64> = None;
        let mut current_command: Option<String> = None;
        let mut record = LsofRecord::default();

        let finish = |record: &LsofRecord, results: &mut Vec<BusyPort>| {
            let Some(pid) = record.pid else { return };
            let Some(protocol) = record.protocol.as_deref() else { return };
            if protocol != "TCP" {
                return;
            }
            let Some(local_text) = record.local.as_deref() else { return };
            let Some(local) = Endpoint::parse(local_text) else { return };
            let remote = record
                .remote
                .as_deref()
                .and_then(Endpoint::parse)
                .unwrap_or(Endpoint {
                    ip: local.ip,
                    port: 0,
                });
            let state = record
                .state
                .as_deref()
                .map(|s| TcpState::parse(s, false))
                .unwrap_or(TcpState::Unknown);
            results.push(BusyPort {
                pid,
                local_endpoint: local,
                remote_endpoint: remote,
                state,
                short_command: record.command.clone().unwrap_or_default(),
                command_line: None,
            });
        };

        for line in stdout.split('\0') {
            if line.is_empty() {
                continue;
            }
            let (tag, value) = line.split_at(1);
            match tag {
                "p" => {
                    if let Ok(pid) = value.parse() {
                        current_pid = Some(pid);
                        record = LsofRecord {
                            pid: Some(pid),
                            ..LsofRecord::default()
                        };
                    }
                }
                "c" => {
                    current_command = Some(value.to_string());
                    record.command = current_command.clone();
                }
                "f" => {
                    // Start of a new file-descriptor record within this
                    // process; flush the previous connection if complete.
                    if record.local.is_some() {
                        finish(&record, &mut results);
                    }
                    record = LsofRecord {
                        pid: current_pid,
                        command: current_command.clone(),
                        ..LsofRecord::default()
                    };
                }
                "P" => record.protocol = Some(value.to_string()),
                "n" => {
                    // lsof's "n" field is "local->remote" or bare "local".
                    if let Some((local, remote)) = value.split_once("->") {
                        record.local = Some(local.to_string());
                        record.remote = Some(remote.to_string());
                    } else {
                        record.local = Some(value.to_string());
                    }
                }
                "T" => {
                    if let Some(rest) = value.strip_prefix("ST=") {
                        record.state = Some(rest.to_string());
                    }
                }
                _ => {}
            }
        }
        finish(&record, &mut results);
        results
    }

    fn merge_with_ps(mut records: Vec<BusyPort>) -> Vec<BusyPort> {
        let Some((true, stdout, _)) = run("ps", &["-ax", "-o", "pid=,command="]) else {
            return records;
        };
        let mut commands: HashMap<u64, String> = HashMap::new();
        for line in stdout.lines() {
            let line = line.trim_start();
            if let Some((pid_str, command)) = line.split_once(char::is_whitespace) {
                if let Ok(pid) = pid_str.parse() {
                    commands.insert(pid, command.trim().to_string());
                }
            }
        }
        for record in &mut records {
            if let Some(full) = commands.get(&record.pid) {
                record.command_line = Some(full.clone());
            }
        }
        records
    }
}

#[cfg(target_os = "macos")]
mod platform {
    use super::{run, BusyPort, Endpoint, Result, TcpState};
    use std::collections::HashMap;

    pub(super) fn busy_ports(port: Option<u16>) -> Result<Vec<BusyPort>> {
        let Some((success, stdout, _)) = run("nettop", &["-L1", "-m", "tcp", "-n", "-J", "state"])
        else {
            return Ok(Vec::new());
        };
        if !success {
            return Ok(Vec::new());
        }

        let mut records = parse_nettop(&stdout);
        records = merge_with_ps(records);
        if let Some(p) = port {
            records.retain(|bp| bp.local_endpoint.port == p);
        }
        Ok(records)
    }

    fn parse_nettop(stdout: &str) -> Vec<BusyPort> {
        let mut results = Vec::new();
        let mut current_pid: Option<u64> = None;
        let mut current_command: Option<String> = None;

        for line in stdout.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(rest) = line.strip_suffix(",,") {
                // Group header: "<name>.<pid>,,"
                if let Some((name, pid_str)) = rest.rsplit_once('.') {
                    if let Ok(pid) = pid_str.parse() {
                        current_pid = Some(pid);
                        current_command = Some(name.to_string());
                        continue;
                    }
                }
            }

            if let Some(rest) = line
                .strip_prefix("tcp4 ")
                .or_else(|| line.strip_prefix("tcp6 "))
            {
                let Some(pid) = current_pid else { continue };
                let fields: Vec<&str> = rest.trim_end_matches(',').split(',').collect();
                if fields.len() < 3 {
                    continue;
                }
                let Some((local_text, remote_text)) = fields[0].split_once("<->") else {
                    continue;
                };
                let Some(local) = Endpoint::parse(local_text) else {
                    continue;
                };
                let remote = Endpoint::parse(remote_text).unwrap_or(Endpoint {
                    ip: local.ip,
                    port: 0,
                });
                let state = TcpState::parse(fields[1], false);
                results.push(BusyPort {
                    pid,
                    local_endpoint: local,
                    remote_endpoint: remote,
                    state,
                    short_command: current_command.clone().unwrap_or_default(),
                    command_line: None,
                });
            }
        }
        results
    }

    fn merge_with_ps(mut records: Vec<BusyPort>) -> Vec<BusyPort> {
        let Some((true, stdout, _)) = run("ps", &["-ax", "-opid,user,command"]) else {
            return records;
        };
        let mut commands: HashMap<u64, String> = HashMap::new();
        for line in stdout.lines().skip(1) {
            let mut parts = line.trim().splitn(3, char::is_whitespace);
            let Some(pid_str) = parts.next() else { continue };
            let Ok(pid) = pid_str.parse() else { continue };
            if let Some(rest) = parts.last() {
                commands.insert(pid, rest.trim().to_string());
            }
        }
        for record in &mut records {
            if let Some(full) = commands.get(&record.pid) {
                record.command_line = Some(full.clone());
            }
        }
        records
    }
}

#[cfg(target_os = "windows")]
mod platform {
    use super::{BusyPort, Endpoint, Result, TcpState};
    use std::process::Command;

    pub(super) fn busy_ports(port: Option<u16>) -> Result<Vec<BusyPort>> {
        let filter_clause = match port {
            Some(p) => format!("| Where-Object {{ $_.LocalPort -eq {p} }}"),
            None => String::new(),
        };
        let script = format!(
            "Get-NetTCPConnection {filter_clause} | ForEach-Object {{ \
             $proc = Get-WmiObject Win32_Process -Filter \"ProcessId=$($_.OwningProcess)\"; \
             [PSCustomObject]@{{ \
               LocalAddress=$_.LocalAddress; LocalPort=$_.LocalPort; \
               RemoteAddress=$_.RemoteAddress; RemotePort=$_.RemotePort; \
               State=$_.State; OwningProcess=$_.OwningProcess; \
               ProcessName=$proc.Name; CommandLine=$proc.CommandLine \
             }} }} | ConvertTo-Csv -NoTypeInformation"
        );

        let output = Command::new("powershell.exe")
            .args(["-NoProfile", "-NonInteractive", "-Command", &script])
            .output();
        let Ok(output) = output else {
            return Ok(Vec::new());
        };
        if !output.status.success() {
            return Ok(Vec::new());
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_csv(&stdout))
    }

    fn parse_csv(text: &str) -> Vec<BusyPort> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(text.as_bytes());
        let mut results = Vec::new();
        for record in reader.records().flatten() {
            let Some(row) = parse_row(&record) else {
                continue;
            };
            results.push(row);
        }
        results
    }

    fn parse_row(record: &csv::StringRecord) -> Option<BusyPort> {
        let get = |idx: usize| record.get(idx).unwrap_or_default();
        let local_ip: std::net::IpAddr = get(0).parse().ok()?;
        let local_port: u16 = get(1).parse().ok()?;
        let remote_ip: std::net::IpAddr = get(2).parse().unwrap_or(local_ip);
        let remote_port: u16 = get(3).parse().unwrap_or(0);
        let state = TcpState::parse(get(4), true);
        let pid: u64 = get(5).parse().ok()?;
        let command = get(6).to_string();
        let command_line = get(7);
        Some(BusyPort {
            pid,
            local_endpoint: Endpoint {
                ip: local_ip,
                port: local_port,
            },
            remote_endpoint: Endpoint {
                ip: remote_ip,
                port: remote_port,
            },
            state,
            short_command: command,
            command_line: if command_line.is_empty() {
                None
            } else {
                Some(command_line.to_string())
            },
        })
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
mod platform {
    use super::{BusyPort, Result};

    pub(super) fn busy_ports(_port: Option<u16>) -> Result<Vec<BusyPort>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_state_parses_common_linux_aliases() {
        assert_eq!(TcpState::parse("LISTEN", false), TcpState::Listen);
        assert_eq!(TcpState::parse("ESTABLISHED", false), TcpState::Established);
        assert_eq!(TcpState::parse("TIME_WAIT", false), TcpState::TimeWait);
    }

    #[test]
    fn tcp_state_windows_is_case_insensitive() {
        assert_eq!(TcpState::parse("listening", true), TcpState::Listen);
        assert_eq!(TcpState::parse("Established", true), TcpState::Established);
    }

    #[test]
    fn tcp_state_unknown_falls_back() {
        assert_eq!(TcpState::parse("FROBNICATING", false), TcpState::Unknown);
    }

    #[test]
    fn endpoint_parses_ipv4() {
        let ep = Endpoint::parse("127.0.0.1:8080").unwrap();
        assert_eq!(ep.port, 8080);
        assert_eq!(ep.ip, IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1)));
    }

    #[test]
    fn endpoint_parses_wildcard_address_and_port() {
        let ep = Endpoint::parse("*:*").unwrap();
        assert_eq!(ep.port, 0);
        assert_eq!(ep.ip, IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED));
    }

    #[test]
    fn endpoint_parses_bracketed_ipv6() {
        let ep = Endpoint::parse("[::1]:9000").unwrap();
        assert_eq!(ep.port, 9000);
        assert_eq!(ep.ip, IpAddr::V6(std::net::Ipv6Addr::LOCALHOST));
    }

    #[test]
    fn endpoint_parses_nettop_dotted_form() {
        let ep = Endpoint::parse("192.168.1.5.54321").unwrap();
        assert_eq!(ep.port, 54321);
    }

    #[test]
    fn mock_inspector_filters_by_port() {
        let bp = BusyPort {
            pid: 1234,
            local_endpoint: Endpoint {
                ip: IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
                port: 9000,
            },
            remote_endpoint: Endpoint {
                ip: IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
                port: 0,
            },
            state: TcpState::Listen,
            short_command: "testsrv".into(),
            command_line: None,
        };
        let inspector = MockInspector::new(vec![bp.clone()]);
        assert_eq!(inspector.busy_ports().unwrap(), vec![bp.clone()]);
        assert_eq!(inspector.busy_ports_on(9000).unwrap(), vec![bp]);
        assert!(inspector.busy_ports_on(9001).unwrap().is_empty());
    }

    #[test]
    fn empty_mock_inspector_reports_nothing() {
        let inspector = MockInspector::empty();
        assert!(inspector.busy_ports().unwrap().is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn linux_lsof_parser_extracts_listener() {
        let raw = "p1234\0cnginx\0f6\0PTCP\0n*:8080\0TST=LISTEN\0";
        let parsed = platform::parse_lsof(raw);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].pid, 1234);
        assert_eq!(parsed[0].short_command, "nginx");
        assert_eq!(parsed[0].local_endpoint.port, 8080);
        assert_eq!(parsed[0].state, TcpState::Listen);
    }
}
