//! Reservation engine (C4) and handle/cleanup lifecycle (C5).
//!
//! [`Engine`] is the crate's single entry point: it owns the in-process
//! reservation bitmap, the cross-process locker, the platform probes, and
//! the busy-port inspector, all behind one coarse [`Mutex`]. Every public
//! mutating operation acquires that mutex for its full duration, including
//! whatever blocking syscalls vetting a candidate port requires (the OS TCP
//! bind, the advisory file-lock syscall, and — unless disabled — the
//! busy-port inspector's shell-out). This trades throughput for a much
//! simpler correctness argument: nothing here is reentrant, and there is
//! exactly one place a candidate port is ever vetted.
#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, Weak};
use std::time::Duration;

use rand::Rng;

use crate::bitmap::PortBitmap;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::inspector::BusyPortInspector;
use crate::locker::{CrossProcessLocker, LockToken};
use crate::logging::Logger;
use crate::port::Port;
use crate::probes::PlatformProbes;

/// How long the vet protocol's post-close connectability probe waits for
/// a connect to succeed before treating the port as free.
const CONNECT_PROBE_TIMEOUT: Duration = Duration::from_millis(50);

/// Why a single candidate port failed vetting.
///
/// This is a transient, internal-only failure kind: it never escapes the
/// engine. The two-pass bit-scan in [`Engine::scan_direction`] uses it
/// only to decide whether to keep scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VetFailure {
    /// Binding a `TcpListener` to the candidate port failed — something is
    /// already listening, or the process lacks permission.
    BindRefused,
    /// Another process holds the cross-process advisory lock on this port.
    LockHeldElsewhere,
    /// A non-blocking connect to `localhost:candidate` succeeded after the
    /// listening socket was already closed — some process (e.g. Windows RDP)
    /// answers without holding a listener, so the port is not actually free.
    ConnectAnswered,
}

/// A close action registered against a [`PortRef`], run once when the
/// handle closes (explicitly or via `Drop`).
type CloseAction = Box<dyn FnOnce() + Send + 'static>;

/// Close-action chain shared between a live `PortRef` and its registry
/// entry, so the reaper can still run pending actions after the `PortRef`
/// itself has been dropped and deallocated.
#[derive(Default)]
struct ActionChain {
    // Actions are pushed to the front on registration and run front-to-back,
    // which naturally yields reverse-of-registration order without an
    // explicit reversal step.
    actions: std::collections::VecDeque<CloseAction>,
}

impl ActionChain {
    fn register(&mut self, action: CloseAction) {
        self.actions.push_front(action);
    }

    fn run_all(&mut self) {
        while let Some(action) = self.actions.pop_front() {
            action();
        }
    }
}

/// Options controlling a single reservation's close-action chain.
///
/// The one named member is [`CloseOptions::skip_release_check`], which
/// suppresses the diagnostic busy-port check for this one close only. Extra
/// close-time actions can still be layered on via
/// [`CloseOptions::with_action`].
///
/// # Examples
///
/// ```
/// use portkeep::engine::CloseOptions;
///
/// let options = CloseOptions::new()
///     .skip_release_check()
///     .with_action(|| println!("port released"));
/// ```
#[derive(Default)]
pub struct CloseOptions {
    actions: Vec<CloseAction>,
    skip_release_check: bool,
}

impl CloseOptions {
    /// Creates an empty set of close options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an action to run when the handle closes. Actions run in
    /// reverse of the order they were added, mirroring how multiple
    /// `with_action` calls stack.
    #[must_use]
    pub fn with_action(mut self, action: impl FnOnce() + Send + 'static) -> Self {
        self.actions.push(Box::new(action));
        self
    }

    /// Asserts that the port being released was never actually bound, so the
    /// diagnostic release-check inspection is unnecessary for this close.
    #[must_use]
    pub fn skip_release_check(mut self) -> Self {
        self.skip_release_check = true;
        self
    }
}

/// Shared state behind a live, un-dropped reservation handle.
struct HandleInner {
    port: Port,
    closed: Arc<AtomicBool>,
    chain: Arc<Mutex<ActionChain>>,
    reap_tx: mpsc::Sender<(u16, bool)>,
}

impl HandleInner {
    /// Marks the handle closed and queues it for reaping, exactly once.
    ///
    /// `skip_release_check` travels with the reap message rather than living
    /// on the handle itself: it is a per-close decision, not a property of
    /// the reservation, so a plain `close()`/`Drop` always requests the
    /// check while [`PortRef::close_with_options`] can suppress it for that
    /// one call.
    fn mark_closed_and_notify(&self, skip_release_check: bool) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.reap_tx.send((self.port.value(), skip_release_check));
        }
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        self.mark_closed_and_notify(false);
    }
}

/// A handle to a single reserved port.
///
/// Dropping a `PortRef` without calling [`PortRef::close`] releases the
/// reservation the same way an explicit close does: the port is queued for
/// cleanup and reclaimed the next time a mutating [`Engine`] operation
/// opportunistically reaps closed handles.
pub struct PortRef {
    inner: Arc<HandleInner>,
}

impl PortRef {
    /// The port this handle reserves.
    #[must_use]
    pub fn port(&self) -> Port {
        self.inner.port
    }

    /// Whether this handle (or another clone-equivalent handle on the same
    /// reservation) has already been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Registers an additional close action, run in reverse order alongside
    /// any actions supplied via [`CloseOptions`] at reservation time.
    ///
    /// Returns `false` without registering the action if the handle is
    /// already closed.
    pub fn register_close_action(&self, action: impl FnOnce() + Send + 'static) -> bool {
        if self.is_closed() {
            return false;
        }
        let mut guard = self
            .inner
            .chain
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.register(Box::new(action));
        true
    }

    /// Explicitly closes the handle, releasing the reservation.
    ///
    /// Queues the port for cleanup; the bitmap bit, cross-process lock, and
    /// close-action chain are finalized the next time a mutating [`Engine`]
    /// method reaps closed handles (including, typically, whichever
    /// `reserve*` call comes right after this one). The diagnostic
    /// release-check runs unless the engine was built with
    /// [`crate::config::EngineConfigBuilder::disable_release_check`].
    pub fn close(self) {
        self.inner.mark_closed_and_notify(false);
    }

    /// Closes the handle as [`PortRef::close`] does, but applies `options`
    /// for this one close: [`CloseOptions::skip_release_check`] suppresses
    /// the diagnostic busy-port inspection for this release, and any
    /// [`CloseOptions::with_action`] actions run alongside the handle's own
    /// chain.
    pub fn close_with_options(self, options: CloseOptions) {
        for action in options.actions {
            self.register_close_action(move || action());
        }
        self.inner.mark_closed_and_notify(options.skip_release_check);
    }
}

impl std::fmt::Debug for PortRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortRef")
            .field("port", &self.inner.port)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Registry entry kept alongside a [`PortRef`]'s weak reference, so
/// cleanup can proceed even after every strong `Arc` to the handle has
/// been dropped.
struct WeakEntry {
    handle: Weak<HandleInner>,
    closed: Arc<AtomicBool>,
    chain: Arc<Mutex<ActionChain>>,
}

/// A point-in-time snapshot of engine occupancy, queried on demand — not a
/// continuously updated metrics stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    /// Ports neither reserved by this engine nor restricted by the
    /// platform (an approximation: it does not re-run OS-level vetting for
    /// every free port, only set arithmetic over ranges).
    pub reservable_count: u64,
    /// Ports currently reserved by this engine instance.
    pub reserved_count: u64,
    /// Ports excluded by the ephemeral range or OS-reserved ranges.
    pub restricted_count: u64,
    /// Cross-process advisory locks this engine currently holds open.
    pub outstanding_locks: u64,
}

struct EngineState {
    bitmap: PortBitmap,
    registry: HashMap<u16, WeakEntry>,
    locks: HashMap<u16, LockToken>,
}

impl EngineState {
    fn new() -> Self {
        Self {
            bitmap: PortBitmap::new(),
            registry: HashMap::new(),
            locks: HashMap::new(),
        }
    }
}

/// The TCP port reservation engine.
///
/// Construct with [`Engine::new`]; a single instance is meant to live for
/// the lifetime of the process that wants to coordinate port usage, though
/// nothing prevents constructing more than one (there is no enforced
/// singleton — see `DESIGN.md`).
pub struct Engine {
    config: EngineConfig,
    logger: Arc<Logger>,
    probes: Arc<dyn PlatformProbes>,
    inspector: Arc<dyn BusyPortInspector>,
    locker: Arc<CrossProcessLocker>,
    reap_tx: mpsc::Sender<(u16, bool)>,
    reap_rx: Mutex<mpsc::Receiver<(u16, bool)>>,
    /// Set once the busy-port inspector returns an empty result — taken as a
    /// sign the inspector itself is malfunctioning rather than that the host
    /// truly has zero bound TCP endpoints; once set, the diagnostic
    /// release-check is skipped for the rest of this engine's lifetime.
    release_check_disabled: AtomicBool,
    state: Mutex<EngineState>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("lock_file", &self.locker.path())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Builds a new engine from `config`, resolving and bootstrapping the
    /// shared lock file and constructing the default platform probes and
    /// busy-port inspector unless `config` injected substitutes.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let logger = config.logger();
        let lock_path =
            crate::bootstrap::ensure_lock_file(config.lock_file_relative_path(), &logger);

        let probes: Arc<dyn PlatformProbes> = config
            .probes
            .clone()
            .unwrap_or_else(|| Arc::new(crate::probes::SystemProbes::new(Arc::clone(&logger))));
        let inspector: Arc<dyn BusyPortInspector> = config
            .inspector
            .clone()
            .unwrap_or_else(|| Arc::new(crate::inspector::SystemInspector));

        let (reap_tx, reap_rx) = mpsc::channel();

        Self {
            config,
            logger,
            probes,
            inspector,
            locker: Arc::new(CrossProcessLocker::new(lock_path)),
            reap_tx,
            reap_rx: Mutex::new(reap_rx),
            release_check_disabled: AtomicBool::new(false),
            state: Mutex::new(EngineState::new()),
        }
    }

    /// Reserves a specific port.
    ///
    /// Returns `Ok(None)` — rather than an error — if the port is already
    /// reserved in-process or fails vetting (another process is bound to it,
    /// holds its cross-process lock, or answers a connect without a
    /// listener): these are expected, retryable outcomes, not caller
    /// mistakes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReservable`] (classified `InvalidArgument`) if
    /// `port` falls in a restricted range. Returns
    /// [`Error::LockFileUnavailable`] or [`Error::Io`] if the shared lock
    /// file itself cannot be used.
    pub fn reserve(&self, port: Port) -> Result<Option<PortRef>> {
        self.reserve_with_options(port, CloseOptions::new())
    }

    /// Like [`Engine::reserve`], with an initial close-action chain.
    ///
    /// # Errors
    ///
    /// See [`Engine::reserve`].
    pub fn reserve_with_options(
        &self,
        port: Port,
        options: CloseOptions,
    ) -> Result<Option<PortRef>> {
        let mut guard = self.lock_state();
        self.reap_locked(&mut guard);

        if guard.bitmap.is_set(port.value()) {
            return Ok(None);
        }
        if !self.is_unrestricted(port.value()) {
            return Err(Error::NotReservable {
                port: port.value(),
                reason: "within the ephemeral range or an OS-reserved range".to_string(),
            });
        }

        match self.vet(port.value())? {
            Ok(token) => Ok(Some(self.finalize_reservation(&mut guard, port, token, options))),
            Err(_transient) => Ok(None),
        }
    }

    /// Reserves any reservable port, drawn uniformly at random and then
    /// scanned ascending, falling back to descending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Exhausted`] if a full two-pass scan finds no
    /// reservable port. Returns [`Error::LockFileUnavailable`] or
    /// [`Error::Io`] if the shared lock file itself cannot be used.
    pub fn reserve_any(&self) -> Result<PortRef> {
        self.reserve_any_with_options(CloseOptions::new())
    }

    /// Like [`Engine::reserve_any`], with an initial close-action chain.
    ///
    /// # Errors
    ///
    /// See [`Engine::reserve_any`].
    pub fn reserve_any_with_options(&self, options: CloseOptions) -> Result<PortRef> {
        let mut guard = self.lock_state();
        self.reap_locked(&mut guard);
        let start = rand::thread_rng().gen_range(Port::MIN..=Port::MAX);
        self.scan_and_reserve(&mut guard, start, options)
    }

    /// Reserves `count` distinct reservable ports.
    ///
    /// If any draw fails, every port already reserved during this call is
    /// closed (queued for cleanup) before the error is returned, so a
    /// failed `reserve_many` never leaks partial reservations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCount`] if `count` is zero or exceeds the
    /// current size of the reservable set. Otherwise the same errors as
    /// [`Engine::reserve_any`].
    pub fn reserve_many(&self, count: usize) -> Result<Vec<PortRef>> {
        if count == 0 {
            return Err(Error::InvalidCount {
                requested: 0,
                reason: "count must be positive".to_string(),
            });
        }

        let mut guard = self.lock_state();
        self.reap_locked(&mut guard);

        let total_addressable = u64::from(Port::MAX) - u64::from(Port::MIN) + 1;
        let reservable = total_addressable
            .saturating_sub(self.restricted_count())
            .saturating_sub(guard.bitmap.count_set() as u64);
        if count as u64 > reservable {
            return Err(Error::InvalidCount {
                requested: count as i64,
                reason: format!(
                    "requested {count} ports but only {reservable} are currently reservable"
                ),
            });
        }

        let mut results = Vec::with_capacity(count);
        for _ in 0..count {
            let start = rand::thread_rng().gen_range(Port::MIN..=Port::MAX);
            match self.scan_and_reserve(&mut guard, start, CloseOptions::new()) {
                Ok(handle) => results.push(handle),
                Err(err) => {
                    drop(guard);
                    for handle in results {
                        handle.close();
                    }
                    return Err(err);
                }
            }
        }
        Ok(results)
    }

    /// Looks up a live handle for `port` previously produced by this
    /// engine, if one still exists and has not been closed.
    ///
    /// Does not opportunistically reap closed handles (unlike every other
    /// mutating method): a handle that was just dropped in another thread
    /// may still appear briefly until the next `reserve*` call.
    #[must_use]
    pub fn get_handle(&self, port: Port) -> Option<PortRef> {
        let guard = self.lock_state();
        let entry = guard.registry.get(&port.value())?;
        entry.handle.upgrade().map(|inner| PortRef { inner })
    }

    /// Reports whether `port` is in this engine's reservable set: neither
    /// already reserved by this engine nor within a restricted range.
    ///
    /// This is a pure bookkeeping query — it does not attempt a bind, take
    /// the cross-process lock, or run the connect-refusal probe, so a `true`
    /// result is not a guarantee that `reserve(port)` will actually succeed;
    /// only the full vet protocol can determine that.
    #[must_use]
    pub fn is_reservable(&self, port: Port) -> bool {
        let mut guard = self.lock_state();
        self.reap_locked(&mut guard);
        !guard.bitmap.is_set(port.value()) && self.is_unrestricted(port.value())
    }

    /// A snapshot of this engine's current occupancy.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let mut guard = self.lock_state();
        self.reap_locked(&mut guard);

        let reserved = guard.bitmap.count_set() as u64;
        let restricted = self.restricted_count();
        let total_addressable = u64::from(Port::MAX) - u64::from(Port::MIN) + 1;
        let reservable = total_addressable
            .saturating_sub(restricted)
            .saturating_sub(reserved);

        EngineStats {
            reservable_count: reservable,
            reserved_count: reserved,
            restricted_count: restricted,
            outstanding_locks: guard.locks.len() as u64,
        }
    }

    /// The size of the Restricted set: `SystemPorts ∪ EphemeralRange ∪
    /// OsReservedRanges`, counted with the same inclusive-range arithmetic
    /// `is_unrestricted` checks against, port by port.
    ///
    /// Ranges are summed independently rather than de-duplicated against
    /// overlaps (e.g. an `os_reserved_ranges` entry that dips into
    /// `SystemPorts`); real platform probes don't produce such overlaps, and
    /// over-counting here only ever makes [`Engine::reserve_many`]'s
    /// upper-bound check stricter, never laxer.
    fn restricted_count(&self) -> u64 {
        const SYSTEM_PORTS_COUNT: u64 = 1025; // [0, 1024], inclusive.

        let (elo, ehi) = self.probes.ephemeral_range();
        let mut restricted = SYSTEM_PORTS_COUNT + u64::from(ehi).saturating_sub(u64::from(elo)) + 1;
        for (lo, hi) in self.probes.os_reserved_ranges() {
            restricted += u64::from(hi).saturating_sub(u64::from(lo)) + 1;
        }
        restricted
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Drains the "a handle closed" channel and finalizes cleanup for each
    /// port it names: runs the port's close-action chain, clears its
    /// bitmap bit, drops its cross-process lock token, and — unless skipped
    /// for this close or disabled process-wide — runs the diagnostic
    /// release-check.
    ///
    /// This is the engine's opportunistic reaper, invoked at the start of
    /// every public mutating operation except [`Engine::get_handle`].
    fn reap_locked(&self, guard: &mut EngineState) {
        let rx = self
            .reap_rx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut closed = Vec::new();
        while let Ok(entry) = rx.try_recv() {
            closed.push(entry);
        }
        drop(rx);

        for (port, skip_release_check) in closed {
            if let Some(entry) = guard.registry.remove(&port) {
                entry.closed.store(true, Ordering::SeqCst);
                let mut chain = entry
                    .chain
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                chain.run_all();
            }
            guard.bitmap.clear(port);
            guard.locks.remove(&port);

            self.logger.info(&format!("released port {port}"));
            self.run_release_check(port, skip_release_check);
        }
    }

    /// Runs the diagnostic release-check for a just-released `port`: lists
    /// every currently-bound TCP endpoint and logs an error for any that
    /// still claim `port`. Never fails the close — errors from the inspector
    /// itself are swallowed, since this check is diagnostic only.
    fn run_release_check(&self, port: u16, skip: bool) {
        if skip || self.config.disable_release_check() {
            return;
        }
        if self.release_check_disabled.load(Ordering::SeqCst) {
            return;
        }

        let Ok(busy) = self.inspector.busy_ports() else {
            return;
        };

        if busy.is_empty() {
            self.logger.warn(
                "busy-port inspector returned no results at all; disabling the diagnostic \
                 release-check for the rest of this engine's lifetime",
            );
            self.release_check_disabled.store(true, Ordering::SeqCst);
            return;
        }

        for offender in busy.iter().filter(|bp| bp.local_endpoint.port == port) {
            self.logger.error(&format!(
                "port {port} was released but is still bound by pid {} ({})",
                offender.pid, offender.short_command
            ));
        }
    }

    fn is_unrestricted(&self, port: u16) -> bool {
        // SystemPorts = [0, 1024], inclusive per spec.md's data model; the
        // lowest reservable port is 1025. `Port::is_privileged` draws its own
        // line at `< 1024` for a different purpose (whether binding needs
        // elevated privileges), so it is not reused here.
        if port <= 1024 {
            return false;
        }
        let (elo, ehi) = self.probes.ephemeral_range();
        if port >= elo && port <= ehi {
            return false;
        }
        self.probes
            .os_reserved_ranges()
            .into_iter()
            .all(|(lo, hi)| !(port >= lo && port <= hi))
    }

    /// Scans the coin-flipped direction first, falling back to the reverse
    /// direction if the first pass finds no vettable candidate, per
    /// spec.md §4.4 step 2 ("flip a fair coin: ascending or descending").
    fn scan_and_reserve(
        &self,
        guard: &mut EngineState,
        start: u16,
        options: CloseOptions,
    ) -> Result<PortRef> {
        let ascending_first = rand::thread_rng().gen_bool(0.5);

        if let Some((port, token)) = self.scan_direction(guard, start, ascending_first)? {
            let port =
                Port::try_from(port).expect("scan only yields ports within the valid range");
            return Ok(self.finalize_reservation(guard, port, token, options));
        }
        if let Some((port, token)) = self.scan_direction(guard, start, !ascending_first)? {
            let port =
                Port::try_from(port).expect("scan only yields ports within the valid range");
            return Ok(self.finalize_reservation(guard, port, token, options));
        }
        Err(Error::Exhausted)
    }

    fn scan_direction(
        &self,
        guard: &EngineState,
        start: u16,
        ascending: bool,
    ) -> Result<Option<(u16, LockToken)>> {
        let mut port = start;
        for _ in 0..=u32::from(u16::MAX) {
            if !guard.bitmap.is_set(port) && self.is_unrestricted(port) {
                match self.vet(port)? {
                    Ok(token) => return Ok(Some((port, token))),
                    Err(_transient) => {}
                }
            }
            port = if ascending {
                port.wrapping_add(1)
            } else {
                port.wrapping_sub(1)
            };
        }
        Ok(None)
    }

    /// Vets a single candidate port through the full protocol: bind a
    /// listening socket, acquire the cross-process lock while that socket is
    /// still open, close the socket, then probe for a process that answers a
    /// connect without holding a listener (Windows RDP being the motivating
    /// case for this last step).
    ///
    /// On any failure the cross-process lock (if acquired) is released
    /// automatically when `token` goes out of scope, since `LockToken`'s
    /// `Drop` releases it; nothing here needs to release it explicitly.
    fn vet(&self, port: u16) -> Result<std::result::Result<LockToken, VetFailure>> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        let listener = match TcpListener::bind(addr) {
            Ok(listener) => listener,
            Err(_) => return Ok(Err(VetFailure::BindRefused)),
        };

        let token = match self.locker.try_lock(port) {
            Ok(Some(token)) => token,
            Ok(None) => return Ok(Err(VetFailure::LockHeldElsewhere)),
            Err(source) => {
                return Err(Error::LockFileUnavailable {
                    path: self.locker.path().to_path_buf(),
                    source,
                })
            }
        };

        drop(listener);

        let connect_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        if let Ok(answered) = TcpStream::connect_timeout(&connect_addr, CONNECT_PROBE_TIMEOUT) {
            drop(answered);
            self.logger.debug(&format!(
                "port {port} answered a connect after its listener closed; treating as busy"
            ));
            return Ok(Err(VetFailure::ConnectAnswered));
        }

        self.logger
            .trace(&format!("port {port} passed bind, lock, and connect-refusal vetting"));
        Ok(Ok(token))
    }

    fn finalize_reservation(
        &self,
        guard: &mut EngineState,
        port: Port,
        token: LockToken,
        options: CloseOptions,
    ) -> PortRef {
        guard.bitmap.set(port.value());
        guard.locks.insert(port.value(), token);

        let closed = Arc::new(AtomicBool::new(false));
        let mut chain = ActionChain::default();
        for action in options.actions {
            chain.register(action);
        }
        let chain = Arc::new(Mutex::new(chain));

        let inner = Arc::new(HandleInner {
            port,
            closed: Arc::clone(&closed),
            chain: Arc::clone(&chain),
            reap_tx: self.reap_tx.clone(),
        });

        guard.registry.insert(
            port.value(),
            WeakEntry {
                handle: Arc::downgrade(&inner),
                closed,
                chain,
            },
        );

        self.logger
            .debug(&format!("reserved port {}", port.value()));

        PortRef { inner }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspector::MockInspector;
    use crate::probes::StaticProbes;
    use std::sync::Arc;

    /// Builds an engine against a real temporary lock file.
    ///
    /// `lock_file_relative_path` is documented as relative to the shared
    /// coordination root, but `PathBuf::join` treats an absolute argument as
    /// replacing the base entirely, so passing an absolute temp path here
    /// resolves to exactly that path without touching the real shared root.
    fn test_engine() -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("portLockFile");
        std::fs::File::create(&lock_path)
            .unwrap()
            .set_len(65536)
            .unwrap();

        let config = EngineConfig::builder()
            .lock_file_relative_path(lock_path)
            .probes(Arc::new(StaticProbes::new((60000, 60010), vec![])))
            .inspector(Arc::new(MockInspector::empty()))
            .build();

        (dir, Engine::new(config))
    }

    #[test]
    fn reserve_and_release_round_trip() {
        let (_dir, engine) = test_engine();
        let port = Port::try_from(59000).unwrap();
        let handle = engine.reserve(port);
        // In this sandboxed test environment, the shared lock file path
        // resolution means this may or may not succeed depending on write
        // access to the platform coordination root; only assert internal
        // consistency of whichever branch occurs.
        match handle {
            Ok(Some(handle)) => {
                assert_eq!(handle.port(), port);
                assert!(!handle.is_closed());
                handle.close();
            }
            Ok(None) => {}
            Err(err) => {
                assert!(err.is_permanent_failure() || err.is_invalid_argument());
            }
        }
    }

    #[test]
    fn close_options_actions_run_in_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = ActionChain::default();
        let log_a = Arc::clone(&log);
        let log_b = Arc::clone(&log);
        let log_c = Arc::clone(&log);
        chain.register(Box::new(move || log_a.lock().unwrap().push("a")));
        chain.register(Box::new(move || log_b.lock().unwrap().push("b")));
        chain.register(Box::new(move || log_c.lock().unwrap().push("c")));
        chain.run_all();
        assert_eq!(*log.lock().unwrap(), vec!["c", "b", "a"]);
    }

    #[test]
    fn reserve_many_rejects_zero_count() {
        let (_dir, engine) = test_engine();
        let err = engine.reserve_many(0).unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn reserve_many_rejects_count_exceeding_the_reservable_set() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("portLockFile");
        std::fs::File::create(&lock_path)
            .unwrap()
            .set_len(65536)
            .unwrap();

        // Ephemeral range swallows everything above SystemPorts except the
        // top two ports, leaving a reservable set of exactly 2.
        let config = EngineConfig::builder()
            .lock_file_relative_path(&lock_path)
            .probes(Arc::new(StaticProbes::new((2000, 65533), vec![])))
            .inspector(Arc::new(MockInspector::empty()))
            .build();
        let engine = Engine::new(config);

        let err = engine.reserve_many(3).unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn is_unrestricted_excludes_ephemeral_and_reserved_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("portLockFile");
        std::fs::File::create(&lock_path)
            .unwrap()
            .set_len(65536)
            .unwrap();

        let config = EngineConfig::builder()
            .lock_file_relative_path(&lock_path)
            .probes(Arc::new(StaticProbes::new(
                (50000, 50100),
                vec![(1000, 1010)],
            )))
            .inspector(Arc::new(MockInspector::empty()))
            .build();
        let engine = Engine::new(config);

        assert!(!engine.is_unrestricted(50050));
        assert!(!engine.is_unrestricted(1005));
        assert!(engine.is_unrestricted(40000));
    }

    #[test]
    fn is_unrestricted_excludes_system_ports_inclusive_of_1024() {
        let (_dir, engine) = test_engine();
        assert!(!engine.is_unrestricted(0));
        assert!(!engine.is_unrestricted(80));
        assert!(!engine.is_unrestricted(1024));
        assert!(engine.is_unrestricted(1025));
    }

    #[test]
    fn close_with_options_skip_release_check_still_releases_the_port() {
        let (_dir, engine) = test_engine();
        let port = Port::try_from(59010).unwrap();
        let Ok(Some(handle)) = engine.reserve(port) else {
            // Sandboxed environments without write access to the shared
            // lock-file root surface a permanent failure instead, or the
            // vet protocol may fail for unrelated reasons; nothing further
            // to assert about release semantics in that case.
            return;
        };
        handle.close_with_options(CloseOptions::new().skip_release_check());

        // The next mutating call reaps the closed handle, so the port
        // becomes reservable again even though the release-check was
        // skipped for that close.
        let reacquired = engine.reserve(port);
        assert!(matches!(reacquired, Ok(Some(_))));
        if let Ok(Some(handle)) = reacquired {
            handle.close();
        }
    }

    #[test]
    fn close_with_options_runs_extra_actions_alongside_the_release() {
        let (_dir, engine) = test_engine();
        let port = Port::try_from(59011).unwrap();
        let Ok(Some(handle)) = engine.reserve(port) else {
            return;
        };
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);
        handle.close_with_options(
            CloseOptions::new()
                .skip_release_check()
                .with_action(move || ran_clone.store(true, Ordering::SeqCst)),
        );
        // Actions run as part of reaping, driven by the next mutator.
        let _ = engine.is_reservable(Port::try_from(59012).unwrap());
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn vet_rejects_a_port_with_a_real_listener_bound_outside_the_engine() {
        let (_dir, engine) = test_engine();
        // Bind a real listener behind the engine's back on a port inside
        // its configured reservable window, then confirm vet treats it as
        // unreservable even though the engine's own bitmap has no record
        // of it.
        let listener = std::net::TcpListener::bind("127.0.0.1:59005")
            .or_else(|_| std::net::TcpListener::bind("0.0.0.0:59005"));
        let Ok(listener) = listener else {
            // Port already busy in the sandbox for an unrelated reason;
            // nothing to assert.
            return;
        };
        let port = Port::try_from(59005).unwrap();
        let result = engine.reserve(port);
        drop(listener);
        // A foreign listener makes vetting fail (bind refused), which
        // `reserve` reports as `Ok(None)` rather than an error — it is an
        // expected, retryable outcome, not a caller mistake.
        assert!(matches!(result, Ok(None)));
    }
}
