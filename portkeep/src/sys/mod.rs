//! Raw platform syscalls backing the cross-process locker (C3) and the
//! lock-file bootstrap (C6).
//!
//! Everything that touches a raw file descriptor/handle or calls into a
//! non-`std` locking primitive lives here. Every other module in this crate
//! carries `#![forbid(unsafe_code)]`; this module is the sole exception
//! (a crate-wide `forbid` cannot be locally un-forbidden, so the boundary is
//! drawn per-module instead), and every `unsafe` block below is commented
//! with the syscall contract it relies on.

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub(crate) use unix::{try_lock_region, unlock_region, widen_permissions};

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub(crate) use windows::{try_lock_region, unlock_region, widen_permissions};
