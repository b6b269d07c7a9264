#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # portkeep
//!
//! A library for coordinating safe TCP port reservations across processes
//! on a single host.
//!
//! In-process bookkeeping alone (a `HashSet<u16>`, say) cannot stop two
//! unrelated processes from handing out the same "free" port at the same
//! moment: both observe it as unbound, both proceed, and one of them loses
//! the race the instant it actually tries to listen. `portkeep` closes that
//! window by combining an OS-level bind probe with an advisory,
//! cross-process file lock before a reservation is considered vetted, so a
//! port this process reserves stays reserved even against other
//! `portkeep`-aware processes on the same host.
//!
//! ## Core Types
//!
//! - [`Engine`]: the reservation engine — construct one with
//!   [`EngineConfig`] and call [`Engine::reserve`], [`Engine::reserve_any`],
//!   or [`Engine::reserve_many`].
//! - [`PortRef`]: a handle to a single reservation; dropping it (or calling
//!   [`PortRef::close`]) releases the port.
//! - [`Port`] and [`PortRange`]: validated port number types.
//! - [`Error`] and [`Result`]: error handling types.
//! - [`Logger`] and [`LogLevel`]: logging infrastructure.
//!
//! ## Examples
//!
//! ```no_run
//! use portkeep::{Engine, EngineConfig};
//!
//! let engine = Engine::new(EngineConfig::builder().build());
//! let handle = engine.reserve_any().expect("a port should be available");
//! println!("reserved port {}", handle.port());
//! handle.close();
//! ```

mod bitmap;
pub mod bootstrap;
pub mod config;
pub mod engine;
pub mod error;
pub mod inspector;
pub mod locker;
pub mod logging;
pub mod port;
pub mod probes;
mod sys;

pub use config::{EngineConfig, EngineConfigBuilder};
pub use engine::{CloseOptions, Engine, EngineStats, PortRef};
pub use error::{Error, Result};
pub use inspector::{BusyPort, BusyPortInspector, Endpoint, MockInspector, SystemInspector, TcpState};
pub use locker::{CrossProcessLocker, LockToken};
pub use logging::{init_logger, LogLevel, Logger};
pub use port::{InvalidPortError, InvalidPortRangeError, Port, PortRange};
pub use probes::{PlatformProbes, RangePair, StaticProbes, SystemProbes, IANA_EPHEMERAL_FALLBACK};
