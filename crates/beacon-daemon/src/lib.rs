//! # Beacon Daemon
//!
//! Process-level wiring for `beacond`:
//! - Layered configuration ([`BeaconConfig`])
//! - Discovery sources and catalog adapters built from that configuration
//! - Registry over SQLite or memory
//! - Run-once and continuous modes with graceful shutdown

#![deny(unsafe_code)]

pub mod app;
pub mod config;
pub mod error;

pub use app::{shutdown_signal, Beacon};
pub use config::{BeaconConfig, LoggingConfig, WatcherConfig};
pub use error::{DaemonError, DaemonResult};
