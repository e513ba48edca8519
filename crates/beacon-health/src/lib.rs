//! # Beacon Health - Liveness Probes for Discovered Services
//!
//! Every probe takes a [`ProbeDescriptor`](beacon_types::ProbeDescriptor),
//! carrying whichever of health endpoint, host and port, process, or script
//! is known, and returns a [`HealthCheckResult`](beacon_types::HealthCheckResult).
//! Probe failures are statuses, never errors.
//!
//! ## Key Components
//!
//! - [`probes`]: HTTP, TCP, process, script and composite probes
//! - [`ProbeFactory`]: picks a probe from the populated descriptor fields
//! - [`HealthChecker`]: runs many probes with bounded concurrency
//!
//! ## Retry Policy
//!
//! `retries` is the total number of attempts. Each attempt is bounded by
//! `timeout`; `retry_delay` is slept between attempts. Only the final
//! attempt's failure is returned, so a probe finishes within
//! `timeout × retries + retry_delay × (retries − 1)`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use beacon_health::{ProbeConfig, ProbeFactory};
//! use beacon_types::ProbeDescriptor;
//!
//! # async fn example() -> beacon_health::HealthResult<()> {
//! let factory = ProbeFactory::new(ProbeConfig::default());
//! let descriptor = ProbeDescriptor {
//!     health_endpoint: Some("http://localhost:8080/health".into()),
//!     ..Default::default()
//! };
//! let result = factory.check(&descriptor).await?;
//! println!("{}: {}", result.status, result.reason);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod checker;
pub mod config;
pub mod error;
pub mod factory;
pub mod probes;
pub mod retry;

pub use checker::HealthChecker;
pub use config::{HealthConfig, ProbeConfig};
pub use error::{HealthError, HealthResult};
pub use factory::ProbeFactory;
pub use probes::{
    AggregationPolicy, CompositeProbe, HealthProbe, HttpProbe, ProcessProbe, ScriptProbe, TcpProbe,
};
