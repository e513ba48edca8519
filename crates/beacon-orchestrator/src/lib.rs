//! # Beacon Orchestrator - Unified Discovery
//!
//! [`UnifiedDiscovery`] drives a pass over every configured
//! [`DiscoverySource`](beacon_discovery::DiscoverySource):
//!
//! | Phase | Work |
//! |-------|------|
//! | `discovering` | all sources concurrently, each under a timeout |
//! | `unifying` | collapse observations by dedup key |
//! | `validating` | structural, security and dependency checks |
//! | `health_checking` | probe records that expose an endpoint |
//! | `extracting_metadata` | read service trees off the async runtime |
//! | `registering` | merge into the [`ServiceRegistry`](beacon_registry::ServiceRegistry) |
//!
//! A failing source or stage is logged and counted in [`DiscoveryStats`];
//! the pass still returns everything the remaining sources produced.
//!
//! Continuous mode repeats the pass on an interval and applies container
//! change events between passes.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod phase;
pub mod stats;
pub mod unify;

pub use config::{DiscoveryOptions, OrchestratorConfig};
pub use error::{OrchestratorError, OrchestratorResult};
pub use orchestrator::{Callbacks, ServiceCallback, UnifiedDiscovery, UnifiedDiscoveryBuilder};
pub use phase::DiscoveryPhase;
pub use stats::{DiscoveryStats, SourceStats};
pub use unify::unify;
