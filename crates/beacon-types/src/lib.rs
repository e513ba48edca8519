//! Beacon Types - Core types for unified service discovery
//!
//! Beacon discovers runtime services from heterogeneous origins (filesystem
//! conventions, container runtimes, external catalogs), normalizes them into
//! one data model, and keeps them in a deduplicated registry.
//!
//! ## Key Concepts
//!
//! - **RawService**: A single observation produced by a discovery source
//! - **ServiceRecord**: The unified, merged entity stored in the registry
//! - **DedupKey**: `(name, type, location)` tuple that collapses observations
//! - **SourcePriority**: Explicit precedence used when observations conflict
//! - **HealthCheckResult** / **ValidationResult**: Outcomes attached to records

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod endpoint;
pub mod error;
pub mod filter;
pub mod health;
pub mod merge;
pub mod metadata;
pub mod outcome;
pub mod service;
pub mod source;

// Re-export main types
pub use endpoint::{Endpoint, EndpointScope};
pub use error::TypesError;
pub use filter::ServiceFilter;
pub use health::{HealthCheckResult, HealthStatus, ProbeDescriptor, ProbeKind};
pub use merge::{deep_merge, status_liveness};
pub use metadata::{ExtractedMetadata, MetadataType};
pub use outcome::{RegistrationAction, RegistrationResult, ValidationResult};
pub use service::{DedupKey, Metadata, RawService, ServiceRecord};
pub use source::{ServiceSource, SourcePriority};
