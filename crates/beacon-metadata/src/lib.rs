//! # Beacon Metadata - Best-Effort Extraction
//!
//! Builds a [`ServiceContext`] over a service's source tree (when it has one)
//! and runs a list of [`ExtractionStep`]s against it:
//!
//! | Step | Produces |
//! |------|----------|
//! | basic | identity, readme summary, license |
//! | configuration | Dockerfile and compose facts, config file keys |
//! | dependencies | declared packages per ecosystem, frameworks |
//! | security | hardcoded secrets and dangerous calls, redacted |
//! | api | OpenAPI documents and framework routes |
//! | runtime | pinned runtime versions, processes, live container state |
//! | environment | `.env` variables with sensitive keys withheld |
//!
//! Steps never abort one another. Unreadable or malformed files are listed
//! under `errors` in the step's data.

#![deny(unsafe_code)]

pub mod config;
pub mod context;
pub mod error;
pub mod extractor;
pub mod steps;

pub use config::ExtractorConfig;
pub use context::ServiceContext;
pub use error::{MetadataError, MetadataResult};
pub use extractor::{attach, summarize, MetadataExtractor};
pub use steps::ExtractionStep;
