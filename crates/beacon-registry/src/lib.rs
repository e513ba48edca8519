//! # Beacon Registry - Deduplicating Service Registry
//!
//! [`ServiceRegistry`] holds the unified record set in memory with six
//! secondary indexes (name, type, status, tag, owner, source). Every mutation
//! is mirrored to a [`ServiceStore`] (SQLite or in-memory) and appended to a
//! per-service history.
//!
//! Registration looks records up by dedup key `(name, type, location)`:
//! a hit merges the observation, a miss creates a record.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod format;
pub mod index;
pub mod registry;
pub mod stats;
pub mod store;

pub use config::{RegistryConfig, MEMORY_DATABASE};
pub use error::{RegistryError, RegistryResult, StorageError, StorageResult};
pub use format::{export_records, import_records, ExportFormat};
pub use index::{IndexDimension, RegistryIndexes};
pub use registry::ServiceRegistry;
pub use stats::{BulkUpdate, RegistryStats};
pub use store::{HistoryAction, HistoryEntry, InMemoryStore, ServiceStore, SqliteStore};
