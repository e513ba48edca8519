//! The pluggable discovery source seam.

use async_trait::async_trait;
use beacon_types::{RawService, ServiceSource};

use crate::error::DiscoveryResult;

/// A collaborator producing raw service observations from one origin.
///
/// An `Err` means the whole source was unavailable for this pass. Partial
/// failures inside a source are logged and skipped by the implementation.
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    /// Name used in logs and per-source statistics.
    fn name(&self) -> &str;

    /// Origin recorded on the observations this source produces.
    fn source(&self) -> ServiceSource;

    async fn discover(&self) -> DiscoveryResult<Vec<RawService>>;
}
