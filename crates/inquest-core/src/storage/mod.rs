//! Versioned persistence for investigation state.
//!
//! The store is a collaborator, not a live channel: the engine persists a
//! snapshot when it decides to, always with the version it last read.
//! Optimistic concurrency only; a stale write comes back as a version
//! conflict instead of silently clobbering newer data.

mod investigations;

pub use investigations::{MemoryInvestigationStore, SqliteInvestigationStore};

use crate::error::Result;
use crate::state::InvestigationState;

/// A stored snapshot plus the version it was read at.
#[derive(Debug, Clone)]
pub struct VersionedState {
    pub state: InvestigationState,
    pub version: u64,
}

/// Persistence contract for investigations. Implementations are synchronous;
/// calls are short and the engine invokes them directly from async code.
pub trait InvestigationStore: Send + Sync {
    /// Persist a new investigation. Returns the initial version.
    fn create(&self, state: &InvestigationState) -> Result<u64>;

    /// Fetch a snapshot and its current version.
    fn get(&self, investigation_id: &str) -> Result<VersionedState>;

    /// Persist an update only if `expected_version` still matches. Returns
    /// the new version on success, `VersionConflict` on a stale write.
    fn update(
        &self,
        investigation_id: &str,
        state: &InvestigationState,
        expected_version: u64,
    ) -> Result<u64>;
}
