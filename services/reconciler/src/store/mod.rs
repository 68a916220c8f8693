//! Association and target state store.
//!
//! The store is the only mutable state shared between the reconciler and the
//! reactive update path. All writes are upsert-by-key and idempotent; reads
//! present a coherent snapshot of the data requested within a single call.
//! There is no cross-key atomicity.

mod memory;
mod sqlite;

use std::collections::BTreeSet;

use async_trait::async_trait;
use ballast_events::{Association, AssociationState, TargetId, TargetState};
use ballast_id::{JobId, LoadBalancerId};
use thiserror::Error;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A stored target and its most recently requested state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRecord {
    pub target: TargetId,
    pub state: TargetState,
}

impl TargetRecord {
    pub fn new(target: TargetId, state: TargetState) -> Self {
        Self { target, state }
    }
}

/// Persistent state for (job, load balancer) associations and their targets.
#[async_trait]
pub trait AssociationStore: Send + Sync {
    /// Insert or update an association.
    async fn put_association(
        &self,
        job_id: &JobId,
        load_balancer_id: &LoadBalancerId,
        state: AssociationState,
    ) -> Result<(), StoreError>;

    /// All known associations.
    async fn get_associations(&self) -> Result<Vec<Association>, StoreError>;

    /// Load balancers currently associated with a job.
    async fn get_associated_load_balancers(
        &self,
        job_id: &JobId,
    ) -> Result<BTreeSet<LoadBalancerId>, StoreError>;

    /// Remove an association. Removing a missing association is a no-op.
    async fn remove_association(
        &self,
        job_id: &JobId,
        load_balancer_id: &LoadBalancerId,
    ) -> Result<(), StoreError>;

    /// Insert or update target records.
    async fn put_targets(&self, records: &[TargetRecord]) -> Result<(), StoreError>;

    /// Target records for a load balancer, ordered by target key.
    async fn get_targets(
        &self,
        load_balancer_id: &LoadBalancerId,
    ) -> Result<Vec<TargetRecord>, StoreError>;

    /// Remove target records. Missing targets are ignored.
    async fn remove_targets(&self, targets: &[TargetId]) -> Result<(), StoreError>;
}
