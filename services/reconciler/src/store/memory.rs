//! In-memory association store.
//!
//! Used by tests and by deployments that accept rebuilding state from the
//! upstream API on restart. A single lock guards both maps, which gives every
//! call a coherent snapshot.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use ballast_events::{Association, AssociationState, TargetId, TargetState};
use ballast_id::{JobId, LoadBalancerId};

use super::{AssociationStore, StoreError, TargetRecord};

#[derive(Default)]
struct MemoryInner {
    associations: BTreeMap<(JobId, LoadBalancerId), AssociationState>,
    targets: BTreeMap<TargetId, TargetState>,
}

/// In-memory implementation of [`AssociationStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))
    }
}

#[async_trait]
impl AssociationStore for MemoryStore {
    async fn put_association(
        &self,
        job_id: &JobId,
        load_balancer_id: &LoadBalancerId,
        state: AssociationState,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner
            .associations
            .insert((job_id.clone(), load_balancer_id.clone()), state);
        Ok(())
    }

    async fn get_associations(&self) -> Result<Vec<Association>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .associations
            .iter()
            .map(|((job_id, load_balancer_id), state)| Association {
                job_id: job_id.clone(),
                load_balancer_id: load_balancer_id.clone(),
                state: *state,
            })
            .collect())
    }

    async fn get_associated_load_balancers(
        &self,
        job_id: &JobId,
    ) -> Result<BTreeSet<LoadBalancerId>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .associations
            .keys()
            .filter(|(job, _)| job == job_id)
            .map(|(_, lb)| lb.clone())
            .collect())
    }

    async fn remove_association(
        &self,
        job_id: &JobId,
        load_balancer_id: &LoadBalancerId,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner
            .associations
            .remove(&(job_id.clone(), load_balancer_id.clone()));
        Ok(())
    }

    async fn put_targets(&self, records: &[TargetRecord]) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        for record in records {
            inner.targets.insert(record.target.clone(), record.state);
        }
        Ok(())
    }

    async fn get_targets(
        &self,
        load_balancer_id: &LoadBalancerId,
    ) -> Result<Vec<TargetRecord>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .targets
            .iter()
            .filter(|(target, _)| &target.load_balancer_id == load_balancer_id)
            .map(|(target, state)| TargetRecord::new(target.clone(), *state))
            .collect())
    }

    async fn remove_targets(&self, targets: &[TargetId]) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        for target in targets {
            inner.targets.remove(target);
        }
        Ok(())
    }
}
