//! Per-association reconciliation snapshot.
//!
//! The loop driver gathers one snapshot per association at the start of a
//! pass and hands it to the phase engine. The snapshot is immutable; external
//! failures are recorded as absent data rather than errors so the engine can
//! decide what is still safe to do.

use std::collections::{BTreeMap, BTreeSet};

use ballast_events::{AssociationState, TargetId, TargetState};
use ballast_id::{IpAddress, JobId, LoadBalancerId};

use crate::connector::{CloudLbState, CloudLoadBalancer};
use crate::jobs::TaskEndpoint;

/// Everything known about one association at the start of a pass.
#[derive(Debug, Clone)]
pub struct AssociationSnapshot {
    pub job_id: JobId,
    pub load_balancer_id: LoadBalancerId,
    pub state: AssociationState,

    /// Running tasks of the job; `None` if the job manager call failed.
    pub running: Option<Vec<TaskEndpoint>>,

    /// True when the job manager confirmed the job no longer exists.
    pub job_missing: bool,

    /// Observed cloud state; `None` if the connector call failed.
    pub cloud: Option<CloudLoadBalancer>,

    /// Stored target state for this load balancer.
    pub stored: BTreeMap<TargetId, TargetState>,
}

impl AssociationSnapshot {
    /// An association is an orphan when its job no longer exists or its load
    /// balancer has been removed from the cloud.
    pub fn is_orphan(&self) -> bool {
        self.job_missing
            || self
                .cloud
                .as_ref()
                .is_some_and(|cloud| cloud.state == CloudLbState::Removed)
    }

    /// The cloud membership usable for sweep decisions: the registered IPs of
    /// an `Active` load balancer, or an empty set for a `Removed` one.
    /// `None` when the connector failed and nothing can be assumed.
    pub fn usable_membership(&self) -> Option<&BTreeSet<IpAddress>> {
        self.cloud.as_ref().map(|cloud| &cloud.registered_ips)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn snapshot(cloud: Option<CloudLoadBalancer>, job_missing: bool) -> AssociationSnapshot {
        AssociationSnapshot {
            job_id: JobId::parse("job-1").unwrap(),
            load_balancer_id: LoadBalancerId::parse("lb-1").unwrap(),
            state: AssociationState::Associated,
            running: None,
            job_missing,
            cloud,
            stored: BTreeMap::new(),
        }
    }

    #[test]
    fn test_orphan_by_missing_job() {
        let s = snapshot(Some(CloudLoadBalancer::active(BTreeSet::new())), true);
        assert!(s.is_orphan());
    }

    #[test]
    fn test_orphan_by_removed_load_balancer() {
        let s = snapshot(Some(CloudLoadBalancer::removed()), false);
        assert!(s.is_orphan());
    }

    #[test]
    fn test_absent_cloud_view_is_not_an_orphan() {
        // A connector failure is transient; it proves nothing.
        let s = snapshot(None, false);
        assert!(!s.is_orphan());
        assert!(s.usable_membership().is_none());
    }
}
