//! Cloud load balancer connector interface.
//!
//! The connector is a read-only view of what the cloud believes about a load
//! balancer. Writes go through the downstream batching engine, never through
//! the reconciler.

use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;
use ballast_id::{IpAddress, LoadBalancerId};

/// Cloud-side state of a load balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudLbState {
    /// The load balancer exists and accepts targets.
    Active,
    /// The load balancer was removed (possibly out-of-band).
    Removed,
}

/// The observed state of one load balancer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudLoadBalancer {
    pub state: CloudLbState,
    /// IPs currently registered with the load balancer.
    pub registered_ips: BTreeSet<IpAddress>,
}

impl CloudLoadBalancer {
    pub fn active(registered_ips: BTreeSet<IpAddress>) -> Self {
        Self {
            state: CloudLbState::Active,
            registered_ips,
        }
    }

    pub fn removed() -> Self {
        Self {
            state: CloudLbState::Removed,
            registered_ips: BTreeSet::new(),
        }
    }
}

/// Read access to cloud load balancer membership.
///
/// Failures must be isolated to the load balancer being queried; the caller
/// treats any error as an absent view and retries on the next pass.
#[async_trait]
pub trait CloudConnector: Send + Sync {
    async fn get_load_balancer(&self, id: &LoadBalancerId) -> Result<CloudLoadBalancer>;
}
