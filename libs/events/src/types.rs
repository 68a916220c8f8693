//! Wire type definitions shared between the reconciler, the reactive update
//! path, and the downstream batching engine.

use ballast_id::{IpAddress, JobId, LoadBalancerId, TaskId};
use serde::{Deserialize, Serialize};

/// Task context key under which the job manager reports the container IP.
pub const CONTAINER_IP_CONTEXT_KEY: &str = "container.ip";

// =============================================================================
// Associations
// =============================================================================

/// State of a (job, load balancer) association.
///
/// `Dissociated` is terminal: once an association is dissociated it is only
/// ever cleaned up, never re-associated under the same record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationState {
    Associated,
    Dissociated,
}

/// A (job, load balancer) association and its state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    pub job_id: JobId,
    pub load_balancer_id: LoadBalancerId,
    pub state: AssociationState,
}

// =============================================================================
// Targets
// =============================================================================

/// The three-part key identifying a load balancer target.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TargetId {
    pub load_balancer_id: LoadBalancerId,
    pub task_id: TaskId,
    pub ip_address: IpAddress,
}

impl TargetId {
    pub fn new(load_balancer_id: LoadBalancerId, task_id: TaskId, ip_address: IpAddress) -> Self {
        Self {
            load_balancer_id,
            task_id,
            ip_address,
        }
    }
}

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.load_balancer_id, self.task_id, self.ip_address
        )
    }
}

/// The state most recently *requested* for a target.
///
/// This reflects what we asked the cloud to do, not necessarily what the
/// cloud has applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    Registered,
    Deregistered,
}

impl std::fmt::Display for TargetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetState::Registered => write!(f, "registered"),
            TargetState::Deregistered => write!(f, "deregistered"),
        }
    }
}

// =============================================================================
// Transitions
// =============================================================================

/// Priority of a target transition.
///
/// The downstream batcher merges duplicate transitions for the same target by
/// priority; reconciliation always emits `Low` so that reactive updates win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// Why a transition was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    /// A running task's IP is missing from the cloud membership.
    MissingInLb,
    /// An IP we registered is still in the cloud but its task is gone.
    ExtraInLb,
    /// The stored state disagrees with both the cloud and the task list.
    InconsistentStore,
    /// The association is dissociated and its targets are being drained.
    OrphanCleanup,
}

/// A desired target transition, consumed by the downstream batching engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetTransition {
    #[serde(flatten)]
    pub target: TargetId,
    pub state: TargetState,
    pub priority: Priority,
    pub reason: TransitionReason,
}

impl TargetTransition {
    /// A `Low`-priority transition, as emitted by reconciliation.
    pub fn low(target: TargetId, state: TargetState, reason: TransitionReason) -> Self {
        Self {
            target,
            state,
            priority: Priority::Low,
            reason,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
