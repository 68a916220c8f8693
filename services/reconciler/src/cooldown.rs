//! Cooldown tracking for load balancer targets.
//!
//! When the reactive path fires an update for a target it activates a
//! cooldown here, meaning "we just asked the cloud to change this target;
//! wait before second-guessing". Reconciliation consults the tracker and
//! withholds its own emissions for targets whose cooldown has not expired.
//! Cooldowns suppress emissions only, never store mutations.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ballast_events::TargetId;
use tokio::time::Instant;

/// Tracks per-target cooldown deadlines. Cheap to clone and share.
#[derive(Clone, Default)]
pub struct CooldownTracker {
    deadlines: Arc<Mutex<HashMap<TargetId, Instant>>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Activate (or extend) the cooldown for a target.
    ///
    /// Concurrent activations are commutative: the latest deadline wins.
    pub fn activate(&self, target: TargetId, duration: Duration) {
        let deadline = Instant::now() + duration;
        let mut deadlines = match self.deadlines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = deadlines.entry(target).or_insert(deadline);
        if deadline > *entry {
            *entry = deadline;
        }
    }

    /// Whether the target's cooldown is still active.
    ///
    /// Expired entries encountered during the lookup are pruned.
    pub fn is_active(&self, target: &TargetId) -> bool {
        let now = Instant::now();
        let mut deadlines = match self.deadlines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match deadlines.get(target) {
            Some(deadline) if *deadline > now => true,
            Some(_) => {
                deadlines.remove(target);
                false
            }
            None => false,
        }
    }

    /// Snapshot of all currently active targets, pruning expired entries.
    ///
    /// The phase engine works against this snapshot so that its decisions are
    /// a pure function of data captured at the start of an evaluation.
    pub fn active_set(&self) -> HashSet<TargetId> {
        let now = Instant::now();
        let mut deadlines = match self.deadlines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        deadlines.retain(|_, deadline| *deadline > now);
        deadlines.keys().cloned().collect()
    }
}
