//! The phase engine: per-association reconciliation decisions.
//!
//! Given a snapshot for one association, the engine decides which target
//! transitions to emit and which store mutations to apply. It is a pure
//! function of the snapshot plus the cooldown view captured with it: all side
//! effects are carried out by the loop driver. Purity keeps every rule
//! testable with literal fixtures, and it means a failed store write loses
//! nothing: the next pass recomputes the same decision from unchanged state.
//!
//! For an `Associated` snapshot with both external views present the rules
//! are, in order:
//!
//! 1. register running tasks whose IP is missing from the cloud
//! 2. deregister IPs we registered whose task is gone but still in the cloud
//! 3. deregister IPs already marked deregistered but still in the cloud
//! 4. request a deregister for records marked registered that are in neither
//!    the cloud nor the task list, until the applier confirms the fix
//! 5. sweep records marked deregistered once the cloud has let go of the IP
//!
//! A target is claimed by at most one rule per pass; earlier rules win.
//! IPs present in the cloud but absent from the store were not registered by
//! this system and are never touched.

use std::collections::{BTreeSet, HashSet};

use ballast_events::{
    AssociationState, TargetId, TargetState, TargetTransition, TransitionReason,
};
use ballast_id::TaskId;

use crate::snapshot::AssociationSnapshot;
use crate::store::TargetRecord;

/// What should happen to the association record itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationAction {
    /// The association was seen as an orphan; mark it dissociated.
    MarkDissociated,
    /// All targets are gone; the association record can be removed.
    Remove,
}

/// The outcome of evaluating one association snapshot.
#[derive(Debug, Default)]
pub struct Decision {
    /// Transitions to publish for the downstream batcher.
    pub transitions: Vec<TargetTransition>,
    /// Target records to upsert.
    pub target_upserts: Vec<TargetRecord>,
    /// Target records to remove.
    pub target_removals: Vec<TargetId>,
    /// Action on the association record, if any.
    pub association_action: Option<AssociationAction>,
}

impl Decision {
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
            && self.target_upserts.is_empty()
            && self.target_removals.is_empty()
            && self.association_action.is_none()
    }
}

/// Evaluate one association snapshot against the active cooldown set.
pub fn evaluate(snapshot: &AssociationSnapshot, cooldowns: &HashSet<TargetId>) -> Decision {
    match snapshot.state {
        AssociationState::Associated => evaluate_associated(snapshot, cooldowns),
        AssociationState::Dissociated => evaluate_dissociated(snapshot, cooldowns),
    }
}

fn evaluate_associated(snapshot: &AssociationSnapshot, cooldowns: &HashSet<TargetId>) -> Decision {
    let mut decision = Decision::default();

    if snapshot.is_orphan() {
        // Mark only; draining happens under the dissociated rules on the
        // next pass.
        decision.association_action = Some(AssociationAction::MarkDissociated);
        return decision;
    }

    // With either external view missing there is no safe decision to make
    // for this association; the next pass retries from scratch. A removed
    // load balancer was already caught by the orphan check above.
    let (Some(running), Some(cloud)) = (&snapshot.running, &snapshot.cloud) else {
        return decision;
    };

    let registered = &cloud.registered_ips;
    let running_task_ids: BTreeSet<&TaskId> = running.iter().map(|task| &task.task_id).collect();
    let mut claimed: HashSet<TargetId> = HashSet::new();

    // Rule 1: register running tasks missing from the cloud.
    for task in running {
        if registered.contains(&task.ip_address) {
            continue;
        }
        let target = TargetId::new(
            snapshot.load_balancer_id.clone(),
            task.task_id.clone(),
            task.ip_address,
        );
        if cooldowns.contains(&target) {
            continue;
        }
        claimed.insert(target.clone());
        decision.transitions.push(TargetTransition::low(
            target,
            TargetState::Registered,
            TransitionReason::MissingInLb,
        ));
    }

    // Rules 2-5 over the stored records, first match wins.
    for (target, state) in &snapshot.stored {
        if claimed.contains(target) {
            continue;
        }
        let in_lb = registered.contains(&target.ip_address);
        let task_running = running_task_ids.contains(&target.task_id);
        let cooling = cooldowns.contains(target);

        match state {
            // Rule 2: we registered it, the task is gone, the cloud still
            // has it.
            TargetState::Registered if in_lb && !task_running && !cooling => {
                decision.transitions.push(TargetTransition::low(
                    target.clone(),
                    TargetState::Deregistered,
                    TransitionReason::ExtraInLb,
                ));
            }
            // Rule 3: already marked deregistered but the cloud has not
            // caught up yet.
            TargetState::Deregistered if in_lb && !cooling => {
                decision.transitions.push(TargetTransition::low(
                    target.clone(),
                    TargetState::Deregistered,
                    TransitionReason::ExtraInLb,
                ));
            }
            // Rule 4: marked registered but present in neither the cloud nor
            // the task list; ask for a deregister. The record stays as it is
            // until the applier confirms the fix by writing it deregistered,
            // so the request repeats every pass until then.
            TargetState::Registered if !in_lb && !task_running && !cooling => {
                decision.transitions.push(TargetTransition::low(
                    target.clone(),
                    TargetState::Deregistered,
                    TransitionReason::InconsistentStore,
                ));
            }
            // Rule 5: fully drained; drop the record.
            TargetState::Deregistered if !in_lb => {
                decision.target_removals.push(target.clone());
            }
            _ => {}
        }
    }

    decision
}

fn evaluate_dissociated(snapshot: &AssociationSnapshot, cooldowns: &HashSet<TargetId>) -> Decision {
    let mut decision = Decision::default();

    // A removed load balancer holds no targets; a failed connector call
    // means membership is unknown and sweeping must wait.
    let membership = snapshot.usable_membership();
    let mut remaining = snapshot.stored.len();

    for (target, state) in &snapshot.stored {
        match state {
            // There is no running-task signal left to reconcile against, so
            // the emission and the store mutation travel together.
            TargetState::Registered => {
                if !cooldowns.contains(target) {
                    decision.target_upserts.push(TargetRecord::new(
                        target.clone(),
                        TargetState::Deregistered,
                    ));
                    decision.transitions.push(TargetTransition::low(
                        target.clone(),
                        TargetState::Deregistered,
                        TransitionReason::OrphanCleanup,
                    ));
                }
            }
            TargetState::Deregistered => {
                if let Some(ips) = membership {
                    if !ips.contains(&target.ip_address) {
                        decision.target_removals.push(target.clone());
                        remaining -= 1;
                    }
                }
            }
        }
    }

    // The association record goes only after the last target record is gone.
    if remaining == 0 {
        decision.association_action = Some(AssociationAction::Remove);
    }

    decision
}
