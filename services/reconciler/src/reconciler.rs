//! The reconciliation loop driver.
//!
//! Runs reconciliation passes on a periodic interval. Each pass loads all
//! associations, batches connector reads per load balancer, fans out per
//! association under a concurrency bound, gathers a snapshot, evaluates the
//! phase engine, applies the resulting store mutations, and publishes the
//! resulting transitions on the event stream.
//!
//! Failure policy: an error anywhere in one association's work is logged and
//! abandoned; it never affects other associations and never terminates the
//! event stream. The next pass recomputes everything from current state.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ballast_events::{Association, AssociationState, TargetId, TargetTransition};
use ballast_id::LoadBalancerId;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::connector::{CloudConnector, CloudLoadBalancer};
use crate::cooldown::CooldownTracker;
use crate::engine::{self, AssociationAction, Decision};
use crate::jobs::{JobOperations, JobOpsError};
use crate::snapshot::AssociationSnapshot;
use crate::store::{AssociationStore, StoreError};

/// Reconciliation loop configuration.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Minimum interval between pass starts.
    pub reconcile_delay: Duration,

    /// Upper bound on one pass; work still pending at the deadline is
    /// abandoned for this pass and retried on the next one.
    pub reconcile_timeout: Duration,

    /// Concurrent per-association fan-out bound.
    pub max_concurrent_reconciles: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        let reconcile_delay = Duration::from_secs(30);
        Self {
            reconcile_delay,
            reconcile_timeout: reconcile_delay * 10,
            max_concurrent_reconciles: 16,
        }
    }
}

/// The load balancer reconciler.
///
/// Construct it with the store, connector, and job operations, hand the
/// receiver from [`events`](Self::events) to the downstream batching engine,
/// and drive it with [`run`](Self::run).
pub struct LoadBalancerReconciler {
    inner: Arc<Inner>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TargetTransition>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

struct Inner {
    config: ReconcilerConfig,
    store: Arc<dyn AssociationStore>,
    connector: Arc<dyn CloudConnector>,
    jobs: Arc<dyn JobOperations>,
    cooldowns: CooldownTracker,
    events_tx: Mutex<Option<mpsc::UnboundedSender<TargetTransition>>>,
    fan_out: Arc<Semaphore>,
    passes: AtomicU64,
}

impl LoadBalancerReconciler {
    /// Create a new reconciler.
    pub fn new(
        config: ReconcilerConfig,
        store: Arc<dyn AssociationStore>,
        connector: Arc<dyn CloudConnector>,
        jobs: Arc<dyn JobOperations>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let fan_out = Arc::new(Semaphore::new(config.max_concurrent_reconciles.max(1)));

        Self {
            inner: Arc::new(Inner {
                config,
                store,
                connector,
                jobs,
                cooldowns: CooldownTracker::new(),
                events_tx: Mutex::new(Some(events_tx)),
                fan_out,
                passes: AtomicU64::new(0),
            }),
            events_rx: Mutex::new(Some(events_rx)),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// The stream of emitted target transitions.
    ///
    /// The stream is unbounded from the reconciler's side; backpressure and
    /// deduplication are the consumer's concern. It ends only after
    /// [`shutdown`](Self::shutdown), once in-flight emissions have drained.
    ///
    /// # Panics
    ///
    /// Panics if called more than once; there is a single consumer end.
    pub fn events(&self) -> mpsc::UnboundedReceiver<TargetTransition> {
        let mut guard = match self.events_rx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.take().expect("event stream already taken")
    }

    /// Activate a cooldown for a target.
    ///
    /// Called by the reactive update path after it fires an update, so that
    /// reconciliation does not second-guess the cloud while it catches up.
    pub fn activate_cooldown_for(&self, target: TargetId, duration: Duration) {
        self.inner.cooldowns.activate(target, duration);
    }

    /// Number of completed reconciliation passes.
    pub fn reconciliation_count(&self) -> u64 {
        self.inner.passes.load(Ordering::SeqCst)
    }

    /// Request shutdown. Idempotent; subsequent calls are no-ops.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Run the reconciliation loop until shutdown.
    ///
    /// In-flight external calls are cancelled on shutdown; store mutations
    /// that already committed are not rolled back.
    pub async fn run(&self) {
        let mut shutdown = self.shutdown_rx.clone();
        let mut interval = tokio::time::interval(self.inner.config.reconcile_delay);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The interval fires immediately on creation; the first pass should
        // start one full delay from now.
        interval.tick().await;

        info!(
            delay_ms = self.inner.config.reconcile_delay.as_millis() as u64,
            timeout_ms = self.inner.config.reconcile_timeout.as_millis() as u64,
            "Starting reconciliation loop"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    tokio::select! {
                        _ = Arc::clone(&self.inner).tick() => {
                            self.inner.passes.fetch_add(1, Ordering::SeqCst);
                        }
                        _ = wait_for_shutdown(&mut shutdown) => break,
                    }
                }
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }

        // Dropping the sender ends the stream once in-flight emissions from
        // detached tasks have drained.
        match self.inner.events_tx.lock() {
            Ok(mut guard) => {
                guard.take();
            }
            Err(poisoned) => {
                poisoned.into_inner().take();
            }
        }
        info!("Reconciliation loop stopped");
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        // A closed channel means the handle is gone; stop as well.
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

impl Inner {
    /// Run a single reconciliation pass.
    #[instrument(skip(self))]
    async fn tick(self: Arc<Self>) {
        let deadline = Instant::now() + self.config.reconcile_timeout;

        let associations = match self.store.get_associations().await {
            Ok(associations) => associations,
            Err(e) => {
                warn!(error = %e, "Failed to load associations; skipping pass");
                return;
            }
        };
        if associations.is_empty() {
            return;
        }
        debug!(
            association_count = associations.len(),
            "Starting reconciliation pass"
        );

        let cloud_views = Arc::clone(&self)
            .fetch_cloud_views(&associations, deadline)
            .await;

        let mut set = JoinSet::new();
        for association in associations {
            if Instant::now() >= deadline {
                warn!("Pass deadline reached; remaining associations retried next pass");
                break;
            }
            let inner = Arc::clone(&self);
            let cloud = cloud_views.get(&association.load_balancer_id).cloned();
            set.spawn(async move {
                inner.reconcile_association(association, cloud).await;
            });
        }

        loop {
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok(()))) => {}
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "Reconciliation task failed");
                }
                Ok(None) => break,
                Err(_) => {
                    // In-flight work keeps running detached; it is simply no
                    // longer awaited by this pass.
                    warn!("Pass deadline reached; detaching in-flight reconciliations");
                    set.detach_all();
                    break;
                }
            }
        }
    }

    /// Fetch cloud views once per distinct load balancer id.
    ///
    /// A failed call leaves the id absent from the returned map; the engine
    /// treats that as an unusable view for the affected associations only.
    async fn fetch_cloud_views(
        self: Arc<Self>,
        associations: &[Association],
        deadline: Instant,
    ) -> HashMap<LoadBalancerId, CloudLoadBalancer> {
        let lb_ids: BTreeSet<LoadBalancerId> = associations
            .iter()
            .map(|association| association.load_balancer_id.clone())
            .collect();

        let mut set = JoinSet::new();
        for lb_id in lb_ids {
            if Instant::now() >= deadline {
                break;
            }
            let inner = Arc::clone(&self);
            set.spawn(async move {
                let _permit = inner.fan_out.acquire().await.ok();
                match inner.connector.get_load_balancer(&lb_id).await {
                    Ok(view) => (lb_id, Some(view)),
                    Err(e) => {
                        debug!(
                            load_balancer_id = %lb_id,
                            error = %e,
                            "Connector call failed; view absent for this pass"
                        );
                        (lb_id, None)
                    }
                }
            });
        }

        let mut views = HashMap::new();
        loop {
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok((lb_id, Some(view))))) => {
                    views.insert(lb_id, view);
                }
                Ok(Some(Ok((_, None)))) => {}
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "Connector task failed");
                }
                Ok(None) => break,
                Err(_) => {
                    warn!("Pass deadline reached while reading load balancers");
                    set.detach_all();
                    break;
                }
            }
        }
        views
    }

    /// Reconcile a single association: gather, evaluate, apply, emit.
    async fn reconcile_association(
        &self,
        association: Association,
        cloud: Option<CloudLoadBalancer>,
    ) {
        let _permit = self.fan_out.acquire().await.ok();

        let snapshot = match self.gather(association, cloud).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Failed to gather snapshot; retrying next pass");
                return;
            }
        };

        let decision = engine::evaluate(&snapshot, &self.cooldowns.active_set());
        if decision.is_empty() {
            return;
        }
        debug!(
            job_id = %snapshot.job_id,
            load_balancer_id = %snapshot.load_balancer_id,
            transitions = decision.transitions.len(),
            upserts = decision.target_upserts.len(),
            removals = decision.target_removals.len(),
            "Applying reconciliation decision"
        );

        self.apply(&snapshot, &decision).await;
        self.emit(decision.transitions);
    }

    /// Gather the snapshot for one association.
    ///
    /// External failures become absent data; only a store failure aborts,
    /// because without stored targets there is nothing sound to decide.
    async fn gather(
        &self,
        association: Association,
        cloud: Option<CloudLoadBalancer>,
    ) -> Result<AssociationSnapshot, StoreError> {
        let Association {
            job_id,
            load_balancer_id,
            state,
        } = association;

        let (running, job_missing) = match self.jobs.get_tasks(&job_id).await {
            Ok(tasks) => (Some(tasks), false),
            Err(JobOpsError::NotFound(_)) => match self.jobs.get_job(&job_id).await {
                Ok(None) => (None, true),
                Ok(Some(_)) => (None, false),
                Err(e) => {
                    debug!(job_id = %job_id, error = %e, "Job lookup failed");
                    (None, false)
                }
            },
            Err(JobOpsError::Other(e)) => {
                debug!(job_id = %job_id, error = %e, "Task listing failed");
                (None, false)
            }
        };

        let stored = self
            .store
            .get_targets(&load_balancer_id)
            .await?
            .into_iter()
            .map(|record| (record.target, record.state))
            .collect();

        Ok(AssociationSnapshot {
            job_id,
            load_balancer_id,
            state,
            running,
            job_missing,
            cloud,
            stored,
        })
    }

    /// Apply the decision's store mutations.
    async fn apply(&self, snapshot: &AssociationSnapshot, decision: &Decision) {
        if let Err(e) = self.try_apply(snapshot, decision).await {
            // Emissions still go out; the engine recomputes the same
            // decision from the unchanged store on the next pass.
            warn!(
                job_id = %snapshot.job_id,
                load_balancer_id = %snapshot.load_balancer_id,
                error = %e,
                "Store mutation failed; remaining mutations deferred to next pass"
            );
        }
    }

    async fn try_apply(
        &self,
        snapshot: &AssociationSnapshot,
        decision: &Decision,
    ) -> Result<(), StoreError> {
        if decision.association_action == Some(AssociationAction::MarkDissociated) {
            info!(
                job_id = %snapshot.job_id,
                load_balancer_id = %snapshot.load_balancer_id,
                "Marking orphaned association as dissociated"
            );
            self.store
                .put_association(
                    &snapshot.job_id,
                    &snapshot.load_balancer_id,
                    AssociationState::Dissociated,
                )
                .await?;
        }

        if !decision.target_upserts.is_empty() {
            self.store.put_targets(&decision.target_upserts).await?;
        }
        if !decision.target_removals.is_empty() {
            self.store.remove_targets(&decision.target_removals).await?;
        }

        // The association record goes last, after its targets are gone.
        if decision.association_action == Some(AssociationAction::Remove) {
            info!(
                job_id = %snapshot.job_id,
                load_balancer_id = %snapshot.load_balancer_id,
                "Sweeping dissociated association"
            );
            self.store
                .remove_association(&snapshot.job_id, &snapshot.load_balancer_id)
                .await?;
        }

        Ok(())
    }

    /// Publish transitions, FIFO within this association's decision.
    fn emit(&self, transitions: Vec<TargetTransition>) {
        let tx = match self.events_tx.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        let Some(tx) = tx else {
            return;
        };
        for transition in transitions {
            debug!(
                target = %transition.target,
                state = %transition.state,
                reason = ?transition.reason,
                "Emitting target transition"
            );
            if tx.send(transition).is_err() {
                // Receiver gone; nothing downstream to inform.
                return;
            }
        }
    }
}
