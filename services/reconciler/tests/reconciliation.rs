//! Integration tests for the reconciliation loop.
//!
//! These tests drive the full loop against the in-memory store with mock
//! connector and job manager implementations, under paused tokio time:
//! advancing the clock by one delay triggers exactly one reconciliation pass,
//! and the pass counter tells us when it has completed.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use ballast_events::{
    AssociationState, Priority, TargetId, TargetState, TargetTransition, TransitionReason,
};
use ballast_id::{IpAddress, JobId, LoadBalancerId, TaskId};
use ballast_reconciler::connector::{CloudConnector, CloudLoadBalancer};
use ballast_reconciler::jobs::{JobOperations, JobOpsError, JobSummary, TaskEndpoint};
use ballast_reconciler::reconciler::{LoadBalancerReconciler, ReconcilerConfig};
use ballast_reconciler::store::{AssociationStore, MemoryStore, TargetRecord};
use tokio::sync::mpsc;

const DELAY: Duration = Duration::from_secs(60);

// =============================================================================
// Mocks
// =============================================================================

/// Mock cloud connector with programmable per-load-balancer views.
///
/// Unknown load balancers read as active and empty; `fail` makes a specific
/// load balancer error until cleared.
#[derive(Default)]
struct MockConnector {
    views: Mutex<HashMap<LoadBalancerId, CloudLoadBalancer>>,
    failing: Mutex<HashSet<LoadBalancerId>>,
}

impl MockConnector {
    fn set(&self, lb: &LoadBalancerId, view: CloudLoadBalancer) {
        self.views.lock().unwrap().insert(lb.clone(), view);
    }

    fn fail(&self, lb: &LoadBalancerId) {
        self.failing.lock().unwrap().insert(lb.clone());
    }
}

#[async_trait]
impl CloudConnector for MockConnector {
    async fn get_load_balancer(&self, id: &LoadBalancerId) -> anyhow::Result<CloudLoadBalancer> {
        if self.failing.lock().unwrap().contains(id) {
            return Err(anyhow!("rate limited"));
        }
        Ok(self
            .views
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_else(|| CloudLoadBalancer::active(BTreeSet::new())))
    }
}

/// Mock job manager with programmable tasks, transient failures, and missing
/// jobs.
#[derive(Default)]
struct MockJobOps {
    tasks: Mutex<HashMap<JobId, Vec<TaskEndpoint>>>,
    transient_failures: Mutex<HashMap<JobId, u32>>,
    missing: Mutex<HashSet<JobId>>,
}

impl MockJobOps {
    fn set_tasks(&self, job: &JobId, tasks: Vec<TaskEndpoint>) {
        self.tasks.lock().unwrap().insert(job.clone(), tasks);
    }

    /// The next `count` calls to `get_tasks` for this job fail transiently.
    fn fail_transiently(&self, job: &JobId, count: u32) {
        self.transient_failures
            .lock()
            .unwrap()
            .insert(job.clone(), count);
    }

    fn set_missing(&self, job: &JobId) {
        self.missing.lock().unwrap().insert(job.clone());
    }
}

#[async_trait]
impl JobOperations for MockJobOps {
    async fn get_tasks(&self, job_id: &JobId) -> Result<Vec<TaskEndpoint>, JobOpsError> {
        {
            let mut failures = self.transient_failures.lock().unwrap();
            if let Some(count) = failures.get_mut(job_id) {
                if *count > 0 {
                    *count -= 1;
                    return Err(JobOpsError::Other(anyhow!("job manager overloaded")));
                }
            }
        }
        if self.missing.lock().unwrap().contains(job_id) {
            return Err(JobOpsError::NotFound(job_id.clone()));
        }
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .get(job_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_job(&self, job_id: &JobId) -> Result<Option<JobSummary>, JobOpsError> {
        if self.missing.lock().unwrap().contains(job_id) {
            return Ok(None);
        }
        Ok(Some(JobSummary {
            job_id: job_id.clone(),
        }))
    }
}

// =============================================================================
// Harness
// =============================================================================

struct TestHarness {
    store: Arc<MemoryStore>,
    connector: Arc<MockConnector>,
    jobs: Arc<MockJobOps>,
    reconciler: Arc<LoadBalancerReconciler>,
    events: mpsc::UnboundedReceiver<TargetTransition>,
}

impl TestHarness {
    async fn start() -> Self {
        let store = Arc::new(MemoryStore::new());
        let connector = Arc::new(MockConnector::default());
        let jobs = Arc::new(MockJobOps::default());

        let config = ReconcilerConfig {
            reconcile_delay: DELAY,
            reconcile_timeout: DELAY * 10,
            max_concurrent_reconciles: 16,
        };
        let reconciler = Arc::new(LoadBalancerReconciler::new(
            config,
            store.clone(),
            connector.clone(),
            jobs.clone(),
        ));
        let events = reconciler.events();

        let runner = Arc::clone(&reconciler);
        tokio::spawn(async move { runner.run().await });
        settle().await;

        Self {
            store,
            connector,
            jobs,
            reconciler,
            events,
        }
    }

    /// Advance virtual time by one delay per pass and wait for each pass to
    /// complete.
    async fn run_passes(&self, n: u32) {
        for _ in 0..n {
            let before = self.reconciler.reconciliation_count();
            tokio::time::advance(DELAY).await;
            let mut attempts = 100_000u32;
            while self.reconciler.reconciliation_count() == before {
                attempts -= 1;
                assert!(attempts > 0, "reconciliation pass did not complete");
                tokio::task::yield_now().await;
            }
        }
    }

    /// Drain every transition emitted so far without blocking.
    fn drain(&mut self) -> Vec<TargetTransition> {
        let mut out = Vec::new();
        while let Ok(transition) = self.events.try_recv() {
            out.push(transition);
        }
        out
    }
}

async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

fn job(id: &str) -> JobId {
    JobId::parse(id).unwrap()
}

fn lb(id: &str) -> LoadBalancerId {
    LoadBalancerId::parse(id).unwrap()
}

fn ip(addr: &str) -> IpAddress {
    IpAddress::parse(addr).unwrap()
}

fn task(task_id: &str, addr: &str) -> TaskEndpoint {
    TaskEndpoint::new(TaskId::parse(task_id).unwrap(), ip(addr))
}

fn target(lb_id: &str, task_id: &str, addr: &str) -> TargetId {
    TargetId::new(lb(lb_id), TaskId::parse(task_id).unwrap(), ip(addr))
}

fn tasks_started(n: u8, prefix: &str) -> Vec<TaskEndpoint> {
    (1..=n)
        .map(|i| task(&format!("{prefix}-{i}"), &format!("{i}.{i}.{i}.{i}")))
        .collect()
}

fn ips(addrs: &[&str]) -> BTreeSet<IpAddress> {
    addrs.iter().map(|addr| ip(addr)).collect()
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_register_missing_targets() {
    let mut harness = TestHarness::start().await;
    let job_id = job("job-1");
    let lb_id = lb("lb-1");

    harness.jobs.set_tasks(&job_id, tasks_started(5, "task"));
    harness
        .store
        .put_association(&job_id, &lb_id, AssociationState::Associated)
        .await
        .unwrap();

    // Nothing is emitted before the first delay elapses.
    settle().await;
    assert!(harness.drain().is_empty());

    harness.run_passes(1).await;
    let emitted = harness.drain();
    assert_eq!(emitted.len(), 5);
    for transition in &emitted {
        assert_eq!(transition.state, TargetState::Registered);
        assert_eq!(transition.priority, Priority::Low);
        assert_eq!(transition.reason, TransitionReason::MissingInLb);
        assert_eq!(transition.target.load_balancer_id, lb_id);
    }
}

#[tokio::test(start_paused = true)]
async fn test_deregister_extras_previously_registered_by_us() {
    let mut harness = TestHarness::start().await;
    let job_id = job("job-1");
    let lb_id = lb("lb-1");

    harness.jobs.set_tasks(&job_id, tasks_started(3, "task"));
    harness.connector.set(
        &lb_id,
        CloudLoadBalancer::active(ips(&[
            "1.1.1.1", "2.2.2.2", "3.3.3.3", "4.4.4.4", "5.5.5.5", "6.6.6.6",
        ])),
    );
    harness
        .store
        .put_association(&job_id, &lb_id, AssociationState::Associated)
        .await
        .unwrap();
    harness
        .store
        .put_targets(&[
            // 3 running tasks previously registered by us, still in the lb
            TargetRecord::new(target("lb-1", "task-1", "1.1.1.1"), TargetState::Registered),
            TargetRecord::new(target("lb-1", "task-2", "2.2.2.2"), TargetState::Registered),
            TargetRecord::new(target("lb-1", "task-3", "3.3.3.3"), TargetState::Registered),
            // previously registered by us, but their tasks are gone
            TargetRecord::new(
                target("lb-1", "some-dead-task", "4.4.4.4"),
                TargetState::Registered,
            ),
            TargetRecord::new(
                target("lb-1", "another-dead-task", "5.5.5.5"),
                TargetState::Deregistered,
            ),
            // no record for 6.6.6.6: not registered by us, never touched
        ])
        .await
        .unwrap();

    harness.run_passes(1).await;
    let emitted = harness.drain();
    assert_eq!(emitted.len(), 2);
    for transition in &emitted {
        assert_eq!(transition.state, TargetState::Deregistered);
        assert_eq!(transition.priority, Priority::Low);
        assert!(
            ["some-dead-task", "another-dead-task"].contains(&transition.target.task_id.as_str())
        );
        assert!(["4.4.4.4", "5.5.5.5"].contains(&transition.target.ip_address.to_string().as_str()));
    }
}

#[tokio::test(start_paused = true)]
async fn test_updates_are_ignored_while_cooldown_is_active() {
    let mut harness = TestHarness::start().await;
    let job_id = job("job-1");
    let lb_id = lb("lb-1");

    let tasks = tasks_started(5, "task");
    harness.jobs.set_tasks(&job_id, tasks.clone());
    harness
        .store
        .put_association(&job_id, &lb_id, AssociationState::Associated)
        .await
        .unwrap();

    for endpoint in &tasks {
        let target = TargetId::new(lb_id.clone(), endpoint.task_id.clone(), endpoint.ip_address);
        harness.reconciler.activate_cooldown_for(target, DELAY * 5);
    }

    // No updates while the cooldown is active.
    harness.run_passes(1).await;
    assert!(harness.drain().is_empty());

    // By the fifth pass the cooldown has lapsed.
    harness.run_passes(4).await;
    let emitted = harness.drain();
    assert_eq!(emitted.len(), 5);
    for transition in &emitted {
        assert_eq!(transition.state, TargetState::Registered);
        assert_eq!(transition.priority, Priority::Low);
    }

    // The cloud still has not applied the change, so the next pass retries.
    harness.run_passes(1).await;
    assert_eq!(harness.drain().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_jobs_with_errors_are_ignored() {
    let mut harness = TestHarness::start().await;
    let job_id = job("job-1");
    let lb_id = lb("lb-1");

    harness.jobs.set_tasks(&job_id, tasks_started(5, "task"));
    harness.jobs.fail_transiently(&job_id, 1);
    harness
        .store
        .put_association(&job_id, &lb_id, AssociationState::Associated)
        .await
        .unwrap();

    // First pass hits the transient failure and emits nothing.
    harness.run_passes(1).await;
    assert!(harness.drain().is_empty());

    // Second pass succeeds.
    harness.run_passes(1).await;
    let emitted = harness.drain();
    assert_eq!(emitted.len(), 5);
    for transition in &emitted {
        assert_eq!(transition.state, TargetState::Registered);
    }
}

#[tokio::test(start_paused = true)]
async fn test_connector_errors_do_not_halt_reconciliation() {
    let mut harness = TestHarness::start().await;
    let job_id = job("job-1");
    let healthy_lb = lb("lb-healthy");
    let failing_lb = lb("lb-failing");

    harness.jobs.set_tasks(&job_id, tasks_started(5, "task"));
    harness.connector.fail(&failing_lb);
    harness
        .store
        .put_association(&job_id, &healthy_lb, AssociationState::Associated)
        .await
        .unwrap();
    harness
        .store
        .put_association(&job_id, &failing_lb, AssociationState::Associated)
        .await
        .unwrap();

    harness.run_passes(1).await;
    let emitted = harness.drain();

    // The failing load balancer is skipped; the healthy one proceeds.
    assert_eq!(emitted.len(), 5);
    for transition in &emitted {
        assert_eq!(transition.state, TargetState::Registered);
        assert_eq!(transition.target.load_balancer_id, healthy_lb);
    }
}

#[tokio::test(start_paused = true)]
async fn test_orphan_job_associations_are_dissociated_and_removed() {
    let mut harness = TestHarness::start().await;
    let job_id = job("job-gone");
    let lb_id = lb("lb-1");

    harness.jobs.set_missing(&job_id);
    harness
        .store
        .put_association(&job_id, &lb_id, AssociationState::Associated)
        .await
        .unwrap();

    // First pass only marks the orphan.
    harness.run_passes(1).await;
    assert!(harness.drain().is_empty());
    let associations = harness.store.get_associations().await.unwrap();
    assert_eq!(associations.len(), 1);
    assert_eq!(associations[0].state, AssociationState::Dissociated);

    // With no targets recorded, the next passes sweep the association.
    harness.run_passes(2).await;
    assert!(harness.store.get_associations().await.unwrap().is_empty());
    assert!(harness
        .store
        .get_associated_load_balancers(&job_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_orphan_load_balancer_associations_are_drained_and_removed() {
    let mut harness = TestHarness::start().await;
    let job_id = job("job-1");
    let lb_id = lb("lb-1");

    let tasks = tasks_started(5, "task");
    harness.jobs.set_tasks(&job_id, tasks.clone());
    harness.connector.set(
        &lb_id,
        CloudLoadBalancer::active(ips(&[
            "1.1.1.1", "2.2.2.2", "3.3.3.3", "4.4.4.4", "5.5.5.5",
        ])),
    );
    harness
        .store
        .put_association(&job_id, &lb_id, AssociationState::Associated)
        .await
        .unwrap();
    let records: Vec<TargetRecord> = tasks
        .iter()
        .map(|endpoint| {
            TargetRecord::new(
                TargetId::new(lb_id.clone(), endpoint.task_id.clone(), endpoint.ip_address),
                TargetState::Registered,
            )
        })
        .collect();
    harness.store.put_targets(&records).await.unwrap();

    // Steady state: nothing to do.
    harness.run_passes(1).await;
    assert!(harness.drain().is_empty());

    // The load balancer is removed outside the platform.
    harness.connector.set(&lb_id, CloudLoadBalancer::removed());

    // One pass to mark the orphan, one to drain its targets.
    harness.run_passes(2).await;
    let emitted = harness.drain();
    assert_eq!(emitted.len(), 5);
    for transition in &emitted {
        assert_eq!(transition.state, TargetState::Deregistered);
        assert_eq!(transition.reason, TransitionReason::OrphanCleanup);
    }
    let associations = harness.store.get_associations().await.unwrap();
    assert_eq!(associations.len(), 1);
    assert_eq!(associations[0].state, AssociationState::Dissociated);

    // Remaining passes sweep targets, then the association itself.
    harness.run_passes(2).await;
    assert!(harness.store.get_targets(&lb_id).await.unwrap().is_empty());
    assert!(harness.store.get_associations().await.unwrap().is_empty());
    assert!(harness
        .store
        .get_associated_load_balancers(&job_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_dissociated_jobs_wait_for_targets_before_removal() {
    let mut harness = TestHarness::start().await;
    let job_id = job("job-gone");
    let lb_id = lb("lb-1");

    harness.jobs.set_missing(&job_id);
    harness
        .connector
        .set(&lb_id, CloudLoadBalancer::active(ips(&["1.2.3.4"])));
    harness
        .store
        .put_targets(&[TargetRecord::new(
            target("lb-1", "some-task", "1.2.3.4"),
            TargetState::Deregistered,
        )])
        .await
        .unwrap();
    harness
        .store
        .put_association(&job_id, &lb_id, AssociationState::Dissociated)
        .await
        .unwrap();

    // The cloud still holds the IP: the target record must stay, and so must
    // the association.
    harness.run_passes(1).await;
    assert_eq!(harness.store.get_targets(&lb_id).await.unwrap().len(), 1);
    assert_eq!(harness.store.get_associations().await.unwrap().len(), 1);

    // Once the cloud lets go, targets are swept and then the association.
    harness
        .connector
        .set(&lb_id, CloudLoadBalancer::active(BTreeSet::new()));
    harness.run_passes(2).await;
    assert!(harness.store.get_targets(&lb_id).await.unwrap().is_empty());
    assert!(harness.store.get_associations().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_inconsistent_store_repair_and_sweep() {
    let mut harness = TestHarness::start().await;
    let job_id = job("job-1");
    let lb_id = lb("lb-1");

    harness.jobs.set_tasks(&job_id, vec![task("task-1", "1.1.1.1")]);
    harness.connector.set(
        &lb_id,
        CloudLoadBalancer::active(ips(&["1.1.1.1", "10.10.10.10"])),
    );
    harness
        .store
        .put_association(&job_id, &lb_id, AssociationState::Associated)
        .await
        .unwrap();
    harness
        .store
        .put_targets(&[
            // running task, registered by us, in the lb
            TargetRecord::new(target("lb-1", "task-1", "1.1.1.1"), TargetState::Registered),
            // registered by us, task gone, no longer in the lb
            TargetRecord::new(
                target("lb-1", "target-inconsistent", "2.2.2.2"),
                TargetState::Registered,
            ),
            // already deregistered and gone from the lb
            TargetRecord::new(
                target("lb-1", "target-not-in-lb", "3.3.3.3"),
                TargetState::Deregistered,
            ),
            // no record for 10.10.10.10: not ours, never touched
        ])
        .await
        .unwrap();

    // First pass: the drained record is swept and a deregister goes out for
    // the inconsistent one; its record stays as-is until the fix is applied.
    harness.run_passes(1).await;
    let emitted = harness.drain();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].state, TargetState::Deregistered);
    assert_eq!(emitted[0].reason, TransitionReason::InconsistentStore);
    assert_eq!(emitted[0].target.ip_address, ip("2.2.2.2"));

    let stored = harness.store.get_targets(&lb_id).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored
        .iter()
        .all(|record| record.target.task_id.as_str() != "target-not-in-lb"));
    let inconsistent = stored
        .iter()
        .find(|record| record.target.task_id.as_str() == "target-inconsistent")
        .unwrap();
    assert_eq!(inconsistent.state, TargetState::Registered);

    // The fix has not been applied yet, so the next pass keeps trying.
    harness.run_passes(1).await;
    let emitted = harness.drain();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].state, TargetState::Deregistered);
    assert_eq!(emitted[0].target.ip_address, ip("2.2.2.2"));
    assert_eq!(harness.store.get_targets(&lb_id).await.unwrap().len(), 2);

    // The applier records the deregistration.
    harness
        .store
        .put_targets(&[TargetRecord::new(
            target("lb-1", "target-inconsistent", "2.2.2.2"),
            TargetState::Deregistered,
        )])
        .await
        .unwrap();

    // Now the corrected record is swept, with nothing further emitted.
    harness.run_passes(1).await;
    assert!(harness.drain().is_empty());
    let stored = harness.store.get_targets(&lb_id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].target.task_id.as_str(), "task-1");
    assert_eq!(stored[0].state, TargetState::Registered);
}

#[tokio::test(start_paused = true)]
async fn test_steady_snapshot_passes_are_idempotent() {
    let mut harness = TestHarness::start().await;
    let job_id = job("job-1");
    let lb_id = lb("lb-1");

    harness.jobs.set_tasks(&job_id, vec![task("task-1", "1.1.1.1")]);
    harness
        .connector
        .set(&lb_id, CloudLoadBalancer::active(ips(&["1.1.1.1"])));
    harness
        .store
        .put_association(&job_id, &lb_id, AssociationState::Associated)
        .await
        .unwrap();
    harness
        .store
        .put_targets(&[TargetRecord::new(
            target("lb-1", "task-1", "1.1.1.1"),
            TargetState::Registered,
        )])
        .await
        .unwrap();

    harness.run_passes(3).await;
    assert!(harness.drain().is_empty());
    let stored = harness.store.get_targets(&lb_id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].state, TargetState::Registered);
    let associations = harness.store.get_associations().await.unwrap();
    assert_eq!(associations.len(), 1);
    assert_eq!(associations[0].state, AssociationState::Associated);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_event_stream() {
    let mut harness = TestHarness::start().await;

    harness.run_passes(1).await;
    let count = harness.reconciler.reconciliation_count();

    harness.reconciler.shutdown();
    // Idempotent: a second call is a no-op.
    harness.reconciler.shutdown();
    settle().await;

    // The stream ends, and no further passes run.
    assert!(matches!(
        harness.events.try_recv(),
        Err(mpsc::error::TryRecvError::Disconnected)
    ));
    tokio::time::advance(DELAY * 3).await;
    settle().await;
    assert_eq!(harness.reconciler.reconciliation_count(), count);
}

#[tokio::test(start_paused = true)]
async fn test_event_stream_survives_association_errors() {
    let mut harness = TestHarness::start().await;
    let job_id = job("job-1");
    let lb_id = lb("lb-1");

    harness.connector.fail(&lb_id);
    harness.jobs.fail_transiently(&job_id, 10);
    harness
        .store
        .put_association(&job_id, &lb_id, AssociationState::Associated)
        .await
        .unwrap();

    harness.run_passes(3).await;

    // Errors never surface as stream termination.
    assert!(matches!(
        harness.events.try_recv(),
        Err(mpsc::error::TryRecvError::Empty)
    ));
}
