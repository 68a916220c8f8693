//! Job manager operations used by the reconciler.
//!
//! The reconciler needs two things from the job manager: the running tasks of
//! a job (with their container IPs) and whether a job still exists at all.

use async_trait::async_trait;
use ballast_id::{IpAddress, JobId, TaskId};
use thiserror::Error;

/// A running task and the container IP it serves traffic on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEndpoint {
    pub task_id: TaskId,
    pub ip_address: IpAddress,
}

impl TaskEndpoint {
    pub fn new(task_id: TaskId, ip_address: IpAddress) -> Self {
        Self {
            task_id,
            ip_address,
        }
    }
}

/// Minimal job lookup result; the reconciler only cares about existence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub job_id: JobId,
}

/// Errors from job manager operations.
///
/// `NotFound` drives orphan detection; everything else is transient and the
/// association is retried on the next pass.
#[derive(Debug, Error)]
pub enum JobOpsError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Read access to the job manager.
#[async_trait]
pub trait JobOperations: Send + Sync {
    /// Running tasks of a job, restricted to those with a container IP.
    async fn get_tasks(&self, job_id: &JobId) -> Result<Vec<TaskEndpoint>, JobOpsError>;

    /// Look up a job by id; `None` means the job no longer exists.
    async fn get_job(&self, job_id: &JobId) -> Result<Option<JobSummary>, JobOpsError>;
}
