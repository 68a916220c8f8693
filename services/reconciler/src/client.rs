//! HTTP clients for the cloud load balancer API and the job manager.
//!
//! These are the production implementations of the connector and job
//! operations interfaces. Both are read-only: registration calls against the
//! cloud are made by the downstream batching engine, never from here.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use ballast_events::CONTAINER_IP_CONTEXT_KEY;
use ballast_id::{IpAddress, JobId, LoadBalancerId, TaskId};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::connector::{CloudConnector, CloudLbState, CloudLoadBalancer};
use crate::jobs::{JobOperations, JobOpsError, JobSummary, TaskEndpoint};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Cloud API
// =============================================================================

/// Client for the cloud load balancer API.
pub struct CloudApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl CloudApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct LoadBalancerDto {
    #[allow(dead_code)]
    load_balancer_id: String,
    state: LoadBalancerStateDto,
    #[serde(default)]
    registered_ips: Vec<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum LoadBalancerStateDto {
    Active,
    Removed,
}

#[async_trait]
impl CloudConnector for CloudApiClient {
    async fn get_load_balancer(&self, id: &LoadBalancerId) -> Result<CloudLoadBalancer> {
        let url = format!("{}/v1/load-balancers/{}", self.base_url, id);
        debug!(url = %url, "Fetching load balancer");

        let response = self.client.get(&url).send().await?;

        // A missing load balancer is a fact, not a failure: it was removed
        // out-of-band and the caller needs to know.
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(CloudLoadBalancer::removed());
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("failed to fetch load balancer: {} - {}", status, body);
        }

        let dto: LoadBalancerDto = response.json().await?;
        let mut registered_ips = std::collections::BTreeSet::new();
        for raw in dto.registered_ips {
            match IpAddress::parse(&raw) {
                Ok(ip) => {
                    registered_ips.insert(ip);
                }
                Err(e) => {
                    warn!(load_balancer_id = %id, ip = %raw, error = %e, "Skipping unparsable registered IP");
                }
            }
        }

        Ok(match dto.state {
            LoadBalancerStateDto::Active => CloudLoadBalancer {
                state: CloudLbState::Active,
                registered_ips,
            },
            LoadBalancerStateDto::Removed => CloudLoadBalancer::removed(),
        })
    }
}

// =============================================================================
// Job Manager
// =============================================================================

/// Client for the job manager API.
pub struct JobManagerClient {
    client: reqwest::Client,
    base_url: String,
}

impl JobManagerClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct JobDto {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct TaskDto {
    task_id: String,
    #[serde(default)]
    task_context: HashMap<String, String>,
}

#[async_trait]
impl JobOperations for JobManagerClient {
    async fn get_tasks(&self, job_id: &JobId) -> Result<Vec<TaskEndpoint>, JobOpsError> {
        let url = format!("{}/v1/jobs/{}/tasks", self.base_url, job_id);
        debug!(url = %url, "Fetching job tasks");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("job manager unreachable")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(JobOpsError::NotFound(job_id.clone()));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(JobOpsError::Other(anyhow::anyhow!(
                "failed to fetch tasks: {} - {}",
                status,
                body
            )));
        }

        let dtos: Vec<TaskDto> = response.json().await.context("invalid task list body")?;

        let mut tasks = Vec::with_capacity(dtos.len());
        for dto in dtos {
            let task_id = TaskId::parse(&dto.task_id)
                .map_err(|e| JobOpsError::Other(anyhow::anyhow!("invalid task id: {e}")))?;

            // Tasks that have not been assigned a container IP yet cannot be
            // registered anywhere; skip them until they have one.
            let Some(raw_ip) = dto.task_context.get(CONTAINER_IP_CONTEXT_KEY) else {
                debug!(job_id = %job_id, task_id = %task_id, "Task has no container IP yet");
                continue;
            };
            match IpAddress::parse(raw_ip) {
                Ok(ip_address) => tasks.push(TaskEndpoint::new(task_id, ip_address)),
                Err(e) => {
                    warn!(job_id = %job_id, task_id = %task_id, error = %e, "Skipping task with unparsable container IP");
                }
            }
        }

        Ok(tasks)
    }

    async fn get_job(&self, job_id: &JobId) -> Result<Option<JobSummary>, JobOpsError> {
        let url = format!("{}/v1/jobs/{}", self.base_url, job_id);
        debug!(url = %url, "Fetching job");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("job manager unreachable")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(JobOpsError::Other(anyhow::anyhow!(
                "failed to fetch job: {} - {}",
                status,
                body
            )));
        }

        let dto: JobDto = response.json().await.context("invalid job body")?;
        let job_id = JobId::parse(&dto.job_id)
            .map_err(|e| JobOpsError::Other(anyhow::anyhow!("invalid job id: {e}")))?;

        Ok(Some(JobSummary { job_id }))
    }
}
