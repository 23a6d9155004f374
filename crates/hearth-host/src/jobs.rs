// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Job ledger.
//!
//! Long-running lifecycle operations run as jobs: each gets a durable row, runs
//! on its own task with a [`JobContext`], and reaches exactly one terminal
//! status. Rows are kept after completion.
//!
//! Terminal status mapping:
//! - `Ok` is `succeeded`, even if a cancellation request raced the finish
//! - `Err(Cancelled)`, or any error after cancellation was requested, is `cancelled`
//! - any other error, or a panic, is `failed`

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::persistence::{JobKind, JobRecord, JobStatus, Persistence};

/// Error recorded on jobs interrupted by a manager restart.
pub const MANAGER_RESTARTED: &str = "manager restarted";

/// What a new job is about.
#[derive(Debug, Clone)]
pub struct JobSpec {
    /// Human-readable description
    pub description: String,
    /// What the job does
    pub kind: JobKind,
    /// Principal starting the job
    pub started_by: String,
    /// Instance the job operates on
    pub instance_id: Option<i64>,
}

impl JobSpec {
    /// A job started by the host itself.
    pub fn new(description: impl Into<String>, kind: JobKind) -> Self {
        Self {
            description: description.into(),
            kind,
            started_by: "system".to_string(),
            instance_id: None,
        }
    }

    /// Set the owning principal.
    pub fn started_by(mut self, principal: impl Into<String>) -> Self {
        self.started_by = principal.into();
        self
    }

    /// Set the instance the job operates on.
    pub fn instance(mut self, instance_id: i64) -> Self {
        self.instance_id = Some(instance_id);
        self
    }
}

/// Handle given to a running job.
#[derive(Clone)]
pub struct JobContext {
    job_id: String,
    token: CancellationToken,
    persistence: Arc<dyn Persistence>,
}

impl JobContext {
    /// Id of the running job.
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Completes when cancellation is requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// `Err(Cancelled)` if cancellation was requested.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.token.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Record progress. Failures are logged, never fatal to the job.
    pub async fn report(&self, progress: Option<i64>, stage: Option<&str>) {
        if let Err(e) = self
            .persistence
            .update_job_progress(&self.job_id, progress.map(|p| p.clamp(0, 100)), stage)
            .await
        {
            warn!(job_id = %self.job_id, error = %e, "Failed to record job progress");
        }
    }
}

struct RunningJob {
    token: CancellationToken,
    done: watch::Receiver<bool>,
}

/// Durable job ledger.
#[derive(Clone)]
pub struct JobManager {
    persistence: Arc<dyn Persistence>,
    running: Arc<Mutex<HashMap<String, RunningJob>>>,
}

impl JobManager {
    /// Create a ledger on top of `persistence`.
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self {
            persistence,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record a new job and start it. Returns the job id immediately.
    pub async fn submit<F, Fut>(&self, spec: JobSpec, operation: F) -> Result<String>
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let job = JobRecord {
            job_id: uuid::Uuid::new_v4().to_string(),
            description: spec.description,
            kind: spec.kind,
            instance_id: spec.instance_id,
            started_by: spec.started_by,
            started_at: Utc::now(),
            stopped_at: None,
            cancel_requested: false,
            status: JobStatus::Running,
            progress: None,
            stage: None,
            result: None,
            error: None,
        };
        self.persistence.insert_job(&job).await?;

        info!(
            job_id = %job.job_id,
            kind = ?job.kind,
            instance_id = ?job.instance_id,
            started_by = %job.started_by,
            "Job started: {}",
            job.description
        );

        self.spawn(job.job_id.clone(), false, operation).await;
        Ok(job.job_id)
    }

    /// Run `operation` under an existing, still-running job row.
    ///
    /// Used for jobs returned by [`recover`](Self::recover).
    pub async fn resume<F, Fut>(&self, job: &JobRecord, operation: F) -> Result<String>
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        if job.status.is_terminal() {
            return Err(Error::Conflict(format!(
                "Job {} already finished as {:?}",
                job.job_id, job.status
            )));
        }

        info!(job_id = %job.job_id, kind = ?job.kind, "Job resumed");

        self.spawn(job.job_id.clone(), job.cancel_requested, operation)
            .await;
        Ok(job.job_id.clone())
    }

    async fn spawn<F, Fut>(&self, job_id: String, cancelled: bool, operation: F)
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let token = CancellationToken::new();
        if cancelled {
            token.cancel();
        }
        let (done_tx, done_rx) = watch::channel(false);

        self.running.lock().await.insert(
            job_id.clone(),
            RunningJob {
                token: token.clone(),
                done: done_rx,
            },
        );

        let ctx = JobContext {
            job_id: job_id.clone(),
            token: token.clone(),
            persistence: self.persistence.clone(),
        };
        let persistence = self.persistence.clone();
        let running = self.running.clone();

        tokio::spawn(async move {
            // Inner task so a panicking operation still gets a terminal status.
            let outcome = tokio::spawn(operation(ctx)).await;

            let (status, result, error) = match outcome {
                Ok(Ok(value)) => (JobStatus::Succeeded, Some(value.to_string()), None),
                Ok(Err(Error::Cancelled)) => {
                    (JobStatus::Cancelled, None, Some(Error::Cancelled.to_string()))
                }
                Ok(Err(e)) if token.is_cancelled() => {
                    (JobStatus::Cancelled, None, Some(e.to_string()))
                }
                Ok(Err(e)) => (JobStatus::Failed, None, Some(e.to_string())),
                Err(join_err) => (
                    JobStatus::Failed,
                    None,
                    Some(format!("Job panicked: {}", join_err)),
                ),
            };

            match persistence
                .complete_job(&job_id, status, result.as_deref(), error.as_deref())
                .await
            {
                Ok(true) => match status {
                    JobStatus::Failed => warn!(
                        job_id = %job_id,
                        error = error.as_deref().unwrap_or_default(),
                        "Job failed"
                    ),
                    _ => info!(job_id = %job_id, status = ?status, "Job finished"),
                },
                Ok(false) => debug!(job_id = %job_id, "Job was already terminal"),
                Err(e) => error!(job_id = %job_id, error = %e, "Failed to record job completion"),
            }

            let _ = done_tx.send(true);
            running.lock().await.remove(&job_id);
        });
    }

    /// Request cancellation of a job.
    ///
    /// No-op on a terminal job. Unknown ids are [`Error::Gone`].
    pub async fn cancel(&self, job_id: &str) -> Result<JobRecord> {
        let job = self.require(job_id).await?;
        if job.status.is_terminal() {
            return Ok(job);
        }

        self.persistence.request_job_cancellation(job_id).await?;
        if let Some(running) = self.running.lock().await.get(job_id) {
            running.token.cancel();
        }

        info!(job_id = %job_id, "Job cancellation requested");

        self.require(job_id).await
    }

    /// Snapshot of a job.
    pub async fn get(&self, job_id: &str) -> Result<Option<JobRecord>> {
        self.persistence.get_job(job_id).await
    }

    /// Jobs, newest first, optionally limited to one instance.
    pub async fn list(&self, instance_id: Option<i64>) -> Result<Vec<JobRecord>> {
        self.persistence.list_jobs(instance_id).await
    }

    /// Wait for a job started in this process to finish and return its final snapshot.
    ///
    /// Jobs not running in this process are returned as stored.
    pub async fn wait(&self, job_id: &str) -> Result<JobRecord> {
        let done = self
            .running
            .lock()
            .await
            .get(job_id)
            .map(|running| running.done.clone());

        if let Some(mut done) = done {
            // Sender dropped without a value only if the job task died; the row says the rest.
            let _ = done.wait_for(|finished| *finished).await;
        }

        self.require(job_id).await
    }

    /// Settle jobs left running by a previous manager lifetime.
    ///
    /// Resumable jobs are returned for the caller to [`resume`](Self::resume);
    /// all others are marked failed.
    pub async fn recover(&self) -> Result<Vec<JobRecord>> {
        let mut resumable = Vec::new();

        for job in self.persistence.list_running_jobs().await? {
            if self.running.lock().await.contains_key(&job.job_id) {
                continue;
            }

            if job.kind.is_resumable() {
                resumable.push(job);
                continue;
            }

            self.persistence
                .complete_job(&job.job_id, JobStatus::Failed, None, Some(MANAGER_RESTARTED))
                .await?;
            warn!(
                job_id = %job.job_id,
                kind = ?job.kind,
                "Job interrupted by manager restart, marked failed"
            );
        }

        if !resumable.is_empty() {
            info!(count = resumable.len(), "Found resumable jobs");
        }

        Ok(resumable)
    }

    async fn require(&self, job_id: &str) -> Result<JobRecord> {
        self.persistence
            .get_job(job_id)
            .await?
            .ok_or_else(|| Error::Gone(format!("Job {} does not exist", job_id)))
    }
}
