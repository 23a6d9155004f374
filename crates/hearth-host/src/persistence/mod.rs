// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends for hearth-host.
//!
//! The lifecycle core only talks to [`Persistence`]. Saves of instance rows are
//! version-checked: a stale `version` surfaces as [`Error::Conflict`](crate::Error::Conflict)
//! and nothing is written.

pub mod sqlite;

pub use self::sqlite::SqlitePersistence;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{Instance, InstanceWithSettings, LaunchSettings, NewInstance};
use crate::reattach::ReattachInformation;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum JobStatus {
    /// Still executing.
    Running,
    /// Finished without error.
    Succeeded,
    /// Finished with an error.
    Failed,
    /// Stopped after a cancellation request.
    Cancelled,
}

impl JobStatus {
    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

/// What a job does, which decides how it is recovered after a manager restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum JobKind {
    /// Online/offline/relocate work. Not resumable.
    Lifecycle,
    /// Reattachment to a supervised process. Resumed on startup.
    Reattach,
    /// Bookkeeping for a crash detected by a watchdog.
    Recovery,
}

impl JobKind {
    /// Whether an interrupted job of this kind is resumed instead of failed.
    pub fn is_resumable(&self) -> bool {
        matches!(self, JobKind::Reattach)
    }
}

/// Job row as persisted.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct JobRecord {
    /// Job identifier (UUID).
    pub job_id: String,
    /// Human-readable description.
    pub description: String,
    /// What the job does.
    pub kind: JobKind,
    /// Instance the job operates on, if any.
    pub instance_id: Option<i64>,
    /// Principal that started the job.
    pub started_by: String,
    /// When the job started.
    pub started_at: DateTime<Utc>,
    /// When the job reached a terminal state.
    pub stopped_at: Option<DateTime<Utc>>,
    /// Whether cancellation was requested.
    pub cancel_requested: bool,
    /// Current status.
    pub status: JobStatus,
    /// Progress percentage.
    pub progress: Option<i64>,
    /// Current stage description.
    pub stage: Option<String>,
    /// JSON result captured at completion.
    pub result: Option<String>,
    /// Error detail captured on failure.
    pub error: Option<String>,
}

impl JobRecord {
    /// Parse the captured JSON result.
    pub fn result_value(&self) -> Option<serde_json::Value> {
        self.result
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

/// Persistence operations consumed by the lifecycle core.
#[async_trait]
pub trait Persistence: Send + Sync {
    // ===== Instances =====

    /// Insert an instance and its launch settings in one transaction.
    ///
    /// A `(path, swarm_identifier)` collision is a conflict.
    async fn insert_instance(
        &self,
        instance: &NewInstance,
        launch_settings: &LaunchSettings,
    ) -> Result<Instance>;

    /// Load an instance by id.
    async fn get_instance(&self, id: i64) -> Result<Option<Instance>>;

    /// Load an instance together with its launch settings.
    async fn get_instance_with_settings(&self, id: i64) -> Result<Option<InstanceWithSettings>>;

    /// Load an instance together with its reattachment record.
    async fn get_instance_with_reattach(
        &self,
        id: i64,
    ) -> Result<Option<(Instance, Option<ReattachInformation>)>>;

    /// Save the mutable fields of `instance` if its version still matches.
    ///
    /// Returns the saved row with the new version.
    async fn update_instance(&self, instance: &Instance) -> Result<Instance>;

    /// Delete an instance and every dependent row, children first.
    ///
    /// Returns false if the instance did not exist.
    async fn delete_instance(&self, id: i64) -> Result<bool>;

    /// All instances.
    async fn list_instances(&self) -> Result<Vec<Instance>>;

    /// Instances on which `user_id` holds any instance-scoped right.
    async fn list_instances_for_user(&self, user_id: &str) -> Result<Vec<Instance>>;

    /// Instances marked online and owned by `swarm_identifier`.
    async fn list_online_instances(
        &self,
        swarm_identifier: Option<&str>,
    ) -> Result<Vec<InstanceWithSettings>>;

    /// Grant (or replace) instance-scoped rights for a user.
    async fn set_instance_permissions(&self, instance_id: i64, user_id: &str, rights: u32)
    -> Result<()>;

    // ===== Reattachment =====

    /// Load the reattachment record for an instance.
    async fn get_reattach(&self, instance_id: i64) -> Result<Option<ReattachInformation>>;

    /// Insert or replace the reattachment record for an instance.
    async fn save_reattach(&self, info: &ReattachInformation) -> Result<()>;

    /// Delete the reattachment record for an instance.
    async fn delete_reattach(&self, instance_id: i64) -> Result<()>;

    // ===== Jobs =====

    /// Insert a new job row.
    async fn insert_job(&self, job: &JobRecord) -> Result<()>;

    /// Load a job by id.
    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>>;

    /// Jobs, newest first, optionally limited to one instance.
    async fn list_jobs(&self, instance_id: Option<i64>) -> Result<Vec<JobRecord>>;

    /// Jobs still marked running.
    async fn list_running_jobs(&self) -> Result<Vec<JobRecord>>;

    /// Record progress for a running job.
    async fn update_job_progress(
        &self,
        job_id: &str,
        progress: Option<i64>,
        stage: Option<&str>,
    ) -> Result<()>;

    /// Flag a running job as cancellation-requested. Returns false if not running.
    async fn request_job_cancellation(&self, job_id: &str) -> Result<bool>;

    /// Move a running job to a terminal status.
    ///
    /// Returns false if the job was already terminal, so a job is completed exactly once.
    async fn complete_job(
        &self,
        job_id: &str,
        status: JobStatus,
        result: Option<&str>,
        error: Option<&str>,
    ) -> Result<bool>;
}
