// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed persistence implementation.

use std::path::Path;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::error::{Error, Result};
use crate::migrations;
use crate::models::{Instance, InstanceWithSettings, LaunchSettings, NewInstance, SecurityLevel};
use crate::reattach::{ReattachInformation, ReattachSlot, SlotId};

use super::{JobRecord, JobStatus, Persistence};

const INSTANCE_COLUMNS: &str = "id, name, path, online, configuration_type, auto_update_interval, swarm_identifier, version";

const LAUNCH_SETTINGS_COLUMNS: &str = "primary_port, secondary_port, security_level, allow_web_client, auto_start, soft_restart, soft_shutdown, startup_timeout_secs";

/// Flat reattach row; slots are split into nullable columns.
#[derive(Debug, sqlx::FromRow)]
struct ReattachRow {
    instance_id: i64,
    authoritative: SlotId,
    alpha_pid: Option<i64>,
    alpha_port: Option<i64>,
    alpha_access_identifier: Option<String>,
    alpha_security_level: Option<SecurityLevel>,
    alpha_launched_at: Option<DateTime<Utc>>,
    bravo_pid: Option<i64>,
    bravo_port: Option<i64>,
    bravo_access_identifier: Option<String>,
    bravo_security_level: Option<SecurityLevel>,
    bravo_launched_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

fn slot_from_columns(
    pid: Option<i64>,
    port: Option<i64>,
    access_identifier: Option<String>,
    security_level: Option<SecurityLevel>,
    launched_at: Option<DateTime<Utc>>,
) -> Option<ReattachSlot> {
    Some(ReattachSlot {
        pid: u32::try_from(pid?).ok()?,
        port: u16::try_from(port?).ok()?,
        access_identifier: access_identifier?,
        security_level: security_level?,
        launched_at: launched_at?,
    })
}

impl From<ReattachRow> for ReattachInformation {
    fn from(row: ReattachRow) -> Self {
        Self {
            instance_id: row.instance_id,
            alpha: slot_from_columns(
                row.alpha_pid,
                row.alpha_port,
                row.alpha_access_identifier,
                row.alpha_security_level,
                row.alpha_launched_at,
            ),
            bravo: slot_from_columns(
                row.bravo_pid,
                row.bravo_port,
                row.bravo_access_identifier,
                row.bravo_security_level,
                row.bravo_launched_at,
            ),
            authoritative: row.authoritative,
            updated_at: row.updated_at,
        }
    }
}

/// Map a unique-index violation to a conflict, anything else to a database error.
fn conflict_on_unique(e: sqlx::Error, message: impl FnOnce() -> String) -> Error {
    if let sqlx::Error::Database(db) = &e
        && db.is_unique_violation()
    {
        return Error::Conflict(message());
    }
    Error::Database(e)
}

/// SQLite-backed persistence provider.
#[derive(Clone)]
pub struct SqlitePersistence {
    pool: SqlitePool,
}

impl SqlitePersistence {
    /// Connect to a database URL and run migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;

        migrations::run(&pool).await?;

        Ok(Self { pool })
    }

    /// Create and initialize a database file, creating parent directories as needed.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        Self::connect(&format!("sqlite:{}?mode=rwc", path.to_string_lossy())).await
    }

    /// Private in-memory database, used by tests and dry runs.
    pub async fn in_memory() -> Result<Self> {
        // A second connection would see a different in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        migrations::run(&pool).await?;

        Ok(Self { pool })
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl Persistence for SqlitePersistence {
    async fn insert_instance(
        &self,
        instance: &NewInstance,
        launch_settings: &LaunchSettings,
    ) -> Result<Instance> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO instances (name, path, online, configuration_type, swarm_identifier, version)
            VALUES (?, ?, 0, ?, ?, 1)
            "#,
        )
        .bind(&instance.name)
        .bind(&instance.path)
        .bind(instance.configuration_type)
        .bind(&instance.swarm_identifier)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            conflict_on_unique(e, || {
                format!("An instance already exists at '{}'", instance.path)
            })
        })?;

        let id = inserted.last_insert_rowid();

        sqlx::query(
            r#"
            INSERT INTO launch_settings (
                instance_id, primary_port, secondary_port, security_level, allow_web_client,
                auto_start, soft_restart, soft_shutdown, startup_timeout_secs
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(launch_settings.primary_port)
        .bind(launch_settings.secondary_port)
        .bind(launch_settings.security_level)
        .bind(launch_settings.allow_web_client)
        .bind(launch_settings.auto_start)
        .bind(launch_settings.soft_restart)
        .bind(launch_settings.soft_shutdown)
        .bind(launch_settings.startup_timeout_secs)
        .execute(&mut *tx)
        .await?;

        let created = sqlx::query_as::<_, Instance>(&format!(
            "SELECT {} FROM instances WHERE id = ?",
            INSTANCE_COLUMNS
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(created)
    }

    async fn get_instance(&self, id: i64) -> Result<Option<Instance>> {
        let instance = sqlx::query_as::<_, Instance>(&format!(
            "SELECT {} FROM instances WHERE id = ?",
            INSTANCE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(instance)
    }

    async fn get_instance_with_settings(&self, id: i64) -> Result<Option<InstanceWithSettings>> {
        let Some(instance) = self.get_instance(id).await? else {
            return Ok(None);
        };

        let launch_settings = sqlx::query_as::<_, LaunchSettings>(&format!(
            "SELECT {} FROM launch_settings WHERE instance_id = ?",
            LAUNCH_SETTINGS_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .unwrap_or_default();

        Ok(Some(InstanceWithSettings {
            instance,
            launch_settings,
        }))
    }

    async fn get_instance_with_reattach(
        &self,
        id: i64,
    ) -> Result<Option<(Instance, Option<ReattachInformation>)>> {
        let Some(instance) = self.get_instance(id).await? else {
            return Ok(None);
        };
        let reattach = self.get_reattach(id).await?;
        Ok(Some((instance, reattach)))
    }

    async fn update_instance(&self, instance: &Instance) -> Result<Instance> {
        let result = sqlx::query(
            r#"
            UPDATE instances
            SET name = ?, path = ?, online = ?, configuration_type = ?,
                auto_update_interval = ?, version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(&instance.name)
        .bind(&instance.path)
        .bind(instance.online)
        .bind(instance.configuration_type)
        .bind(instance.auto_update_interval)
        .bind(instance.id)
        .bind(instance.version)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            conflict_on_unique(e, || {
                format!("An instance already exists at '{}'", instance.path)
            })
        })?;

        if result.rows_affected() == 0 {
            return match self.get_instance(instance.id).await? {
                Some(current) => Err(Error::Conflict(format!(
                    "Instance {} was modified concurrently (expected version {}, found {})",
                    instance.id, instance.version, current.version
                ))),
                None => Err(Error::Gone(format!("Instance {} no longer exists", instance.id))),
            };
        }

        Ok(Instance {
            version: instance.version + 1,
            ..instance.clone()
        })
    }

    async fn delete_instance(&self, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // Children before parent.
        sqlx::query("DELETE FROM reattach_information WHERE instance_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM instance_permissions WHERE instance_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM launch_settings WHERE instance_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let deleted = sqlx::query("DELETE FROM instances WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(deleted.rows_affected() > 0)
    }

    async fn list_instances(&self) -> Result<Vec<Instance>> {
        let instances = sqlx::query_as::<_, Instance>(&format!(
            "SELECT {} FROM instances",
            INSTANCE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(instances)
    }

    async fn list_instances_for_user(&self, user_id: &str) -> Result<Vec<Instance>> {
        let instances = sqlx::query_as::<_, Instance>(
            r#"
            SELECT i.id, i.name, i.path, i.online, i.configuration_type,
                   i.auto_update_interval, i.swarm_identifier, i.version
            FROM instances i
            INNER JOIN instance_permissions p ON p.instance_id = i.id
            WHERE p.user_id = ? AND p.rights != 0
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(instances)
    }

    async fn list_online_instances(
        &self,
        swarm_identifier: Option<&str>,
    ) -> Result<Vec<InstanceWithSettings>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM instances
            WHERE online = 1 AND IFNULL(swarm_identifier, '') = IFNULL(?, '')
            ORDER BY id
            "#,
        )
        .bind(swarm_identifier)
        .fetch_all(&self.pool)
        .await?;

        let mut instances = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(instance) = self.get_instance_with_settings(id).await? {
                instances.push(instance);
            }
        }

        Ok(instances)
    }

    async fn set_instance_permissions(
        &self,
        instance_id: i64,
        user_id: &str,
        rights: u32,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO instance_permissions (instance_id, user_id, rights)
            VALUES (?, ?, ?)
            ON CONFLICT (instance_id, user_id) DO UPDATE SET rights = excluded.rights
            "#,
        )
        .bind(instance_id)
        .bind(user_id)
        .bind(rights)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_reattach(&self, instance_id: i64) -> Result<Option<ReattachInformation>> {
        let row = sqlx::query_as::<_, ReattachRow>(
            "SELECT * FROM reattach_information WHERE instance_id = ?",
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ReattachInformation::from))
    }

    async fn save_reattach(&self, info: &ReattachInformation) -> Result<()> {
        let alpha = info.alpha.as_ref();
        let bravo = info.bravo.as_ref();

        sqlx::query(
            r#"
            INSERT INTO reattach_information (
                instance_id, authoritative,
                alpha_pid, alpha_port, alpha_access_identifier, alpha_security_level, alpha_launched_at,
                bravo_pid, bravo_port, bravo_access_identifier, bravo_security_level, bravo_launched_at,
                updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (instance_id) DO UPDATE SET
                authoritative = excluded.authoritative,
                alpha_pid = excluded.alpha_pid,
                alpha_port = excluded.alpha_port,
                alpha_access_identifier = excluded.alpha_access_identifier,
                alpha_security_level = excluded.alpha_security_level,
                alpha_launched_at = excluded.alpha_launched_at,
                bravo_pid = excluded.bravo_pid,
                bravo_port = excluded.bravo_port,
                bravo_access_identifier = excluded.bravo_access_identifier,
                bravo_security_level = excluded.bravo_security_level,
                bravo_launched_at = excluded.bravo_launched_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(info.instance_id)
        .bind(info.authoritative)
        .bind(alpha.map(|s| i64::from(s.pid)))
        .bind(alpha.map(|s| i64::from(s.port)))
        .bind(alpha.map(|s| s.access_identifier.clone()))
        .bind(alpha.map(|s| s.security_level))
        .bind(alpha.map(|s| s.launched_at))
        .bind(bravo.map(|s| i64::from(s.pid)))
        .bind(bravo.map(|s| i64::from(s.port)))
        .bind(bravo.map(|s| s.access_identifier.clone()))
        .bind(bravo.map(|s| s.security_level))
        .bind(bravo.map(|s| s.launched_at))
        .bind(info.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_reattach(&self, instance_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM reattach_information WHERE instance_id = ?")
            .bind(instance_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn insert_job(&self, job: &JobRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                job_id, description, kind, instance_id, started_by, started_at, stopped_at,
                cancel_requested, status, progress, stage, result, error
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.job_id)
        .bind(&job.description)
        .bind(job.kind)
        .bind(job.instance_id)
        .bind(&job.started_by)
        .bind(job.started_at)
        .bind(job.stopped_at)
        .bind(job.cancel_requested)
        .bind(job.status)
        .bind(job.progress)
        .bind(&job.stage)
        .bind(&job.result)
        .bind(&job.error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let job = sqlx::query_as::<_, JobRecord>("SELECT * FROM jobs WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }

    async fn list_jobs(&self, instance_id: Option<i64>) -> Result<Vec<JobRecord>> {
        let jobs = sqlx::query_as::<_, JobRecord>(
            r#"
            SELECT * FROM jobs
            WHERE ?1 IS NULL OR instance_id = ?1
            ORDER BY started_at DESC
            "#,
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    async fn list_running_jobs(&self) -> Result<Vec<JobRecord>> {
        let jobs = sqlx::query_as::<_, JobRecord>(
            "SELECT * FROM jobs WHERE status = 'running' ORDER BY started_at",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    async fn update_job_progress(
        &self,
        job_id: &str,
        progress: Option<i64>,
        stage: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET progress = COALESCE(?, progress), stage = COALESCE(?, stage)
            WHERE job_id = ? AND status = 'running'
            "#,
        )
        .bind(progress)
        .bind(stage)
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn request_job_cancellation(&self, job_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET cancel_requested = 1 WHERE job_id = ? AND status = 'running'",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn complete_job(
        &self,
        job_id: &str,
        status: JobStatus,
        result: Option<&str>,
        error: Option<&str>,
    ) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, result = ?, error = ?, stopped_at = ?
            WHERE job_id = ? AND status = 'running'
            "#,
        )
        .bind(status)
        .bind(result)
        .bind(error)
        .bind(Utc::now())
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() > 0)
    }
}
