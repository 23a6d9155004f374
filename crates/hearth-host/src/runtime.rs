// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for hearth-host.
//!
//! [`HostRuntime`] wires persistence, the runner, the registry, the job ledger
//! and the coordinator together, and drives the startup and shutdown protocol:
//!
//! 1. settle jobs left running by the previous lifetime
//! 2. reattach to every instance this node owns that is marked online, each as
//!    a `reattach` job (resuming the interrupted job if there is one)
//! 3. record a failed `recovery` job for every crash a watchdog reports
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use hearth_host::persistence::SqlitePersistence;
//! use hearth_host::registry::ShutdownMode;
//! use hearth_host::runner::ProcessRunner;
//! use hearth_host::runtime::HostRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let persistence = Arc::new(SqlitePersistence::from_path(".data/hearth.db").await?);
//!
//!     let runtime = HostRuntime::builder()
//!         .persistence(persistence)
//!         .runner(Arc::new(ProcessRunner::new("/opt/byond/bin/DreamDaemon")))
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     // ... serve requests through runtime.coordinator() ...
//!
//!     runtime.shutdown(ShutdownMode::Detach).await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::coordinator::InstanceCoordinator;
use crate::error::Error;
use crate::io::{DefaultIoManager, IoManager};
use crate::jobs::{JobContext, JobManager, JobSpec};
use crate::persistence::{JobKind, JobRecord, JobStatus, Persistence};
use crate::reattach::ReattachStore;
use crate::registry::{InstanceRegistry, ShutdownMode};
use crate::runner::Runner;
use crate::watchdog::{WatchdogConfig, WatchdogEvent};

/// Builder for creating a [`HostRuntime`].
#[derive(Default)]
pub struct HostRuntimeBuilder {
    persistence: Option<Arc<dyn Persistence>>,
    runner: Option<Arc<dyn Runner>>,
    io: Option<Arc<dyn IoManager>>,
    swarm_identifier: Option<String>,
    watchdog_config: WatchdogConfig,
}

impl HostRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take swarm identity and timeouts from host configuration.
    pub fn config(mut self, config: &Config) -> Self {
        self.swarm_identifier = config.swarm_identifier.clone();
        self.watchdog_config = WatchdogConfig::from_config(config);
        self
    }

    /// Set the persistence backend (required).
    pub fn persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Set the process runner (required).
    pub fn runner(mut self, runner: Arc<dyn Runner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Set the filesystem backend. Defaults to [`DefaultIoManager`].
    pub fn io(mut self, io: Arc<dyn IoManager>) -> Self {
        self.io = Some(io);
        self
    }

    /// Set the swarm node this host runs as.
    pub fn swarm_identifier(mut self, swarm_identifier: impl Into<String>) -> Self {
        self.swarm_identifier = Some(swarm_identifier.into());
        self
    }

    /// Set watchdog timing.
    pub fn watchdog_config(mut self, config: WatchdogConfig) -> Self {
        self.watchdog_config = config;
        self
    }

    /// Build the runtime configuration.
    pub fn build(self) -> Result<HostRuntimeConfig> {
        let persistence = self
            .persistence
            .ok_or_else(|| anyhow::anyhow!("persistence is required"))?;
        let runner = self
            .runner
            .ok_or_else(|| anyhow::anyhow!("runner is required"))?;

        Ok(HostRuntimeConfig {
            persistence,
            runner,
            io: self.io.unwrap_or_else(|| Arc::new(DefaultIoManager::new())),
            swarm_identifier: self.swarm_identifier,
            watchdog_config: self.watchdog_config,
        })
    }
}

/// Configuration for a [`HostRuntime`].
pub struct HostRuntimeConfig {
    persistence: Arc<dyn Persistence>,
    runner: Arc<dyn Runner>,
    io: Arc<dyn IoManager>,
    swarm_identifier: Option<String>,
    watchdog_config: WatchdogConfig,
}

impl HostRuntimeConfig {
    /// Recover jobs, reattach to surviving servers and start crash bookkeeping.
    ///
    /// Returns once every reattach job has finished.
    pub async fn start(self) -> Result<HostRuntime> {
        let store = ReattachStore::new(self.persistence.clone());
        let registry = Arc::new(InstanceRegistry::new(
            self.runner.clone(),
            store,
            self.watchdog_config.clone(),
        ));
        let jobs = JobManager::new(self.persistence.clone());
        let coordinator = InstanceCoordinator::new(
            self.persistence.clone(),
            self.io.clone(),
            registry.clone(),
            jobs.clone(),
            self.swarm_identifier.clone(),
        );

        // Subscribe before attaching so early crashes are not missed.
        let events_shutdown = Arc::new(Notify::new());
        let events_handle = tokio::spawn(record_crashes(
            registry.subscribe(),
            jobs.clone(),
            events_shutdown.clone(),
        ));

        let resumable = jobs.recover().await?;
        let owned = coordinator.owned_online_instances().await?;

        let mut startup_jobs = Vec::with_capacity(owned.len());
        for instance in &owned {
            let id = instance.instance.id;
            let interrupted = resumable
                .iter()
                .find(|job| job.kind == JobKind::Reattach && job.instance_id == Some(id));

            let job_registry = registry.clone();
            let operation = move |ctx: JobContext| attach_instance(job_registry, ctx, id);
            let job_id = match interrupted {
                Some(job) => jobs.resume(job, operation).await?,
                None => {
                    jobs.submit(
                        JobSpec::new(
                            format!("Reattach to instance {}", instance.instance.name),
                            JobKind::Reattach,
                        )
                        .instance(id),
                        operation,
                    )
                    .await?
                }
            };
            startup_jobs.push(job_id);
        }

        // Interrupted reattach jobs not picked up above: the instance is no
        // longer online here, or an earlier job already claimed it.
        let leftover: Vec<&JobRecord> = resumable
            .iter()
            .filter(|job| !startup_jobs.contains(&job.job_id))
            .collect();
        for job in leftover {
            let instance_id = job.instance_id;
            let job_id = jobs
                .resume(job, move |_ctx| async move {
                    Err(Error::Gone(format!(
                        "Instance {:?} is no longer online on this node",
                        instance_id
                    )))
                })
                .await?;
            startup_jobs.push(job_id);
        }

        let mut attached = 0;
        for job_id in &startup_jobs {
            let job = jobs.wait(job_id).await?;
            if job.status == JobStatus::Succeeded {
                attached += 1;
            }
        }

        info!(
            swarm_identifier = ?self.swarm_identifier,
            runner = self.runner.runner_type(),
            online_instances = owned.len(),
            attached = attached,
            "HostRuntime started"
        );

        Ok(HostRuntime {
            coordinator,
            registry,
            jobs,
            startup_jobs,
            events_handle,
            events_shutdown,
        })
    }
}

/// Job body attaching to one instance's surviving server.
async fn attach_instance(
    registry: Arc<InstanceRegistry>,
    ctx: JobContext,
    instance_id: i64,
) -> crate::error::Result<serde_json::Value> {
    let _lock = registry.lock(instance_id).await?;
    ctx.report(Some(0), Some("probing")).await;
    let handle = registry.attach(instance_id).await?;
    info!(
        job_id = ctx.job_id(),
        instance_id = instance_id,
        pid = handle.pid,
        "Reattach job attached to server"
    );
    Ok(json!({
        "instance_id": instance_id,
        "pid": handle.pid,
        "port": handle.port,
    }))
}

/// Turn crash events into failed recovery jobs until shut down.
async fn record_crashes(
    mut events: broadcast::Receiver<WatchdogEvent>,
    jobs: JobManager,
    shutdown: Arc<Notify>,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.notified() => {
                info!("Crash recorder received shutdown signal");
                break;
            }

            event = events.recv() => match event {
                Ok(WatchdogEvent::Crashed { instance_id, pid, detail }) => {
                    let spec = JobSpec::new(
                        format!("Server crash on instance {}", instance_id),
                        JobKind::Recovery,
                    )
                    .instance(instance_id);
                    let message = format!("pid {}: {}", pid, detail);
                    if let Err(e) = jobs
                        .submit(spec, move |_ctx| async move { Err(Error::Crash(message)) })
                        .await
                    {
                        error!(instance_id = instance_id, error = %e, "Failed to record crash");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed = missed, "Crash recorder lagged behind watchdog events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

/// A running hearth host.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct HostRuntime {
    coordinator: InstanceCoordinator,
    registry: Arc<InstanceRegistry>,
    jobs: JobManager,
    startup_jobs: Vec<String>,
    events_handle: JoinHandle<()>,
    events_shutdown: Arc<Notify>,
}

impl HostRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> HostRuntimeBuilder {
        HostRuntimeBuilder::new()
    }

    /// The lifecycle coordinator.
    pub fn coordinator(&self) -> &InstanceCoordinator {
        &self.coordinator
    }

    /// The runtime registry.
    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    /// The job ledger.
    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }

    /// Jobs run during startup (reattachment), all finished by now.
    pub async fn startup_jobs(&self) -> anyhow::Result<Vec<JobRecord>> {
        let mut records = Vec::with_capacity(self.startup_jobs.len());
        for job_id in &self.startup_jobs {
            if let Some(job) = self.jobs.get(job_id).await? {
                records.push(job);
            }
        }
        Ok(records)
    }

    /// Shut down.
    ///
    /// With [`ShutdownMode::Detach`] servers keep running and the next start
    /// reattaches to them; with [`ShutdownMode::StopAll`] they are stopped.
    pub async fn shutdown(self, mode: ShutdownMode) -> Result<()> {
        info!(mode = ?mode, "HostRuntime shutting down...");

        self.events_shutdown.notify_one();
        if let Err(e) = self.events_handle.await {
            error!("Crash recorder task panicked: {}", e);
        }

        self.registry.shutdown(mode).await;

        info!("HostRuntime shutdown complete");
        Ok(())
    }
}
