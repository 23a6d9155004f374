// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance lifecycle coordinator.
//!
//! Entry point for create/update/delete/list/read. The coordinator validates
//! against persisted state, drives the runtime through the registry and only
//! then lets persisted state claim the new runtime state. A failed runtime step
//! undoes the steps already taken, in reverse order, before the error is
//! returned.
//!
//! Ordering rules:
//! - creation writes the database first and the disk second
//! - transitions change the runtime first and the database second

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::io::IoManager;
use crate::jobs::{JobManager, JobSpec};
use crate::models::{
    CreateInstanceRequest, Instance, InstanceUpdate, InstanceWithSettings, LaunchSettings,
    NewInstance,
};
use crate::persistence::{JobKind, Persistence};
use crate::registry::InstanceRegistry;
use crate::rights::{Actor, InstanceField, InstanceManagerRights, changed_fields, forbidden_fields};

/// A runtime step already taken by an update, with what undoes it.
#[derive(Debug)]
enum Undo {
    /// The instance was taken offline; bring it back at its old location.
    WentOffline(InstanceWithSettings),
    /// The instance was brought online; take it offline.
    WentOnline(i64),
    /// The directory was moved; move it back.
    Moved { from: PathBuf, to: PathBuf },
}

/// Coordinates instance lifecycle operations.
#[derive(Clone)]
pub struct InstanceCoordinator {
    persistence: Arc<dyn Persistence>,
    io: Arc<dyn IoManager>,
    registry: Arc<InstanceRegistry>,
    jobs: JobManager,
    swarm_identifier: Option<String>,
}

impl InstanceCoordinator {
    /// Create a coordinator.
    pub fn new(
        persistence: Arc<dyn Persistence>,
        io: Arc<dyn IoManager>,
        registry: Arc<InstanceRegistry>,
        jobs: JobManager,
        swarm_identifier: Option<String>,
    ) -> Self {
        Self {
            persistence,
            io,
            registry,
            jobs,
            swarm_identifier,
        }
    }

    /// The job ledger used for lifecycle jobs.
    pub fn jobs(&self) -> &JobManager {
        &self.jobs
    }

    /// The runtime registry.
    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    /// Create an instance with default launch settings and an empty directory.
    pub async fn create(&self, actor: &Actor, request: CreateInstanceRequest) -> Result<Instance> {
        if !actor.has(InstanceManagerRights::CREATE) {
            return Err(Error::Forbidden(format!(
                "{} may not create instances",
                actor.name
            )));
        }

        let name = request.name.trim();
        if name.is_empty() {
            return Err(Error::Validation("name must not be empty".to_string()));
        }
        if request.path.trim().is_empty() {
            return Err(Error::Validation("path must not be empty".to_string()));
        }

        let path = self.io.resolve_path(&request.path)?;
        let path_buf = PathBuf::from(&path);

        if self.io.file_exists(&path_buf).await? || self.io.directory_exists(&path_buf).await? {
            return Err(Error::Conflict(format!("Path '{}' already exists", path)));
        }

        let instance = self
            .persistence
            .insert_instance(
                &NewInstance {
                    name: name.to_string(),
                    path: path.clone(),
                    configuration_type: request.configuration_type.unwrap_or_default(),
                    swarm_identifier: self.swarm_identifier.clone(),
                },
                &LaunchSettings::default(),
            )
            .await?;

        let prepared = async {
            self.persistence
                .set_instance_permissions(
                    instance.id,
                    &actor.user_id,
                    InstanceManagerRights::ALL.bits(),
                )
                .await?;
            self.io.create_directory(&path_buf).await
        }
        .await;

        if let Err(e) = prepared {
            warn!(
                instance_id = instance.id,
                path = %path,
                error = %e,
                "Failed to prepare instance, removing it"
            );
            if let Err(cleanup_err) = self.persistence.delete_instance(instance.id).await {
                error!(
                    instance_id = instance.id,
                    error = %cleanup_err,
                    "Failed to remove instance after failed creation"
                );
            }
            return Err(e);
        }

        info!(
            instance_id = instance.id,
            name = %instance.name,
            path = %instance.path,
            created_by = %actor.name,
            "Instance created"
        );

        Ok(instance)
    }

    /// Apply a partial update.
    ///
    /// Field changes are gated by the field-to-right table. A request that
    /// changes nothing writes nothing.
    pub async fn update(&self, actor: &Actor, update: InstanceUpdate) -> Result<Instance> {
        let _lock = self.registry.lock(update.id).await?;
        self.update_locked(actor, update).await
    }

    /// [`update`](Self::update) for a caller already holding the instance lock.
    async fn update_locked(&self, actor: &Actor, update: InstanceUpdate) -> Result<Instance> {
        let id = update.id;

        let current = self
            .persistence
            .get_instance(id)
            .await?
            .ok_or_else(|| Error::Gone(format!("Instance {} does not exist", id)))?;

        if let Some(name) = &update.name
            && name.trim().is_empty()
        {
            return Err(Error::Validation("name must not be empty".to_string()));
        }

        let normalized_path = match &update.path {
            Some(path) => Some(self.io.resolve_path(path)?),
            None => None,
        };

        // Marked online but nothing running here: a crash or a failed attach.
        // Asking for online again relaunches.
        let relaunch =
            update.online == Some(true) && current.online && !self.registry.is_online(id).await;

        let mut forbidden = forbidden_fields(actor, &update, normalized_path.as_deref(), &current);
        if relaunch && !actor.has(InstanceManagerRights::SET_ONLINE) {
            forbidden.push(InstanceField::Online);
        }
        if !forbidden.is_empty() {
            let fields: Vec<String> = forbidden.iter().map(ToString::to_string).collect();
            return Err(Error::Forbidden(format!(
                "{} may not change {}",
                actor.name,
                fields.join(", ")
            )));
        }

        let mut changed = changed_fields(&update, normalized_path.as_deref(), &current);
        if relaunch {
            changed.push(InstanceField::Online);
        }
        if changed.is_empty() {
            return Ok(current);
        }

        let relocate_to = normalized_path
            .filter(|_| changed.contains(&InstanceField::Path))
            .map(PathBuf::from);
        let going_offline = update.online == Some(false) && current.online;
        let going_online = update.online == Some(true) && (!current.online || relaunch);

        if let Some(destination) = &relocate_to {
            if current.online && !going_offline {
                return Err(Error::Conflict(format!(
                    "Instance {} must be taken offline to be relocated",
                    id
                )));
            }
            if self.io.file_exists(destination).await?
                || (self.io.directory_exists(destination).await?
                    && !self.io.directory_is_empty(destination).await?)
            {
                return Err(Error::Conflict(format!(
                    "Destination '{}' is not empty",
                    destination.display()
                )));
            }
        }

        // Plain fields first, so a stale snapshot fails before any runtime work.
        let staged = Instance {
            name: update
                .name
                .as_ref()
                .map(|n| n.trim().to_string())
                .unwrap_or_else(|| current.name.clone()),
            configuration_type: update
                .configuration_type
                .unwrap_or(current.configuration_type),
            auto_update_interval: update
                .auto_update_interval
                .or(current.auto_update_interval),
            ..current.clone()
        };
        let mut saved = if staged != current {
            self.persistence.update_instance(&staged).await?
        } else {
            current.clone()
        };

        if !going_offline && !going_online && relocate_to.is_none() {
            info!(instance_id = id, changed = ?changed, updated_by = %actor.name, "Instance updated");
            return Ok(saved);
        }

        let mut undo = Vec::new();
        if let Err(e) = self
            .apply_transitions(&saved, going_offline, going_online, relocate_to.as_ref(), &mut undo)
            .await
        {
            self.roll_back(id, undo).await;
            return Err(e);
        }

        let committed = Instance {
            online: if going_online {
                true
            } else if going_offline {
                false
            } else {
                saved.online
            },
            path: relocate_to
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|| saved.path.clone()),
            ..saved.clone()
        };

        match self.persistence.update_instance(&committed).await {
            Ok(instance) => saved = instance,
            Err(e) => {
                warn!(instance_id = id, error = %e, "Failed to commit transition, rolling back");
                self.roll_back(id, undo).await;
                return Err(e);
            }
        }

        info!(
            instance_id = id,
            changed = ?changed,
            online = saved.online,
            path = %saved.path,
            updated_by = %actor.name,
            "Instance updated"
        );

        Ok(saved)
    }

    /// Offline, move, online, recording an undo entry after each step that succeeds.
    async fn apply_transitions(
        &self,
        instance: &Instance,
        going_offline: bool,
        going_online: bool,
        relocate_to: Option<&PathBuf>,
        undo: &mut Vec<Undo>,
    ) -> Result<()> {
        let id = instance.id;
        let settings = self
            .persistence
            .get_instance_with_settings(id)
            .await?
            .ok_or_else(|| Error::Gone(format!("Instance {} does not exist", id)))?;

        if going_offline {
            self.registry.offline(id).await.map_err(as_transition)?;
            undo.push(Undo::WentOffline(settings.clone()));
        }

        let mut launch = settings;
        if let Some(destination) = relocate_to {
            let from = instance.path_buf();
            self.io
                .move_directory(&from, destination)
                .await
                .map_err(|e| {
                    Error::RuntimeTransition(format!(
                        "Failed to move '{}' to '{}': {}",
                        from.display(),
                        destination.display(),
                        e
                    ))
                })?;
            undo.push(Undo::Moved {
                from,
                to: destination.clone(),
            });
            launch.instance.path = destination.to_string_lossy().into_owned();
        }

        if going_online {
            self.registry.online(&launch).await.map_err(as_transition)?;
            undo.push(Undo::WentOnline(id));
        }

        Ok(())
    }

    async fn roll_back(&self, id: i64, undo: Vec<Undo>) {
        for step in undo.into_iter().rev() {
            let result = match &step {
                Undo::WentOnline(id) => self.registry.offline(*id).await,
                Undo::Moved { from, to } => self.io.move_directory(to, from).await,
                Undo::WentOffline(previous) => self.registry.online(previous).await.map(|_| ()),
            };
            match result {
                Ok(()) => info!(instance_id = id, step = ?step, "Rolled back"),
                Err(e) => error!(instance_id = id, step = ?step, error = %e, "Rollback step failed"),
            }
        }
    }

    /// Delete an instance.
    ///
    /// A live process is detached, not stopped. The directory is left on disk.
    pub async fn delete(&self, actor: &Actor, id: i64) -> Result<()> {
        if !actor.has(InstanceManagerRights::DELETE) {
            return Err(Error::Forbidden(format!(
                "{} may not delete instances",
                actor.name
            )));
        }

        let lock = self.registry.lock(id).await?;

        let (instance, reattach) = self
            .persistence
            .get_instance_with_reattach(id)
            .await?
            .ok_or_else(|| Error::Gone(format!("Instance {} does not exist", id)))?;

        // The record goes first; supervision stays in place if that fails.
        if !self.persistence.delete_instance(id).await? {
            return Err(Error::Gone(format!("Instance {} does not exist", id)));
        }

        if let Some(handle) = self.registry.detach(id).await {
            info!(
                instance_id = id,
                pid = handle.pid,
                "Detached live server of deleted instance"
            );
        } else if let Some(slot) = reattach.as_ref().and_then(|info| info.current()) {
            info!(
                instance_id = id,
                pid = slot.pid,
                "Deleted instance had an unsupervised server recorded"
            );
        }

        drop(lock);
        self.registry.forget(id).await;

        info!(
            instance_id = id,
            name = %instance.name,
            was_online = instance.online,
            deleted_by = %actor.name,
            "Instance deleted"
        );

        Ok(())
    }

    /// Instances visible to the actor.
    pub async fn list(&self, actor: &Actor) -> Result<Vec<Instance>> {
        if actor.has(InstanceManagerRights::LIST) {
            self.persistence.list_instances().await
        } else {
            self.persistence.list_instances_for_user(&actor.user_id).await
        }
    }

    /// Return the instance resolved by the boundary layer.
    pub fn read(&self, selected: Option<Instance>) -> Result<Instance> {
        selected.ok_or_else(|| Error::Validation("no instance selected".to_string()))
    }

    /// Load an instance by id.
    pub async fn get(&self, id: i64) -> Result<Instance> {
        self.persistence
            .get_instance(id)
            .await?
            .ok_or_else(|| Error::Gone(format!("Instance {} does not exist", id)))
    }

    /// Run an online/offline change as a job. Returns the job id immediately.
    ///
    /// The job waits for any operation already holding the instance lock.
    /// Cancellation before the transition starts leaves the instance untouched.
    pub async fn submit_online_change(
        &self,
        actor: &Actor,
        id: i64,
        online: bool,
    ) -> Result<String> {
        let instance = self.get(id).await?;
        if !actor.has(InstanceManagerRights::SET_ONLINE) {
            return Err(Error::Forbidden(format!(
                "{} may not change online",
                actor.name
            )));
        }

        let description = if online {
            format!("Bring instance {} online", instance.name)
        } else {
            format!("Take instance {} offline", instance.name)
        };

        let coordinator = self.clone();
        let actor = actor.clone();
        self.jobs
            .submit(
                JobSpec::new(description, JobKind::Lifecycle)
                    .started_by(actor.name.clone())
                    .instance(id),
                move |ctx| async move {
                    ctx.report(Some(0), Some("waiting")).await;
                    let _lock = tokio::select! {
                        biased;

                        _ = ctx.cancelled() => return Err(Error::Cancelled),
                        lock = coordinator.registry.lock_wait(id) => lock,
                    };
                    ctx.check_cancelled()?;
                    ctx.report(Some(10), Some("transitioning")).await;

                    let updated = coordinator
                        .update_locked(
                            &actor,
                            InstanceUpdate {
                                online: Some(online),
                                ..InstanceUpdate::for_instance(id)
                            },
                        )
                        .await?;

                    ctx.report(Some(100), Some("done")).await;
                    Ok(serde_json::to_value(updated)?)
                },
            )
            .await
    }

    /// Instances marked online and owned by this node.
    pub async fn owned_online_instances(&self) -> Result<Vec<InstanceWithSettings>> {
        self.persistence
            .list_online_instances(self.swarm_identifier.as_deref())
            .await
    }
}

/// Keep domain errors; anything else from the runtime layer is a failed transition.
fn as_transition(e: Error) -> Error {
    match e {
        Error::RuntimeTransition(_)
        | Error::Crash(_)
        | Error::Conflict(_)
        | Error::Gone(_)
        | Error::Cancelled => e,
        other => Error::RuntimeTransition(other.to_string()),
    }
}
