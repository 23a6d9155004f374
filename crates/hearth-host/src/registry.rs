// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance runtime registry.
//!
//! In-memory map from instance id to the [`Watchdog`] supervising it. An entry
//! is added when the instance goes online in this process and stays after a
//! crash, with its watchdog `Stopped`, until the next online or offline. The registry
//! also owns the per-instance locks that serialize lifecycle operations; the
//! caller takes the lock with [`InstanceRegistry::lock`] and holds it for the
//! whole operation.
//!
//! Once [`InstanceRegistry::shutdown`] begins the registry is closed: it waits
//! for every in-flight operation to release its lock, and launches or attaches
//! requested after that point are refused.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard, broadcast};
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::models::InstanceWithSettings;
use crate::reattach::ReattachStore;
use crate::runner::{LaunchOptions, Runner, RunnerHandle};
use crate::watchdog::{Watchdog, WatchdogConfig, WatchdogEvent, WatchdogState};

/// Capacity of the watchdog event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Exclusive right to run a lifecycle operation on one instance.
pub type InstanceLock = OwnedMutexGuard<()>;

/// What to do with live processes when the registry shuts down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Hand each process to a fresh session and detach, so the next manager
    /// lifetime reattaches to it.
    Detach,
    /// Stop every process.
    StopAll,
}

/// Registry of live watchdogs.
pub struct InstanceRegistry {
    runner: Arc<dyn Runner>,
    store: ReattachStore,
    config: WatchdogConfig,
    watchdogs: Mutex<HashMap<i64, Arc<Watchdog>>>,
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
    events: broadcast::Sender<WatchdogEvent>,
    closed: AtomicBool,
}

impl InstanceRegistry {
    /// Create an empty registry.
    pub fn new(runner: Arc<dyn Runner>, store: ReattachStore, config: WatchdogConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            runner,
            store,
            config,
            watchdogs: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            events,
            closed: AtomicBool::new(false),
        }
    }

    /// Subscribe to crash events from every watchdog.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchdogEvent> {
        self.events.subscribe()
    }

    /// Take the lifecycle lock for an instance.
    ///
    /// Fails immediately with [`Error::Conflict`] if another operation holds it.
    pub async fn lock(&self, instance_id: i64) -> Result<InstanceLock> {
        let lock = self
            .locks
            .lock()
            .await
            .entry(instance_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        lock.try_lock_owned().map_err(|_| {
            Error::Conflict(format!(
                "Instance {} has a lifecycle operation in progress",
                instance_id
            ))
        })
    }

    /// Take the lifecycle lock for an instance, waiting for the current holder.
    pub async fn lock_wait(&self, instance_id: i64) -> InstanceLock {
        let lock = self
            .locks
            .lock()
            .await
            .entry(instance_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        lock.lock_owned().await
    }

    /// Drop the lock entry of a deleted instance.
    pub async fn forget(&self, instance_id: i64) {
        self.locks.lock().await.remove(&instance_id);
    }

    /// Watchdog of an instance, if it is online here.
    pub async fn get(&self, instance_id: i64) -> Option<Arc<Watchdog>> {
        self.watchdogs.lock().await.get(&instance_id).cloned()
    }

    /// Whether the instance has a server running under supervision here.
    ///
    /// An entry whose process crashed, or was never reattached, does not count.
    pub async fn is_online(&self, instance_id: i64) -> bool {
        self.watchdogs
            .lock()
            .await
            .get(&instance_id)
            .is_some_and(|watchdog| watchdog.state() == WatchdogState::Running)
    }

    /// Ids of every instance with a running server.
    pub async fn online_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .watchdogs
            .lock()
            .await
            .iter()
            .filter(|(_, watchdog)| watchdog.state() == WatchdogState::Running)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn ensure_open(&self, instance_id: i64) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::RuntimeTransition(format!(
                "Instance {} cannot start: host is shutting down",
                instance_id
            )));
        }
        Ok(())
    }

    fn new_watchdog(&self, instance_id: i64) -> Watchdog {
        Watchdog::new(
            instance_id,
            self.runner.clone(),
            self.store.clone(),
            self.config.clone(),
            self.events.clone(),
        )
    }

    /// Launch the server for an instance and register its watchdog.
    ///
    /// The caller must hold the instance lock. A running entry makes this a
    /// no-op; an entry whose process crashed is replaced.
    pub async fn online(&self, instance: &InstanceWithSettings) -> Result<RunnerHandle> {
        let id = instance.instance.id;
        self.ensure_open(id)?;

        if let Some(existing) = self.get(id).await {
            if existing.state() == WatchdogState::Running
                && let Some(handle) = existing.handle().await
            {
                return Ok(handle);
            }
            self.watchdogs.lock().await.remove(&id);
        }

        let settings = &instance.launch_settings;
        let options = LaunchOptions {
            instance_id: id,
            working_dir: instance.instance.path_buf(),
            port: settings.primary_port,
            security_level: settings.security_level,
            access_identifier: uuid::Uuid::new_v4().to_string(),
            startup_timeout: Duration::from_secs(u64::from(settings.startup_timeout_secs)),
        };

        let watchdog = Arc::new(self.new_watchdog(id));
        let handle = watchdog.launch(options).await?;
        self.watchdogs.lock().await.insert(id, watchdog);

        info!(instance_id = id, pid = handle.pid, "Instance online");

        Ok(handle)
    }

    /// Stop the server for an instance and remove its entry.
    ///
    /// The caller must hold the instance lock. Missing entries are a no-op. If
    /// the stop fails the entry is kept.
    pub async fn offline(&self, instance_id: i64) -> Result<()> {
        let Some(watchdog) = self.watchdogs.lock().await.remove(&instance_id) else {
            // No watchdog, but a stale record may still be around from a failed attach.
            self.store.clear(instance_id).await?;
            return Ok(());
        };

        if let Err(e) = watchdog.stop().await {
            self.watchdogs.lock().await.insert(instance_id, watchdog);
            return Err(e);
        }

        info!(instance_id = instance_id, "Instance offline");

        Ok(())
    }

    /// Attach to a process that survived a manager restart and register it.
    ///
    /// The caller must hold the instance lock.
    pub async fn attach(&self, instance_id: i64) -> Result<RunnerHandle> {
        self.ensure_open(instance_id)?;

        if let Some(existing) = self.get(instance_id).await
            && existing.state() == WatchdogState::Running
            && let Some(handle) = existing.handle().await
        {
            return Ok(handle);
        }

        let watchdog = Arc::new(self.new_watchdog(instance_id));
        let handle = watchdog.attach().await?;
        self.watchdogs.lock().await.insert(instance_id, watchdog);

        Ok(handle)
    }

    /// Move an instance's process to a fresh session.
    pub async fn hand_off(&self, instance_id: i64) -> Result<RunnerHandle> {
        let watchdog = self.get(instance_id).await.ok_or_else(|| {
            Error::RuntimeTransition(format!("Instance {} is not online", instance_id))
        })?;
        watchdog.hand_off().await
    }

    /// Stop supervising an instance without touching its process.
    pub async fn detach(&self, instance_id: i64) -> Option<RunnerHandle> {
        let watchdog = self.watchdogs.lock().await.remove(&instance_id)?;
        watchdog.detach().await
    }

    /// Close the registry and empty it.
    ///
    /// Waits for every operation holding an instance lock to finish, then
    /// holds all of those locks while the entries are stopped or detached.
    pub async fn shutdown(&self, mode: ShutdownMode) {
        self.closed.store(true, Ordering::SeqCst);

        let locks: Vec<Arc<Mutex<()>>> = self.locks.lock().await.values().cloned().collect();
        let mut guards = Vec::with_capacity(locks.len());
        for lock in locks {
            guards.push(lock.lock_owned().await);
        }

        let watchdogs: Vec<(i64, Arc<Watchdog>)> = self.watchdogs.lock().await.drain().collect();

        info!(count = watchdogs.len(), mode = ?mode, "Shutting down instance registry");

        for (instance_id, watchdog) in watchdogs {
            match mode {
                ShutdownMode::Detach => {
                    if watchdog.state() == WatchdogState::Running
                        && let Err(e) = watchdog.hand_off().await
                    {
                        warn!(
                            instance_id = instance_id,
                            error = %e,
                            "Hand-off before detach failed, previous session stays authoritative"
                        );
                    }
                    watchdog.detach().await;
                }
                ShutdownMode::StopAll => {
                    if let Err(e) = watchdog.stop().await {
                        error!(instance_id = instance_id, error = %e, "Failed to stop instance");
                    }
                }
            }
        }

        drop(guards);
    }
}
