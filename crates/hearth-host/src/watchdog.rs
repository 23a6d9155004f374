// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process supervisor (watchdog).
//!
//! A [`Watchdog`] owns zero or one live game server process for a single
//! instance. It can:
//! - launch a fresh process and record how to find it again
//! - attach to a process that survived a manager restart, without relaunching
//! - hand the process over to a new session (same process, fresh session token)
//! - stop the process gracefully, force-killing it after a bounded wait
//! - detach, leaving the process running for the next manager lifetime
//!
//! While running, a monitor task polls liveness. An unexpected exit moves the
//! watchdog through `Crashed` to `Stopped`, clears the reattach record and
//! publishes a [`WatchdogEvent::Crashed`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::reattach::ReattachStore;
use crate::runner::{LaunchOptions, Runner, RunnerHandle};

/// Poll interval while waiting for a process to exit after a shutdown request.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Watchdog state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    /// No process supervised.
    Stopped,
    /// Launching or attaching.
    Starting,
    /// Process supervised and monitored.
    Running,
    /// Moving the process to a new session.
    HandingOff,
    /// Graceful stop in progress.
    Stopping,
    /// Process died unexpectedly; cleanup in progress.
    Crashed,
}

impl fmt::Display for WatchdogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WatchdogState::Stopped => "stopped",
            WatchdogState::Starting => "starting",
            WatchdogState::Running => "running",
            WatchdogState::HandingOff => "handing_off",
            WatchdogState::Stopping => "stopping",
            WatchdogState::Crashed => "crashed",
        };
        f.write_str(s)
    }
}

/// Event published by watchdogs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogEvent {
    /// A supervised process exited without being asked to.
    Crashed {
        /// Owning instance
        instance_id: i64,
        /// Process that died
        pid: u32,
        /// What was observed
        detail: String,
    },
}

/// Timing policy for watchdogs.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// How often the monitor checks liveness.
    pub poll_interval: Duration,
    /// Bound on a single probe.
    pub probe_timeout: Duration,
    /// Bound on the wait after a graceful shutdown request.
    pub graceful_stop_timeout: Duration,
    /// Probes attempted on attach before declaring a crash.
    pub attach_retries: u32,
    /// Pause between attach probes.
    pub attach_retry_delay: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(5),
            graceful_stop_timeout: Duration::from_secs(10),
            attach_retries: 3,
            attach_retry_delay: Duration::from_millis(500),
        }
    }
}

impl WatchdogConfig {
    /// Timing policy from host configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            probe_timeout: config.probe_timeout,
            graceful_stop_timeout: config.graceful_stop_timeout,
            attach_retries: config.attach_retries.max(1),
            ..Self::default()
        }
    }
}

/// State shared with the monitor task.
struct Shared {
    instance_id: i64,
    runner: Arc<dyn Runner>,
    store: ReattachStore,
    state: watch::Sender<WatchdogState>,
    handle: Mutex<Option<RunnerHandle>>,
    events: broadcast::Sender<WatchdogEvent>,
}

impl Shared {
    fn set_state(&self, state: WatchdogState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(
                instance_id = self.instance_id,
                from = %previous,
                to = %state,
                "Watchdog state changed"
            );
        }
    }

    /// Move to `to` if the current state is one of `from`.
    fn transition(&self, from: &[WatchdogState], to: WatchdogState) -> bool {
        self.state.send_if_modified(|state| {
            if from.contains(state) {
                *state = to;
                true
            } else {
                false
            }
        })
    }
}

struct Monitor {
    token: CancellationToken,
    task: JoinHandle<()>,
}

/// Supervisor for one instance's server process.
pub struct Watchdog {
    shared: Arc<Shared>,
    config: WatchdogConfig,
    monitor: Mutex<Option<Monitor>>,
}

impl Watchdog {
    /// Create a stopped watchdog.
    pub fn new(
        instance_id: i64,
        runner: Arc<dyn Runner>,
        store: ReattachStore,
        config: WatchdogConfig,
        events: broadcast::Sender<WatchdogEvent>,
    ) -> Self {
        let (state, _) = watch::channel(WatchdogState::Stopped);
        Self {
            shared: Arc::new(Shared {
                instance_id,
                runner,
                store,
                state,
                handle: Mutex::new(None),
                events,
            }),
            config,
            monitor: Mutex::new(None),
        }
    }

    /// Current state.
    pub fn state(&self) -> WatchdogState {
        *self.shared.state.borrow()
    }

    /// Watch state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<WatchdogState> {
        self.shared.state.subscribe()
    }

    /// Handle of the supervised process, if any.
    pub async fn handle(&self) -> Option<RunnerHandle> {
        self.shared.handle.lock().await.clone()
    }

    /// Launch a fresh process and start supervising it.
    pub async fn launch(&self, options: LaunchOptions) -> Result<RunnerHandle> {
        let id = self.shared.instance_id;
        if !self.shared.transition(
            &[WatchdogState::Stopped, WatchdogState::Crashed],
            WatchdogState::Starting,
        ) {
            return Err(Error::RuntimeTransition(format!(
                "Instance {} cannot launch while {}",
                id,
                self.state()
            )));
        }

        let handle = match self.shared.runner.launch(&options).await {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.set_state(WatchdogState::Stopped);
                return Err(Error::RuntimeTransition(format!(
                    "Failed to launch server for instance {}: {}",
                    id, e
                )));
            }
        };

        // A process nobody can find again after a restart must not be left running.
        if let Err(e) = self.shared.store.record_launch(id, handle.to_slot()).await {
            error!(
                instance_id = id,
                pid = handle.pid,
                error = %e,
                "Failed to record reattach information, killing process"
            );
            if let Err(kill_err) = self.shared.runner.kill(&handle).await {
                error!(instance_id = id, pid = handle.pid, error = %kill_err, "Failed to kill process");
            }
            self.shared.set_state(WatchdogState::Stopped);
            return Err(e);
        }

        *self.shared.handle.lock().await = Some(handle.clone());
        self.shared.set_state(WatchdogState::Running);
        self.start_monitor(handle.clone()).await;

        info!(
            instance_id = id,
            pid = handle.pid,
            port = handle.port,
            runner = self.shared.runner.runner_type(),
            "Server launched"
        );

        Ok(handle)
    }

    /// Attach to the process recorded in the reattach store, without relaunching.
    ///
    /// The process is probed up to `attach_retries` times. If it never answers,
    /// the watchdog ends up `Stopped`, the reattach record is cleared and
    /// [`Error::Crash`] is returned.
    pub async fn attach(&self) -> Result<RunnerHandle> {
        let id = self.shared.instance_id;
        if !self
            .shared
            .transition(&[WatchdogState::Stopped], WatchdogState::Starting)
        {
            return Err(Error::RuntimeTransition(format!(
                "Instance {} cannot attach while {}",
                id,
                self.state()
            )));
        }

        let info = match self.shared.store.load(id).await {
            Ok(info) => info,
            Err(e) => {
                self.shared.set_state(WatchdogState::Stopped);
                return Err(e);
            }
        };

        let Some(info) = info else {
            self.shared.set_state(WatchdogState::Stopped);
            return Err(Error::RuntimeTransition(format!(
                "Instance {} has no reattach information",
                id
            )));
        };

        let Some(handle) = info.current().map(RunnerHandle::from) else {
            self.shared.set_state(WatchdogState::Stopped);
            return Err(Error::RuntimeTransition(format!(
                "Instance {} has no authoritative reattach slot",
                id
            )));
        };

        // An interrupted hand-off never became authoritative.
        if info.staged().is_some() {
            warn!(instance_id = id, "Discarding slot from interrupted hand-off");
            if let Err(e) = self.shared.store.abandon_staged(id).await {
                warn!(instance_id = id, error = %e, "Failed to discard staged slot");
            }
        }

        let attempts = self.config.attach_retries.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self
                .shared
                .runner
                .probe(&handle, self.config.probe_timeout)
                .await
            {
                Ok(()) => {
                    *self.shared.handle.lock().await = Some(handle.clone());
                    self.shared.set_state(WatchdogState::Running);
                    self.start_monitor(handle.clone()).await;

                    info!(
                        instance_id = id,
                        pid = handle.pid,
                        attempt = attempt,
                        "Reattached to running server"
                    );
                    return Ok(handle);
                }
                Err(e) => {
                    warn!(
                        instance_id = id,
                        pid = handle.pid,
                        attempt = attempt,
                        max_attempts = attempts,
                        error = %e,
                        "Reattach probe failed"
                    );
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.config.attach_retry_delay).await;
                    }
                }
            }
        }

        self.shared.set_state(WatchdogState::Crashed);
        if let Err(e) = self.shared.store.clear(id).await {
            error!(instance_id = id, error = %e, "Failed to clear reattach information");
        }
        self.shared.set_state(WatchdogState::Stopped);

        let detail = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no probe attempted".to_string());
        error!(
            instance_id = id,
            pid = handle.pid,
            detail = %detail,
            "Server did not answer after restart, treating it as crashed"
        );

        Err(Error::Crash(format!(
            "Instance {} server (pid {}) did not answer after {} attempts: {}",
            id, handle.pid, attempts, detail
        )))
    }

    /// Move the supervised process to a new session.
    ///
    /// The same process is written into the non-authoritative slot with a fresh
    /// access identifier, probed, and promoted. On failure the previous slot
    /// stays authoritative.
    pub async fn hand_off(&self) -> Result<RunnerHandle> {
        let id = self.shared.instance_id;
        if !self
            .shared
            .transition(&[WatchdogState::Running], WatchdogState::HandingOff)
        {
            return Err(Error::RuntimeTransition(format!(
                "Instance {} cannot hand off while {}",
                id,
                self.state()
            )));
        }

        let Some(current) = self.handle().await else {
            self.shared.set_state(WatchdogState::Running);
            return Err(Error::RuntimeTransition(format!(
                "Instance {} has no supervised process",
                id
            )));
        };

        let staged = RunnerHandle {
            access_identifier: uuid::Uuid::new_v4().to_string(),
            ..current.clone()
        };

        let result = async {
            self.shared.store.stage(id, staged.to_slot()).await?;
            self.shared
                .runner
                .probe(&staged, self.config.probe_timeout)
                .await
                .map_err(|e| {
                    Error::RuntimeTransition(format!(
                        "Instance {} did not answer during hand-off: {}",
                        id, e
                    ))
                })?;
            self.shared.store.promote(id).await
        }
        .await;

        match result {
            Ok(info) => {
                *self.shared.handle.lock().await = Some(staged.clone());
                self.shared.set_state(WatchdogState::Running);
                info!(
                    instance_id = id,
                    pid = staged.pid,
                    authoritative = ?info.authoritative,
                    "Hand-off complete"
                );
                Ok(staged)
            }
            Err(e) => {
                if let Err(abandon_err) = self.shared.store.abandon_staged(id).await {
                    warn!(instance_id = id, error = %abandon_err, "Failed to discard staged slot");
                }
                self.shared.set_state(WatchdogState::Running);
                warn!(instance_id = id, error = %e, "Hand-off failed, keeping previous session");
                Err(e)
            }
        }
    }

    /// Stop the supervised process and delete its reattach record.
    ///
    /// Sends a graceful shutdown request, waits up to `graceful_stop_timeout`,
    /// then force-kills.
    pub async fn stop(&self) -> Result<()> {
        let id = self.shared.instance_id;

        if matches!(self.state(), WatchdogState::Stopped | WatchdogState::Crashed) {
            self.stop_monitor().await;
            self.shared.store.clear(id).await?;
            self.shared.set_state(WatchdogState::Stopped);
            return Ok(());
        }

        if !self
            .shared
            .transition(&[WatchdogState::Running], WatchdogState::Stopping)
        {
            return Err(Error::RuntimeTransition(format!(
                "Instance {} cannot stop while {}",
                id,
                self.state()
            )));
        }

        self.stop_monitor().await;

        let Some(handle) = self.handle().await else {
            self.shared.store.clear(id).await?;
            self.shared.set_state(WatchdogState::Stopped);
            return Ok(());
        };

        if let Err(e) = self.shared.runner.request_shutdown(&handle).await {
            warn!(instance_id = id, pid = handle.pid, error = %e, "Graceful shutdown request failed");
        }

        if !self
            .wait_for_exit(&handle, self.config.graceful_stop_timeout)
            .await
        {
            warn!(
                instance_id = id,
                pid = handle.pid,
                timeout_secs = self.config.graceful_stop_timeout.as_secs_f64(),
                "Server ignored shutdown request, killing it"
            );

            if let Err(e) = self.shared.runner.kill(&handle).await {
                error!(instance_id = id, pid = handle.pid, error = %e, "Failed to kill server");
                self.shared.set_state(WatchdogState::Running);
                self.start_monitor(handle).await;
                return Err(Error::RuntimeTransition(format!(
                    "Failed to stop server for instance {}: {}",
                    id, e
                )));
            }
        }

        *self.shared.handle.lock().await = None;
        self.shared.set_state(WatchdogState::Stopped);
        self.shared.store.clear(id).await?;

        info!(instance_id = id, pid = handle.pid, "Server stopped");

        Ok(())
    }

    /// Stop supervising without touching the process or its reattach record.
    pub async fn detach(&self) -> Option<RunnerHandle> {
        self.stop_monitor().await;
        let handle = self.shared.handle.lock().await.take();
        self.shared.set_state(WatchdogState::Stopped);

        info!(
            instance_id = self.shared.instance_id,
            pid = handle.as_ref().map(|h| h.pid),
            "Detached from server, leaving it running"
        );

        handle
    }

    async fn wait_for_exit(&self, handle: &RunnerHandle, timeout: Duration) -> bool {
        let exited = async {
            while self.shared.runner.is_alive(handle).await {
                tokio::time::sleep(STOP_POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(timeout, exited).await.is_ok()
    }

    async fn start_monitor(&self, handle: RunnerHandle) {
        let token = CancellationToken::new();
        let task = tokio::spawn(monitor(
            self.shared.clone(),
            handle,
            self.config.poll_interval,
            token.clone(),
        ));

        if let Some(previous) = self.monitor.lock().await.replace(Monitor { token, task }) {
            previous.token.cancel();
        }
    }

    async fn stop_monitor(&self) {
        let monitor = self.monitor.lock().await.take();
        if let Some(monitor) = monitor {
            monitor.token.cancel();
            if let Err(e) = monitor.task.await {
                error!(
                    instance_id = self.shared.instance_id,
                    "Watchdog monitor task panicked: {}", e
                );
            }
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.get_mut().take() {
            monitor.token.cancel();
        }
    }
}

/// Poll liveness until cancelled or the process dies.
async fn monitor(
    shared: Arc<Shared>,
    handle: RunnerHandle,
    poll_interval: Duration,
    token: CancellationToken,
) {
    let id = shared.instance_id;
    debug!(instance_id = id, pid = handle.pid, "Watchdog monitor started");

    loop {
        tokio::select! {
            biased;

            _ = token.cancelled() => {
                debug!(instance_id = id, "Watchdog monitor cancelled");
                break;
            }

            _ = tokio::time::sleep(poll_interval) => {
                if shared.runner.is_alive(&handle).await {
                    continue;
                }

                // Anything other than Running means an operation owns the process.
                if !shared.transition(&[WatchdogState::Running], WatchdogState::Crashed) {
                    continue;
                }

                let detail = format!("process {} exited unexpectedly", handle.pid);
                error!(instance_id = id, pid = handle.pid, "Server crashed");

                *shared.handle.lock().await = None;
                if let Err(e) = shared.store.clear(id).await {
                    error!(instance_id = id, error = %e, "Failed to clear reattach information");
                }
                shared.set_state(WatchdogState::Stopped);

                let _ = shared.events.send(WatchdogEvent::Crashed {
                    instance_id: id,
                    pid: handle.pid,
                    detail,
                });
                break;
            }
        }
    }
}
