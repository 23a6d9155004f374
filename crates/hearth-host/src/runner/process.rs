// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Native process runner.
//!
//! Launches the game server as a plain OS process in its own process group, so
//! it keeps running when the manager exits. Liveness is checked through the
//! child handle when this runner spawned the process, and through `kill(pid, 0)`
//! when the process was inherited from a previous manager lifetime.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::traits::*;

/// Interval between readiness checks while a process starts.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Name of the log file written into the instance directory.
const SERVER_LOG_FILE: &str = "server.log";

/// Runner that spawns native OS processes.
pub struct ProcessRunner {
    command: PathBuf,
    args: Vec<String>,
    port_probe: bool,
    /// Children spawned by this runner, kept so exits are reaped.
    children: Arc<Mutex<HashMap<u32, Child>>>,
}

impl ProcessRunner {
    /// Create a runner that launches `command`.
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            port_probe: true,
            children: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Arguments passed to the server command on every launch.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Only check the pid when probing, not the TCP endpoint.
    pub fn without_port_probe(mut self) -> Self {
        self.port_probe = false;
        self
    }

    /// Whether `pid` is alive, reaping it if it is our child and has exited.
    async fn pid_alive(&self, pid: u32) -> bool {
        {
            let mut children = self.children.lock().await;
            if let Some(child) = children.get_mut(&pid) {
                match child.try_wait() {
                    Ok(None) => return true,
                    Ok(Some(status)) => {
                        debug!(pid = pid, status = %status, "Child process exited");
                        children.remove(&pid);
                        return false;
                    }
                    Err(e) => {
                        warn!(pid = pid, error = %e, "Failed to poll child process");
                    }
                }
            }
        }

        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        match signal::kill(Pid::from_raw(raw), None) {
            Ok(()) | Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    async fn endpoint_reachable(&self, port: u16) -> Result<()> {
        if !self.port_probe {
            return Ok(());
        }
        TcpStream::connect(("127.0.0.1", port))
            .await
            .map(|_| ())
            .map_err(|e| RunnerError::Unreachable(format!("127.0.0.1:{}: {}", port, e)))
    }

    /// Wait until the process answers on its port.
    async fn wait_until_ready(&self, handle: &RunnerHandle, timeout: Duration) -> Result<()> {
        let ready = async {
            loop {
                if !self.pid_alive(handle.pid).await {
                    return Err(RunnerError::StartFailed(format!(
                        "process {} exited during startup",
                        handle.pid
                    )));
                }
                if self.endpoint_reachable(handle.port).await.is_ok() {
                    return Ok(());
                }
                tokio::time::sleep(READY_POLL_INTERVAL).await;
            }
        };

        tokio::time::timeout(timeout, ready)
            .await
            .map_err(|_| RunnerError::Timeout(timeout))?
    }

    fn signal_group(&self, pid: u32, sig: Signal) -> Result<()> {
        let raw = i32::try_from(pid).map_err(|_| RunnerError::Signal(format!("invalid pid {}", pid)))?;
        match signal::killpg(Pid::from_raw(raw), sig) {
            Ok(()) => {
                debug!(pid = pid, signal = ?sig, "Sent signal to process group");
                Ok(())
            }
            Err(Errno::ESRCH) => {
                debug!(pid = pid, "Process group already gone (ESRCH)");
                Ok(())
            }
            Err(e) => Err(RunnerError::Signal(format!("{:?} to {}: {}", sig, pid, e))),
        }
    }
}

#[async_trait]
impl Runner for ProcessRunner {
    fn runner_type(&self) -> &'static str {
        "process"
    }

    async fn launch(&self, options: &LaunchOptions) -> Result<RunnerHandle> {
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(options.working_dir.join(SERVER_LOG_FILE))?;
        let log_err = log.try_clone()?;

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .current_dir(&options.working_dir)
            .env("HEARTH_INSTANCE_ID", options.instance_id.to_string())
            .env("HEARTH_PORT", options.port.to_string())
            .env("HEARTH_ACCESS_IDENTIFIER", &options.access_identifier)
            .env("HEARTH_SECURITY_LEVEL", options.security_level.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .process_group(0)
            .kill_on_drop(false);

        let child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                RunnerError::BinaryNotFound(self.command.display().to_string())
            }
            _ => RunnerError::StartFailed(e.to_string()),
        })?;

        let pid = child
            .id()
            .ok_or_else(|| RunnerError::StartFailed("process exited immediately".to_string()))?;
        self.children.lock().await.insert(pid, child);

        let handle = RunnerHandle {
            pid,
            port: options.port,
            access_identifier: options.access_identifier.clone(),
            security_level: options.security_level,
            launched_at: Utc::now(),
        };

        if let Err(e) = self.wait_until_ready(&handle, options.startup_timeout).await {
            warn!(
                instance_id = options.instance_id,
                pid = pid,
                error = %e,
                "Server did not come up, killing it"
            );
            if let Err(kill_err) = self.kill(&handle).await {
                error!(
                    instance_id = options.instance_id,
                    pid = pid,
                    error = %kill_err,
                    "Failed to kill server that did not come up"
                );
            }
            return Err(e);
        }

        info!(
            instance_id = options.instance_id,
            pid = pid,
            port = options.port,
            "Server process launched"
        );

        Ok(handle)
    }

    async fn probe(&self, handle: &RunnerHandle, timeout: Duration) -> Result<()> {
        let check = async {
            if !self.pid_alive(handle.pid).await {
                return Err(RunnerError::NotRunning(handle.pid));
            }
            self.endpoint_reachable(handle.port).await
        };

        tokio::time::timeout(timeout, check)
            .await
            .map_err(|_| RunnerError::Timeout(timeout))?
    }

    async fn is_alive(&self, handle: &RunnerHandle) -> bool {
        self.pid_alive(handle.pid).await
    }

    async fn request_shutdown(&self, handle: &RunnerHandle) -> Result<()> {
        self.signal_group(handle.pid, Signal::SIGTERM)
    }

    async fn kill(&self, handle: &RunnerHandle) -> Result<()> {
        self.signal_group(handle.pid, Signal::SIGKILL)?;

        let child = self.children.lock().await.remove(&handle.pid);
        if let Some(mut child) = child
            && tokio::time::timeout(Duration::from_secs(1), child.wait())
                .await
                .is_err()
        {
            warn!(pid = handle.pid, "Process still alive after SIGKILL");
        }

        Ok(())
    }
}
