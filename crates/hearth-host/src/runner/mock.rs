// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock runner for testing.
//!
//! Simulates long-lived server processes without spawning anything. Process
//! state lives in the runner, so a second watchdog sharing the same runner
//! can reattach to a "process" launched by the first one, just like a
//! restarted manager would.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::traits::*;

/// First pid handed out by the mock.
const FIRST_MOCK_PID: u32 = 40_000;

/// Mock process state.
#[derive(Debug, Clone)]
struct MockProcess {
    #[allow(dead_code)]
    handle: RunnerHandle,
    alive: bool,
    answering: bool,
}

/// Mock runner for testing.
pub struct MockRunner {
    processes: Arc<Mutex<HashMap<u32, MockProcess>>>,
    next_pid: AtomicU32,
    probe_failures: AtomicU32,
    launches: AtomicU32,
    shutdown_requests: AtomicU32,
    kills: AtomicU32,
    /// Optional delay to simulate startup time (in milliseconds)
    pub startup_delay_ms: u64,
    /// If true, launches fail
    pub fail_launch: bool,
    /// If true, processes ignore graceful shutdown requests and must be killed
    pub ignore_shutdown: bool,
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRunner {
    /// Create a new mock runner.
    pub fn new() -> Self {
        Self {
            processes: Arc::new(Mutex::new(HashMap::new())),
            next_pid: AtomicU32::new(FIRST_MOCK_PID),
            probe_failures: AtomicU32::new(0),
            launches: AtomicU32::new(0),
            shutdown_requests: AtomicU32::new(0),
            kills: AtomicU32::new(0),
            startup_delay_ms: 0,
            fail_launch: false,
            ignore_shutdown: false,
        }
    }

    /// Create a mock runner whose launches fail.
    pub fn failing() -> Self {
        Self {
            fail_launch: true,
            ..Self::new()
        }
    }

    /// Create a mock runner whose processes ignore graceful shutdown.
    pub fn stubborn() -> Self {
        Self {
            ignore_shutdown: true,
            ..Self::new()
        }
    }

    /// Create a mock runner whose launches take `delay_ms` to come up.
    pub fn slow(delay_ms: u64) -> Self {
        Self {
            startup_delay_ms: delay_ms,
            ..Self::new()
        }
    }

    /// Simulate the process dying on its own.
    pub async fn crash(&self, pid: u32) {
        if let Some(process) = self.processes.lock().await.get_mut(&pid) {
            process.alive = false;
        }
    }

    /// Simulate a process that is alive but no longer answers on its endpoint.
    pub async fn hang(&self, pid: u32) {
        if let Some(process) = self.processes.lock().await.get_mut(&pid) {
            process.answering = false;
        }
    }

    /// Make the next `count` probes fail regardless of process state.
    pub fn fail_next_probes(&self, count: u32) {
        self.probe_failures.store(count, Ordering::SeqCst);
    }

    /// Whether the simulated process is alive.
    pub async fn is_process_alive(&self, pid: u32) -> bool {
        self.processes
            .lock()
            .await
            .get(&pid)
            .is_some_and(|p| p.alive)
    }

    /// Pids of every live simulated process.
    pub async fn live_pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self
            .processes
            .lock()
            .await
            .iter()
            .filter(|(_, p)| p.alive)
            .map(|(pid, _)| *pid)
            .collect();
        pids.sort_unstable();
        pids
    }

    /// Number of successful launches.
    pub fn launch_count(&self) -> u32 {
        self.launches.load(Ordering::SeqCst)
    }

    /// Number of graceful shutdown requests received.
    pub fn shutdown_request_count(&self) -> u32 {
        self.shutdown_requests.load(Ordering::SeqCst)
    }

    /// Number of force-kills received.
    pub fn kill_count(&self) -> u32 {
        self.kills.load(Ordering::SeqCst)
    }

    fn take_probe_failure(&self) -> bool {
        self.probe_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Runner for MockRunner {
    fn runner_type(&self) -> &'static str {
        "mock"
    }

    async fn launch(&self, options: &LaunchOptions) -> Result<RunnerHandle> {
        if self.startup_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.startup_delay_ms)).await;
        }

        if self.fail_launch {
            return Err(RunnerError::StartFailed("Mock failure".to_string()));
        }

        let handle = RunnerHandle {
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            port: options.port,
            access_identifier: options.access_identifier.clone(),
            security_level: options.security_level,
            launched_at: Utc::now(),
        };

        self.processes.lock().await.insert(
            handle.pid,
            MockProcess {
                handle: handle.clone(),
                alive: true,
                answering: true,
            },
        );
        self.launches.fetch_add(1, Ordering::SeqCst);

        Ok(handle)
    }

    async fn probe(&self, handle: &RunnerHandle, timeout: Duration) -> Result<()> {
        if self.take_probe_failure() {
            return Err(RunnerError::Unreachable(format!(
                "mock probe failure for {}",
                handle.pid
            )));
        }

        let processes = self.processes.lock().await;
        match processes.get(&handle.pid) {
            Some(process) if !process.alive => Err(RunnerError::NotRunning(handle.pid)),
            Some(process) if !process.answering => Err(RunnerError::Timeout(timeout)),
            Some(_) => Ok(()),
            None => Err(RunnerError::NotRunning(handle.pid)),
        }
    }

    async fn is_alive(&self, handle: &RunnerHandle) -> bool {
        self.is_process_alive(handle.pid).await
    }

    async fn request_shutdown(&self, handle: &RunnerHandle) -> Result<()> {
        self.shutdown_requests.fetch_add(1, Ordering::SeqCst);
        if !self.ignore_shutdown
            && let Some(process) = self.processes.lock().await.get_mut(&handle.pid)
        {
            process.alive = false;
        }
        Ok(())
    }

    async fn kill(&self, handle: &RunnerHandle) -> Result<()> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        if let Some(process) = self.processes.lock().await.get_mut(&handle.pid) {
            process.alive = false;
        }
        Ok(())
    }
}
