// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runner trait definitions.
//!
//! Defines the abstract interface for launching and supervising game server processes.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::SecurityLevel;
use crate::reattach::ReattachSlot;

/// Errors from runner operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunnerError {
    /// Server executable was not found.
    #[error("Binary not found: {0}")]
    BinaryNotFound(String),

    /// Process failed to start.
    #[error("Process start failed: {0}")]
    StartFailed(String),

    /// The process is not running.
    #[error("Process {0} is not running")]
    NotRunning(u32),

    /// The process is running but its endpoint does not answer.
    #[error("Endpoint unreachable: {0}")]
    Unreachable(String),

    /// A bounded wait elapsed.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// Delivering a signal failed.
    #[error("Signal failed: {0}")]
    Signal(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("Other: {0}")]
    Other(String),
}

/// Result type for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Options for launching a server process.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Instance the process belongs to
    pub instance_id: i64,
    /// Instance root, used as the working directory
    pub working_dir: PathBuf,
    /// Port the server listens on
    pub port: u16,
    /// Security posture
    pub security_level: SecurityLevel,
    /// Session token shared with the process
    pub access_identifier: String,
    /// How long the server may take to come up
    pub startup_timeout: Duration,
}

/// Handle for a live process. Everything needed to find it again after a
/// manager restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerHandle {
    /// OS process id
    pub pid: u32,
    /// Port the server listens on
    pub port: u16,
    /// Session token shared with the process
    pub access_identifier: String,
    /// Security posture the process runs under
    pub security_level: SecurityLevel,
    /// When the process was launched
    pub launched_at: DateTime<Utc>,
}

impl RunnerHandle {
    /// Reattachment slot describing this handle.
    pub fn to_slot(&self) -> ReattachSlot {
        ReattachSlot {
            pid: self.pid,
            port: self.port,
            access_identifier: self.access_identifier.clone(),
            security_level: self.security_level,
            launched_at: self.launched_at,
        }
    }
}

impl From<&ReattachSlot> for RunnerHandle {
    fn from(slot: &ReattachSlot) -> Self {
        Self {
            pid: slot.pid,
            port: slot.port,
            access_identifier: slot.access_identifier.clone(),
            security_level: slot.security_level,
            launched_at: slot.launched_at,
        }
    }
}

/// Trait for process runners.
///
/// Runners are PURE execution engines - they do NOT access the database.
/// Recording handles for reattachment is the caller's job. Processes started
/// by a runner must outlive the runner itself, so a restarted manager can find
/// them again through [`probe`](Runner::probe).
#[async_trait]
pub trait Runner: Send + Sync {
    /// Runner type identifier (e.g., "process", "mock")
    fn runner_type(&self) -> &'static str;

    /// Launch a server process without waiting for it to exit.
    ///
    /// Returns once the process is up, or fails if it does not come up within
    /// `startup_timeout`.
    async fn launch(&self, options: &LaunchOptions) -> Result<RunnerHandle>;

    /// Check that the process behind `handle` is alive and answering, within `timeout`.
    async fn probe(&self, handle: &RunnerHandle, timeout: Duration) -> Result<()>;

    /// Cheap liveness check, used by the watchdog monitor loop.
    async fn is_alive(&self, handle: &RunnerHandle) -> bool;

    /// Ask the process to shut down gracefully.
    async fn request_shutdown(&self, handle: &RunnerHandle) -> Result<()>;

    /// Force-terminate the process.
    async fn kill(&self, handle: &RunnerHandle) -> Result<()>;
}
