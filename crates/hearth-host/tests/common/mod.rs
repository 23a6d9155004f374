// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for hearth-host integration tests.
//!
//! Provides TestContext for setting up an in-memory database, a mock runner and
//! a scratch directory for instance trees.

#![allow(dead_code)]

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use hearth_host::error::{Error, Result};
use hearth_host::io::{DefaultIoManager, IoManager};
use hearth_host::persistence::SqlitePersistence;
use hearth_host::rights::{Actor, InstanceManagerRights};
use hearth_host::runner::MockRunner;
use hearth_host::runtime::{HostRuntime, HostRuntimeBuilder};
use hearth_host::watchdog::WatchdogConfig;

/// Test context sharing one database and one runner across host restarts.
pub struct TestContext {
    pub persistence: Arc<SqlitePersistence>,
    pub runner: Arc<MockRunner>,
    pub io: Arc<FlakyIoManager>,
    pub root: PathBuf,
    _temp_dir: tempfile::TempDir,
}

impl TestContext {
    /// Create a new test context with a healthy mock runner.
    pub async fn new() -> Self {
        Self::with_runner(MockRunner::new()).await
    }

    /// Create a new test context around a configured mock runner.
    pub async fn with_runner(runner: MockRunner) -> Self {
        let persistence = Arc::new(
            SqlitePersistence::in_memory()
                .await
                .expect("Failed to create in-memory database"),
        );
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().to_path_buf();

        Self {
            persistence,
            runner: Arc::new(runner),
            io: Arc::new(FlakyIoManager::new(&root)),
            root,
            _temp_dir: temp_dir,
        }
    }

    /// A builder wired to this context's database, runner and filesystem.
    pub fn builder(&self) -> HostRuntimeBuilder {
        HostRuntime::builder()
            .persistence(self.persistence.clone())
            .runner(self.runner.clone())
            .io(self.io.clone())
            .watchdog_config(fast_watchdog_config())
    }

    /// Start a host runtime against this context.
    pub async fn start(&self) -> HostRuntime {
        self.builder()
            .build()
            .expect("Failed to build runtime")
            .start()
            .await
            .expect("Failed to start runtime")
    }

    /// Absolute path for an instance directory under the scratch root.
    pub fn path(&self, name: &str) -> String {
        self.root.join(name).to_string_lossy().into_owned()
    }
}

/// Watchdog timing suitable for tests.
pub fn fast_watchdog_config() -> WatchdogConfig {
    WatchdogConfig {
        poll_interval: Duration::from_millis(20),
        probe_timeout: Duration::from_millis(200),
        graceful_stop_timeout: Duration::from_millis(200),
        attach_retries: 2,
        attach_retry_delay: Duration::from_millis(10),
    }
}

/// Actor holding every global right.
pub fn admin() -> Actor {
    Actor::new("admin", "Admin", InstanceManagerRights::ALL)
}

/// Actor holding only the given rights.
pub fn actor_with(user_id: &str, rights: InstanceManagerRights) -> Actor {
    Actor::new(user_id, user_id, rights)
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Filesystem backend whose directory creation and moves can be made to fail.
pub struct FlakyIoManager {
    inner: DefaultIoManager,
    pub fail_create: AtomicBool,
    pub fail_move: AtomicBool,
}

impl FlakyIoManager {
    pub fn new(base: &Path) -> Self {
        Self {
            inner: DefaultIoManager::with_base(base),
            fail_create: AtomicBool::new(false),
            fail_move: AtomicBool::new(false),
        }
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_move(&self, fail: bool) {
        self.fail_move.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl IoManager for FlakyIoManager {
    fn resolve_path(&self, path: &str) -> Result<String> {
        self.inner.resolve_path(path)
    }

    async fn file_exists(&self, path: &Path) -> Result<bool> {
        self.inner.file_exists(path).await
    }

    async fn directory_exists(&self, path: &Path) -> Result<bool> {
        self.inner.directory_exists(path).await
    }

    async fn directory_is_empty(&self, path: &Path) -> Result<bool> {
        self.inner.directory_is_empty(path).await
    }

    async fn create_directory(&self, path: &Path) -> Result<()> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "simulated create failure",
            )));
        }
        self.inner.create_directory(path).await
    }

    async fn move_directory(&self, from: &Path, to: &Path) -> Result<()> {
        if self.fail_move.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "simulated move failure",
            )));
        }
        self.inner.move_directory(from, to).await
    }
}
