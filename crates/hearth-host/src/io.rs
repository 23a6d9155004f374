// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Filesystem primitives consumed by the lifecycle coordinator.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Filesystem operations needed to create and relocate instance trees.
#[async_trait]
pub trait IoManager: Send + Sync {
    /// Resolve a requested path to its normalized, absolute form.
    fn resolve_path(&self, path: &str) -> Result<String>;

    /// Whether `path` is an existing regular file.
    async fn file_exists(&self, path: &Path) -> Result<bool>;

    /// Whether `path` is an existing directory.
    async fn directory_exists(&self, path: &Path) -> Result<bool>;

    /// Whether the directory at `path` has no entries.
    async fn directory_is_empty(&self, path: &Path) -> Result<bool>;

    /// Create a directory and any missing parents.
    async fn create_directory(&self, path: &Path) -> Result<()>;

    /// Move a directory tree to `to`. `to` must not exist or be empty.
    async fn move_directory(&self, from: &Path, to: &Path) -> Result<()>;
}

/// Normalize `path` against `base`: absolute, without `.` or `..` components,
/// upper-cased on Windows so comparisons are case-insensitive there.
pub fn normalize_path(path: &str, base: &Path) -> Result<String> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation("path must not be empty".to_string()));
    }

    let requested = Path::new(trimmed);
    let joined = if requested.is_absolute() {
        requested.to_path_buf()
    } else {
        base.join(requested)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
                normalized.push(component.as_os_str())
            }
            Component::CurDir => {}
            Component::ParentDir => {
                // `..` above the root stays at the root.
                if normalized.parent().is_some() {
                    normalized.pop();
                }
            }
        }
    }

    let normalized = normalized.to_string_lossy().into_owned();
    if cfg!(windows) {
        Ok(normalized.to_uppercase())
    } else {
        Ok(normalized)
    }
}

/// [`IoManager`] backed by `tokio::fs`, resolving relative paths against the
/// working directory of the host process.
#[derive(Debug, Clone, Default)]
pub struct DefaultIoManager {
    base: Option<PathBuf>,
}

impl DefaultIoManager {
    /// Create a manager resolving against the current working directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a manager resolving relative paths against `base`.
    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        Self {
            base: Some(base.into()),
        }
    }
}

#[async_trait]
impl IoManager for DefaultIoManager {
    fn resolve_path(&self, path: &str) -> Result<String> {
        let base = match &self.base {
            Some(base) => base.clone(),
            None => std::env::current_dir()?,
        };
        normalize_path(path, &base)
    }

    async fn file_exists(&self, path: &Path) -> Result<bool> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn directory_exists(&self, path: &Path) -> Result<bool> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn directory_is_empty(&self, path: &Path) -> Result<bool> {
        let mut entries = tokio::fs::read_dir(path).await?;
        Ok(entries.next_entry().await?.is_none())
    }

    async fn create_directory(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path).await?;
        Ok(())
    }

    async fn move_directory(&self, from: &Path, to: &Path) -> Result<()> {
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // rename(2) refuses to replace a directory on some platforms, even an empty one.
        if self.directory_exists(to).await? {
            tokio::fs::remove_dir(to).await?;
        }

        tokio::fs::rename(from, to).await?;

        tracing::debug!(
            from = %from.display(),
            to = %to.display(),
            "Moved instance directory"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_normalize_cleans_components() {
        let base = Path::new("/srv/hearth");
        assert_eq!(normalize_path("game", base).unwrap(), "/srv/hearth/game");
        assert_eq!(
            normalize_path("/srv/./a/../b/", base).unwrap(),
            "/srv/b"
        );
        assert_eq!(normalize_path("/../..", base).unwrap(), "/");
        assert_eq!(normalize_path("  ../x  ", base).unwrap(), "/srv/x");
    }

    #[test]
    fn test_normalize_rejects_blank() {
        assert!(matches!(
            normalize_path("   ", Path::new("/")),
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_create_and_move_directory() {
        let temp = tempfile::tempdir().unwrap();
        let io = DefaultIoManager::with_base(temp.path());

        let from = PathBuf::from(io.resolve_path("one").unwrap());
        let to = PathBuf::from(io.resolve_path("nested/two").unwrap());

        io.create_directory(&from).await.unwrap();
        tokio::fs::write(from.join("config.txt"), b"port=1337")
            .await
            .unwrap();
        assert!(io.directory_exists(&from).await.unwrap());
        assert!(!io.directory_is_empty(&from).await.unwrap());
        assert!(!io.file_exists(&from).await.unwrap());

        io.move_directory(&from, &to).await.unwrap();
        assert!(!io.directory_exists(&from).await.unwrap());
        assert!(io.file_exists(&to.join("config.txt")).await.unwrap());
    }

    #[tokio::test]
    async fn test_move_onto_empty_directory() {
        let temp = tempfile::tempdir().unwrap();
        let io = DefaultIoManager::with_base(temp.path());
        let from = temp.path().join("src");
        let to = temp.path().join("dst");

        io.create_directory(&from).await.unwrap();
        io.create_directory(&to).await.unwrap();
        assert!(io.directory_is_empty(&to).await.unwrap());

        io.move_directory(&from, &to).await.unwrap();
        assert!(io.directory_exists(&to).await.unwrap());
        assert!(!io.directory_exists(&from).await.unwrap());
    }
}
