// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database migrations for hearth-host.
//!
//! # Example
//!
//! ```ignore
//! use sqlx::SqlitePool;
//! use hearth_host::migrations;
//!
//! let pool = SqlitePool::connect("sqlite:.data/hearth.db?mode=rwc").await?;
//! migrations::run(&pool).await?;
//! ```

use sqlx::SqlitePool;
use sqlx::migrate::{MigrateError, Migrator};

/// SQLite migrations embedded at compile time.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations/sqlite");

/// Run all migrations.
///
/// Safe to call multiple times; already-applied migrations are skipped.
pub async fn run(pool: &SqlitePool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        run(&pool).await.unwrap();
        run(&pool).await.unwrap();

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE '\\_%' ESCAPE '\\' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        assert_eq!(
            tables,
            vec![
                "instance_permissions",
                "instances",
                "jobs",
                "launch_settings",
                "reattach_information",
                "sqlite_sequence",
            ]
        );
    }
}
