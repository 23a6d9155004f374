// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Hearth Host - Game Server Instance Lifecycle
//!
//! This crate manages game-server installations ("instances") on one host
//! node: their persisted definitions, their on-disk directories and the
//! supervised server processes that run while an instance is online.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     Boundary layer (HTTP, CLI)                      │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                  │ Actor + request
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                       InstanceCoordinator                           │
//! │   rights ─ validation ─ transitions ─ rollback ─ lifecycle jobs     │
//! └─────────────────────────────────────────────────────────────────────┘
//!        │                 │                    │
//!        ▼                 ▼                    ▼
//! ┌─────────────┐  ┌───────────────┐  ┌──────────────────────────────┐
//! │ Persistence │  │   IoManager   │  │       InstanceRegistry       │
//! │  (SQLite)   │  │ (filesystem)  │  │  one Watchdog per instance   │
//! └─────────────┘  └───────────────┘  └──────────────────────────────┘
//!        ▲                                      │ launch / probe / signal
//!        │ reattach records                     ▼
//!        └──────────────────────────── ┌──────────────────────────────┐
//!                                      │   Runner (process / mock)    │
//!                                      └──────────────────────────────┘
//! ```
//!
//! # Watchdog State Machine
//!
//! ```text
//!   ┌─────────┐  launch / attach   ┌──────────┐   probe ok   ┌─────────┐
//!   │ STOPPED │ ─────────────────▶ │ STARTING │ ───────────▶ │ RUNNING │
//!   └─────────┘                    └──────────┘              └────┬────┘
//!     ▲  ▲  ▲        probe failed        │                        │
//!     │  │  └────────────────────────────┘            ┌───────────┼───────────┐
//!     │  │                                       stop │  hand off │      exit │
//!     │  │                                            ▼           ▼           ▼
//!     │  │                                  ┌──────────┐ ┌─────────────┐ ┌─────────┐
//!     │  └──────────────────────────────────│ STOPPING │ │ HANDING_OFF │ │ CRASHED │
//!     │                                     └──────────┘ └──────┬──────┘ └────┬────┘
//!     │                                          record cleared │ → RUNNING   │
//!     └─────────────────────────────────────────────────────────┼─────────────┘
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `HEARTH_SERVER_COMMAND` | Yes | - | Game server executable |
//! | `HEARTH_DATABASE_URL` | No | `sqlite:hearth.db?mode=rwc` | SQLite connection URL |
//! | `HEARTH_SWARM_ID` | No | - | Swarm node identifier |
//! | `HEARTH_GRACEFUL_STOP_SECS` | No | `10` | Graceful stop wait |
//! | `HEARTH_PROBE_TIMEOUT_SECS` | No | `5` | Liveness probe timeout |
//! | `HEARTH_ATTACH_RETRIES` | No | `3` | Probes before a reattach gives up |
//!
//! # Modules
//!
//! - [`config`]: Host configuration from environment variables
//! - [`coordinator`]: Create/update/delete/list/read with rollback
//! - [`jobs`]: Job ledger for lifecycle, reattach and recovery work
//! - [`persistence`]: SQLite storage for instances, reattach records and jobs
//! - [`registry`]: Live watchdogs and per-instance locks
//! - [`runner`]: Process execution backends
//! - [`watchdog`]: Supervision of one server process

#![warn(missing_docs)]

/// Database migrations for hearth-host.
///
/// ```ignore
/// use hearth_host::migrations;
///
/// let pool = SqlitePool::connect(&database_url).await?;
/// migrations::run(&pool).await?;
/// ```
pub mod migrations;

/// Host configuration loaded from environment variables.
pub mod config;

/// Instance lifecycle coordination.
pub mod coordinator;

/// Error types for host operations.
pub mod error;

/// Filesystem operations on instance directories.
pub mod io;

/// Long-running operation tracking.
pub mod jobs;

/// Instance entity types.
pub mod models;

/// Storage for instances, reattach records and jobs.
pub mod persistence;

/// Durable reattach records for supervised processes.
pub mod reattach;

/// Live watchdog registry.
pub mod registry;

/// Actor rights and field permissions.
pub mod rights;

/// Process execution backends (native process, mock).
pub mod runner;

/// Embeddable runtime wiring everything together.
pub mod runtime;

/// Supervision of a single server process.
pub mod watchdog;

pub use error::{Error, Result};
