// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance entity types shared by persistence, the coordinator, and the watchdog.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How much the configuration-management API may touch the instance tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ConfigurationType {
    /// No configuration access at all.
    #[default]
    Disallowed,
    /// Access limited to the configuration directory.
    Bounded,
    /// Unrestricted access.
    Unrestricted,
}

/// Security posture the game server process runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum SecurityLevel {
    /// Full access for the server code.
    Trusted,
    /// Sandboxed filesystem and shell access.
    Safe,
    /// No filesystem or shell access.
    #[default]
    Ultrasafe,
}

impl SecurityLevel {
    /// Get the level as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityLevel::Trusted => "trusted",
            SecurityLevel::Safe => "safe",
            SecurityLevel::Ultrasafe => "ultrasafe",
        }
    }
}

/// A managed game-server installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Instance {
    /// Stable identifier.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Normalized filesystem root.
    pub path: String,
    /// Whether the instance is supposed to be live on its owning node.
    pub online: bool,
    /// Configuration-management mode.
    pub configuration_type: ConfigurationType,
    /// Auto-update interval in minutes.
    pub auto_update_interval: Option<i64>,
    /// Owning swarm node, `None` when unclustered.
    pub swarm_identifier: Option<String>,
    /// Optimistic concurrency stamp, incremented on every save.
    pub version: i64,
}

impl Instance {
    /// The instance root as a path.
    pub fn path_buf(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }
}

/// Settings for the supervised server process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LaunchSettings {
    /// Port the server listens on and the watchdog probes.
    pub primary_port: u16,
    /// Port used when the primary is occupied.
    pub secondary_port: u16,
    /// Security posture for launches.
    pub security_level: SecurityLevel,
    /// Whether the server accepts web clients.
    pub allow_web_client: bool,
    /// Whether the server should be started with the host.
    pub auto_start: bool,
    /// Restart after the current round instead of immediately.
    pub soft_restart: bool,
    /// Shut down after the current round instead of immediately.
    pub soft_shutdown: bool,
    /// How long the server may take to open its port.
    pub startup_timeout_secs: u32,
}

impl Default for LaunchSettings {
    /// The fixed safe defaults every new instance receives.
    fn default() -> Self {
        Self {
            primary_port: 1337,
            secondary_port: 1338,
            security_level: SecurityLevel::Ultrasafe,
            allow_web_client: false,
            auto_start: false,
            soft_restart: false,
            soft_shutdown: false,
            startup_timeout_secs: 20,
        }
    }
}

/// Instance row plus the sub-records needed to bring it online.
#[derive(Debug, Clone)]
pub struct InstanceWithSettings {
    /// The instance row.
    pub instance: Instance,
    /// Its launch settings.
    pub launch_settings: LaunchSettings,
}

/// Fields for a new instance row.
#[derive(Debug, Clone)]
pub struct NewInstance {
    /// Display name.
    pub name: String,
    /// Normalized path.
    pub path: String,
    /// Configuration-management mode.
    pub configuration_type: ConfigurationType,
    /// Owning swarm node.
    pub swarm_identifier: Option<String>,
}

/// Request to create an instance.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateInstanceRequest {
    /// Display name.
    pub name: String,
    /// Requested path, normalized before use.
    pub path: String,
    /// Configuration mode, defaults to disallowed.
    #[serde(default)]
    pub configuration_type: Option<ConfigurationType>,
}

/// Partial instance model for updates. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstanceUpdate {
    /// Instance to update.
    pub id: i64,
    /// New display name.
    #[serde(default)]
    pub name: Option<String>,
    /// New path (relocation).
    #[serde(default)]
    pub path: Option<String>,
    /// New online state.
    #[serde(default)]
    pub online: Option<bool>,
    /// New configuration mode.
    #[serde(default)]
    pub configuration_type: Option<ConfigurationType>,
    /// New auto-update interval in minutes.
    #[serde(default)]
    pub auto_update_interval: Option<i64>,
}

impl InstanceUpdate {
    /// An update touching nothing on `id`.
    pub fn for_instance(id: i64) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }
}
