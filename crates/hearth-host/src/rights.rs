// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Actor rights and the field-level permission table for instance updates.

use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

use crate::models::{Instance, InstanceUpdate};

/// Global instance-manager rights held by an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceManagerRights(u32);

impl InstanceManagerRights {
    /// No rights.
    pub const NONE: Self = Self(0);
    /// List every instance.
    pub const LIST: Self = Self(1 << 0);
    /// Create instances.
    pub const CREATE: Self = Self(1 << 1);
    /// Delete instances.
    pub const DELETE: Self = Self(1 << 2);
    /// Change the path of an instance.
    pub const RELOCATE: Self = Self(1 << 3);
    /// Change the name of an instance.
    pub const RENAME: Self = Self(1 << 4);
    /// Change the auto-update interval.
    pub const SET_AUTO_UPDATE: Self = Self(1 << 5);
    /// Change the configuration-management mode.
    pub const SET_CONFIGURATION: Self = Self(1 << 6);
    /// Bring instances online or offline.
    pub const SET_ONLINE: Self = Self(1 << 7);
    /// Every right.
    pub const ALL: Self = Self((1 << 8) - 1);

    /// Build from raw bits, dropping unknown ones.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    /// Raw bits.
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Whether every bit of `other` is held.
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for InstanceManagerRights {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// An authenticated principal, as handed over by the boundary layer.
#[derive(Debug, Clone)]
pub struct Actor {
    /// Stable user identifier.
    pub user_id: String,
    /// Display name for logs and job ownership.
    pub name: String,
    /// Global instance-manager rights.
    pub rights: InstanceManagerRights,
}

impl Actor {
    /// Create an actor.
    pub fn new(
        user_id: impl Into<String>,
        name: impl Into<String>,
        rights: InstanceManagerRights,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            name: name.into(),
            rights,
        }
    }

    /// The principal the host uses for its own jobs.
    pub fn system() -> Self {
        Self::new("system", "hearth", InstanceManagerRights::ALL)
    }

    /// Whether the actor holds `right`.
    pub fn has(&self, right: InstanceManagerRights) -> bool {
        self.rights.contains(right)
    }
}

/// A mutable instance field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceField {
    /// `name`
    Name,
    /// `path`
    Path,
    /// `auto_update_interval`
    AutoUpdateInterval,
    /// `configuration_type`
    ConfigurationType,
    /// `online`
    Online,
}

impl fmt::Display for InstanceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstanceField::Name => "name",
            InstanceField::Path => "path",
            InstanceField::AutoUpdateInterval => "auto_update_interval",
            InstanceField::ConfigurationType => "configuration_type",
            InstanceField::Online => "online",
        };
        f.write_str(name)
    }
}

/// Which right gates each mutable field.
pub const FIELD_RIGHTS: [(InstanceField, InstanceManagerRights); 5] = [
    (InstanceField::Name, InstanceManagerRights::RENAME),
    (InstanceField::Path, InstanceManagerRights::RELOCATE),
    (
        InstanceField::AutoUpdateInterval,
        InstanceManagerRights::SET_AUTO_UPDATE,
    ),
    (
        InstanceField::ConfigurationType,
        InstanceManagerRights::SET_CONFIGURATION,
    ),
    (InstanceField::Online, InstanceManagerRights::SET_ONLINE),
];

/// Whether `update` carries a value for `field` that differs from `current`.
///
/// `normalized_path` is the already-normalized form of `update.path`.
pub fn field_changed(
    field: InstanceField,
    update: &InstanceUpdate,
    normalized_path: Option<&str>,
    current: &Instance,
) -> bool {
    match field {
        InstanceField::Name => update.name.as_ref().is_some_and(|n| *n != current.name),
        InstanceField::Path => normalized_path.is_some_and(|p| p != current.path),
        InstanceField::AutoUpdateInterval => update
            .auto_update_interval
            .is_some_and(|v| Some(v) != current.auto_update_interval),
        InstanceField::ConfigurationType => update
            .configuration_type
            .is_some_and(|c| c != current.configuration_type),
        InstanceField::Online => update.online.is_some_and(|o| o != current.online),
    }
}

/// All fields the update changes, in table order.
pub fn changed_fields(
    update: &InstanceUpdate,
    normalized_path: Option<&str>,
    current: &Instance,
) -> Vec<InstanceField> {
    FIELD_RIGHTS
        .iter()
        .map(|(field, _)| *field)
        .filter(|field| field_changed(*field, update, normalized_path, current))
        .collect()
}

/// Changed fields the actor may not touch. Empty means the update is allowed.
pub fn forbidden_fields(
    actor: &Actor,
    update: &InstanceUpdate,
    normalized_path: Option<&str>,
    current: &Instance,
) -> Vec<InstanceField> {
    FIELD_RIGHTS
        .iter()
        .filter(|(field, right)| {
            !actor.has(*right) && field_changed(*field, update, normalized_path, current)
        })
        .map(|(field, _)| *field)
        .collect()
}
