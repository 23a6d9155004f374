// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reattachment store.
//!
//! Durable, per-instance record of a live supervised process, kept in two slots
//! ("alpha" and "bravo") plus a pointer to the authoritative one. A hand-off
//! writes the non-authoritative slot first and then flips the pointer and clears
//! the old slot in a single row write, so a reader always sees one complete,
//! authoritative handle.
//!
//! Removing a record never touches the process it describes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::SecurityLevel;
use crate::persistence::Persistence;

/// One of the two hand-off slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum SlotId {
    /// First slot, authoritative after a fresh launch.
    Alpha,
    /// Second slot.
    Bravo,
}

impl SlotId {
    /// The other slot.
    pub fn other(self) -> Self {
        match self {
            SlotId::Alpha => SlotId::Bravo,
            SlotId::Bravo => SlotId::Alpha,
        }
    }
}

/// Connection handle for a live server process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReattachSlot {
    /// OS process id.
    pub pid: u32,
    /// Communication endpoint (local port).
    pub port: u16,
    /// Session token shared with the process for this manager-side session.
    pub access_identifier: String,
    /// Security posture the process was launched with.
    pub security_level: SecurityLevel,
    /// When the process was launched.
    pub launched_at: DateTime<Utc>,
}

/// Dual-slot reattachment record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReattachInformation {
    /// Owning instance.
    pub instance_id: i64,
    /// Alpha slot.
    pub alpha: Option<ReattachSlot>,
    /// Bravo slot.
    pub bravo: Option<ReattachSlot>,
    /// Which slot is authoritative.
    pub authoritative: SlotId,
    /// Last write.
    pub updated_at: DateTime<Utc>,
}

impl ReattachInformation {
    /// Record for a fresh launch: alpha authoritative, bravo empty.
    pub fn launched(instance_id: i64, slot: ReattachSlot) -> Self {
        Self {
            instance_id,
            alpha: Some(slot),
            bravo: None,
            authoritative: SlotId::Alpha,
            updated_at: Utc::now(),
        }
    }

    /// Get a slot.
    pub fn slot(&self, id: SlotId) -> Option<&ReattachSlot> {
        match id {
            SlotId::Alpha => self.alpha.as_ref(),
            SlotId::Bravo => self.bravo.as_ref(),
        }
    }

    fn slot_mut(&mut self, id: SlotId) -> &mut Option<ReattachSlot> {
        match id {
            SlotId::Alpha => &mut self.alpha,
            SlotId::Bravo => &mut self.bravo,
        }
    }

    /// The authoritative slot, if populated.
    pub fn current(&self) -> Option<&ReattachSlot> {
        self.slot(self.authoritative)
    }

    /// The non-authoritative slot, if a hand-off is in progress.
    pub fn staged(&self) -> Option<&ReattachSlot> {
        self.slot(self.authoritative.other())
    }

    /// Write `slot` into the non-authoritative slot.
    pub fn stage(&mut self, slot: ReattachSlot) {
        *self.slot_mut(self.authoritative.other()) = Some(slot);
        self.updated_at = Utc::now();
    }

    /// Make the staged slot authoritative and clear the previous one.
    pub fn promote(&mut self) -> Result<()> {
        let next = self.authoritative.other();
        if self.slot(next).is_none() {
            return Err(Error::RuntimeTransition(format!(
                "Instance {} has no staged reattach slot to promote",
                self.instance_id
            )));
        }
        let previous = self.authoritative;
        self.authoritative = next;
        *self.slot_mut(previous) = None;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Drop a staged slot, keeping the authoritative one.
    pub fn abandon_staged(&mut self) {
        *self.slot_mut(self.authoritative.other()) = None;
        self.updated_at = Utc::now();
    }
}

/// Durable access to reattachment records.
///
/// Only the watchdog owning an instance mutates that instance's record.
#[derive(Clone)]
pub struct ReattachStore {
    persistence: Arc<dyn Persistence>,
}

impl ReattachStore {
    /// Create a new store.
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self { persistence }
    }

    /// Record a freshly launched process.
    pub async fn record_launch(
        &self,
        instance_id: i64,
        slot: ReattachSlot,
    ) -> Result<ReattachInformation> {
        let info = ReattachInformation::launched(instance_id, slot);
        self.persistence.save_reattach(&info).await?;

        tracing::info!(
            instance_id = instance_id,
            pid = info.alpha.as_ref().map(|s| s.pid),
            "Recorded reattach information"
        );

        Ok(info)
    }

    /// Load the record for an instance.
    pub async fn load(&self, instance_id: i64) -> Result<Option<ReattachInformation>> {
        self.persistence.get_reattach(instance_id).await
    }

    /// Write `slot` into the non-authoritative slot of the stored record.
    pub async fn stage(&self, instance_id: i64, slot: ReattachSlot) -> Result<ReattachInformation> {
        let mut info = self.require(instance_id).await?;
        info.stage(slot);
        self.persistence.save_reattach(&info).await?;

        tracing::debug!(
            instance_id = instance_id,
            staged = ?info.authoritative.other(),
            "Staged reattach slot"
        );

        Ok(info)
    }

    /// Flip the pointer to the staged slot and clear the old one, in one write.
    pub async fn promote(&self, instance_id: i64) -> Result<ReattachInformation> {
        let mut info = self.require(instance_id).await?;
        info.promote()?;
        self.persistence.save_reattach(&info).await?;

        tracing::info!(
            instance_id = instance_id,
            authoritative = ?info.authoritative,
            "Promoted reattach slot"
        );

        Ok(info)
    }

    /// Drop a staged slot after a failed hand-off.
    pub async fn abandon_staged(&self, instance_id: i64) -> Result<()> {
        if let Some(mut info) = self.load(instance_id).await? {
            info.abandon_staged();
            self.persistence.save_reattach(&info).await?;
        }
        Ok(())
    }

    /// Remove the record. The process it describes is left alone.
    pub async fn clear(&self, instance_id: i64) -> Result<()> {
        self.persistence.delete_reattach(instance_id).await?;

        tracing::debug!(instance_id = instance_id, "Cleared reattach information");

        Ok(())
    }

    async fn require(&self, instance_id: i64) -> Result<ReattachInformation> {
        self.load(instance_id).await?.ok_or_else(|| {
            Error::RuntimeTransition(format!(
                "Instance {} has no reattach information",
                instance_id
            ))
        })
    }
}
