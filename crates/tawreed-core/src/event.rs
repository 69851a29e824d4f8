// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Change-event model: the raw payload as the change feed delivers it, and
//! the canonical [`ChangeEvent`] the normalizer produces from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};

use crate::types::{EntityId, EntityKind, Row};

/// Row-level operation reported by the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

/// A change payload exactly as the feed delivers it.
///
/// Shaped after the hosted backend's realtime payload
/// (`{"eventType": "UPDATE", "new": {...}, "old": {...}}`). Snapshots stay
/// untyped until the normalizer validates them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    #[serde(rename = "eventType", alias = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_timestamp: Option<String>,
    #[serde(default, rename = "new", skip_serializing_if = "Option::is_none")]
    pub new_row: Option<Value>,
    #[serde(default, rename = "old", skip_serializing_if = "Option::is_none")]
    pub old_row: Option<Value>,
}

impl RawChange {
    pub fn insert(new_row: Value) -> Self {
        Self {
            event_type: ChangeOperation::Insert.to_string(),
            new_row: Some(new_row),
            ..Self::default()
        }
    }

    pub fn update(new_row: Value, old_row: Option<Value>) -> Self {
        Self {
            event_type: ChangeOperation::Update.to_string(),
            new_row: Some(new_row),
            old_row,
            ..Self::default()
        }
    }

    pub fn delete(old_row: Value) -> Self {
        Self {
            event_type: ChangeOperation::Delete.to_string(),
            old_row: Some(old_row),
            ..Self::default()
        }
    }

    pub fn with_commit_timestamp(mut self, ts: impl Into<String>) -> Self {
        self.commit_timestamp = Some(ts.into());
        self
    }
}

/// Monotonic receipt order assigned when an event leaves the transport.
///
/// Used only for tie-breaks and diagnostics; bursts are applied in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ReceiptStamp(pub u64);

/// Operation plus the snapshots it carries.
///
/// A delete carries only the old snapshot; an insert only the new one.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Insert { new: Row },
    Update { new: Row, old: Option<Row> },
    Delete { old: Row },
}

/// A validated change for one entity instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub entity: EntityKind,
    pub change: Change,
    /// Backend commit time, when the feed reports one.
    pub committed_at: Option<DateTime<Utc>>,
    pub received_at: ReceiptStamp,
}

impl ChangeEvent {
    pub fn operation(&self) -> ChangeOperation {
        match self.change {
            Change::Insert { .. } => ChangeOperation::Insert,
            Change::Update { .. } => ChangeOperation::Update,
            Change::Delete { .. } => ChangeOperation::Delete,
        }
    }

    pub fn id(&self) -> &EntityId {
        match &self.change {
            Change::Insert { new } | Change::Update { new, .. } => &new.id,
            Change::Delete { old } => &old.id,
        }
    }

    pub fn new_row(&self) -> Option<&Row> {
        match &self.change {
            Change::Insert { new } | Change::Update { new, .. } => Some(new),
            Change::Delete { .. } => None,
        }
    }

    pub fn old_row(&self) -> Option<&Row> {
        match &self.change {
            Change::Insert { .. } => None,
            Change::Update { old, .. } => old.as_ref(),
            Change::Delete { old } => Some(old),
        }
    }

    /// Server-side time of the write: the row's `updated_at`, else the commit time.
    pub fn server_timestamp(&self) -> Option<DateTime<Utc>> {
        self.new_row()
            .and_then(|r| r.updated_at)
            .or(self.committed_at)
    }
}
