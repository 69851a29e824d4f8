// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Locally applied, not yet confirmed mutations.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use strum::Display;
use tawreed_core::{EntityId, Row};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum PatchKind {
    Create,
    Update,
    Delete,
}

/// One pending optimistic mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimisticPatch {
    /// Id of the row in the collection; temporary for creates.
    pub entity_id: EntityId,
    pub kind: PatchKind,
    /// What the collection shows while the patch is pending. `None` for deletes.
    pub local_snapshot: Option<Row>,
    /// Snapshot restored on revert. `None` for creates.
    pub base: Option<Row>,
    pub submitted_at: DateTime<Utc>,
    /// Reverted by the sweeper once this passes unconfirmed.
    pub deadline: Instant,
    /// Server-assigned id, known once a create's write returns.
    pub server_id: Option<EntityId>,
    pub write_acknowledged: bool,
}

impl OptimisticPatch {
    pub fn create(row: Row, submitted_at: DateTime<Utc>, deadline: Instant) -> Self {
        Self {
            entity_id: row.id.clone(),
            kind: PatchKind::Create,
            local_snapshot: Some(row),
            base: None,
            submitted_at,
            deadline,
            server_id: None,
            write_acknowledged: false,
        }
    }

    pub fn update(local: Row, base: Row, submitted_at: DateTime<Utc>, deadline: Instant) -> Self {
        Self {
            entity_id: base.id.clone(),
            kind: PatchKind::Update,
            local_snapshot: Some(local),
            base: Some(base),
            submitted_at,
            deadline,
            server_id: None,
            write_acknowledged: false,
        }
    }

    pub fn delete(base: Row, submitted_at: DateTime<Utc>, deadline: Instant) -> Self {
        Self {
            entity_id: base.id.clone(),
            kind: PatchKind::Delete,
            local_snapshot: None,
            base: Some(base),
            submitted_at,
            deadline,
            server_id: None,
            write_acknowledged: false,
        }
    }

    /// Whether a server write stamped `server_ts` supersedes this patch.
    ///
    /// Writes without a timestamp are taken as superseding.
    pub fn superseded_by(&self, server_ts: Option<DateTime<Utc>>) -> bool {
        server_ts.is_none_or(|ts| ts >= self.submitted_at)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline <= now
    }
}

/// Pending patches keyed by collection id, with a reverse index from
/// server-assigned ids to the temporary ids of creates.
#[derive(Debug, Default)]
pub struct PatchLedger {
    patches: HashMap<EntityId, OptimisticPatch>,
    by_server_id: HashMap<EntityId, EntityId>,
}

impl PatchLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a patch, returning the one it supersedes for the same id.
    pub fn insert(&mut self, patch: OptimisticPatch) -> Option<OptimisticPatch> {
        if let Some(server_id) = &patch.server_id {
            self.by_server_id
                .insert(server_id.clone(), patch.entity_id.clone());
        }
        let previous = self.patches.insert(patch.entity_id.clone(), patch);
        if let Some(server_id) = previous.as_ref().and_then(|p| p.server_id.as_ref()) {
            self.by_server_id.remove(server_id);
        }
        previous
    }

    pub fn get(&self, id: &EntityId) -> Option<&OptimisticPatch> {
        self.patches.get(id)
    }

    pub fn get_mut(&mut self, id: &EntityId) -> Option<&mut OptimisticPatch> {
        self.patches.get_mut(id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.patches.contains_key(id)
    }

    pub fn remove(&mut self, id: &EntityId) -> Option<OptimisticPatch> {
        let patch = self.patches.remove(id)?;
        if let Some(server_id) = &patch.server_id {
            self.by_server_id.remove(server_id);
        }
        Some(patch)
    }

    /// Links a create patch to the id the backend assigned.
    pub fn assign_server_id(&mut self, temp: &EntityId, server_id: EntityId) -> bool {
        let Some(patch) = self.patches.get_mut(temp) else {
            return false;
        };
        patch.server_id = Some(server_id.clone());
        patch.write_acknowledged = true;
        self.by_server_id.insert(server_id, temp.clone());
        true
    }

    /// Temporary id of the create patch the backend assigned `server_id` to.
    pub fn temp_id_for(&self, server_id: &EntityId) -> Option<&EntityId> {
        self.by_server_id.get(server_id)
    }

    /// Ids whose patches are past their deadline, oldest submission first.
    pub fn expired(&self, now: Instant) -> Vec<EntityId> {
        let mut expired: Vec<&OptimisticPatch> =
            self.patches.values().filter(|p| p.is_expired(now)).collect();
        expired.sort_by_key(|p| p.submitted_at);
        expired.into_iter().map(|p| p.entity_id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OptimisticPatch> {
        self.patches.values()
    }

    pub fn clear(&mut self) {
        self.patches.clear();
        self.by_server_id.clear();
    }
}
