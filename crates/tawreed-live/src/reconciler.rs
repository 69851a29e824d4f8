// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Folding change events into an ordered, deduplicated collection.
//!
//! [`EntityCollection`] keeps rows sorted by `created_at` descending (ties by
//! `id`) with unique ids, and remembers ids deleted by the change feed so a
//! late fetch or replay cannot bring them back. [`Reconciler`] owns the
//! collection together with the pending optimistic patches and is the only
//! thing that mutates either.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use strum::{Display, EnumDiscriminants};
use tawreed_core::{Change, ChangeEvent, EntityId, EntityKind, Row, SortKey, TawreedError};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::optimistic::{OptimisticPatch, PatchKind, PatchLedger};

/// Result of writing a row into the collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Upsert {
    Inserted,
    /// Replaced an existing row, which is returned.
    Replaced(Row),
    /// The id was deleted by the change feed and stays deleted.
    Skipped,
}

#[derive(Debug, Clone, Default)]
pub struct EntityCollection {
    rows: Vec<Row>,
    keys: HashMap<EntityId, SortKey>,
    deleted: HashSet<EntityId>,
}

impl EntityCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn as_slice(&self) -> &[Row] {
        &self.rows
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    pub fn get(&self, id: &EntityId) -> Option<&Row> {
        self.position(id).map(|pos| &self.rows[pos])
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.keys.contains_key(id)
    }

    /// Whether the change feed reported `id` as deleted.
    pub fn is_deleted(&self, id: &EntityId) -> bool {
        self.deleted.contains(id)
    }

    /// Inserts `row`, or replaces the row with the same id.
    pub fn upsert(&mut self, row: Row) -> Upsert {
        if self.deleted.contains(&row.id) {
            return Upsert::Skipped;
        }
        let Some(pos) = self.position(&row.id) else {
            self.insert_sorted(row);
            return Upsert::Inserted;
        };
        if self.rows[pos].sort_key() == row.sort_key() {
            return Upsert::Replaced(std::mem::replace(&mut self.rows[pos], row));
        }
        let previous = self.rows.remove(pos);
        self.insert_sorted(row);
        Upsert::Replaced(previous)
    }

    /// Shallow-merges `patch` into the row with the same id, inserting it
    /// when absent.
    pub fn merge(&mut self, patch: &Row) -> Upsert {
        match self.get(&patch.id) {
            Some(existing) => {
                let merged = existing.merged(patch);
                self.upsert(merged)
            }
            None => self.upsert(patch.clone()),
        }
    }

    /// Removes a row without marking it deleted.
    pub fn remove(&mut self, id: &EntityId) -> Option<Row> {
        let pos = self.position(id)?;
        self.keys.remove(id);
        Some(self.rows.remove(pos))
    }

    /// Removes a row and marks the id deleted.
    pub fn delete(&mut self, id: &EntityId) -> Option<Row> {
        self.deleted.insert(id.clone());
        self.remove(id)
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&Row) -> bool) {
        self.rows.retain(|row| keep(row));
        self.keys = self
            .rows
            .iter()
            .map(|row| (row.id.clone(), row.sort_key()))
            .collect();
    }

    /// Checks ordering, uniqueness and the deleted-id rule.
    pub fn is_consistent(&self) -> bool {
        let sorted = self
            .rows
            .windows(2)
            .all(|pair| pair[0].sort_key() < pair[1].sort_key());
        sorted
            && self.keys.len() == self.rows.len()
            && self.rows.iter().all(|row| {
                self.keys.get(&row.id) == Some(&row.sort_key()) && !self.deleted.contains(&row.id)
            })
    }

    fn position(&self, id: &EntityId) -> Option<usize> {
        let key = self.keys.get(id)?;
        self.rows
            .binary_search_by(|row| row.sort_key().cmp(key))
            .ok()
    }

    fn insert_sorted(&mut self, row: Row) {
        let key = row.sort_key();
        let at = self.rows.partition_point(|r| r.sort_key() < key);
        self.keys.insert(row.id.clone(), key);
        self.rows.insert(at, row);
    }
}

impl<'a> IntoIterator for &'a EntityCollection {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum RevertReason {
    WriteFailed,
    TimedOut,
}

/// A visible change to the collection, as reported to listeners.
#[derive(Debug, Clone, PartialEq, EnumDiscriminants)]
#[strum_discriminants(name(ChangeTag), derive(Hash, Display))]
pub enum CollectionChange {
    Inserted { row: Row },
    Updated { previous: Row, row: Row },
    Removed { row: Row },
    /// A pending optimistic patch was confirmed. For creates `local_id` is
    /// the temporary id the row was shown under.
    Confirmed { id: EntityId, local_id: EntityId },
    Reverted {
        id: EntityId,
        kind: PatchKind,
        reason: RevertReason,
    },
    /// The collection was rebuilt from a full fetch.
    Resynced { len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Insert events: the row replaces what we hold.
    Replace,
    /// Update events: the row is merged into what we hold.
    Merge,
    /// Bulk-fetch rows: replace, unless we already hold something newer.
    Fetched,
}

/// Owns one collection and its pending optimistic patches.
#[derive(Debug)]
pub struct Reconciler {
    entity: EntityKind,
    collection: EntityCollection,
    ledger: PatchLedger,
}

impl Reconciler {
    pub fn new(entity: EntityKind) -> Self {
        Self {
            entity,
            collection: EntityCollection::new(),
            ledger: PatchLedger::new(),
        }
    }

    pub fn entity(&self) -> EntityKind {
        self.entity
    }

    pub fn collection(&self) -> &EntityCollection {
        &self.collection
    }

    pub fn ledger(&self) -> &PatchLedger {
        &self.ledger
    }

    pub fn pending(&self) -> usize {
        self.ledger.len()
    }

    /// Applies one change-feed event. All-or-nothing per event.
    pub fn apply(&mut self, event: &ChangeEvent) -> Vec<CollectionChange> {
        debug!(
            entity = %self.entity,
            operation = %event.operation(),
            id = %event.id(),
            received_at = event.received_at.0,
            "applying change event"
        );
        match &event.change {
            Change::Insert { new } => self.reconcile(new.clone(), Mode::Replace, event.server_timestamp()),
            Change::Update { new, .. } => self.reconcile(new.clone(), Mode::Merge, event.server_timestamp()),
            Change::Delete { old } => self.apply_delete(&old.id),
        }
    }

    /// Folds rows from a bulk fetch in, never overwriting newer data.
    pub fn apply_fetched(&mut self, rows: Vec<Row>) -> Vec<CollectionChange> {
        let mut changes = Vec::new();
        for row in rows {
            let server_ts = row.updated_at;
            changes.extend(self.reconcile(row, Mode::Fetched, server_ts));
        }
        changes
    }

    /// Rebuilds the collection from a complete fetch.
    ///
    /// Rows absent from `rows` are dropped unless an optimistic patch is
    /// pending for them; ids deleted by the feed stay deleted.
    pub fn resync(&mut self, rows: Vec<Row>) -> Vec<CollectionChange> {
        let fetched: HashSet<EntityId> = rows.iter().map(|r| r.id.clone()).collect();
        let mut changes: Vec<CollectionChange> = self
            .apply_fetched(rows)
            .into_iter()
            .filter(|c| matches!(c, CollectionChange::Confirmed { .. }))
            .collect();
        let ledger = &self.ledger;
        self.collection
            .retain(|row| fetched.contains(&row.id) || ledger.contains(&row.id));
        changes.push(CollectionChange::Resynced {
            len: self.collection.len(),
        });
        changes
    }

    /// Shows a locally created row under its temporary id.
    pub fn begin_create(
        &mut self,
        row: Row,
        submitted_at: DateTime<Utc>,
        deadline: Instant,
    ) -> Vec<CollectionChange> {
        self.ledger
            .insert(OptimisticPatch::create(row.clone(), submitted_at, deadline));
        match self.collection.upsert(row.clone()) {
            Upsert::Skipped => Vec::new(),
            _ => vec![CollectionChange::Inserted { row }],
        }
    }

    /// Merges a local partial update into the row it targets.
    pub fn begin_update(
        &mut self,
        patch: &Row,
        submitted_at: DateTime<Utc>,
        deadline: Instant,
    ) -> Result<Vec<CollectionChange>, TawreedError> {
        self.ensure_confirmed(&patch.id)?;
        let current = self.existing(&patch.id)?;
        let local = current.merged(patch);
        self.ledger.insert(OptimisticPatch::update(
            local.clone(),
            current.clone(),
            submitted_at,
            deadline,
        ));
        self.collection.upsert(local.clone());
        Ok(vec![CollectionChange::Updated {
            previous: current,
            row: local,
        }])
    }

    /// Hides a row pending its remote deletion.
    pub fn begin_delete(
        &mut self,
        id: &EntityId,
        submitted_at: DateTime<Utc>,
        deadline: Instant,
    ) -> Result<Vec<CollectionChange>, TawreedError> {
        self.ensure_confirmed(id)?;
        let current = self.existing(id)?;
        self.collection.remove(id);
        self.ledger
            .insert(OptimisticPatch::delete(current.clone(), submitted_at, deadline));
        Ok(vec![CollectionChange::Removed { row: current }])
    }

    /// Records the id the backend assigned to an optimistic create.
    ///
    /// If the confirming event already arrived, the temporary row is
    /// retired right away.
    pub fn acknowledge_create(&mut self, temp: &EntityId, server_id: EntityId) -> Vec<CollectionChange> {
        if !self.ledger.contains(temp) {
            return Vec::new();
        }
        if self.collection.is_deleted(&server_id) {
            self.ledger.remove(temp);
            return self
                .collection
                .remove(temp)
                .map(|row| vec![CollectionChange::Removed { row }])
                .unwrap_or_default();
        }
        if self.collection.contains(&server_id) {
            self.ledger.remove(temp);
            self.collection.remove(temp);
            debug!(entity = %self.entity, id = %server_id, local_id = %temp, "create confirmed before write returned");
            return vec![CollectionChange::Confirmed {
                id: server_id,
                local_id: temp.clone(),
            }];
        }
        self.ledger.assign_server_id(temp, server_id);
        Vec::new()
    }

    pub fn acknowledge_write(&mut self, id: &EntityId) {
        if let Some(patch) = self.ledger.get_mut(id) {
            patch.write_acknowledged = true;
        }
    }

    /// Rolls back a pending patch. A no-op if it was already confirmed.
    pub fn revert(&mut self, id: &EntityId, reason: RevertReason) -> Vec<CollectionChange> {
        let Some(patch) = self.ledger.remove(id) else {
            return Vec::new();
        };
        match patch.kind {
            PatchKind::Create => {
                self.collection.remove(id);
            }
            PatchKind::Update | PatchKind::Delete => {
                if let Some(base) = patch.base {
                    self.collection.upsert(base);
                }
            }
        }
        warn!(
            entity = %self.entity,
            id = %id,
            kind = %patch.kind,
            reason = %reason,
            write_acknowledged = patch.write_acknowledged,
            "optimistic change reverted"
        );
        vec![CollectionChange::Reverted {
            id: id.clone(),
            kind: patch.kind,
            reason,
        }]
    }

    /// Reverts every patch whose deadline has passed.
    pub fn expire(&mut self, now: Instant) -> Vec<CollectionChange> {
        self.ledger
            .expired(now)
            .into_iter()
            .flat_map(|id| self.revert(&id, RevertReason::TimedOut))
            .collect()
    }

    fn ensure_confirmed(&self, id: &EntityId) -> Result<(), TawreedError> {
        let pending_create = self
            .ledger
            .get(id)
            .is_some_and(|p| p.kind == PatchKind::Create);
        if id.is_temporary() || pending_create {
            return Err(TawreedError::Unconfirmed { id: id.clone() });
        }
        Ok(())
    }

    fn existing(&self, id: &EntityId) -> Result<Row, TawreedError> {
        self.collection
            .get(id)
            .cloned()
            .ok_or_else(|| TawreedError::NotFound {
                entity: self.entity,
                id: id.clone(),
            })
    }

    fn reconcile(&mut self, row: Row, mode: Mode, server_ts: Option<DateTime<Utc>>) -> Vec<CollectionChange> {
        if let Some(temp) = self.ledger.temp_id_for(&row.id).cloned() {
            return self.confirm_create(&temp, row, mode);
        }
        if let Some(patch) = self.ledger.get_mut(&row.id) {
            let superseded = match mode {
                Mode::Fetched => server_ts.is_some_and(|ts| ts >= patch.submitted_at),
                Mode::Replace | Mode::Merge => patch.superseded_by(server_ts),
            };
            if patch.kind == PatchKind::Update && superseded {
                let base = patch.base.take();
                let id = row.id.clone();
                let authoritative = match (mode, base) {
                    (Mode::Merge, Some(base)) => base.merged(&row),
                    _ => row,
                };
                self.ledger.remove(&id);
                self.collection.upsert(authoritative);
                debug!(entity = %self.entity, id = %id, "optimistic update confirmed");
                return vec![CollectionChange::Confirmed {
                    id: id.clone(),
                    local_id: id,
                }];
            }
            // Stale write, or a pending delete: keep the optimistic view and
            // remember the newer server state for a possible revert.
            let rebased = match (mode, patch.base.take()) {
                (Mode::Merge, Some(base)) => base.merged(&row),
                (Mode::Fetched, Some(base)) if row.is_older_than(&base) => base,
                _ => row,
            };
            debug!(entity = %self.entity, id = %rebased.id, kind = %patch.kind, "pending patch rebased");
            patch.base = Some(rebased);
            return Vec::new();
        }

        let id = row.id.clone();
        let outcome = match mode {
            Mode::Merge => self.collection.merge(&row),
            Mode::Fetched => {
                let stale = self
                    .collection
                    .get(&id)
                    .is_some_and(|existing| row.is_older_than(existing) || *existing == row);
                if stale {
                    debug!(entity = %self.entity, id = %id, "fetched row not newer, skipped");
                    return Vec::new();
                }
                self.collection.upsert(row)
            }
            Mode::Replace => self.collection.upsert(row),
        };
        let Some(current) = self.collection.get(&id).cloned() else {
            return Vec::new();
        };
        match outcome {
            Upsert::Inserted => vec![CollectionChange::Inserted { row: current }],
            Upsert::Replaced(previous) if previous == current => Vec::new(),
            Upsert::Replaced(previous) => vec![CollectionChange::Updated {
                previous,
                row: current,
            }],
            Upsert::Skipped => Vec::new(),
        }
    }

    fn confirm_create(&mut self, temp: &EntityId, row: Row, mode: Mode) -> Vec<CollectionChange> {
        let local = self
            .ledger
            .remove(temp)
            .and_then(|patch| patch.local_snapshot);
        self.collection.remove(temp);
        let server_id = row.id.clone();
        let authoritative = match (mode, local) {
            (Mode::Merge, Some(mut local)) => {
                local.id = server_id.clone();
                local.merged(&row)
            }
            _ => row,
        };
        if self.collection.upsert(authoritative) == Upsert::Skipped {
            return Vec::new();
        }
        debug!(entity = %self.entity, id = %server_id, local_id = %temp, "optimistic create confirmed");
        vec![CollectionChange::Confirmed {
            id: server_id,
            local_id: temp.clone(),
        }]
    }

    fn apply_delete(&mut self, id: &EntityId) -> Vec<CollectionChange> {
        if let Some(temp) = self.ledger.temp_id_for(id).cloned() {
            self.ledger.remove(&temp);
            self.collection.delete(id);
            return self
                .collection
                .remove(&temp)
                .map(|row| vec![CollectionChange::Removed { row }])
                .unwrap_or_default();
        }
        match self.ledger.get(id).map(|p| p.kind) {
            Some(PatchKind::Delete) => {
                self.ledger.remove(id);
                self.collection.delete(id);
                debug!(entity = %self.entity, id = %id, "optimistic delete confirmed");
                vec![CollectionChange::Confirmed {
                    id: id.clone(),
                    local_id: id.clone(),
                }]
            }
            pending => {
                if pending.is_some() {
                    self.ledger.remove(id);
                    warn!(entity = %self.entity, id = %id, "pending update overruled by remote delete");
                }
                self.collection
                    .delete(id)
                    .map(|row| vec![CollectionChange::Removed { row }])
                    .unwrap_or_default()
            }
        }
    }
}
