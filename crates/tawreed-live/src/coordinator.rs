// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Optimistic create/update/delete.
//!
//! Each call applies its patch to the collection before the remote write,
//! so readers see the change immediately. A failed write reverts the patch,
//! notifies the user, and returns the error; it is never retried. Calls for
//! the same id are serialized on a per-id lock held across the remote
//! round-trip.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use tawreed_core::{
    DataService, EntityId, RemoteWriteError, Row, Severity, TawreedError, TEMPORARY_ID_PREFIX,
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::lock;
use crate::reconciler::RevertReason;
use crate::state::Shared;

/// Per-id async locks. Entries nobody holds or waits on are pruned.
#[derive(Debug, Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<EntityId, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    async fn acquire(&self, id: &EntityId) -> OwnedMutexGuard<()> {
        let slot = {
            let mut locks = lock(&self.locks);
            locks.retain(|_, slot| Arc::strong_count(slot) > 1);
            Arc::clone(locks.entry(id.clone()).or_default())
        };
        slot.lock_owned().await
    }
}

pub struct MutationCoordinator {
    shared: Arc<Shared>,
    data: Arc<dyn DataService>,
    locks: KeyedLocks,
    timeout: Duration,
}

impl MutationCoordinator {
    pub(crate) fn new(shared: Arc<Shared>, data: Arc<dyn DataService>, timeout: Duration) -> Self {
        Self {
            shared,
            data,
            locks: KeyedLocks::default(),
            timeout,
        }
    }

    /// Shows the new row under a temporary id, then inserts it remotely.
    ///
    /// Resolves with the row as written by the backend. The temporary row is
    /// swapped for the server row when the confirming event arrives. Once the
    /// backend has accepted the insert the call succeeds, even if its
    /// response cannot be read.
    pub async fn create(&self, fields: Map<String, Value>) -> Result<Row, TawreedError> {
        let entity = self.shared.entity();
        let temp = EntityId::new(format!("{TEMPORARY_ID_PREFIX}{}", uuid::Uuid::new_v4()));
        let submitted_at = Utc::now();
        let local = self
            .shared
            .normalizer()
            .local_row(entity, temp.clone(), &fields, submitted_at)?;
        let deadline = Instant::now() + self.timeout;
        self.shared
            .try_commit(|r| Ok(r.begin_create(local.clone(), submitted_at, deadline)))?;
        debug!(entity = %entity, id = %temp, "optimistic create applied");

        let result = self.data.insert(entity, fields).await;
        let written = match result {
            Ok(written) => written,
            Err(err) => return Err(self.fail(&temp, err)),
        };
        let row = self.read_written(written, local);
        if row.id == temp {
            self.shared.commit(|r| {
                r.acknowledge_write(&temp);
                Vec::new()
            });
        } else {
            self.shared
                .commit(|r| r.acknowledge_create(&temp, row.id.clone()));
        }
        debug!(entity = %entity, id = %row.id, local_id = %temp, "create written");
        Ok(row)
    }

    /// Merges `patch` into the row locally, then updates it remotely.
    pub async fn update(&self, id: &EntityId, patch: Map<String, Value>) -> Result<Row, TawreedError> {
        if id.is_temporary() {
            return Err(TawreedError::Unconfirmed { id: id.clone() });
        }
        let _guard = self.locks.acquire(id).await;
        let entity = self.shared.entity();
        let local = self.shared.normalizer().patch_row(entity, id.clone(), &patch);
        let submitted_at = Utc::now();
        let deadline = Instant::now() + self.timeout;
        self.shared
            .try_commit(|r| r.begin_update(&local, submitted_at, deadline))?;
        debug!(entity = %entity, id = %id, "optimistic update applied");

        let written = match self.data.update(entity, id, patch).await {
            Ok(written) => written,
            Err(err) => return Err(self.fail(id, err)),
        };
        self.shared.commit(|r| {
            r.acknowledge_write(id);
            Vec::new()
        });
        Ok(self.read_written(written, local))
    }

    /// Hides the row locally, then deletes it remotely.
    pub async fn delete(&self, id: &EntityId) -> Result<(), TawreedError> {
        if id.is_temporary() {
            return Err(TawreedError::Unconfirmed { id: id.clone() });
        }
        let _guard = self.locks.acquire(id).await;
        let entity = self.shared.entity();
        let submitted_at = Utc::now();
        let deadline = Instant::now() + self.timeout;
        self.shared
            .try_commit(|r| r.begin_delete(id, submitted_at, deadline))?;
        debug!(entity = %entity, id = %id, "optimistic delete applied");

        if let Err(err) = self.data.delete(entity, id).await {
            return Err(self.fail(id, err));
        }
        self.shared.commit(|r| {
            r.acknowledge_write(id);
            Vec::new()
        });
        Ok(())
    }

    /// Reads the backend's copy of an accepted write. An unreadable response
    /// falls back to `local`, keeping the server id when it can be read.
    fn read_written(&self, written: Map<String, Value>, mut local: Row) -> Row {
        let entity = self.shared.entity();
        let written = Value::Object(written);
        let normalizer = self.shared.normalizer();
        match normalizer.normalize_row(entity, &written) {
            Ok(row) => row,
            Err(warning) => {
                warn!(
                    entity = %entity,
                    id = %local.id,
                    error = %warning,
                    "unreadable write response, keeping local row"
                );
                if let Some(id) = normalizer.identity(&written) {
                    local.id = id;
                }
                local
            }
        }
    }

    /// Reverts the patch for `id` and surfaces the write failure.
    fn fail(&self, id: &EntityId, err: RemoteWriteError) -> TawreedError {
        warn!(
            entity = %self.shared.entity(),
            id = %id,
            kind = %err.kind,
            error = %err.message,
            "remote write failed"
        );
        self.shared
            .commit(|r| r.revert(id, RevertReason::WriteFailed));
        self.shared.notify(err.title(), &err.message, Severity::Error);
        err.into()
    }
}
