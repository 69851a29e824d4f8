// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bulk query and row-write operations of the hosted backend.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{RemoteWriteError, TransportError};
use crate::traits::adapter::ServiceAdapter;
use crate::types::{EntityId, EntityKind, RowPage, RowQuery};

/// Row-level data access for one backend.
///
/// Rows cross this boundary untyped; the normalizer validates them.
#[async_trait]
pub trait DataService: ServiceAdapter {
    /// Returns one page of rows matching the filter, newest first.
    async fn query(&self, entity: EntityKind, query: &RowQuery) -> Result<RowPage, TransportError>;

    /// Inserts a row and returns it as written (with its server-assigned id).
    async fn insert(
        &self,
        entity: EntityKind,
        row: Map<String, Value>,
    ) -> Result<Map<String, Value>, RemoteWriteError>;

    /// Applies a partial update and returns the full written row.
    async fn update(
        &self,
        entity: EntityKind,
        id: &EntityId,
        patch: Map<String, Value>,
    ) -> Result<Map<String, Value>, RemoteWriteError>;

    async fn delete(&self, entity: EntityKind, id: &EntityId) -> Result<(), RemoteWriteError>;
}
