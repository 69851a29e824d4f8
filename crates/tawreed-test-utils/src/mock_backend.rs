// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory backend for deterministic testing.
//!
//! `MockBackend` implements both `DataService` and `ChangeFeed` over the same
//! tables. Writes are echoed to open channels the way the hosted backend's
//! change feed would report them, and failures can be scripted per call.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use futures::channel::mpsc;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use tawreed_core::traits::RawChangeStream;
use tawreed_core::{
    AdapterType, ChangeFeed, ChangeOperation, DataService, EntityId, EntityKind, Filter,
    HealthStatus, RawChange, RemoteWriteError, RowPage, RowQuery, ServiceAdapter, TawreedError,
    TransportError,
};

type Sender = mpsc::UnboundedSender<Result<RawChange, TransportError>>;

struct Channel {
    entity: EntityKind,
    filter: Filter,
    tx: Sender,
}

struct BackendState {
    tables: HashMap<EntityKind, Vec<Map<String, Value>>>,
    channels: Vec<Channel>,
    failing_subscribes: u32,
    failing_queries: u32,
    failing_writes: VecDeque<RemoteWriteError>,
    echo: bool,
    write_delay: Option<Duration>,
    subscribe_calls: u32,
    query_calls: u32,
    next_id: u64,
}

/// A mock hosted backend for testing.
///
/// Provides:
/// - **tables**: rows seeded via `seed()` or written through `DataService`
/// - **feed**: channels opened via `subscribe()`, fed by `emit()` and by echoed writes
pub struct MockBackend {
    state: Arc<Mutex<BackendState>>,
}

impl MockBackend {
    /// Create an empty backend that echoes writes to the change feed.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BackendState {
                tables: HashMap::new(),
                channels: Vec::new(),
                failing_subscribes: 0,
                failing_queries: 0,
                failing_writes: VecDeque::new(),
                echo: true,
                write_delay: None,
                subscribe_calls: 0,
                query_calls: 0,
                next_id: 0,
            })),
        }
    }

    /// Add rows to a table without emitting change events.
    pub async fn seed(&self, entity: EntityKind, rows: impl IntoIterator<Item = Value>) {
        let mut state = self.state.lock().await;
        let table = state.tables.entry(entity).or_default();
        table.extend(rows.into_iter().filter_map(|row| match row {
            Value::Object(map) => Some(map),
            _ => None,
        }));
    }

    /// Push a raw change to every open channel whose filter matches it.
    ///
    /// Does not touch the tables.
    pub async fn emit(&self, entity: EntityKind, change: RawChange) {
        let mut state = self.state.lock().await;
        state.broadcast(entity, change);
    }

    /// Fail every open channel with a transport error.
    pub async fn drop_connections(&self) {
        let mut state = self.state.lock().await;
        for channel in state.channels.drain(..) {
            let _ = channel
                .tx
                .unbounded_send(Err(TransportError::new("connection reset by peer")));
        }
    }

    /// Make the next `n` subscribe calls fail.
    pub async fn fail_next_subscribes(&self, n: u32) {
        self.state.lock().await.failing_subscribes = n;
    }

    /// Make the next `n` queries fail.
    pub async fn fail_next_queries(&self, n: u32) {
        self.state.lock().await.failing_queries = n;
    }

    /// Make the next write fail with `err`. Queued failures apply in order.
    pub async fn fail_next_write(&self, err: RemoteWriteError) {
        self.state.lock().await.failing_writes.push_back(err);
    }

    /// Whether successful writes are reported on the change feed.
    pub async fn set_echo(&self, echo: bool) {
        self.state.lock().await.echo = echo;
    }

    /// Delay every write by `delay` before it is applied.
    pub async fn set_write_delay(&self, delay: Duration) {
        self.state.lock().await.write_delay = Some(delay);
    }

    pub async fn subscribe_calls(&self) -> u32 {
        self.state.lock().await.subscribe_calls
    }

    pub async fn query_calls(&self) -> u32 {
        self.state.lock().await.query_calls
    }

    /// Channels still open.
    pub async fn open_channels(&self) -> usize {
        let mut state = self.state.lock().await;
        state.channels.retain(|c| !c.tx.is_closed());
        state.channels.len()
    }

    /// Current contents of a table.
    pub async fn rows(&self, entity: EntityKind) -> Vec<Map<String, Value>> {
        self.state
            .lock()
            .await
            .tables
            .get(&entity)
            .cloned()
            .unwrap_or_default()
    }

    async fn before_write(&self) -> Result<(), RemoteWriteError> {
        let delay = self.state.lock().await.write_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.state.lock().await.failing_writes.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendState {
    fn broadcast(&mut self, entity: EntityKind, mut change: RawChange) {
        change.table.get_or_insert_with(|| entity.table().to_string());
        let snapshot = match change.event_type.parse::<ChangeOperation>() {
            Ok(ChangeOperation::Delete) => change.old_row.clone(),
            _ => change.new_row.clone(),
        };
        self.channels.retain(|c| !c.tx.is_closed());
        for channel in self.channels.iter().filter(|c| c.entity == entity) {
            let visible = match (&channel.filter, snapshot.as_ref()) {
                (Filter::All, _) => true,
                (filter, Some(Value::Object(row))) => filter.matches(row),
                _ => false,
            };
            if visible {
                let _ = channel.tx.unbounded_send(Ok(change.clone()));
            }
        }
    }

    fn table(&mut self, entity: EntityKind) -> &mut Vec<Map<String, Value>> {
        self.tables.entry(entity).or_default()
    }
}

fn now() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true))
}

fn row_id(row: &Map<String, Value>) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

#[async_trait]
impl ServiceAdapter for MockBackend {
    fn name(&self) -> &str {
        "mock-backend"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::DataService
    }

    async fn health_check(&self) -> Result<HealthStatus, TawreedError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl DataService for MockBackend {
    async fn query(&self, entity: EntityKind, query: &RowQuery) -> Result<RowPage, TransportError> {
        let mut state = self.state.lock().await;
        state.query_calls += 1;
        if state.failing_queries > 0 {
            state.failing_queries -= 1;
            return Err(TransportError::new("query failed"));
        }
        let mut rows: Vec<Map<String, Value>> = state
            .table(entity)
            .iter()
            .filter(|row| query.filter.matches(row))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            let created = |r: &Map<String, Value>| {
                r.get("created_at")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            };
            created(b)
                .cmp(&created(a))
                .then_with(|| row_id(a).cmp(&row_id(b)))
        });
        let total = rows.len();
        let page: Vec<_> = rows.into_iter().skip(query.offset).take(query.limit).collect();
        let end = query.offset + page.len();
        Ok(RowPage {
            rows: page,
            next_offset: (end < total).then_some(end),
        })
    }

    async fn insert(
        &self,
        entity: EntityKind,
        mut row: Map<String, Value>,
    ) -> Result<Map<String, Value>, RemoteWriteError> {
        self.before_write().await?;
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = format!("srv-{}", state.next_id);
        row.insert("id".into(), Value::String(id));
        let stamp = now();
        row.entry("created_at").or_insert_with(|| stamp.clone());
        row.insert("updated_at".into(), stamp);
        state.table(entity).push(row.clone());
        if state.echo {
            state.broadcast(entity, RawChange::insert(Value::Object(row.clone())));
        }
        Ok(row)
    }

    async fn update(
        &self,
        entity: EntityKind,
        id: &EntityId,
        patch: Map<String, Value>,
    ) -> Result<Map<String, Value>, RemoteWriteError> {
        self.before_write().await?;
        let mut state = self.state.lock().await;
        let Some(row) = state
            .table(entity)
            .iter_mut()
            .find(|r| row_id(r) == Some(id.as_str()))
        else {
            return Err(RemoteWriteError::rejected(format!("{entity} {id} does not exist")));
        };
        let old = row.clone();
        row.extend(patch);
        row.insert("updated_at".into(), now());
        let written = row.clone();
        if state.echo {
            state.broadcast(
                entity,
                RawChange::update(Value::Object(written.clone()), Some(Value::Object(old))),
            );
        }
        Ok(written)
    }

    async fn delete(&self, entity: EntityKind, id: &EntityId) -> Result<(), RemoteWriteError> {
        self.before_write().await?;
        let mut state = self.state.lock().await;
        let table = state.table(entity);
        let Some(pos) = table.iter().position(|r| row_id(r) == Some(id.as_str())) else {
            return Err(RemoteWriteError::rejected(format!("{entity} {id} does not exist")));
        };
        let old = table.remove(pos);
        if state.echo {
            state.broadcast(entity, RawChange::delete(Value::Object(old)));
        }
        Ok(())
    }
}

#[async_trait]
impl ChangeFeed for MockBackend {
    async fn subscribe(
        &self,
        entity: EntityKind,
        filter: &Filter,
    ) -> Result<RawChangeStream, TransportError> {
        let mut state = self.state.lock().await;
        state.subscribe_calls += 1;
        if state.failing_subscribes > 0 {
            state.failing_subscribes -= 1;
            return Err(TransportError::new("handshake refused"));
        }
        let (tx, rx) = mpsc::unbounded();
        state.channels.push(Channel {
            entity,
            filter: filter.clone(),
            tx,
        });
        Ok(Box::pin(rx))
    }
}
