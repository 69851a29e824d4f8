// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types shared by the normalizer, the reconciler, and backend adapters.

use std::cmp::Reverse;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};

/// Prefix marking ids minted locally for optimistic inserts.
pub const TEMPORARY_ID_PREFIX: &str = "tmp-";

/// Identity key of a marketplace entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this id was minted locally and not yet assigned by the backend.
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMPORARY_ID_PREFIX)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The entity streams carried by the change feed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Request,
    Offer,
    Message,
    Notification,
    Order,
    Profile,
    Transaction,
    SupportTicket,
}

impl EntityKind {
    pub const ALL: [EntityKind; 8] = [
        EntityKind::Request,
        EntityKind::Offer,
        EntityKind::Message,
        EntityKind::Notification,
        EntityKind::Order,
        EntityKind::Profile,
        EntityKind::Transaction,
        EntityKind::SupportTicket,
    ];

    /// Backend table backing this entity stream.
    pub fn table(self) -> &'static str {
        match self {
            EntityKind::Request => "requests",
            EntityKind::Offer => "offers",
            EntityKind::Message => "messages",
            EntityKind::Notification => "notifications",
            EntityKind::Order => "orders",
            EntityKind::Profile => "profiles",
            EntityKind::Transaction => "transactions",
            EntityKind::SupportTicket => "support_tickets",
        }
    }

    /// Reverse of [`EntityKind::table`].
    pub fn from_table(table: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.table() == table)
    }
}

/// Role of the current actor, supplied by the identity context.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Client,
    Vendor,
    Admin,
}

/// Who is looking at the collection. Opaque to the core beyond filter building.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorIdentity {
    pub id: String,
    pub role: ActorRole,
}

impl ActorIdentity {
    pub fn new(id: impl Into<String>, role: ActorRole) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }
}

/// Severity passed to the notification sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// Connection state of one change-feed channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Handshake in progress.
    Connecting,
    /// Handshake acknowledged; events are flowing.
    Subscribed,
    /// Transport dropped; resubscribing with backoff.
    Degraded,
    /// Torn down, either by the owner or after a fatal handshake failure.
    Closed,
}

/// Health status reported by adapter health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

/// Identifies the kind of backend adapter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum AdapterType {
    DataService,
    ChangeFeed,
    Notifier,
}

/// Row predicate used for both bulk queries and change-feed channels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Filter {
    /// Every row the actor is allowed to see.
    All,
    /// `column = value`.
    Eq { column: String, value: String },
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Evaluates the filter against a raw backend row.
    pub fn matches(&self, row: &Map<String, Value>) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq { column, value } => match row.get(column) {
                Some(Value::String(s)) => s == value,
                Some(Value::Number(n)) => n.to_string() == *value,
                Some(Value::Bool(b)) => b.to_string() == *value,
                _ => false,
            },
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::All => f.write_str("*"),
            Filter::Eq { column, value } => write!(f, "{column}=eq.{value}"),
        }
    }
}

/// A page request against the bulk-query operation.
///
/// Backends return rows ordered by `created_at` descending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowQuery {
    pub filter: Filter,
    pub offset: usize,
    pub limit: usize,
}

/// One page of raw backend rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowPage {
    pub rows: Vec<Map<String, Value>>,
    /// Offset of the next page, `None` when exhausted.
    pub next_offset: Option<usize>,
}

/// Sort key of the reconciled collection: `created_at` descending, then `id`.
///
/// Rows without `created_at` sort after every dated row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SortKey {
    created_at: Reverse<Option<DateTime<Utc>>>,
    id: EntityId,
}

/// A normalized entity snapshot.
///
/// Identity and sort-key columns are typed; every other column is kept as
/// JSON so shallow merges of partial update payloads stay lossless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Row {
    pub fn new(id: impl Into<EntityId>) -> Self {
        Self {
            id: id.into(),
            created_at: None,
            updated_at: None,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    pub fn with_updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn sort_key(&self) -> SortKey {
        SortKey {
            created_at: Reverse(self.created_at),
            id: self.id.clone(),
        }
    }

    /// Shallow merge: every field present in `patch` overwrites ours.
    pub fn merge(&mut self, patch: &Row) {
        for (k, v) in &patch.fields {
            self.fields.insert(k.clone(), v.clone());
        }
        if patch.created_at.is_some() {
            self.created_at = patch.created_at;
        }
        if patch.updated_at.is_some() {
            self.updated_at = patch.updated_at;
        }
    }

    pub fn merged(&self, patch: &Row) -> Row {
        let mut out = self.clone();
        out.merge(patch);
        out
    }

    /// Whether `self` is known to be older than `other`.
    pub fn is_older_than(&self, other: &Row) -> bool {
        matches!((self.updated_at, other.updated_at), (Some(a), Some(b)) if a < b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
    }

    #[test]
    fn entity_kind_parses_snake_case_and_tables() {
        use std::str::FromStr;
        assert_eq!(
            EntityKind::from_str("support_ticket").unwrap(),
            EntityKind::SupportTicket
        );
        assert_eq!(EntityKind::from_str("Request").unwrap(), EntityKind::Request);
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_table(kind.table()), Some(kind));
        }
        assert_eq!(EntityKind::from_table("audit_log"), None);
    }

    #[test]
    fn sort_key_orders_newest_first_then_id() {
        let newer = Row::new("b").with_created_at(at(10, 5));
        let older = Row::new("a").with_created_at(at(10, 0));
        let tie = Row::new("c").with_created_at(at(10, 5));
        let undated = Row::new("0");

        assert!(newer.sort_key() < older.sort_key());
        assert!(newer.sort_key() < tie.sort_key());
        assert!(older.sort_key() < undated.sort_key());
    }

    #[test]
    fn merge_overwrites_only_present_fields() {
        let mut row = Row::new("r1")
            .with_created_at(at(10, 0))
            .with_field("title", "Audio gear")
            .with_field("status", "open");
        row.merge(&Row::new("r1").with_field("title", "Audio gear v2"));

        assert_eq!(row.get_str("title"), Some("Audio gear v2"));
        assert_eq!(row.get_str("status"), Some("open"));
        assert_eq!(row.created_at, Some(at(10, 0)));
    }

    #[test]
    fn filter_matches_strings_and_numbers() {
        let mut row = Map::new();
        row.insert("client_id".into(), Value::from("u1"));
        row.insert("amount".into(), Value::from(42));

        assert!(Filter::All.matches(&row));
        assert!(Filter::eq("client_id", "u1").matches(&row));
        assert!(Filter::eq("amount", "42").matches(&row));
        assert!(!Filter::eq("client_id", "u2").matches(&row));
        assert!(!Filter::eq("vendor_id", "u1").matches(&row));
        assert_eq!(Filter::eq("client_id", "u1").to_string(), "client_id=eq.u1");
    }

    #[test]
    fn row_serializes_flat() {
        let row = Row::new("r1")
            .with_created_at(at(10, 0))
            .with_field("title", "Desk");
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["id"], "r1");
        assert_eq!(json["title"], "Desk");
        assert!(json.get("updated_at").is_none());
    }

    #[test]
    fn temporary_ids_are_recognized() {
        assert!(EntityId::new("tmp-123").is_temporary());
        assert!(!EntityId::new("r9").is_temporary());
    }
}
