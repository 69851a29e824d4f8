// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Validation boundary between untyped feed payloads and typed events.
//!
//! Everything downstream of [`EventNormalizer`] works with [`ChangeEvent`]
//! and [`Row`]; malformed payloads stop here as a [`NormalizationWarning`].

use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use tawreed_core::{
    Change, ChangeEvent, ChangeOperation, EntityId, EntityKind, NormalizationWarning, RawChange,
    ReceiptStamp, Row,
};

use crate::adapters::adapter_for;

/// Stateless payload normalizer. All methods are pure.
#[derive(Debug, Default, Clone, Copy)]
pub struct EventNormalizer;

impl EventNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Converts a raw feed payload into a [`ChangeEvent`].
    ///
    /// Only the identity column is mandatory; any other column may be
    /// absent. An `old` snapshot that cannot be read is discarded rather
    /// than failing the event.
    pub fn normalize(
        &self,
        entity: EntityKind,
        raw: &RawChange,
        received_at: ReceiptStamp,
    ) -> Result<ChangeEvent, NormalizationWarning> {
        let operation = ChangeOperation::from_str(raw.event_type.trim())
            .map_err(|_| NormalizationWarning::UnknownOperation(raw.event_type.clone()))?;
        let new = present(raw.new_row.as_ref());
        let old = present(raw.old_row.as_ref());

        let change = match operation {
            ChangeOperation::Insert => Change::Insert {
                new: snapshot(entity, require(new, "INSERT")?)?,
            },
            ChangeOperation::Update => Change::Update {
                new: snapshot(entity, require(new, "UPDATE")?)?,
                old: old.and_then(|v| snapshot(entity, v).ok()),
            },
            ChangeOperation::Delete => Change::Delete {
                old: snapshot(entity, require(old, "DELETE")?)?,
            },
        };

        let committed_at = raw
            .commit_timestamp
            .as_deref()
            .map(|ts| {
                parse_timestamp(ts).ok_or_else(|| NormalizationWarning::BadTimestamp {
                    field: "commit_timestamp",
                    value: ts.to_string(),
                })
            })
            .transpose()?;

        Ok(ChangeEvent {
            entity,
            change,
            committed_at,
            received_at,
        })
    }

    /// Normalizes a row returned by a bulk query or a write.
    pub fn normalize_row(&self, entity: EntityKind, value: &Value) -> Result<Row, NormalizationWarning> {
        snapshot(entity, value)
    }

    /// Reads just the identity column of a row payload.
    pub fn identity(&self, value: &Value) -> Option<EntityId> {
        value.get("id").and_then(read_id)
    }

    /// Builds the locally displayed row for an optimistic insert. This is
    /// the only place the entity's required columns are enforced.
    pub fn local_row(
        &self,
        entity: EntityKind,
        id: EntityId,
        fields: &Map<String, Value>,
        created_at: DateTime<Utc>,
    ) -> Result<Row, NormalizationWarning> {
        let mut row = self.patch_row(entity, id, fields);
        check_required(entity, &row)?;
        row.created_at.get_or_insert(created_at);
        Ok(row)
    }

    /// Builds the partial row an optimistic update merges into the collection.
    ///
    /// Unparseable timestamp columns stay in the untyped fields.
    pub fn patch_row(&self, entity: EntityKind, id: EntityId, fields: &Map<String, Value>) -> Row {
        let mut fields = fields.clone();
        fields.remove("id");
        let created_at = take_timestamp(&mut fields, "created_at").unwrap_or_default();
        let updated_at = take_timestamp(&mut fields, "updated_at").unwrap_or_default();
        adapter_for(entity).derive(&mut fields);
        Row {
            id,
            created_at,
            updated_at,
            fields,
        }
    }
}

/// Empty objects and nulls count as an absent snapshot.
fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| match v {
        Value::Null => false,
        Value::Object(map) => !map.is_empty(),
        _ => true,
    })
}

fn require<'a>(value: Option<&'a Value>, operation: &'static str) -> Result<&'a Value, NormalizationWarning> {
    value.ok_or(NormalizationWarning::MissingSnapshot { operation })
}

fn snapshot(entity: EntityKind, value: &Value) -> Result<Row, NormalizationWarning> {
    let mut fields = value
        .as_object()
        .cloned()
        .ok_or(NormalizationWarning::NotAnObject)?;

    let id = fields
        .remove("id")
        .as_ref()
        .and_then(read_id)
        .ok_or(NormalizationWarning::MissingId)?;
    let created_at = take_timestamp(&mut fields, "created_at")?;
    let updated_at = take_timestamp(&mut fields, "updated_at")?;

    adapter_for(entity).derive(&mut fields);
    Ok(Row {
        id,
        created_at,
        updated_at,
        fields,
    })
}

fn read_id(value: &Value) -> Option<EntityId> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(EntityId::new(s.as_str())),
        Value::Number(n) => Some(EntityId::new(n.to_string())),
        _ => None,
    }
}

fn check_required(entity: EntityKind, row: &Row) -> Result<(), NormalizationWarning> {
    let missing = adapter_for(entity)
        .required_fields()
        .iter()
        .find(|field| row.get(field).is_none_or(Value::is_null));
    match missing {
        Some(field) => Err(NormalizationWarning::MissingField {
            entity,
            id: row.id.to_string(),
            field: *field,
        }),
        None => Ok(()),
    }
}

/// Removes a timestamp column from `fields` and parses it. The column is
/// left in place if it cannot be parsed.
fn take_timestamp(
    fields: &mut Map<String, Value>,
    field: &'static str,
) -> Result<Option<DateTime<Utc>>, NormalizationWarning> {
    match fields.get(field) {
        None | Some(Value::Null) => {
            fields.remove(field);
            Ok(None)
        }
        Some(Value::String(s)) => match parse_timestamp(s) {
            Some(ts) => {
                fields.remove(field);
                Ok(Some(ts))
            }
            None => Err(NormalizationWarning::BadTimestamp {
                field,
                value: s.clone(),
            }),
        },
        Some(other) => Err(NormalizationWarning::BadTimestamp {
            field,
            value: other.to_string(),
        }),
    }
}

/// Accepts RFC 3339 and the Postgres text form (`2024-01-01 10:00:00.123+00`).
/// Timestamps without an offset are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(ts) = DateTime::parse_from_str(value, format) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .into_iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}
