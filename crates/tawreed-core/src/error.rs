// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for Tawreed live collections.
//!
//! Transport and subscription failures are mostly recovered internally.
//! Only fatal subscription loss and remote write failures reach consumers.
//! Malformed change payloads surface as [`NormalizationWarning`], which is
//! logged and dropped rather than propagated.

use thiserror::Error;

use crate::types::{EntityId, EntityKind, Filter};

/// The primary error type returned by consumer-facing operations.
#[derive(Debug, Error)]
pub enum TawreedError {
    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(String),

    /// A change-feed channel was lost for good.
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    /// A transport call (bulk query, subscribe) failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A create/update/delete was refused by the backend.
    #[error(transparent)]
    RemoteWrite(#[from] RemoteWriteError),

    /// A row returned by the backend could not be normalized.
    #[error("malformed row: {0}")]
    Normalization(#[from] NormalizationWarning),

    /// The entity is still a local optimistic insert without a server id.
    #[error("entity {id} has not been confirmed by the backend yet")]
    Unconfirmed { id: EntityId },

    /// The entity is not present in the local collection.
    #[error("{entity} {id} is not in the collection")]
    NotFound { entity: EntityKind, id: EntityId },

    /// The owning collection was unmounted while the operation was in flight.
    #[error("collection was unmounted")]
    Unmounted,

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A change-feed channel exhausted its handshake attempts.
///
/// Fatal for the handle that produced it: the handle is `Closed` and the
/// owner should fall back to polling or show a persistent error.
#[derive(Debug, Clone, Error)]
#[error("live updates unavailable for {entity} ({filter}) after {attempts} attempts{}", last_error_suffix(.last_error))]
pub struct SubscriptionError {
    pub entity: EntityKind,
    pub filter: Filter,
    pub attempts: u32,
    pub last_error: Option<String>,
}

fn last_error_suffix(last: &Option<String>) -> String {
    match last {
        Some(e) => format!(": {e}"),
        None => String::new(),
    }
}

/// A recoverable transport failure (dropped connection, refused handshake).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transport error: {message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Backend classification of a failed row write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum WriteFailure {
    /// The write raced another writer (stale version, unique violation).
    Conflict,
    /// Validation or permission failure.
    Rejected,
    /// The backend could not be reached. Still never retried automatically.
    Transient,
}

/// A create/update/delete failed on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} write failure: {message}")]
pub struct RemoteWriteError {
    pub kind: WriteFailure,
    pub message: String,
}

impl RemoteWriteError {
    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            kind: WriteFailure::Conflict,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: WriteFailure::Rejected,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: WriteFailure::Transient,
            message: message.into(),
        }
    }

    /// Short user-facing title for the notification sink.
    pub fn title(&self) -> &'static str {
        match self.kind {
            WriteFailure::Conflict => "Someone else changed this first",
            WriteFailure::Rejected => "Change was not accepted",
            WriteFailure::Transient => "Could not reach the server",
        }
    }
}

/// Why a raw change payload was dropped at the normalizer boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationWarning {
    #[error("row has no usable `id`")]
    MissingId,

    #[error("{entity} row {id} is missing required field `{field}`")]
    MissingField {
        entity: EntityKind,
        id: String,
        field: &'static str,
    },

    #[error("row snapshot is not a JSON object")]
    NotAnObject,

    #[error("unknown change operation `{0}`")]
    UnknownOperation(String),

    #[error("{operation} event carries no row snapshot")]
    MissingSnapshot { operation: &'static str },

    #[error("field `{field}` has unparseable timestamp `{value}`")]
    BadTimestamp { field: &'static str, value: String },
}
