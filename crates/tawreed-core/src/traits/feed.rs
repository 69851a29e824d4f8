// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Change-feed subscription of the hosted backend.

use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::error::TransportError;
use crate::event::RawChange;
use crate::traits::adapter::ServiceAdapter;
use crate::types::{EntityKind, Filter};

/// Stream of raw changes for one channel.
///
/// An `Err` item or the end of the stream means the transport dropped.
pub type RawChangeStream = Pin<Box<dyn Stream<Item = Result<RawChange, TransportError>> + Send>>;

/// Row-level change subscription.
#[async_trait]
pub trait ChangeFeed: ServiceAdapter {
    /// Opens a channel for `entity` rows matching `filter`.
    ///
    /// Returning `Ok` is the handshake acknowledgement. Changes for one row
    /// must be yielded in commit order.
    async fn subscribe(
        &self,
        entity: EntityKind,
        filter: &Filter,
    ) -> Result<RawChangeStream, TransportError>;
}
