// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter traits for the external collaborators of a live collection.
//!
//! The hosted backend is split into a [`DataService`] (bulk query and row
//! writes) and a [`ChangeFeed`] (row-level change subscription). Both extend
//! [`ServiceAdapter`] and use `#[async_trait]` for dynamic dispatch.

pub mod adapter;
pub mod data;
pub mod feed;
pub mod notify;

pub use adapter::ServiceAdapter;
pub use data::DataService;
pub use feed::{ChangeFeed, RawChangeStream};
pub use notify::{NotificationSink, TracingNotifier};
