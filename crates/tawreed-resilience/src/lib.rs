// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resilience primitives for Tawreed.
//!
//! - [`BackoffPolicy`]: capped exponential delays for resubscription.
//! - [`ScheduledTask`]: a background task owned through an explicit handle
//!   and cancelled deterministically on teardown.

pub mod backoff;
pub mod scheduled;

pub use backoff::{Backoff, BackoffPolicy};
pub use scheduled::ScheduledTask;
