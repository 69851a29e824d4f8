// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Tawreed integration tests.
//!
//! Provides an in-memory backend and test harness infrastructure for fast,
//! deterministic, CI-runnable tests without a hosted backend.
//!
//! # Components
//!
//! - [`MockBackend`] - In-memory tables plus a controllable change feed
//! - [`RecordingNotifier`] - Notification sink that captures every notice
//! - [`TestHarness`] - Mounts live collections against the two with fast timings

pub mod harness;
pub mod mock_backend;
pub mod recording_notifier;

pub use harness::{TestHarness, eventually, fast_settings};
pub use mock_backend::MockBackend;
pub use recording_notifier::{Notice, RecordingNotifier};
