// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fire-and-forget user notification sink.

use tracing::{error, info, warn};

use crate::types::Severity;

/// Surfaces confirmed changes and errors to the user (toasts, banners).
///
/// Must not block; rendering is entirely the sink's concern.
pub trait NotificationSink: Send + Sync + 'static {
    fn notify(&self, title: &str, message: &str, severity: Severity);
}

/// Sink that writes notifications to the log. Used by the CLI.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn notify(&self, title: &str, message: &str, severity: Severity) {
        match severity {
            Severity::Info | Severity::Success => info!(%severity, title, message, "notification"),
            Severity::Warning => warn!(title, message, "notification"),
            Severity::Error => error!(title, message, "notification"),
        }
    }
}
