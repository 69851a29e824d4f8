// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Notification sink that records what it was asked to show.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tawreed_core::{NotificationSink, Severity};

/// One captured notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub message: String,
    pub severity: Severity,
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// All notices in the order they were sent.
    pub fn notices(&self) -> Vec<Notice> {
        self.guard().clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.guard().iter().map(|n| n.title.clone()).collect()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.guard().iter().filter(|n| n.severity == severity).count()
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    pub fn clear(&self) {
        self.guard().clear();
    }

    fn guard(&self) -> MutexGuard<'_, Vec<Notice>> {
        self.notices.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, title: &str, message: &str, severity: Severity) {
        self.guard().push(Notice {
            title: title.to_string(),
            message: message.to_string(),
            severity,
        });
    }
}
