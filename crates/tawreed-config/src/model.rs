// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model.
//!
//! Every struct uses `#[serde(deny_unknown_fields)]` so a mistyped key is
//! reported at startup instead of silently falling back to a default.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration. All sections are optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TawreedConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Subscription, reconciliation and optimistic-write tuning.
    #[serde(default)]
    pub live: LiveConfig,

    #[serde(default)]
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Tuning for change-feed subscriptions and the reconciler.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LiveConfig {
    /// Handshake attempts before a channel is declared lost.
    #[serde(default = "default_handshake_attempts")]
    pub handshake_attempts: u32,

    /// First resubscribe delay; doubles on every further attempt.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Upper bound for the resubscribe delay.
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Bound on resubscribe attempts after a mid-session drop. Unset retries forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_reconnect_attempts: Option<u32>,

    /// How long an optimistic change waits for its confirming event.
    #[serde(default = "default_optimistic_timeout_ms")]
    pub optimistic_timeout_ms: u64,

    /// How often pending optimistic changes are checked for expiry.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Refresh period once live updates are lost.
    #[serde(default = "default_polling_interval_secs")]
    pub polling_interval_secs: u64,

    /// Rows per bulk-query page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Pages fetched when a collection mounts.
    #[serde(default = "default_max_initial_pages")]
    pub max_initial_pages: usize,

    /// Change events buffered per collection.
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            handshake_attempts: default_handshake_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            max_reconnect_attempts: None,
            optimistic_timeout_ms: default_optimistic_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            polling_interval_secs: default_polling_interval_secs(),
            page_size: default_page_size(),
            max_initial_pages: default_max_initial_pages(),
            inbox_capacity: default_inbox_capacity(),
        }
    }
}

impl LiveConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }

    pub fn optimistic_timeout(&self) -> Duration {
        Duration::from_millis(self.optimistic_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }
}

fn default_handshake_attempts() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_cap_ms() -> u64 {
    30_000
}

fn default_optimistic_timeout_ms() -> u64 {
    10_000
}

fn default_sweep_interval_ms() -> u64 {
    500
}

fn default_polling_interval_secs() -> u64 {
    30
}

fn default_page_size() -> usize {
    50
}

fn default_max_initial_pages() -> usize {
    4
}

fn default_inbox_capacity() -> usize {
    1024
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationsConfig {
    /// Toast confirmed changes made by other actors (new offer, status change, ...).
    #[serde(default = "default_true")]
    pub announce_remote_changes: bool,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            announce_remote_changes: true,
        }
    }
}

fn default_true() -> bool {
    true
}
