// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Semantic checks that serde attributes cannot express.
//!
//! Collects every failure instead of stopping at the first one.

use crate::diagnostic::ConfigError;
use crate::model::TawreedConfig;

pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

pub const MIN_INBOX_CAPACITY: usize = 16;
pub const MAX_PAGE_SIZE: usize = 1000;

pub fn validate_config(config: &TawreedConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let live = &config.live;

    if !LOG_LEVELS.contains(&config.logging.level.as_str()) {
        errors.push(ConfigError::validation(format!(
            "logging.level `{}` is not one of {}",
            config.logging.level,
            LOG_LEVELS.join(", ")
        )));
    }

    if live.handshake_attempts == 0 {
        errors.push(ConfigError::validation(
            "live.handshake_attempts must be at least 1",
        ));
    }

    if live.backoff_base_ms == 0 {
        errors.push(ConfigError::validation(
            "live.backoff_base_ms must be greater than 0",
        ));
    }

    if live.backoff_cap_ms < live.backoff_base_ms {
        errors.push(ConfigError::validation(format!(
            "live.backoff_cap_ms ({}) must not be below live.backoff_base_ms ({})",
            live.backoff_cap_ms, live.backoff_base_ms
        )));
    }

    if live.max_reconnect_attempts == Some(0) {
        errors.push(ConfigError::validation(
            "live.max_reconnect_attempts must be at least 1 when set",
        ));
    }

    if live.optimistic_timeout_ms == 0 {
        errors.push(ConfigError::validation(
            "live.optimistic_timeout_ms must be greater than 0",
        ));
    }

    if live.sweep_interval_ms == 0 {
        errors.push(ConfigError::validation(
            "live.sweep_interval_ms must be greater than 0",
        ));
    }

    if live.polling_interval_secs == 0 {
        errors.push(ConfigError::validation(
            "live.polling_interval_secs must be at least 1",
        ));
    }

    if !(1..=MAX_PAGE_SIZE).contains(&live.page_size) {
        errors.push(ConfigError::validation(format!(
            "live.page_size must be between 1 and {MAX_PAGE_SIZE}, got {}",
            live.page_size
        )));
    }

    if live.max_initial_pages == 0 {
        errors.push(ConfigError::validation(
            "live.max_initial_pages must be at least 1",
        ));
    }

    if live.inbox_capacity < MIN_INBOX_CAPACITY {
        errors.push(ConfigError::validation(format!(
            "live.inbox_capacity must be at least {MIN_INBOX_CAPACITY}, got {}",
            live.inbox_capacity
        )));
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}
