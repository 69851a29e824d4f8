// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Base trait shared by backend adapters.

use async_trait::async_trait;

use crate::error::TawreedError;
use crate::types::{AdapterType, HealthStatus};

/// Identity and health reporting for a backend adapter.
#[async_trait]
pub trait ServiceAdapter: Send + Sync + 'static {
    /// Human-readable adapter name, used in log fields.
    fn name(&self) -> &str;

    fn version(&self) -> semver::Version;

    fn adapter_type(&self) -> AdapterType;

    async fn health_check(&self) -> Result<HealthStatus, TawreedError>;
}
