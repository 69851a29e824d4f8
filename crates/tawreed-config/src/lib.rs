// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for Tawreed live collections.
//!
//! TOML with `deny_unknown_fields`, layered over compiled defaults and
//! overridable through `TAWREED_*` environment variables. Failures are
//! reported as miette diagnostics with typo suggestions.
//!
//! ```no_run
//! let config = tawreed_config::load_and_validate().expect("config errors");
//! println!("page size: {}", config.live.page_size);
//! ```

pub mod diagnostic;
pub mod loader;
pub mod model;
pub mod validation;

use std::path::Path;

pub use diagnostic::{ConfigError, ConfigSource, render_errors};
pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::{LiveConfig, LoggingConfig, NotificationsConfig, TawreedConfig};

/// Loads the layered configuration and validates it.
pub fn load_and_validate() -> Result<TawreedConfig, Vec<ConfigError>> {
    let paths = loader::config_paths();
    finish(loader::load_config(), read_sources(&paths))
}

pub fn load_and_validate_str(toml_content: &str) -> Result<TawreedConfig, Vec<ConfigError>> {
    finish(
        loader::load_config_from_str(toml_content),
        || vec![ConfigSource::new("<inline>", toml_content)],
    )
}

/// Loads one explicit file (plus environment overrides) and validates it.
pub fn load_and_validate_path(path: &Path) -> Result<TawreedConfig, Vec<ConfigError>> {
    let paths = [path.to_path_buf()];
    finish(loader::load_config_from_path(path), read_sources(&paths))
}

fn finish(
    loaded: Result<TawreedConfig, figment::Error>,
    sources: impl FnOnce() -> Vec<ConfigSource>,
) -> Result<TawreedConfig, Vec<ConfigError>> {
    match loaded {
        Ok(config) => {
            validation::validate_config(&config)?;
            tracing::debug!(
                level = %config.logging.level,
                page_size = config.live.page_size,
                "configuration loaded"
            );
            Ok(config)
        }
        Err(err) => Err(diagnostic::figment_to_config_errors(err, &sources())),
    }
}

/// Reads source text lazily, only once an error needs a span.
fn read_sources(paths: &[std::path::PathBuf]) -> impl FnOnce() -> Vec<ConfigSource> + '_ {
    move || {
        paths
            .iter()
            .filter_map(|path| {
                let content = std::fs::read_to_string(path).ok()?;
                let display = std::path::absolute(path)
                    .unwrap_or_else(|_| path.clone())
                    .display()
                    .to_string();
                Some(ConfigSource::new(display, content))
            })
            .collect()
    }
}
