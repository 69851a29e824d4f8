// SPDX-FileCopyrightText: 2026 Tawreed Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered configuration loading.
//!
//! Merge order, later wins: compiled defaults, `/etc/tawreed/tawreed.toml`,
//! `$XDG_CONFIG_HOME/tawreed/tawreed.toml`, `./tawreed.toml`, then
//! `TAWREED_*` environment variables.

#![allow(clippy::result_large_err)]

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::TawreedConfig;

pub const SYSTEM_CONFIG_PATH: &str = "/etc/tawreed/tawreed.toml";
pub const LOCAL_CONFIG_PATH: &str = "tawreed.toml";

/// Sections that may be addressed through `TAWREED_<SECTION>_<KEY>`.
const ENV_SECTIONS: [&str; 3] = ["live", "logging", "notifications"];

/// Candidate configuration files, lowest precedence first.
pub fn config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(SYSTEM_CONFIG_PATH)];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("tawreed").join("tawreed.toml"));
    }
    paths.push(PathBuf::from(LOCAL_CONFIG_PATH));
    paths
}

/// The full layered figment, before extraction.
pub fn build_figment() -> Figment {
    config_paths()
        .into_iter()
        .fold(defaults(), |figment, path| figment.merge(Toml::file(path)))
        .merge(env_provider())
}

pub fn load_config() -> Result<TawreedConfig, figment::Error> {
    build_figment().extract()
}

/// Defaults overlaid with one inline TOML document. No files, no environment.
pub fn load_config_from_str(toml_content: &str) -> Result<TawreedConfig, figment::Error> {
    defaults().merge(Toml::string(toml_content)).extract()
}

/// Defaults, then the given file, then the environment.
pub fn load_config_from_path(path: &Path) -> Result<TawreedConfig, figment::Error> {
    defaults()
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

fn defaults() -> Figment {
    Figment::new().merge(Serialized::defaults(TawreedConfig::default()))
}

/// Maps `TAWREED_LIVE_PAGE_SIZE` to `live.page_size`.
///
/// Only the first underscore after a known section becomes a dot, since
/// key names themselves contain underscores.
fn env_provider() -> Env {
    Env::prefixed("TAWREED_").map(|key| {
        let key = key.as_str();
        ENV_SECTIONS
            .iter()
            .find_map(|section| {
                key.strip_prefix(section)
                    .and_then(|rest| rest.strip_prefix('_'))
                    .map(|rest| format!("{section}.{rest}"))
            })
            .unwrap_or_else(|| key.to_string())
            .into()
    })
}
