// SPDX-FileCopyrightText: 2026 Zapflow Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./zapflow.toml` > `~/.config/zapflow/zapflow.toml` >
//! `/etc/zapflow/zapflow.toml` with environment variable overrides via the
//! `ZAPFLOW_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::ZapflowConfig;

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/zapflow/zapflow.toml` (system-wide)
/// 3. `~/.config/zapflow/zapflow.toml` (user XDG config)
/// 4. `./zapflow.toml` (local directory)
/// 5. `ZAPFLOW_*` environment variables
pub fn load_config() -> Result<ZapflowConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(ZapflowConfig::default()))
        .merge(Toml::file("/etc/zapflow/zapflow.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("zapflow/zapflow.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("zapflow.toml"))
        .merge(env_provider())
        .extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
///
/// Used for testing and explicit config specification.
pub fn load_config_from_str(toml_content: &str) -> Result<ZapflowConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(ZapflowConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<ZapflowConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(ZapflowConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Create the environment variable provider using explicit `map()` for
/// section-to-dot mapping.
///
/// Uses `Env::map()` NOT `Env::split("_")` to avoid ambiguity with
/// underscore-containing key names: `ZAPFLOW_PROVIDER_API_KEY` must map to
/// `provider.api_key`, not `provider.api.key`.
fn env_provider() -> Env {
    Env::prefixed("ZAPFLOW_").map(|key| {
        let key_str = key.as_str();
        let mapped = key_str
            .replacen("agent_", "agent.", 1)
            .replacen("provider_", "provider.", 1)
            .replacen("storage_", "storage.", 1)
            .replacen("gateway_", "gateway.", 1);
        mapped.into()
    })
}
