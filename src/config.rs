//! Typed configuration for the cluster orchestrator and CLI entry points,
//! loaded the way this library's applications load their settings: a
//! `Settings.toml`, an environment-specific overlay, then environment
//! variables, in that order.
//!
//! `ProcessConfig` values handed to the [`crate::manager::Manager`] remain
//! programmatic inputs; this loader only covers the cluster/CLI layer.

use std::env;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Top-level settings document for the cluster orchestrator/CLI binary.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct AppConfig {
    pub app_name: String,
    pub environment: String,
    pub bus_urls: String,
    pub cluster: ClusterSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ClusterSettings {
    pub cluster_name: String,
    pub data_root: String,
    pub server_binary: String,
}

impl AppConfig {
    /// Loads `Settings.toml`, overlays `Settings.<RUN_MODE>.toml`, then
    /// `APP__`-prefixed environment variables, the same three-source
    /// layering used elsewhere in this codebase.
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("app_name", "process-fleet")?
            .set_default("environment", "development")?
            .set_default("bus_urls", "nats://127.0.0.1:4222")?
            .set_default("cluster.cluster_name", "local")?
            .set_default("cluster.data_root", "/var/lib/process-fleet/cluster")?
            .set_default("cluster.server_binary", "/usr/local/bin/nats-server")?
            .add_source(File::with_name("Settings").required(false))
            .add_source(File::with_name(&format!("Settings.{}", run_mode)).required(false))
            .add_source(Environment::with_prefix("APP").separator("__"));

        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.app_name.is_empty() {
            return Err("app_name must be provided".into());
        }
        if self.cluster.cluster_name.is_empty() {
            return Err("cluster.cluster_name must be provided".into());
        }
        if self.cluster.data_root.is_empty() {
            return Err("cluster.data_root must be provided".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_any_settings_file() {
        env::remove_var("RUN_MODE");
        env::remove_var("APP__APP_NAME");
        let config = AppConfig::load().expect("defaults alone should build a valid config");
        assert_eq!(config.app_name, "process-fleet");
        assert_eq!(config.cluster.cluster_name, "local");
        config.validate().expect("default config should validate");
    }

    #[test]
    fn environment_override_wins_over_default() {
        env::set_var("APP__APP_NAME", "overridden");
        let config = AppConfig::load().expect("config should still build");
        assert_eq!(config.app_name, "overridden");
        env::remove_var("APP__APP_NAME");
    }
}
