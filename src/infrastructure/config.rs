//! File-backed application configuration.
//!
//! Every knob has a workable default; a missing config file is created on
//! first load so users have something concrete to edit.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::time::Duration;
use tracing::info;

use crate::engine::controller::EngineSettings;
use crate::engine::injector::PollingSpec;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub poll_interval_ms: u64,
    pub submit_max_attempts: u32,
    pub result_max_attempts: u32,
    pub extract_max_attempts: u32,
    pub lookup_max_attempts: u32,
    /// Host-side cap on detail readiness re-probes per candidate.
    pub probe_budget: u32,
    /// Step lock safety window; a lock held longer is stuck and gets
    /// force-released by the next trigger for its group.
    pub lock_stale_after_ms: u64,
    /// JS expression naming the sandbox's message bridge.
    pub bridge_object: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let polling = PollingSpec::default();
        Self {
            poll_interval_ms: polling.interval_ms,
            submit_max_attempts: polling.submit_max_attempts,
            result_max_attempts: polling.result_max_attempts,
            extract_max_attempts: polling.extract_max_attempts,
            lookup_max_attempts: polling.lookup_max_attempts,
            probe_budget: 10,
            lock_stale_after_ms: 12_000,
            bridge_object: "window.__host".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            polling: PollingSpec {
                interval_ms: self.poll_interval_ms,
                submit_max_attempts: self.submit_max_attempts,
                result_max_attempts: self.result_max_attempts,
                extract_max_attempts: self.extract_max_attempts,
                lookup_max_attempts: self.lookup_max_attempts,
            },
            lock_stale_after: Duration::from_millis(self.lock_stale_after_ms),
            probe_budget: self.probe_budget,
            bridge_object: self.bridge_object.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    /// Document store REST endpoint root.
    pub base_url: String,
    pub collection: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/v1".to_string(),
            collection: "foundUser".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset.
    pub level: String,
    /// Directory for the rolling log file; console only when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_dir: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_dir: None,
            file_prefix: "autoform".to_string(),
        }
    }
}

/// Loads and persists the config file.
pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Read the config, writing defaults on first run.
    pub async fn load(&self) -> Result<AppConfig> {
        if !self.path.exists() {
            let config = AppConfig::default();
            self.save(&config).await?;
            info!(path = %self.path.display(), "default config written");
            return Ok(config);
        }
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading config from {}", self.path.display()))?;
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config at {}", self.path.display()))?;
        Ok(config)
    }

    pub async fn save(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating config dir {}", parent.display()))?;
        }
        let raw = serde_json::to_string_pretty(config).context("serializing config")?;
        tokio::fs::write(&self.path, raw)
            .await
            .with_context(|| format!("writing config to {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_load_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::new(dir.path().join("config.json"));
        let config = manager.load().await.unwrap();
        assert_eq!(config.engine.lock_stale_after_ms, 12_000);
        assert_eq!(config.engine.probe_budget, 10);
        // The file now exists and loads back identically.
        let reloaded = manager.load().await.unwrap();
        assert_eq!(reloaded.store.collection, config.store.collection);
    }

    #[tokio::test]
    async fn round_trips_edited_values() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::new(dir.path().join("nested/config.json"));
        let mut config = AppConfig::default();
        config.engine.probe_budget = 3;
        config.store.base_url = "https://store.example/v1".to_string();
        manager.save(&config).await.unwrap();

        let loaded = manager.load().await.unwrap();
        assert_eq!(loaded.engine.probe_budget, 3);
        assert_eq!(loaded.store.base_url, "https://store.example/v1");
    }

    #[test]
    fn settings_carry_the_configured_window() {
        let mut engine = EngineConfig::default();
        engine.lock_stale_after_ms = 5_000;
        let settings = engine.settings();
        assert_eq!(settings.lock_stale_after, Duration::from_millis(5_000));
        assert_eq!(settings.polling.result_max_attempts, 80);
    }
}
