//! Configuration management for the taskdog server (§4.15).
//!
//! This module handles loading, validation, and reloading of the server's
//! configuration from a `taskdog.toml` file. Scoped to the core's own
//! settings (time defaults, region, task defaults, optimization defaults);
//! unrelated to any multi-file config distribution mechanism.

use std::path::PathBuf;

use anyhow::{Context, Result};
use shared::config::AppConfig;
use tracing::{debug, info};

const CONFIG_FILE: &str = "taskdog.toml";

/// Owns the lifecycle of the server's configuration: initial load,
/// validation, and reload-without-restart.
pub struct ConfigManager {
    pub config_path: PathBuf,
    pub app_config: Option<AppConfig>,
}

impl ConfigManager {
    /// Creates a new `ConfigManager` and immediately loads the configuration.
    /// Accepts either a direct file path or a directory containing
    /// `taskdog.toml`. If the file is absent, a default configuration is
    /// written so first-run startup never requires manual setup.
    pub fn new(config_path: PathBuf) -> Result<Self> {
        let config_path = if config_path.is_dir() {
            config_path.join(CONFIG_FILE)
        } else {
            config_path
        };

        if !config_path.exists() {
            info!(
                "no configuration file at {}, writing defaults",
                config_path.display()
            );
            let defaults = AppConfig::default();
            let serialized =
                toml::to_string_pretty(&defaults).context("failed to serialize default configuration")?;
            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create directory {}", parent.display()))?;
            }
            std::fs::write(&config_path, serialized)
                .with_context(|| format!("failed to write {}", config_path.display()))?;
        }

        let mut manager = Self {
            config_path,
            app_config: None,
        };
        manager.load_config()?;
        Ok(manager)
    }

    /// Loads the configuration file from disk, parses, and validates it.
    pub fn load_config(&mut self) -> Result<()> {
        info!("loading configuration from {}", self.config_path.display());

        let content = std::fs::read_to_string(&self.config_path)
            .with_context(|| format!("failed to read {}", self.config_path.display()))?;
        let app_config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", self.config_path.display()))?;
        app_config
            .validate()
            .map_err(|reason| anyhow::anyhow!(reason))
            .with_context(|| format!("invalid configuration in {}", self.config_path.display()))?;

        debug!(
            start_hour = app_config.time.default_start_hour,
            end_hour = app_config.time.default_end_hour,
            region = ?app_config.region.country,
            default_priority = app_config.task.default_priority,
            default_algorithm = %app_config.optimization.default_algorithm,
            max_hours_per_day = app_config.optimization.max_hours_per_day,
            "configuration loaded"
        );

        self.app_config = Some(app_config);
        Ok(())
    }

    /// Reloads the configuration from disk. Returns `Ok(true)` if it
    /// changed, `Ok(false)` if unchanged. On a parse/validation failure the
    /// previous configuration is kept so the server keeps running.
    pub fn reload_config(&mut self) -> Result<bool> {
        let old = self.app_config.clone();
        match self.load_config() {
            Ok(()) => {
                let changed = old.as_ref() != self.app_config.as_ref();
                if changed {
                    info!("configuration changed and reloaded");
                } else {
                    debug!("configuration unchanged");
                }
                Ok(changed)
            }
            Err(e) => {
                self.app_config = old;
                Err(e)
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.app_config.is_some()
    }

    pub fn config(&self) -> &AppConfig {
        self.app_config
            .as_ref()
            .expect("configuration not loaded; ConfigManager::new() always loads it")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_writes_and_loads_defaults_when_file_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taskdog.toml");
        let manager = ConfigManager::new(path.clone()).unwrap();
        assert!(path.exists());
        assert_eq!(manager.config().task.default_priority, 50);
    }

    #[test]
    fn reload_reports_no_change_when_file_unmodified() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taskdog.toml");
        let mut manager = ConfigManager::new(path).unwrap();
        assert!(!manager.reload_config().unwrap());
    }

    #[test]
    fn reload_detects_changed_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taskdog.toml");
        let mut manager = ConfigManager::new(path.clone()).unwrap();
        let mut updated = manager.config().clone();
        updated.task.default_priority = 99;
        std::fs::write(&path, toml::to_string_pretty(&updated).unwrap()).unwrap();
        assert!(manager.reload_config().unwrap());
        assert_eq!(manager.config().task.default_priority, 99);
    }
}
