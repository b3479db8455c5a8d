//! Configuration data structures for the environment inputs named in §6.
//! These are plain, serde-derived structs; loading/validating them from a
//! TOML file is `server::config::ConfigManager`'s job.

use serde::{Deserialize, Serialize};

use crate::defaults;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeConfig {
    #[serde(default = "defaults::default_start_hour")]
    pub default_start_hour: u32,
    #[serde(default = "defaults::default_end_hour")]
    pub default_end_hour: u32,
}

impl Default for TimeConfig {
    fn default() -> Self {
        TimeConfig {
            default_start_hour: defaults::default_start_hour(),
            default_end_hour: defaults::default_end_hour(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RegionConfig {
    /// ISO-3166 country code selecting a holiday set, or `None` for
    /// `NoHolidays`. Resolving a country code to a holiday calendar is out
    /// of scope here; the config layer only carries the selector.
    pub country: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskDefaultsConfig {
    #[serde(default = "defaults::default_priority")]
    pub default_priority: i32,
}

impl Default for TaskDefaultsConfig {
    fn default() -> Self {
        TaskDefaultsConfig {
            default_priority: defaults::default_priority(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptimizationConfig {
    #[serde(default = "defaults::default_algorithm")]
    pub default_algorithm: String,
    #[serde(default = "defaults::default_max_hours_per_day")]
    pub max_hours_per_day: f64,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        OptimizationConfig {
            default_algorithm: defaults::default_algorithm(),
            max_hours_per_day: defaults::default_max_hours_per_day(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub time: TimeConfig,
    #[serde(default)]
    pub region: RegionConfig,
    #[serde(default)]
    pub task: TaskDefaultsConfig,
    #[serde(default)]
    pub optimization: OptimizationConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.time.default_start_hour > 23 {
            return Err("time.default_start_hour must be 0-23".to_string());
        }
        if self.time.default_end_hour > 23 {
            return Err("time.default_end_hour must be 0-23".to_string());
        }
        if self.time.default_start_hour >= self.time.default_end_hour {
            return Err("time.default_start_hour must be before default_end_hour".to_string());
        }
        if self.task.default_priority <= 0 {
            return Err("task.default_priority must be > 0".to_string());
        }
        if self.optimization.max_hours_per_day <= 0.0 {
            return Err("optimization.max_hours_per_day must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn start_hour_after_end_hour_is_rejected() {
        let mut config = AppConfig::default();
        config.time.default_start_hour = 20;
        config.time.default_end_hour = 9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn roundtrips_through_toml() {
        let config = AppConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(config, parsed);
    }
}
