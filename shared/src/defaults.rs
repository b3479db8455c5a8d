//! Default values for `AppConfig` fields, referenced by `#[serde(default = ...)]`
//! so a partial `taskdog.toml` is always valid (§6 "Environment / config
//! inputs").

pub fn default_start_hour() -> u32 {
    9
}

pub fn default_end_hour() -> u32 {
    18
}

pub fn default_priority() -> i32 {
    50
}

pub fn default_max_hours_per_day() -> f64 {
    8.0
}

pub fn default_algorithm() -> String {
    "greedy".to_string()
}

/// `POST /api/v1/optimize` defaults to overriding existing non-fixed
/// schedules rather than leaving already-planned tasks untouched.
pub fn default_force_override() -> bool {
    true
}
