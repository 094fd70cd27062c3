//! Per-axis and server configuration, loaded from a JSON file at startup.
//! Any field absent from the file takes the `Default` below, matching §3's
//! documented defaults.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Encoder counts per full revolution. Hardware constant, not configurable.
pub const COUNTS_PER_REVOLUTION: i64 = 262_144;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxisConfig {
    /// Registry key and HTTP route segment for this axis.
    pub name: String,
    /// Single character identifying this axis in the stepper serial command.
    pub axis_label: char,

    #[serde(default = "default_steps_per_revolution")]
    pub steps_per_revolution: u32,
    #[serde(default)]
    pub invert: bool,
    #[serde(default = "default_gear_ratio")]
    pub gear_ratio_num: u32,
    #[serde(default = "default_gear_ratio")]
    pub gear_ratio_den: u32,
    #[serde(default = "default_max_speed_hz")]
    pub max_speed_hz: f64,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u32,

    #[serde(default = "default_kp")]
    pub kp: f64,
    #[serde(default = "default_ki")]
    pub ki: f64,
    #[serde(default = "default_kd")]
    pub kd: f64,
    #[serde(default = "default_derivative_filter_alpha")]
    pub derivative_filter_alpha: f64,

    /// Overrides the derived `SLEW_RATE_LIMIT` formula when present; absent
    /// by default so fresh configs use the formula below, matching the
    /// original service (only a persisted-state reload can override it).
    #[serde(default)]
    pub max_slew_rate_override: Option<f64>,
}

fn default_steps_per_revolution() -> u32 {
    25_600
}
fn default_gear_ratio() -> u32 {
    1
}
fn default_max_speed_hz() -> f64 {
    20_000.0
}
fn default_interval_ms() -> u32 {
    50
}
fn default_kp() -> f64 {
    1.8
}
fn default_ki() -> f64 {
    1.0
}
fn default_kd() -> f64 {
    1.0
}
fn default_derivative_filter_alpha() -> f64 {
    0.75
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            axis_label: 'A',
            steps_per_revolution: default_steps_per_revolution(),
            invert: false,
            gear_ratio_num: default_gear_ratio(),
            gear_ratio_den: default_gear_ratio(),
            max_speed_hz: default_max_speed_hz(),
            interval_ms: default_interval_ms(),
            kp: default_kp(),
            ki: default_ki(),
            kd: default_kd(),
            derivative_filter_alpha: default_derivative_filter_alpha(),
            max_slew_rate_override: None,
        }
    }
}

impl AxisConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.steps_per_revolution == 0 {
            return Err(ConfigError::NonPositiveSteps(self.steps_per_revolution));
        }
        if self.gear_ratio_den == 0 {
            return Err(ConfigError::ZeroGearDenominator);
        }
        if self.interval_ms == 0 {
            return Err(ConfigError::NonPositiveInterval(self.interval_ms));
        }
        Ok(())
    }

    pub fn angle_to_raw(&self) -> f64 {
        (COUNTS_PER_REVOLUTION as f64 / 360.0) / (self.gear_ratio_num as f64 / self.gear_ratio_den as f64)
    }

    pub fn raw_to_angle(&self) -> f64 {
        1.0 / self.angle_to_raw()
    }

    pub fn deadband_limit(&self) -> f64 {
        COUNTS_PER_REVOLUTION as f64 / (2.0 * self.steps_per_revolution as f64)
    }

    pub fn slew_rate_limit(&self) -> f64 {
        self.max_slew_rate_override.unwrap_or_else(|| {
            10.0 * (1.0 / 360.0)
                * self.steps_per_revolution as f64
                * (self.gear_ratio_den as f64 / self.gear_ratio_num as f64)
                * (self.interval_ms as f64 / 1000.0)
        })
    }

    pub fn counts_per_step(&self) -> f64 {
        COUNTS_PER_REVOLUTION as f64 / self.steps_per_revolution as f64
    }

    pub fn hz_to_cps(&self, hz: f64) -> f64 {
        self.counts_per_step() * hz
    }

    pub fn cps_to_hz(&self, cps: f64) -> f64 {
        cps / self.counts_per_step()
    }

    pub fn saturation_limit(&self) -> f64 {
        self.hz_to_cps(self.max_speed_hz)
    }

    pub fn nominal_dt(&self) -> f64 {
        self.interval_ms as f64 / 1000.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComSettings {
    #[serde(default = "default_serial_path")]
    pub path: String,
    #[serde(default = "default_serial_baud")]
    pub baud_rate: u32,
    #[serde(default = "default_serial_timeout_ms")]
    pub timeout_ms: u32,
}

fn default_serial_path() -> String {
    if cfg!(windows) {
        "COM3".to_string()
    } else {
        "/dev/ttyUSB0".to_string()
    }
}
fn default_serial_baud() -> u32 {
    57_600
}
fn default_serial_timeout_ms() -> u32 {
    50
}

impl Default for ComSettings {
    fn default() -> Self {
        Self {
            path: default_serial_path(),
            baud_rate: default_serial_baud(),
            timeout_ms: default_serial_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default)]
    pub com_settings: ComSettings,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    pub axes: Vec<AxisConfig>,
    #[serde(default)]
    pub dry_run: bool,
}

fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:8080".parse().unwrap()
}
fn default_state_file() -> PathBuf {
    PathBuf::from("state.json")
}

impl ServerConfig {
    /// Loads and validates a `ServerConfig` from a JSON file. Any field
    /// absent in the file takes its documented default (§3).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: ServerConfig =
            serde_json::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every axis and rejects duplicate names/labels. Called once
    /// at startup before any `ServoController` is constructed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen_names = HashSet::new();
        let mut seen_labels = HashSet::new();
        for axis in &self.axes {
            axis.validate()?;
            if !seen_names.insert(axis.name.clone()) {
                return Err(ConfigError::DuplicateAxisName(axis.name.clone()));
            }
            if !seen_labels.insert(axis.axis_label) {
                return Err(ConfigError::DuplicateAxisLabel(axis.axis_label));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_axis() -> AxisConfig {
        AxisConfig {
            name: "ra".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn derived_constants_match_defaults() {
        let axis = base_axis();
        assert_eq!(axis.angle_to_raw(), COUNTS_PER_REVOLUTION as f64 / 360.0);
        assert_eq!(axis.deadband_limit(), COUNTS_PER_REVOLUTION as f64 / (2.0 * 25_600.0));
    }

    #[test]
    fn rejects_zero_steps() {
        let mut axis = base_axis();
        axis.steps_per_revolution = 0;
        assert_eq!(axis.validate(), Err(ConfigError::NonPositiveSteps(0)));
    }

    #[test]
    fn rejects_zero_gear_denominator() {
        let mut axis = base_axis();
        axis.gear_ratio_den = 0;
        assert_eq!(axis.validate(), Err(ConfigError::ZeroGearDenominator));
    }

    #[test]
    fn rejects_zero_interval() {
        let mut axis = base_axis();
        axis.interval_ms = 0;
        assert_eq!(axis.validate(), Err(ConfigError::NonPositiveInterval(0)));
    }

    #[test]
    fn rejects_duplicate_axis_names() {
        let config = ServerConfig {
            listen_addr: default_listen_addr(),
            com_settings: ComSettings::default(),
            state_file: default_state_file(),
            axes: vec![base_axis(), base_axis()],
            dry_run: true,
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateAxisName(_))
        ));
    }
}
