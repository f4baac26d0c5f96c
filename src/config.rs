//! Configuration management.
//!
//! Application settings load from layered TOML via the `config` crate.
//! Acquisition parameters are user-editable; anything malformed or out of
//! range falls back field-by-field to the named defaults below rather than
//! failing the whole session.

use crate::error::DaqError;
use config::Config;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default nominal torque in Nm.
pub const DEFAULT_NOMINAL_TORQUE: f64 = 4.0;
/// Default lower torque bound in Nm.
pub const DEFAULT_MIN_TORQUE: f64 = 2.0;
/// Default upper torque bound in Nm.
pub const DEFAULT_MAX_TORQUE: f64 = 10.0;
/// Default cycle-start threshold in Nm.
pub const DEFAULT_THRESHOLD_INI: f64 = 1.0;
/// Default cycle-end threshold in Nm.
pub const DEFAULT_THRESHOLD_END: f64 = 0.5;
/// Default measurement timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u32 = 500;
/// Default click-wrench angles in degrees.
pub const DEFAULT_CLICK_WRENCH: ClickWrench = ClickWrench {
    angle1: 30.0,
    angle2: 30.0,
    angle3: 20.0,
};

/// Tightening direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Cw,
    Ccw,
}

/// Click-wrench trigger angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClickWrench {
    pub angle1: f64,
    pub angle2: f64,
    pub angle3: f64,
}

impl Default for ClickWrench {
    fn default() -> Self {
        DEFAULT_CLICK_WRENCH
    }
}

/// Test parameters applied to the transducer by the InitRead sequence.
///
/// An immutable snapshot of this struct is taken every time the sequence
/// runs; editing settings mid-cycle affects the next cycle only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub nominal_torque: f64,
    pub min_torque: f64,
    pub max_torque: f64,
    pub threshold_ini: f64,
    pub threshold_end: f64,
    pub timeout_ms: u32,
    pub direction: Direction,
    pub click_wrench: ClickWrench,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            nominal_torque: DEFAULT_NOMINAL_TORQUE,
            min_torque: DEFAULT_MIN_TORQUE,
            max_torque: DEFAULT_MAX_TORQUE,
            threshold_ini: DEFAULT_THRESHOLD_INI,
            threshold_end: DEFAULT_THRESHOLD_END,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            direction: Direction::Cw,
            click_wrench: DEFAULT_CLICK_WRENCH,
        }
    }
}

impl AcquisitionConfig {
    /// Builds a config from raw user-entered strings.
    ///
    /// Each field parses independently; malformed input falls back to the
    /// documented default for that field only.
    pub fn from_user_input(
        nominal: &str,
        min: &str,
        max: &str,
        threshold_ini: &str,
        threshold_end: &str,
        timeout_ms: &str,
    ) -> Self {
        Self {
            nominal_torque: parse_torque(nominal, DEFAULT_NOMINAL_TORQUE),
            min_torque: parse_torque(min, DEFAULT_MIN_TORQUE),
            max_torque: parse_torque(max, DEFAULT_MAX_TORQUE),
            threshold_ini: parse_torque(threshold_ini, DEFAULT_THRESHOLD_INI),
            threshold_end: parse_torque(threshold_end, DEFAULT_THRESHOLD_END),
            timeout_ms: timeout_ms
                .trim()
                .parse()
                .ok()
                .filter(|&ms| ms > 0)
                .unwrap_or(DEFAULT_TIMEOUT_MS),
            direction: Direction::Cw,
            click_wrench: DEFAULT_CLICK_WRENCH,
        }
        .sanitized()
    }

    /// Replaces out-of-range values with defaults.
    ///
    /// Torques must be finite and positive, and the min/max pair must be
    /// ordered; a violated pair is replaced wholesale so the two stay
    /// consistent.
    pub fn sanitized(mut self) -> Self {
        if !valid_torque(self.nominal_torque) {
            self.nominal_torque = DEFAULT_NOMINAL_TORQUE;
        }
        if !valid_torque(self.min_torque) || !valid_torque(self.max_torque)
            || self.min_torque >= self.max_torque
        {
            self.min_torque = DEFAULT_MIN_TORQUE;
            self.max_torque = DEFAULT_MAX_TORQUE;
        }
        if !valid_torque(self.threshold_ini) {
            self.threshold_ini = DEFAULT_THRESHOLD_INI;
        }
        if !valid_torque(self.threshold_end) {
            self.threshold_end = DEFAULT_THRESHOLD_END;
        }
        if self.timeout_ms == 0 {
            self.timeout_ms = DEFAULT_TIMEOUT_MS;
        }
        self
    }
}

fn valid_torque(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn parse_torque(input: &str, default: f64) -> f64 {
    input
        .trim()
        .parse()
        .ok()
        .filter(|&v| valid_torque(v))
        .unwrap_or(default)
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Settings {
    pub log_level: String,
    pub device: DeviceSettings,
    pub acquisition: AcquisitionConfig,
    pub protocol_log: ProtocolLogSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DeviceSettings {
    pub address: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProtocolLogSettings {
    /// Directory the protocol log file is written to.
    pub dir: PathBuf,
    /// Candidate directories the tailer scans for the newest log file.
    pub tail_dirs: Vec<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            device: DeviceSettings::default(),
            acquisition: AcquisitionConfig::default(),
            protocol_log: ProtocolLogSettings::default(),
        }
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            address: "192.168.0.100".to_string(),
        }
    }
}

impl Default for ProtocolLogSettings {
    fn default() -> Self {
        let dir = PathBuf::from("logs");
        Self {
            tail_dirs: vec![dir.clone()],
            dir,
        }
    }
}

impl Settings {
    pub fn new(config_name: Option<&str>) -> Result<Self, DaqError> {
        let config_path = format!("config/{}", config_name.unwrap_or("default"));
        let s = Config::builder()
            .add_source(config::File::with_name(&config_path))
            .build()
            .map_err(DaqError::Config)?;

        let settings: Settings = s.try_deserialize().map_err(DaqError::Config)?;
        Ok(Self {
            acquisition: settings.acquisition.sanitized(),
            ..settings
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_the_documented_set() {
        let config = AcquisitionConfig::default();
        assert_eq!(config.nominal_torque, 4.0);
        assert_eq!(config.min_torque, 2.0);
        assert_eq!(config.max_torque, 10.0);
        assert_eq!(config.threshold_ini, 1.0);
        assert_eq!(config.threshold_end, 0.5);
        assert_eq!(config.timeout_ms, 500);
        assert_eq!(config.direction, Direction::Cw);
    }

    #[test]
    fn malformed_input_falls_back_per_field() {
        let config = AcquisitionConfig::from_user_input("5.5", "junk", "8", "", "0.7", "abc");
        assert_eq!(config.nominal_torque, 5.5);
        assert_eq!(config.min_torque, DEFAULT_MIN_TORQUE);
        assert_eq!(config.max_torque, 8.0);
        assert_eq!(config.threshold_ini, DEFAULT_THRESHOLD_INI);
        assert_eq!(config.threshold_end, 0.7);
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn inverted_bounds_reset_as_a_pair() {
        let config = AcquisitionConfig {
            min_torque: 9.0,
            max_torque: 3.0,
            ..Default::default()
        }
        .sanitized();
        assert_eq!(config.min_torque, DEFAULT_MIN_TORQUE);
        assert_eq!(config.max_torque, DEFAULT_MAX_TORQUE);
    }

    #[test]
    fn settings_deserialize_from_toml() {
        let settings: Settings = toml::from_str(
            r#"
            log_level = "debug"

            [device]
            address = "10.0.0.42"

            [acquisition]
            nominal_torque = 6.0
            direction = "ccw"

            [protocol_log]
            dir = "/tmp/proto-logs"
            tail_dirs = ["/tmp/proto-logs", "/var/log/transducer"]
            "#,
        )
        .expect("settings should parse");
        assert_eq!(settings.device.address, "10.0.0.42");
        assert_eq!(settings.acquisition.nominal_torque, 6.0);
        assert_eq!(settings.acquisition.direction, Direction::Ccw);
        assert_eq!(settings.acquisition.max_torque, DEFAULT_MAX_TORQUE);
        assert_eq!(settings.protocol_log.tail_dirs.len(), 2);
    }
}
