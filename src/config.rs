//! Configuration using Figment.
//!
//! Configuration is loaded from:
//! 1. a TOML file (`config/behavior_daq.toml` by default),
//! 2. environment variables prefixed with `BEHAVIOR_DAQ_`, using `__` between
//!    section and key (`BEHAVIOR_DAQ_SERIAL__PORT=/dev/ttyACM0`).
//!
//! Every field has a default, so an empty or missing file yields a usable go/no-go
//! configuration.
//!
//! # Example
//! ```no_run
//! use behavior_daq::config::RigConfig;
//!
//! let config = RigConfig::load()?;
//! config.validate()?;
//! println!("Rig: {}", config.session.rig);
//! # Ok::<(), behavior_daq::error::DaqError>(())
//! ```

use crate::data::capacity::{DEFAULT_PADDING, MAX_PADDING};
use crate::data::storage::StorageFormat;
use crate::error::{AppResult, DaqError};
use crate::logging::OutputFormat;
use crate::protocol::parameters::ParameterSet;
use crate::protocol::rig::Rig;
use chrono::{DateTime, Local};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/behavior_daq.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "BEHAVIOR_DAQ_";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RigConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Serial line settings
    #[serde(default)]
    pub serial: SerialConfig,
    /// Session behaviour
    #[serde(default)]
    pub session: SessionConfig,
    /// Session file settings
    #[serde(default)]
    pub storage: StorageConfig,
    /// Overrides of the rig's default parameter values
    #[serde(default)]
    pub parameters: BTreeMap<String, i64>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: OutputFormat,
}

/// Serial line configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Port identifier (`/dev/ttyACM0`, `COM3`)
    #[serde(default)]
    pub port: Option<String>,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Timeout of each blocking read, in milliseconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    /// Wait after opening the port before talking to the device
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
    /// How long to wait for the device to acknowledge the parameter upload
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Rig variant
    #[serde(default)]
    pub rig: Rig,
    /// Interval between queue drains, in milliseconds
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_ms: u64,
    /// Log device output
    #[serde(default)]
    pub echo_device_output: bool,
    /// Event codes never logged when echoing
    #[serde(default)]
    pub suppress_echo_codes: Vec<i64>,
    /// Force-close a session this long after an unanswered stop request (unset = wait)
    #[serde(default)]
    pub stop_confirm_timeout_ms: Option<u64>,
    /// Headroom applied to estimated store sizes
    #[serde(default = "default_capacity_padding")]
    pub capacity_padding: f64,
    /// Subject identifier
    #[serde(default)]
    pub subject: String,
    /// Subject weight in grams
    #[serde(default)]
    pub weight: Option<f64>,
    /// Operator notes
    #[serde(default)]
    pub notes: String,
}

/// Session file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// File format
    #[serde(default)]
    pub format: StorageFormat,
    /// Directory for generated file names
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Explicit session file; appended to when it exists
    #[serde(default)]
    pub save_path: Option<PathBuf>,
    /// Auto-flush interval in seconds (0 = only at session end)
    #[serde(default)]
    pub auto_flush_interval_secs: u64,
}

// Default value functions
fn default_name() -> String {
    "Behavior DAQ".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_read_timeout() -> u64 {
    1000
}

fn default_settle_delay() -> u64 {
    3000
}

fn default_handshake_timeout() -> u64 {
    5000
}

fn default_refresh_interval() -> u64 {
    10
}

fn default_capacity_padding() -> f64 {
    DEFAULT_PADDING
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: OutputFormat::default(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout(),
            settle_delay_ms: default_settle_delay(),
            handshake_timeout_ms: default_handshake_timeout(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rig: Rig::default(),
            refresh_interval_ms: default_refresh_interval(),
            echo_device_output: false,
            suppress_echo_codes: Vec::new(),
            stop_confirm_timeout_ms: None,
            capacity_padding: default_capacity_padding(),
            subject: String::new(),
            weight: None,
            notes: String::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            format: StorageFormat::default(),
            output_dir: default_output_dir(),
            save_path: None,
            auto_flush_interval_secs: 0,
        }
    }
}

impl RigConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file and the environment.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    /// Provider chain used by [`RigConfig::load_from`].
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(RigConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Check values that parse but make no sense.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.serial.baud_rate == 0 {
            return Err(DaqError::Configuration("baud_rate must be positive".into()));
        }

        if self.session.refresh_interval_ms == 0 {
            return Err(DaqError::Configuration(
                "refresh_interval_ms must be positive".into(),
            ));
        }

        let padding = self.session.capacity_padding;
        if !(1.0..=MAX_PADDING).contains(&padding) {
            return Err(DaqError::Configuration(format!(
                "Invalid capacity_padding {padding}. Must be between 1.0 and {MAX_PADDING}"
            )));
        }

        if self.session.subject.contains('/') {
            return Err(DaqError::Configuration(format!(
                "Invalid subject '{}'. Must not contain '/'",
                self.session.subject
            )));
        }

        let rig = self.session.rig;
        let unknown: Vec<&str> = self
            .parameters
            .keys()
            .filter(|name| !rig.has_parameter(name))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(DaqError::Configuration(format!(
                "Unknown parameter(s) for rig '{}': {}",
                rig,
                unknown.join(", ")
            )));
        }

        Ok(())
    }

    /// Parameters to upload: the rig's defaults in schema order with overrides applied.
    pub fn parameter_set(&self) -> ParameterSet {
        let mut params = self.session.rig.default_parameters();
        for (name, value) in &self.parameters {
            if self.session.rig.has_parameter(name) {
                params.insert(name.as_str(), *value);
            }
        }
        params
    }

    /// Session file for a session starting at `now`.
    pub fn save_path_at(&self, now: DateTime<Local>) -> PathBuf {
        match &self.storage.save_path {
            Some(path) => path.clone(),
            None => default_save_path(&self.storage.output_dir, self.storage.format, now),
        }
    }
}

/// `<dir>/data-%y%m%d-%H%M%S.<ext>`
pub fn default_save_path(dir: &Path, format: StorageFormat, now: DateTime<Local>) -> PathBuf {
    dir.join(format!(
        "data-{}.{}",
        now.format("%y%m%d-%H%M%S"),
        format.extension()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn defaults_are_valid() {
        let config = RigConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.serial.handshake_timeout_ms, 5000);
        assert_eq!(config.session.refresh_interval_ms, 10);
        assert_eq!(config.parameter_set().len(), 42);
    }

    #[test]
    fn overrides_keep_schema_order() {
        let mut config = RigConfig::default();
        config.parameters.insert("track_period".into(), 20);
        config.parameters.insert("session_type".into(), 2);

        let params = config.parameter_set();
        let names: Vec<&str> = params.iter().map(|(n, _)| n).collect();
        assert_eq!(names.first(), Some(&"session_type"));
        assert_eq!(names.last(), Some(&"track_period"));
        assert_eq!(params.get("track_period"), Some(20));
        assert_eq!(params.get("session_type"), Some(2));
    }

    #[test]
    fn unknown_parameter_is_rejected() {
        let mut config = RigConfig::default();
        config.session.rig = Rig::Wheel;
        config.parameters.insert("cs0_num".into(), 3);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cs0_num"), "{err}");
    }

    #[test]
    fn bad_log_level_is_rejected() {
        let mut config = RigConfig::default();
        config.application.log_level = "loud".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn padding_below_one_is_rejected() {
        let mut config = RigConfig::default();
        config.session.capacity_padding = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_padding_is_rejected() {
        let mut config = RigConfig::default();
        config.session.capacity_padding = 1e30;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("capacity_padding"), "{err}");
        config.session.capacity_padding = f64::NAN;
        assert!(config.validate().is_err());
        config.session.capacity_padding = MAX_PADDING;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn subject_with_slash_is_rejected() {
        let mut config = RigConfig::default();
        config.session.subject = "m7/extra".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("m7/extra"), "{err}");
    }

    #[test]
    fn default_save_path_uses_timestamp() {
        let now = Local.with_ymd_and_hms(2024, 3, 7, 14, 5, 9).unwrap();
        let config = RigConfig::default();
        assert_eq!(
            config.save_path_at(now),
            PathBuf::from("data/data-240307-140509.json")
        );
    }

    #[test]
    fn loads_toml_and_environment() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "rig.toml",
                r#"
                [session]
                rig = "conveyor"
                subject = "m12"

                [parameters]
                trial_num = 5
                "#,
            )?;
            jail.set_env("BEHAVIOR_DAQ_SERIAL__PORT", "/dev/ttyACM3");

            let config = RigConfig::load_from("rig.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.session.rig, Rig::Conveyor);
            assert_eq!(config.session.subject, "m12");
            assert_eq!(config.serial.port.as_deref(), Some("/dev/ttyACM3"));
            assert_eq!(config.parameter_set().get("trial_num"), Some(5));
            assert_eq!(config.serial.settle_delay_ms, 3000);
            Ok(())
        });
    }

    #[test]
    fn missing_file_yields_defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = RigConfig::load_from("absent.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.session.rig, Rig::GoNoGo);
            Ok(())
        });
    }
}
