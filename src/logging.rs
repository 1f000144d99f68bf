//! Tracing initialisation.
//!
//! `RUST_LOG` wins over the configured level. Device echo is logged on its own target
//! (`behavior_daq::device`) so it can be silenced separately:
//! `RUST_LOG=info,behavior_daq::device=off`.
//!
//! ```no_run
//! use behavior_daq::{config::RigConfig, logging};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RigConfig::load()?;
//! logging::init_from_config(&config)?;
//! # Ok(())
//! # }
//! ```

use crate::config::RigConfig;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Multi-line, coloured.
    Pretty,
    /// One line per event, no colour (rig machines often log to a file).
    #[default]
    Compact,
    /// One JSON object per event.
    Json,
}

/// Level and format picked from the `[application]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TracingConfig {
    /// Default level when `RUST_LOG` is unset.
    pub level: Level,
    /// Line format.
    pub format: OutputFormat,
}

impl TracingConfig {
    /// Read `log_level` and `log_format`.
    pub fn from_config(config: &RigConfig) -> Result<Self, String> {
        let level = Level::from_str(&config.application.log_level)
            .map_err(|_| format!("Invalid log level '{}'", config.application.log_level))?;
        Ok(Self {
            level,
            format: config.application.log_format,
        })
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.as_str().to_lowercase()))
    }
}

/// Install the global subscriber described by `config`.
pub fn init_from_config(config: &RigConfig) -> Result<(), String> {
    init(TracingConfig::from_config(config)?)
}

/// Install the global subscriber.
///
/// A second call is a no-op.
pub fn init(config: TracingConfig) -> Result<(), String> {
    let layer = match config.format {
        OutputFormat::Pretty => fmt::layer().pretty().boxed(),
        OutputFormat::Compact => fmt::layer().compact().with_ansi(false).boxed(),
        OutputFormat::Json => fmt::layer().json().boxed(),
    };

    match tracing_subscriber::registry()
        .with(layer.with_filter(config.filter()))
        .try_init()
    {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("already been set") => Ok(()),
        Err(e) => Err(format!("Failed to initialize tracing: {e}")),
    }
}
