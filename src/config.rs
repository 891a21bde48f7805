//! Session configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (`config/eco.toml` by default)
//! 2. environment variables prefixed with `ECO_`, nested keys separated by
//!    a double underscore (`ECO_APPLICATION__LOG_LEVEL=debug`,
//!    `ECO_SCAN__DEFAULT_PULSES=500`)
//!
//! # Example
//! ```no_run
//! use eco::config::EcoConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EcoConfig::load()?;
//! config.validate()?;
//! println!("Session: {}", config.application.name);
//! # Ok(())
//! # }
//! ```

use eco_core::{EcoError, EcoResult};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/eco.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "ECO_";

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EcoConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Scan defaults
    #[serde(default)]
    pub scan: ScanConfig,
    /// Device definitions, built in this order
    #[serde(default)]
    pub devices: Vec<DeviceDefinition>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Session name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Scan defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Directory receiving counter data
    #[serde(default = "default_data_dir")]
    pub data_base_dir: PathBuf,
    /// Directory receiving scan logs
    #[serde(default = "default_scan_info_dir")]
    pub scan_info_dir: PathBuf,
    /// Pulses per step when a scan does not say
    #[serde(default = "default_pulses")]
    pub default_pulses: u32,
    /// Move back to the start values after every scan
    #[serde(default)]
    pub return_at_end: bool,
    /// Acquisitions per step before giving up on bad conditions
    #[serde(default = "default_max_repeats")]
    pub max_acquisition_repeats: u32,
    /// Alias of the checker gating acquisitions
    #[serde(default)]
    pub checker: Option<String>,
    /// Aliases of the counters used by default; every counter if absent
    #[serde(default)]
    pub counters: Option<Vec<String>>,
    /// Aliases of detectors logged at every step
    #[serde(default)]
    pub monitors: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            data_base_dir: default_data_dir(),
            scan_info_dir: default_scan_info_dir(),
            default_pulses: default_pulses(),
            return_at_end: false,
            max_acquisition_repeats: default_max_repeats(),
            checker: None,
            counters: None,
            monitors: Vec::new(),
        }
    }
}

/// Device definition in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDefinition {
    /// Unique alias
    pub alias: String,
    /// Driver type (e.g. "mock_motor", "memory", "file")
    pub r#type: String,
    /// Control-system channel backing the device
    #[serde(default)]
    pub channel: Option<String>,
    /// Kind of channel (e.g. "CA")
    #[serde(default)]
    pub channeltype: Option<String>,
    /// Whether this device is built
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Driver-specific configuration
    #[serde(default = "empty_table")]
    pub config: toml::Value,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data/raw")
}

fn default_scan_info_dir() -> PathBuf {
    PathBuf::from("data/scan_info")
}

fn default_pulses() -> u32 {
    100
}

fn default_max_repeats() -> u32 {
    10
}

fn default_enabled() -> bool {
    true
}

fn empty_table() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

impl EcoConfig {
    /// Minimal configuration without devices.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            application: ApplicationConfig {
                name: name.into(),
                log_level: default_log_level(),
                log_format: default_log_format(),
            },
            scan: ScanConfig::default(),
            devices: Vec::new(),
        }
    }

    /// Load configuration from the default file and environment variables
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    /// Provider stack used by [`load_from`](Self::load_from).
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> EcoResult<()> {
        let invalid = |msg: String| Err(EcoError::Configuration(msg));

        if !VALID_LEVELS.contains(&self.application.log_level.to_lowercase().as_str()) {
            return invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LEVELS.join(", ")
            ));
        }
        if !VALID_FORMATS.contains(&self.application.log_format.to_lowercase().as_str()) {
            return invalid(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                VALID_FORMATS.join(", ")
            ));
        }
        if self.scan.default_pulses == 0 {
            return invalid("default_pulses must be at least 1".into());
        }
        if self.scan.max_acquisition_repeats == 0 {
            return invalid("max_acquisition_repeats must be at least 1".into());
        }

        let mut aliases = HashSet::new();
        for device in &self.devices {
            if device.alias.is_empty() || device.alias.contains(eco_core::alias::ALIAS_SEPARATOR)
            {
                return invalid(format!("Invalid device alias '{}'", device.alias));
            }
            if !aliases.insert(device.alias.as_str()) {
                return invalid(format!("Duplicate device alias: {}", device.alias));
            }
        }

        let enabled: HashSet<&str> = self
            .enabled_devices()
            .map(|d| d.alias.as_str())
            .collect();
        let references = self
            .scan
            .checker
            .iter()
            .chain(self.scan.counters.iter().flatten())
            .chain(&self.scan.monitors);
        for alias in references {
            if !enabled.contains(alias.as_str()) {
                return invalid(format!(
                    "Scan settings refer to '{alias}', which is not an enabled device"
                ));
            }
        }

        Ok(())
    }

    /// Devices that will be built
    pub fn enabled_devices(&self) -> impl Iterator<Item = &DeviceDefinition> {
        self.devices.iter().filter(|d| d.enabled)
    }
}
