//! Configuration file loading and validation.
//!
//! The configuration is a TOML document. It is parsed into [`Config`] and then
//! validated; a configuration that fails either step never reaches the
//! ingestion loop.

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

/// Default InfluxDB HTTP port.
pub const DEFAULT_PORT: u16 = 8086;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Log verbosity accepted in the `log_level` key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    #[default]
    Warning,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

/// Set of sensor identifiers allowed through the scanner.
///
/// Identifiers are compared case-insensitively; they are stored upper-cased,
/// which is how the scanner formats MAC addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "Vec<String>")]
pub struct MacFilter(BTreeSet<String>);

/// Canonical form of a sensor identifier: trimmed and upper-cased.
pub fn normalize_identifier(identifier: &str) -> String {
    identifier.trim().to_ascii_uppercase()
}

impl MacFilter {
    /// Returns true if readings from `identifier` may be observed.
    pub fn allows(&self, identifier: &str) -> bool {
        self.0.contains(&normalize_identifier(identifier))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<String>> for MacFilter {
    fn from(identifiers: Vec<String>) -> Self {
        identifiers.into_iter().collect()
    }
}

impl<S: AsRef<str>> FromIterator<S> for MacFilter {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|id| normalize_identifier(id.as_ref()))
                .collect(),
        )
    }
}

/// Validated bridge configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    /// InfluxDB host name or address.
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Target database.
    pub database: String,

    /// Measurement every point is written to.
    pub measurement: String,

    /// Payload fields to store, in order.
    pub store_fields: Vec<String>,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Use HTTPS (and verify the certificate).
    #[serde(default)]
    pub ssl: bool,

    #[serde(default)]
    pub log_level: LogLevel,

    /// Only observe these sensors, when present.
    #[serde(default)]
    pub mac_filter: Option<MacFilter>,

    /// Sensor identifier -> display name.
    #[serde(default, rename = "device-names")]
    pub device_names: Option<BTreeMap<String, String>>,

    /// Display name -> location.
    #[serde(default)]
    pub locations: Option<BTreeMap<String, String>>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(content)?;
        config.normalize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("host", &self.host),
            ("database", &self.database),
            ("measurement", &self.measurement),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("`{key}` must not be empty")));
            }
        }

        if self.store_fields.is_empty() {
            return Err(ConfigError::Invalid(
                "`store_fields` must list at least one field".into(),
            ));
        }

        if let Some(i) = self.store_fields.iter().position(|f| f.is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "`store_fields` entry {i} is empty"
            )));
        }

        if self.mac_filter.as_ref().is_some_and(MacFilter::is_empty) {
            return Err(ConfigError::Invalid(
                "`mac_filter` must list at least one sensor, or be left out".into(),
            ));
        }

        Ok(())
    }

    /// Upper-case identifier keys so they match what the scanner reports.
    ///
    /// Two keys that differ only in case name the same sensor and are rejected.
    fn normalize(&mut self) -> Result<(), ConfigError> {
        if let Some(names) = self.device_names.take() {
            let mut normalized = BTreeMap::new();
            for (mac, name) in names {
                let key = normalize_identifier(&mac);
                if normalized.insert(key.clone(), name).is_some() {
                    return Err(ConfigError::Invalid(format!(
                        "`device-names` lists {key} more than once"
                    )));
                }
            }
            self.device_names = Some(normalized);
        }
        Ok(())
    }

    /// Username and password, when a username is configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.username.is_empty() {
            None
        } else {
            Some((&self.username, &self.password))
        }
    }
}
