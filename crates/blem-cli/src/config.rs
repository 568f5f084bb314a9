//! Configuration file management.
//!
//! ```toml
//! [scan]
//! seconds = 5
//! services = ["180d"]
//!
//! [device]
//! auto_discover_services = ["180f", "180a"]
//!
//! [logging]
//! level = "info"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use blem_types::uuids::parse_uuid;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Defaults for scanning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Scan duration in seconds
    pub seconds: u64,

    /// Only report peripherals advertising one of these services
    pub services: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            seconds: 5,
            services: Vec::new(),
        }
    }
}

/// Defaults applied to every device the CLI talks to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Services discovered after each connect, besides the advertised ones
    pub auto_discover_services: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log filter used when neither RUST_LOG nor --verbose/--quiet is given
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Get the default config file path
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("blem")
            .join("config.toml")
    }

    /// Load config from `path` (or the default location).
    ///
    /// A missing file yields the defaults; an unreadable or invalid one is an
    /// error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::path);
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config: {}", path.display()))?;
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to `path` (or the default location).
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Check every field, naming the offending one.
    pub fn validate(&self) -> Result<()> {
        if self.scan.seconds == 0 {
            bail!("scan.seconds must be > 0");
        }
        parse_services("scan.services", &self.scan.services)?;
        parse_services(
            "device.auto_discover_services",
            &self.device.auto_discover_services,
        )?;
        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            bail!(
                "logging.level must be one of {}, got '{}'",
                LOG_LEVELS.join(", "),
                self.logging.level
            );
        }
        Ok(())
    }

    pub fn scan_services(&self) -> Result<Vec<Uuid>> {
        parse_services("scan.services", &self.scan.services)
    }

    pub fn auto_discover_services(&self) -> Result<Vec<Uuid>> {
        parse_services(
            "device.auto_discover_services",
            &self.device.auto_discover_services,
        )
    }
}

/// Parse a list of UUID strings; errors name `field[index]`.
pub fn parse_services(field: &str, services: &[String]) -> Result<Vec<Uuid>> {
    services
        .iter()
        .enumerate()
        .map(|(i, s)| parse_uuid(s).with_context(|| format!("{}[{}]", field, i)))
        .collect()
}

/// Resolve scan seconds: explicit flag, then config.
pub fn resolve_seconds(flag: Option<u64>, config: &Config) -> Result<u64> {
    match flag {
        Some(0) => bail!("--seconds must be > 0"),
        Some(seconds) => Ok(seconds),
        None => Ok(config.scan.seconds),
    }
}
