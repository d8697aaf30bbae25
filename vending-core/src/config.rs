//! TOML configuration, loaded once at startup.

use crate::error::{Result, VendError};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub serial: SerialConfig,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SerialConfig {
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

fn default_baud_rate() -> u32 {
    115_200
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub https: Option<HttpsProviderConfig>,
    pub local: Option<LocalProviderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpsProviderConfig {
    pub base_url: String,
    pub shared_secret: String,
    pub nonce_db_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalProviderConfig {
    pub db_path: String,
    #[serde(default = "default_flat_credits")]
    pub flat_credits: u32,
}

fn default_flat_credits() -> u32 {
    69
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| VendError::Config(format!("reading {}: {e}", path.display())))?;
        toml::from_str(&raw).map_err(|e| VendError::Config(format!("parsing {}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let toml = r#"
            [serial]
            port = "/dev/ttyUSB0"

            [provider.local]
            db_path = "users.db"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.provider.local.unwrap().flat_credits, 69);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn rejects_missing_serial_port() {
        let toml = r#"
            [provider.local]
            db_path = "users.db"
        "#;
        let result: std::result::Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }
}
