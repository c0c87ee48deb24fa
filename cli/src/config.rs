// Configuration management for the gattlink CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/gattlink/config.json
// - Linux: ~/.config/gattlink/config.json
// - Windows: %APPDATA%\gattlink\config.json

use anyhow::{Context, Result};
use gattlink_core::LinkSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Link framing and channel layout
    pub link: LinkSettings,

    /// Default log filter when RUST_LOG is unset
    pub log_level: String,

    /// Simulated peripheral write latency
    pub write_latency_ms: u64,

    /// How long `send` waits for the echo
    pub response_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            link: LinkSettings::default(),
            log_level: "warn".to_string(),
            write_latency_ms: 10,
            response_timeout_secs: 5,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("gattlink");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from the default location, creating it if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            config
                .link
                .validate()
                .context("Invalid link settings in config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value. The caller persists it.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let mut updated = self.clone();
        match key {
            "max_write_size" => {
                updated.link.max_write_size = value.parse().context("Invalid number")?;
            }
            "max_payload_len" => {
                updated.link.max_payload_len = value.parse().context("Invalid number")?;
            }
            "service_uuid" => updated.link.service_uuid = parse_uuid(value)?,
            "transmit_uuid" => updated.link.transmit_uuid = parse_uuid(value)?,
            "data_uuid" => updated.link.data_uuid = parse_uuid(value)?,
            "status_uuid" => updated.link.status_uuid = parse_uuid(value)?,
            "subscribe_on_discovery" => {
                updated.link.subscribe_on_discovery =
                    value.parse().context("Invalid boolean value")?;
            }
            "event_capacity" => {
                updated.link.event_capacity = value.parse().context("Invalid number")?;
            }
            "log_level" => updated.log_level = value.to_string(),
            "write_latency_ms" => {
                updated.write_latency_ms = value.parse().context("Invalid number")?;
            }
            "response_timeout_secs" => {
                updated.response_timeout_secs = value.parse().context("Invalid number")?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        updated
            .link
            .validate()
            .with_context(|| format!("Rejected value for {}", key))?;
        *self = updated;
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        self.list()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        let link = &self.link;
        vec![
            ("max_write_size".to_string(), link.max_write_size.to_string()),
            ("max_payload_len".to_string(), link.max_payload_len.to_string()),
            ("service_uuid".to_string(), link.service_uuid.to_string()),
            ("transmit_uuid".to_string(), link.transmit_uuid.to_string()),
            ("data_uuid".to_string(), link.data_uuid.to_string()),
            ("status_uuid".to_string(), link.status_uuid.to_string()),
            (
                "subscribe_on_discovery".to_string(),
                link.subscribe_on_discovery.to_string(),
            ),
            ("event_capacity".to_string(), link.event_capacity.to_string()),
            ("log_level".to_string(), self.log_level.clone()),
            ("write_latency_ms".to_string(), self.write_latency_ms.to_string()),
            (
                "response_timeout_secs".to_string(),
                self.response_timeout_secs.to_string(),
            ),
        ]
    }
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).with_context(|| format!("Invalid UUID: {}", value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.link.max_write_size, 20);
        assert_eq!(config.log_level, "warn");
        assert!(config.link.validate().is_ok());
    }

    #[test]
    fn test_set_and_get() {
        let mut config = Config::default();
        config.set("max_write_size", "64").unwrap();
        config.set("log_level", "debug").unwrap();

        assert_eq!(config.get("max_write_size").as_deref(), Some("64"));
        assert_eq!(config.get("log_level").as_deref(), Some("debug"));
        assert_eq!(config.get("no_such_key"), None);
    }

    #[test]
    fn test_set_rejects_invalid_link_settings() {
        let mut config = Config::default();
        assert!(config.set("max_write_size", "5").is_err());
        let transmit = config.link.transmit_uuid.to_string();
        assert!(config.set("data_uuid", &transmit).is_err());
        assert!(config.set("event_capacity", "lots").is_err());
        assert!(config.set("no_such_key", "1").is_err());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_creates_default_then_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let created = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created, Config::default());

        let mut edited = created;
        edited.set("write_latency_ms", "0").unwrap();
        edited.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap().write_latency_ms, 0);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"log_level":"info"}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.link, LinkSettings::default());
    }
}
