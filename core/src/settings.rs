//! Link settings and configuration management
//!
//! Serializable to/from JSON. Packet sizing is validated here so the frame
//! encoder never sees a capacity it cannot work with.

use crate::transport::ble::frame::PACKET_HEADER_SIZE;
use crate::transport::ble::gatt::{
    DATA_CHARACTERISTIC_UUID, LINK_SERVICE_UUID, STATUS_CHARACTERISTIC_UUID,
    TRANSMIT_CHARACTERISTIC_UUID,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

/// Default ATT MTU (23) minus the 3-byte write request header
pub const DEFAULT_MAX_WRITE_SIZE: usize = 20;

/// Largest attribute value the ATT protocol allows
pub const MAX_ATTRIBUTE_SIZE: usize = 512;

/// Default cap on a single application payload
pub const DEFAULT_MAX_PAYLOAD_LEN: usize = 4096;

/// Default outbound event buffer per subscriber
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Settings for one link service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    /// Largest single characteristic write the link accepts, header included
    pub max_write_size: usize,

    /// Largest application payload accepted by `send_frame`
    pub max_payload_len: usize,

    /// Primary GATT service carrying the serial channels
    pub service_uuid: Uuid,

    /// Characteristic packets are written to
    pub transmit_uuid: Uuid,

    /// Characteristic the peer streams data back on
    pub data_uuid: Uuid,

    /// Characteristic carrying device status text
    pub status_uuid: Uuid,

    /// Enable notifications on the data channel after each discovery
    pub subscribe_on_discovery: bool,

    /// Buffered outbound events per subscriber
    pub event_capacity: usize,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            max_write_size: DEFAULT_MAX_WRITE_SIZE,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
            service_uuid: LINK_SERVICE_UUID,
            transmit_uuid: TRANSMIT_CHARACTERISTIC_UUID,
            data_uuid: DATA_CHARACTERISTIC_UUID,
            status_uuid: STATUS_CHARACTERISTIC_UUID,
            subscribe_on_discovery: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl LinkSettings {
    /// Create new settings with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload bytes carried by each packet
    pub fn packet_capacity(&self) -> usize {
        self.max_write_size.saturating_sub(PACKET_HEADER_SIZE)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.max_write_size <= PACKET_HEADER_SIZE {
            return Err(SettingsError::ConfigError(format!(
                "max_write_size must exceed the {}-byte packet header",
                PACKET_HEADER_SIZE
            )));
        }

        if self.max_write_size > MAX_ATTRIBUTE_SIZE {
            return Err(SettingsError::ConfigError(format!(
                "max_write_size cannot exceed {}",
                MAX_ATTRIBUTE_SIZE
            )));
        }

        if self.max_payload_len == 0 {
            return Err(SettingsError::ConfigError(
                "max_payload_len must be at least 1".to_string(),
            ));
        }

        if self.event_capacity == 0 {
            return Err(SettingsError::ConfigError(
                "event_capacity must be at least 1".to_string(),
            ));
        }

        let channels = [self.transmit_uuid, self.data_uuid, self.status_uuid];
        if channels[0] == channels[1] || channels[0] == channels[2] || channels[1] == channels[2] {
            return Err(SettingsError::ConfigError(
                "transmit, data and status channels must be distinct".to_string(),
            ));
        }

        Ok(())
    }

    /// Load settings from JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_string(&content)
    }

    /// Save settings to JSON file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SettingsError> {
        let json = self.to_json_string()?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Convert to pretty JSON string
    pub fn to_json_string(&self) -> Result<String, SettingsError> {
        self.validate()?;
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Create from JSON string
    pub fn from_json_string(json: &str) -> Result<Self, SettingsError> {
        let settings: LinkSettings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_validate() {
        let settings = LinkSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.packet_capacity(), 15);
        assert!(settings.subscribe_on_discovery);
    }

    #[test]
    fn test_write_size_must_exceed_header() {
        let settings = LinkSettings {
            max_write_size: PACKET_HEADER_SIZE,
            ..LinkSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_write_size_capped_at_attribute_limit() {
        let settings = LinkSettings {
            max_write_size: MAX_ATTRIBUTE_SIZE + 1,
            ..LinkSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_zero_payload_limit_rejected() {
        let settings = LinkSettings {
            max_payload_len: 0,
            ..LinkSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_duplicate_channels_rejected() {
        let settings = LinkSettings {
            data_uuid: TRANSMIT_CHARACTERISTIC_UUID,
            ..LinkSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let settings =
            LinkSettings::from_json_string(r#"{ "max_write_size": 185 }"#).expect("Valid JSON");
        assert_eq!(settings.max_write_size, 185);
        assert_eq!(settings.max_payload_len, DEFAULT_MAX_PAYLOAD_LEN);
        assert_eq!(settings.service_uuid, LINK_SERVICE_UUID);
    }

    #[test]
    fn test_invalid_json_values_rejected() {
        let result = LinkSettings::from_json_string(r#"{ "max_write_size": 3 }"#);
        assert!(matches!(result, Err(SettingsError::ConfigError(_))));
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().expect("Temp dir");
        let path = dir.path().join("link.json");

        let settings = LinkSettings {
            max_write_size: 244,
            subscribe_on_discovery: false,
            ..LinkSettings::default()
        };
        settings.save(&path).expect("Save");

        let loaded = LinkSettings::load(&path).expect("Load");
        assert_eq!(loaded, settings);
    }
}
