//! Notification router: classifies incoming characteristic values
//!
//! Every channel identity maps to exactly one `ChannelKind`; anything not in
//! the map falls through to `Unknown` and is still delivered.

use super::service::LinkEvent;
use crate::LinkSettings;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

/// Known logical channels on the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    /// Device status text
    DeviceStatus,
    /// Application data streamed by the peer
    DeviceData,
    /// Echo of the channel we write to
    Transmit,
    /// Anything else
    Unknown,
}

/// Republished form of an incoming value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationPayload {
    Bytes(Vec<u8>),
    Text(String),
}

/// One incoming value after classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: Uuid,
    pub kind: ChannelKind,
    pub payload: NotificationPayload,
}

/// Channel identities this link knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMap {
    pub status: Uuid,
    pub data: Uuid,
    pub transmit: Uuid,
}

impl ChannelMap {
    pub fn from_settings(settings: &LinkSettings) -> Self {
        Self {
            status: settings.status_uuid,
            data: settings.data_uuid,
            transmit: settings.transmit_uuid,
        }
    }

    pub fn classify(&self, channel: &Uuid) -> ChannelKind {
        match *channel {
            c if c == self.data => ChannelKind::DeviceData,
            c if c == self.status => ChannelKind::DeviceStatus,
            c if c == self.transmit => ChannelKind::Transmit,
            _ => ChannelKind::Unknown,
        }
    }
}

/// Routes raw notifications into `LinkEvent::DataAvailable`
#[derive(Debug, Clone)]
pub struct NotificationRouter {
    channels: ChannelMap,
}

impl NotificationRouter {
    pub fn new(channels: ChannelMap) -> Self {
        Self { channels }
    }

    pub fn channels(&self) -> &ChannelMap {
        &self.channels
    }

    /// Classify one value. Never drops input.
    pub fn classify(&self, channel: Uuid, data: Vec<u8>) -> Notification {
        let kind = self.channels.classify(&channel);
        let payload = match kind {
            ChannelKind::DeviceData => {
                debug!("DATA: {}", hex::encode_upper(&data));
                NotificationPayload::Bytes(data)
            }
            ChannelKind::DeviceStatus => {
                NotificationPayload::Text(String::from_utf8_lossy(&data).into_owned())
            }
            ChannelKind::Transmit => {
                debug!("TX: {} Data: {}", channel, hex::encode_upper(&data));
                NotificationPayload::Text(hex_with_raw(&data))
            }
            ChannelKind::Unknown => {
                warn!("Unknown service characteristic {}", channel);
                NotificationPayload::Text(hex_with_raw(&data))
            }
        };

        Notification {
            channel,
            kind,
            payload,
        }
    }

    pub fn route(&self, channel: Uuid, data: Vec<u8>) -> LinkEvent {
        LinkEvent::DataAvailable(self.classify(channel, data))
    }
}

/// Raw text followed by spaced upper-case hex pairs: `"Hi\n48 69"`
pub fn hex_with_raw(data: &[u8]) -> String {
    let pairs: Vec<String> = data.iter().map(|b| format!("{:02X}", b)).collect();
    format!("{}\n{}", String::from_utf8_lossy(data), pairs.join(" "))
}
