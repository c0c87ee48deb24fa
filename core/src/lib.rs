// Gattlink Core: single-peer BLE serial link
//
// One LinkService owns one peer session, one outbound packet queue and one
// drain loop. Platform code (Android, CoreBluetooth, BlueZ) implements
// LinkPlatform and feeds its callbacks back in through a SignalSender.

pub mod settings;
pub mod transport;

use thiserror::Error;
use uuid::Uuid;

pub use settings::{LinkSettings, SettingsError};
pub use transport::ble::{
    link_signals, CapabilitySet, ChannelKind, ChannelMap, ConnectionState, FrameAssembler,
    FrameEncoder, FrameError, FrameType, GattService, LinkEvent, LinkPlatform, LinkService,
    LinkSignal, Notification, NotificationPayload, NotificationRouter, OutboundQueue, Packet,
    PacketHeader, PeerAddress, SignalReceiver, SignalSender, TransportHandle, WriteId,
};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Errors surfaced by the link core.
///
/// Synchronous preconditions come back as `Err` from the call that would have
/// started the operation. Everything that happens after the platform accepted
/// a request is reported as a [`LinkEvent`] instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Bluetooth adapter not initialized")]
    NotInitialized,
    #[error("Invalid peer address: {0}")]
    InvalidAddress(String),
    #[error("Connect failed: {0}")]
    ConnectFailed(String),
    #[error("No live connection")]
    NotConnected,
    #[error("Characteristic {characteristic} not found in service {service}")]
    CapabilityResolutionFailed { service: Uuid, characteristic: Uuid },
    #[error("Payload of {len} bytes exceeds maximum of {max}")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("Write failed: {0}")]
    WriteFailed(String),
    #[error("Platform refused request: {0}")]
    RequestRefused(String),
    #[error("Link disconnected unexpectedly")]
    UnexpectedDisconnect,
    #[error("Framing error: {0}")]
    Framing(String),
}

impl From<FrameError> for LinkError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::PayloadTooLarge { len, max } => LinkError::PayloadTooLarge { len, max },
            other => LinkError::Framing(other.to_string()),
        }
    }
}
