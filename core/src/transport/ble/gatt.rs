/// GATT-side types for the serial link
///
/// This module holds the identities the link core talks about (service and
/// characteristic UUIDs, peer addresses, discovered capabilities) and the
/// platform trait that performs the actual radio operations.

use crate::LinkError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Serial link service (Nordic UART family)
pub const LINK_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e40_0001_b5a3_f393_e0a9_e50e_24dc_ca9e);

/// Characteristic the central writes packets to
pub const TRANSMIT_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6e40_0002_b5a3_f393_e0a9_e50e_24dc_ca9e);

/// Characteristic the peripheral streams data back on
pub const DATA_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6e40_0003_b5a3_f393_e0a9_e50e_24dc_ca9e);

/// Characteristic carrying device status text
pub const STATUS_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6e40_0004_b5a3_f393_e0a9_e50e_24dc_ca9e);

/// Client Characteristic Configuration descriptor (0x2902)
pub const CLIENT_CHARACTERISTIC_CONFIG_UUID: Uuid =
    Uuid::from_u128(0x0000_2902_0000_1000_8000_0080_5f9b_34fb);

/// 48-bit Bluetooth device address, most significant byte first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress([u8; 6]);

impl PeerAddress {
    pub fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl FromStr for PeerAddress {
    type Err = LinkError;

    /// Parse `AA:BB:CC:DD:EE:FF` (either case)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LinkError::InvalidAddress(s.to_string());

        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(invalid());
        }

        let mut bytes = [0u8; 6];
        for (slot, part) in bytes.iter_mut().zip(parts) {
            let decoded = hex::decode(part).map_err(|_| invalid())?;
            if decoded.len() != 1 {
                return Err(invalid());
            }
            *slot = decoded[0];
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// Live platform connection resource.
///
/// Not `Clone`. The session owns exactly one and [`LinkPlatform::close`]
/// consumes it.
#[derive(Debug, PartialEq, Eq)]
pub struct TransportHandle {
    id: u64,
}

impl TransportHandle {
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Identifies one submitted write.
///
/// The core hands a fresh id to every [`LinkPlatform::write`] and only
/// accepts a completion that carries the same id back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WriteId(u64);

impl WriteId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WriteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A discovered GATT service and its characteristics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

impl GattService {
    pub fn new(uuid: Uuid, characteristics: Vec<Uuid>) -> Self {
        Self {
            uuid,
            characteristics,
        }
    }

    pub fn has_characteristic(&self, characteristic: &Uuid) -> bool {
        self.characteristics.contains(characteristic)
    }
}

/// Services discovered on the current connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    services: Vec<GattService>,
}

impl CapabilitySet {
    pub fn new(services: Vec<GattService>) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &[GattService] {
        &self.services
    }

    pub fn service(&self, uuid: &Uuid) -> Option<&GattService> {
        self.services.iter().find(|s| &s.uuid == uuid)
    }

    /// Look up a characteristic inside a specific service
    pub fn resolve(&self, service: &Uuid, characteristic: &Uuid) -> Result<Uuid, LinkError> {
        self.service(service)
            .filter(|s| s.has_characteristic(characteristic))
            .map(|_| *characteristic)
            .ok_or(LinkError::CapabilityResolutionFailed {
                service: *service,
                characteristic: *characteristic,
            })
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Platform BLE operations the link core calls into.
///
/// Every method must return promptly: outcomes that take radio time are
/// reported later through a [`SignalSender`](super::session::SignalSender).
/// Implementations must not call back into the `LinkService` synchronously.
pub trait LinkPlatform: Send + Sync {
    /// Whether a usable adapter is present
    fn is_available(&self) -> bool;

    /// Start a new connection. A connection-state signal follows.
    fn connect(&self, address: &PeerAddress) -> Result<TransportHandle, LinkError>;

    /// Re-establish a connection on an existing handle
    fn reconnect(&self, handle: &TransportHandle) -> Result<(), LinkError>;

    /// Request link teardown. A Disconnected signal follows.
    fn disconnect(&self, handle: &TransportHandle);

    /// Release the handle and everything the platform holds for it
    fn close(&self, handle: TransportHandle);

    /// Request service discovery. Returns false if the request was refused.
    fn discover_capabilities(&self, handle: &TransportHandle) -> bool;

    /// Submit a characteristic write. `true` means submitted, not completed.
    /// The completion must be reported with the same `id`.
    fn write(&self, handle: &TransportHandle, channel: &Uuid, bytes: &[u8], id: WriteId) -> bool;

    /// Request a characteristic read. The value arrives as a signal.
    fn read(&self, handle: &TransportHandle, channel: &Uuid) -> bool;

    /// Enable or disable notifications, including the CCC descriptor write
    fn set_notifications(&self, handle: &TransportHandle, channel: &Uuid, enabled: bool) -> bool;
}
