//! BLE serial link
//!
//! Protocol-level pieces of a single-peer GATT link. Platform code (Kotlin,
//! Swift, BlueZ) implements [`LinkPlatform`] and reports back through a
//! [`SignalSender`]; everything here is testable without a radio.
//!
//! - **frame**: packet header, frame encoder and receive-side assembler
//! - **queue**: FIFO of packets waiting for the link
//! - **coordinator**: drains the queue, one write in flight
//! - **session**: connection state machine and platform signals
//! - **router**: classifies incoming characteristic values
//! - **gatt**: addresses, service tables and the platform trait
//! - **service**: ties the above together behind `LinkService`

pub mod coordinator;
pub mod frame;
pub mod gatt;
pub mod queue;
pub mod router;
pub mod service;
pub mod session;

pub use coordinator::TransmissionCoordinator;

pub use frame::{
    FrameAssembler, FrameEncoder, FrameError, FramePackets, FrameType, Packet, PacketHeader,
    PACKET_HEADER_SIZE,
};

pub use gatt::{
    CapabilitySet, GattService, LinkPlatform, PeerAddress, TransportHandle,
    CLIENT_CHARACTERISTIC_CONFIG_UUID, DATA_CHARACTERISTIC_UUID, LINK_SERVICE_UUID,
    STATUS_CHARACTERISTIC_UUID, TRANSMIT_CHARACTERISTIC_UUID, WriteId,
};

pub use queue::OutboundQueue;

pub use router::{hex_with_raw, ChannelKind, ChannelMap, Notification, NotificationPayload, NotificationRouter};

pub use service::{LinkEvent, LinkService};

pub use session::{link_signals, ConnectionState, LinkSession, LinkSignal, SignalReceiver, SignalSender};
