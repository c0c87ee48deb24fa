/// Serial framing for the BLE link
///
/// Splits application payloads into packets no larger than one characteristic
/// write, and reassembles them on the receiving side.
///
/// Wire layout: [frame_type: u8 | ordinal: u16 LE | total: u16 LE | payload...]

use thiserror::Error;
use tracing::warn;

/// Size of the packet header in bytes
pub const PACKET_HEADER_SIZE: usize = 5;

/// Upper bound on packets in one frame (ordinal and total are u16)
pub const MAX_PACKETS_PER_FRAME: usize = u16::MAX as usize;

/// Errors for framing operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Payload of {len} bytes exceeds maximum of {max}")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("Packet capacity must be at least 1 byte")]
    InvalidCapacity,
    #[error("Packet header too short: {0} bytes")]
    HeaderTooShort(usize),
    #[error("Unknown frame type 0x{0:02X}")]
    UnknownFrameType(u8),
    #[error("Invalid header: ordinal {ordinal} of {total}")]
    InvalidHeader { ordinal: u16, total: u16 },
    #[error("Frame truncated: expected {expected} packets, received {received}")]
    Truncated { expected: u16, received: u16 },
    #[error("Packet out of order: expected ordinal {expected}, got {got}")]
    OutOfOrder { expected: u16, got: u16 },
}

/// Application-level message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// UTF-8 command string
    String = 0x01,
    /// Opaque bytes
    Binary = 0x02,
    /// Link control message
    Command = 0x03,
}

impl FrameType {
    /// Whether an empty payload still travels as a one-packet envelope
    pub fn requires_envelope(&self) -> bool {
        !matches!(self, FrameType::Binary)
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FrameType::String),
            0x02 => Ok(FrameType::Binary),
            0x03 => Ok(FrameType::Command),
            other => Err(FrameError::UnknownFrameType(other)),
        }
    }
}

/// Packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub frame_type: FrameType,
    /// Position of this packet in the frame (0-based)
    pub ordinal: u16,
    /// Number of packets in the frame
    pub total: u16,
}

impl PacketHeader {
    /// Create a new header, rejecting ordinals outside the frame
    pub fn new(frame_type: FrameType, ordinal: u16, total: u16) -> Result<Self, FrameError> {
        if ordinal >= total {
            return Err(FrameError::InvalidHeader { ordinal, total });
        }
        Ok(Self {
            frame_type,
            ordinal,
            total,
        })
    }

    /// Whether this is the final packet of its frame
    pub fn is_last(&self) -> bool {
        self.ordinal + 1 == self.total
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> [u8; PACKET_HEADER_SIZE] {
        let mut bytes = [0u8; PACKET_HEADER_SIZE];
        bytes[0] = self.frame_type.as_u8();
        bytes[1..3].copy_from_slice(&self.ordinal.to_le_bytes());
        bytes[3..5].copy_from_slice(&self.total.to_le_bytes());
        bytes
    }

    /// Deserialize from the front of a wire packet
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < PACKET_HEADER_SIZE {
            return Err(FrameError::HeaderTooShort(bytes.len()));
        }
        let frame_type = FrameType::try_from(bytes[0])?;
        let ordinal = u16::from_le_bytes([bytes[1], bytes[2]]);
        let total = u16::from_le_bytes([bytes[3], bytes[4]]);
        Self::new(frame_type, ordinal, total)
    }
}

/// One link-sized unit of a frame. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    header: PacketHeader,
    bytes: Vec<u8>,
}

impl Packet {
    fn build(header: PacketHeader, payload: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(PACKET_HEADER_SIZE + payload.len());
        bytes.extend_from_slice(&header.to_bytes());
        bytes.extend_from_slice(payload);
        Self { header, bytes }
    }

    /// Parse a packet received off the wire
    pub fn from_wire(bytes: &[u8]) -> Result<Self, FrameError> {
        let header = PacketHeader::from_bytes(bytes)?;
        Ok(Self {
            header,
            bytes: bytes.to_vec(),
        })
    }

    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    /// Payload slice carried by this packet
    pub fn payload(&self) -> &[u8] {
        &self.bytes[PACKET_HEADER_SIZE..]
    }

    /// Full wire representation, header included
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Splits payloads into packets of a fixed payload capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameEncoder {
    capacity: usize,
    max_payload_len: usize,
}

impl FrameEncoder {
    /// Create an encoder carrying `capacity` payload bytes per packet
    pub fn new(capacity: usize, max_payload_len: usize) -> Result<Self, FrameError> {
        if capacity == 0 {
            return Err(FrameError::InvalidCapacity);
        }
        Ok(Self {
            capacity,
            max_payload_len: max_payload_len.min(capacity.saturating_mul(MAX_PACKETS_PER_FRAME)),
        })
    }

    /// Create an encoder for a link whose writes are at most `max_write_size` bytes
    pub fn for_write_size(max_write_size: usize, max_payload_len: usize) -> Result<Self, FrameError> {
        Self::new(
            max_write_size.saturating_sub(PACKET_HEADER_SIZE),
            max_payload_len,
        )
    }

    /// Payload bytes per packet
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest payload this encoder accepts
    pub fn max_payload_len(&self) -> usize {
        self.max_payload_len
    }

    /// Number of packets `encode` produces for a payload of `len` bytes
    pub fn packet_count(&self, frame_type: FrameType, len: usize) -> usize {
        if len == 0 {
            return usize::from(frame_type.requires_envelope());
        }
        len.div_ceil(self.capacity)
    }

    /// Lazily split `payload` into packets. Nothing is produced for an
    /// oversize payload.
    pub fn encode<'a>(
        &self,
        frame_type: FrameType,
        payload: &'a [u8],
    ) -> Result<FramePackets<'a>, FrameError> {
        if payload.len() > self.max_payload_len {
            return Err(FrameError::PayloadTooLarge {
                len: payload.len(),
                max: self.max_payload_len,
            });
        }

        // Bounded by max_payload_len above
        let total = self.packet_count(frame_type, payload.len()) as u16;

        Ok(FramePackets {
            frame_type,
            payload,
            capacity: self.capacity,
            total,
            next: 0,
        })
    }
}

/// Iterator over the packets of one frame
#[derive(Debug, Clone)]
pub struct FramePackets<'a> {
    frame_type: FrameType,
    payload: &'a [u8],
    capacity: usize,
    total: u16,
    next: u16,
}

impl Iterator for FramePackets<'_> {
    type Item = Packet;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total {
            return None;
        }
        let ordinal = self.next;
        self.next += 1;

        let start = (ordinal as usize * self.capacity).min(self.payload.len());
        let end = (start + self.capacity).min(self.payload.len());
        let header = PacketHeader {
            frame_type: self.frame_type,
            ordinal,
            total: self.total,
        };
        Some(Packet::build(header, &self.payload[start..end]))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.total - self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for FramePackets<'_> {}

/// Collects wire packets back into complete frames
#[derive(Debug, Default)]
pub struct FrameAssembler {
    current: Option<PartialFrame>,
    truncated: u64,
}

#[derive(Debug)]
struct PartialFrame {
    frame_type: FrameType,
    total: u16,
    received: u16,
    data: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a frame is partially collected
    pub fn in_progress(&self) -> bool {
        self.current.is_some()
    }

    /// Frames abandoned because a new frame started before they finished
    pub fn truncated_frames(&self) -> u64 {
        self.truncated
    }

    /// Feed one wire packet. Returns the frame once its last packet arrives.
    ///
    /// A fresh ordinal 0 while a frame is open abandons the open frame and
    /// starts collecting the new one.
    pub fn push(&mut self, wire: &[u8]) -> Result<Option<(FrameType, Vec<u8>)>, FrameError> {
        let packet = Packet::from_wire(wire)?;
        let header = *packet.header();

        if header.ordinal == 0 {
            if let Some(open) = self.current.take() {
                self.truncated += 1;
                warn!(
                    "Frame truncated: received {} of {} packets",
                    open.received, open.total
                );
            }
            self.current = Some(PartialFrame {
                frame_type: header.frame_type,
                total: header.total,
                received: 0,
                data: Vec::new(),
            });
        }

        let Some(frame) = self.current.as_mut() else {
            return Err(FrameError::OutOfOrder {
                expected: 0,
                got: header.ordinal,
            });
        };

        if header.ordinal != frame.received
            || header.total != frame.total
            || header.frame_type != frame.frame_type
        {
            let expected = frame.received;
            self.current = None;
            return Err(FrameError::OutOfOrder {
                expected,
                got: header.ordinal,
            });
        }

        frame.data.extend_from_slice(packet.payload());
        frame.received += 1;

        if header.is_last() {
            return Ok(self.current.take().map(|f| (f.frame_type, f.data)));
        }
        Ok(None)
    }

    /// End of stream. Fails if a frame is still open.
    pub fn finish(&mut self) -> Result<(), FrameError> {
        match self.current.take() {
            Some(open) => Err(FrameError::Truncated {
                expected: open.total,
                received: open.received,
            }),
            None => Ok(()),
        }
    }
}
