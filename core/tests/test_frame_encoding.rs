// Property tests for frame encoding
//
// Packet counts follow ceil(len / capacity), every packet fits one write, and
// the assembler gives back exactly what went in.

use gattlink_core::transport::ble::PACKET_HEADER_SIZE;
use gattlink_core::{FrameAssembler, FrameEncoder, FrameError, FrameType};
use proptest::prelude::*;

fn frame_type() -> impl Strategy<Value = FrameType> {
    prop_oneof![
        Just(FrameType::String),
        Just(FrameType::Binary),
        Just(FrameType::Command),
    ]
}

proptest! {
    #[test]
    fn prop_packet_count_and_sizes(
        capacity in 1usize..64,
        frame_type in frame_type(),
        payload in proptest::collection::vec(any::<u8>(), 0..512),
    ) {
        let encoder = FrameEncoder::new(capacity, 4096).expect("Valid capacity");
        let packets: Vec<_> = encoder.encode(frame_type, &payload).expect("Within limit").collect();

        let expected = if payload.is_empty() {
            usize::from(frame_type != FrameType::Binary)
        } else {
            payload.len().div_ceil(capacity)
        };
        prop_assert_eq!(packets.len(), expected);

        for (i, packet) in packets.iter().enumerate() {
            prop_assert_eq!(packet.header().ordinal as usize, i);
            prop_assert_eq!(packet.header().total as usize, expected);
            prop_assert!(packet.len() <= capacity + PACKET_HEADER_SIZE);
            if i + 1 < packets.len() {
                prop_assert_eq!(packet.payload().len(), capacity);
            }
        }
    }

    #[test]
    fn prop_assembler_restores_payload(
        max_write_size in 6usize..40,
        payload in proptest::collection::vec(any::<u8>(), 1..300),
    ) {
        let encoder = FrameEncoder::for_write_size(max_write_size, 4096).expect("Valid size");
        let mut assembler = FrameAssembler::new();
        let mut frames = Vec::new();

        for packet in encoder.encode(FrameType::Binary, &payload).expect("Within limit") {
            prop_assert!(packet.len() <= max_write_size);
            if let Some(frame) = assembler.push(packet.as_bytes()).expect("In order") {
                frames.push(frame);
            }
        }

        prop_assert_eq!(frames, vec![(FrameType::Binary, payload)]);
        prop_assert!(assembler.finish().is_ok());
    }

    #[test]
    fn prop_oversize_payload_rejected(
        capacity in 1usize..16,
        extra in 1usize..32,
    ) {
        let max = capacity * 4;
        let encoder = FrameEncoder::new(capacity, max).expect("Valid capacity");
        let payload = vec![0u8; max + extra];

        prop_assert_eq!(
            encoder.encode(FrameType::String, &payload).err(),
            Some(FrameError::PayloadTooLarge { len: max + extra, max })
        );
    }
}

#[test]
fn test_default_link_splits_at_fifteen_bytes() {
    let encoder = FrameEncoder::for_write_size(20, 4096).expect("Valid size");
    let lengths: Vec<usize> = encoder
        .encode(FrameType::String, &[b'a'; 40])
        .expect("Within limit")
        .map(|p| p.payload().len())
        .collect();

    assert_eq!(lengths, vec![15, 15, 10]);
}
