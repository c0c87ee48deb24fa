//! Outbound packet queue
//!
//! Unbounded FIFO shared by any number of producers and drained by the single
//! transmission task. Insertion never waits on the link; retrieval parks the
//! consumer on a `Notify` until something is queued.

use super::frame::Packet;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct QueueInner {
    packets: Mutex<VecDeque<Packet>>,
    available: Notify,
}

/// Handle to a link's outbound queue. Clones share the same queue.
#[derive(Debug, Clone, Default)]
pub struct OutboundQueue {
    inner: Arc<QueueInner>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one packet
    pub fn enqueue(&self, packet: Packet) {
        self.inner.packets.lock().push_back(packet);
        self.inner.available.notify_one();
    }

    /// Append all packets of a frame contiguously. Returns how many were queued.
    pub fn enqueue_frame<I>(&self, packets: I) -> usize
    where
        I: IntoIterator<Item = Packet>,
    {
        let added = {
            let mut queue = self.inner.packets.lock();
            let before = queue.len();
            queue.extend(packets);
            queue.len() - before
        };
        if added > 0 {
            self.inner.available.notify_one();
        }
        added
    }

    /// Take the next packet, waiting until one is available.
    ///
    /// Cancel-safe: a packet is only removed in the same poll that returns it.
    pub async fn dequeue(&self) -> Packet {
        loop {
            if let Some(packet) = self.try_dequeue() {
                return packet;
            }
            self.inner.available.notified().await;
        }
    }

    /// Take the next packet if one is queued
    pub fn try_dequeue(&self) -> Option<Packet> {
        let mut queue = self.inner.packets.lock();
        let packet = queue.pop_front();
        if packet.is_some() && !queue.is_empty() {
            // Pass the wakeup on so a parked consumer sees the remainder
            self.inner.available.notify_one();
        }
        packet
    }

    /// Put a dequeued but unsent packet back at the head
    pub(crate) fn restore(&self, packet: Packet) {
        self.inner.packets.lock().push_front(packet);
        self.inner.available.notify_one();
    }

    pub fn len(&self) -> usize {
        self.inner.packets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.packets.lock().is_empty()
    }

    /// Discard everything queued. Returns how many packets were dropped.
    pub fn clear(&self) -> usize {
        let mut queue = self.inner.packets.lock();
        let dropped = queue.len();
        queue.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ble::frame::{FrameEncoder, FrameType};
    use tokio_test::{assert_pending, assert_ready};

    fn packets(payload: &[u8], capacity: usize) -> Vec<Packet> {
        FrameEncoder::new(capacity, 4096)
            .expect("Valid encoder")
            .encode(FrameType::Binary, payload)
            .expect("Encode")
            .collect()
    }

    #[test]
    fn test_queue_fifo_order() {
        let queue = OutboundQueue::new();
        for packet in packets(b"abc", 1) {
            queue.enqueue(packet);
        }

        assert_eq!(queue.len(), 3);
        let order: Vec<u8> = std::iter::from_fn(|| queue.try_dequeue())
            .map(|p| p.payload()[0])
            .collect();
        assert_eq!(order, b"abc".to_vec());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_enqueue_frame_counts_packets() {
        let queue = OutboundQueue::new();
        assert_eq!(queue.enqueue_frame(packets(b"hello world", 4)), 3);
        assert_eq!(queue.enqueue_frame(Vec::new()), 0);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_dequeue_parks_until_enqueue() {
        let queue = OutboundQueue::new();
        let mut task = tokio_test::task::spawn(queue.dequeue());

        assert_pending!(task.poll());

        let mut frame = packets(b"x", 1);
        queue.enqueue(frame.remove(0));

        assert!(task.is_woken());
        let packet = assert_ready!(task.poll());
        assert_eq!(packet.payload(), b"x");
    }

    #[test]
    fn test_restore_puts_packet_first() {
        let queue = OutboundQueue::new();
        queue.enqueue_frame(packets(b"ab", 1));

        let first = queue.try_dequeue().expect("First packet");
        queue.restore(first);

        let again = queue.try_dequeue().expect("Restored packet");
        assert_eq!(again.payload(), b"a");
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_clear_reports_dropped() {
        let queue = OutboundQueue::new();
        queue.enqueue_frame(packets(b"abcd", 1));
        assert_eq!(queue.clear(), 4);
        assert!(queue.try_dequeue().is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let queue = OutboundQueue::new();
        let producer = queue.clone();
        producer.enqueue_frame(packets(b"ab", 1));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_concurrent_producers_keep_frames_contiguous() {
        let queue = OutboundQueue::new();
        let mut threads = Vec::new();

        for producer in 0u8..4 {
            let queue = queue.clone();
            threads.push(std::thread::spawn(move || {
                for _ in 0..25 {
                    queue.enqueue_frame(packets(&[producer; 3], 1));
                }
            }));
        }
        for thread in threads {
            thread.join().expect("Producer thread");
        }

        assert_eq!(queue.len(), 4 * 25 * 3);

        let drained: Vec<Packet> = std::iter::from_fn(|| queue.try_dequeue()).collect();
        for frame in drained.chunks(3) {
            let owner = frame[0].payload()[0];
            let ordinals: Vec<u16> = frame.iter().map(|p| p.header().ordinal).collect();
            assert_eq!(ordinals, vec![0, 1, 2]);
            assert!(frame.iter().all(|p| p.payload()[0] == owner));
        }
    }
}
