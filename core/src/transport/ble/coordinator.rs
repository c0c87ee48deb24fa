//! Transmission coordinator
//!
//! One long-lived task per link. It drains the outbound queue strictly one
//! write at a time:
//!
//! ```text
//! wait for gate ─► dequeue ─► resolve TX characteristic ─► write ─► await completion ─┐
//!      ▲                                                                               │
//!      └───────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The gate opens on a successful service discovery and closes on disconnect,
//! reconnect, close, or when the transmit characteristic cannot be resolved.
//! A completion (success or failure) always leads to exactly one further
//! dequeue. Failed packets are reported and never retried.

use super::frame::Packet;
use super::gatt::WriteId;
use super::queue::OutboundQueue;
use super::service::{LinkEvent, LinkShared};
use crate::LinkError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Result delivered to the coordinator when a write resolves
pub(crate) type WriteOutcome = Result<(), LinkError>;

/// The single in-flight write
#[derive(Debug)]
struct PendingWrite {
    id: WriteId,
    channel: Uuid,
    ordinal: u16,
    done: oneshot::Sender<WriteOutcome>,
}

/// Holds at most one pending write
#[derive(Debug, Default)]
pub(crate) struct PendingWriteSlot {
    slot: Mutex<Option<PendingWrite>>,
    next_id: AtomicU64,
}

impl PendingWriteSlot {
    /// Register the write about to be issued under a fresh id
    fn arm(&self, channel: Uuid, ordinal: u16) -> (WriteId, oneshot::Receiver<WriteOutcome>) {
        let id = WriteId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (done, rx) = oneshot::channel();
        let stale = self.slot.lock().replace(PendingWrite {
            id,
            channel,
            ordinal,
            done,
        });
        if let Some(stale) = stale {
            warn!("Replacing unresolved write of packet {}", stale.ordinal);
        }
        (id, rx)
    }

    /// Withdraw the write registered by `arm` (the platform refused it)
    fn disarm(&self) {
        self.slot.lock().take();
    }

    /// Resolve the pending write from a completion signal.
    ///
    /// Only a completion carrying the pending write's id and channel counts.
    /// Anything else is left for the write it belongs to, which may already
    /// have been failed by a disconnect or close.
    pub(crate) fn complete(&self, channel: &Uuid, write: WriteId, success: bool) -> bool {
        let mut slot = self.slot.lock();
        match slot.take() {
            Some(pending) if pending.id == write && pending.channel == *channel => {
                let outcome = if success {
                    Ok(())
                } else {
                    Err(LinkError::WriteFailed(format!(
                        "link reported failure on {}",
                        channel
                    )))
                };
                let _ = pending.done.send(outcome);
                true
            }
            Some(pending) => {
                debug!(
                    "Completion {} on {} does not match pending write {} on {}",
                    write, channel, pending.id, pending.channel
                );
                *slot = Some(pending);
                false
            }
            None => false,
        }
    }

    /// Resolve the pending write as failed. Returns whether one was pending.
    pub(crate) fn fail(&self, error: LinkError) -> bool {
        match self.slot.lock().take() {
            Some(pending) => {
                let _ = pending.done.send(Err(error));
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.slot.lock().is_some()
    }
}

enum Issued {
    /// Write submitted, completion outstanding
    Pending(Uuid, oneshot::Receiver<WriteOutcome>),
    /// Link not ready; packet untouched and the gate closed
    NotReady,
    /// Packet consumed without a completion to wait for
    Failed(Option<Uuid>, LinkError),
}

/// Drains the outbound queue onto the link
pub struct TransmissionCoordinator {
    shared: Arc<LinkShared>,
    queue: OutboundQueue,
    gate: watch::Receiver<bool>,
}

impl TransmissionCoordinator {
    pub(crate) fn new(shared: Arc<LinkShared>, queue: OutboundQueue) -> Self {
        let gate = shared.gate.subscribe();
        Self {
            shared,
            queue,
            gate,
        }
    }

    /// Drain loop. Runs until the owning service aborts the task.
    pub(crate) async fn run(mut self) {
        info!("Transmission coordinator started");
        loop {
            if self.gate.wait_for(|open| *open).await.is_err() {
                break;
            }

            let packet = self.queue.dequeue().await;

            if !*self.gate.borrow() {
                debug!("Link not ready, holding packet {}", packet.header().ordinal);
                self.queue.restore(packet);
                continue;
            }

            self.transmit(packet).await;
        }
        info!("Transmission coordinator stopped");
    }

    async fn transmit(&self, packet: Packet) {
        let ordinal = packet.header().ordinal;

        let (channel, done) = match self.issue(&packet) {
            Issued::Pending(channel, done) => (channel, done),
            Issued::NotReady => {
                self.queue.restore(packet);
                return;
            }
            Issued::Failed(channel, error) => {
                self.report_failure(channel, ordinal, error);
                return;
            }
        };

        let outcome = done.await.unwrap_or_else(|_| {
            Err(LinkError::WriteFailed(
                "completion channel dropped".to_string(),
            ))
        });

        match outcome {
            Ok(()) => {
                debug!("Packet {} written to {}", ordinal, channel);
                self.shared
                    .emit(LinkEvent::WriteCompleted { channel, ordinal });
            }
            Err(error) => self.report_failure(Some(channel), ordinal, error),
        }
    }

    fn issue(&self, packet: &Packet) -> Issued {
        let ordinal = packet.header().ordinal;
        let settings = &self.shared.settings;

        // Held across the platform call so close() cannot release the handle mid-write
        let guard = self.shared.session.lock();
        let ready = guard
            .as_ref()
            .filter(|s| s.is_ready())
            .and_then(|s| s.handle().zip(s.capabilities()));
        let Some((handle, capabilities)) = ready else {
            // Closed under the session lock; the next discovery reopens it
            self.shared.close_gate();
            return Issued::NotReady;
        };

        let channel = match capabilities.resolve(&settings.service_uuid, &settings.transmit_uuid) {
            Ok(channel) => channel,
            Err(error) => {
                error!("Fatal error: cannot retrieve transmit characteristic from service");
                self.shared.close_gate();
                return Issued::Failed(None, error);
            }
        };

        let (id, done) = self.shared.pending.arm(channel, ordinal);
        if !self.shared.platform.write(handle, &channel, packet.as_bytes(), id) {
            self.shared.pending.disarm();
            return Issued::Failed(
                Some(channel),
                LinkError::WriteFailed("write not accepted by platform".to_string()),
            );
        }
        debug!("Packet {} submitted as write {} ({} bytes)", ordinal, id, packet.len());
        Issued::Pending(channel, done)
    }

    fn report_failure(&self, channel: Option<Uuid>, ordinal: u16, error: LinkError) {
        error!("Failed to send BLE packet {}: {}", ordinal, error);
        self.shared.emit(LinkEvent::WriteFailed {
            channel,
            ordinal,
            error,
        });
    }
}
