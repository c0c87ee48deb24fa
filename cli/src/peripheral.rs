// Simulated peripheral for the gattlink CLI
//
// Stands in for a real radio: accepts writes on the transmit characteristic,
// reassembles frames and echoes each completed frame on the data channel.
// Every outcome is reported through the link's SignalSender after a delay,
// the same way a platform callback would arrive.

use gattlink_core::{
    CapabilitySet, ConnectionState, FrameAssembler, GattService, LinkError, LinkPlatform,
    LinkSettings, PeerAddress, SignalSender, TransportHandle, WriteId,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Status text returned for reads of the status characteristic
pub const STATUS_TEXT: &str = "ready";

pub struct SimulatedPeripheral {
    signals: SignalSender,
    settings: LinkSettings,
    latency: Duration,
    runtime: Handle,
    next_handle: AtomicU64,
    notifying: AtomicBool,
    assembler: Arc<Mutex<FrameAssembler>>,
}

impl SimulatedPeripheral {
    /// Must be created inside a tokio runtime
    pub fn new(signals: SignalSender, settings: &LinkSettings, latency: Duration) -> Self {
        Self {
            signals,
            settings: settings.clone(),
            latency,
            runtime: Handle::current(),
            next_handle: AtomicU64::new(1),
            notifying: AtomicBool::new(false),
            assembler: Arc::new(Mutex::new(FrameAssembler::new())),
        }
    }

    /// Service table this peripheral advertises
    pub fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::new(vec![GattService::new(
            self.settings.service_uuid,
            vec![
                self.settings.transmit_uuid,
                self.settings.data_uuid,
                self.settings.status_uuid,
            ],
        )])
    }

    /// Report `signal` after the configured latency
    fn later<F>(&self, signal: F)
    where
        F: FnOnce(&SignalSender) + Send + 'static,
    {
        let signals = self.signals.clone();
        let latency = self.latency;
        self.runtime.spawn(async move {
            tokio::time::sleep(latency).await;
            signal(&signals);
        });
    }
}

impl LinkPlatform for SimulatedPeripheral {
    fn is_available(&self) -> bool {
        true
    }

    fn connect(&self, address: &PeerAddress) -> Result<TransportHandle, LinkError> {
        let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
        debug!("Simulated connect to {} (handle {})", address, id);
        self.later(|s| {
            s.connection_state_changed(ConnectionState::Connected);
        });
        Ok(TransportHandle::new(id))
    }

    fn reconnect(&self, handle: &TransportHandle) -> Result<(), LinkError> {
        debug!("Simulated reconnect on handle {}", handle.id());
        self.later(|s| {
            s.connection_state_changed(ConnectionState::Connected);
        });
        Ok(())
    }

    fn disconnect(&self, handle: &TransportHandle) {
        debug!("Simulated disconnect on handle {}", handle.id());
        self.later(|s| {
            s.connection_state_changed(ConnectionState::Disconnected);
        });
    }

    fn close(&self, handle: TransportHandle) {
        debug!("Simulated close of handle {}", handle.id());
        self.notifying.store(false, Ordering::SeqCst);
        if let Err(e) = self.assembler.lock().finish() {
            warn!("Peripheral dropped partial frame on close: {}", e);
        }
    }

    fn discover_capabilities(&self, _handle: &TransportHandle) -> bool {
        let capabilities = self.capabilities();
        self.later(move |s| {
            s.capabilities_discovered(Ok(capabilities));
        });
        true
    }

    fn write(&self, _handle: &TransportHandle, channel: &Uuid, bytes: &[u8], id: WriteId) -> bool {
        if *channel != self.settings.transmit_uuid {
            return false;
        }

        let assembled = self.assembler.lock().push(bytes);
        let echo = match assembled {
            Ok(frame) => frame.map(|(_, payload)| payload),
            Err(e) => {
                warn!("Peripheral rejected packet: {}", e);
                None
            }
        }
        .filter(|_| self.notifying.load(Ordering::SeqCst));

        let channel = *channel;
        let data_channel = self.settings.data_uuid;
        self.later(move |s| {
            s.write_completed(channel, id, true);
            if let Some(payload) = echo {
                s.notification_received(data_channel, payload);
            }
        });
        true
    }

    fn read(&self, _handle: &TransportHandle, channel: &Uuid) -> bool {
        let channel = *channel;
        let result = if channel == self.settings.status_uuid {
            Ok(STATUS_TEXT.as_bytes().to_vec())
        } else {
            Err(format!("read not permitted on {}", channel))
        };
        self.later(move |s| {
            s.characteristic_read(channel, result);
        });
        true
    }

    fn set_notifications(&self, _handle: &TransportHandle, channel: &Uuid, enabled: bool) -> bool {
        if *channel != self.settings.data_uuid {
            return false;
        }
        self.notifying.store(enabled, Ordering::SeqCst);
        true
    }
}
