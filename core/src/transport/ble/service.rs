//! Link service: owns one peer session and its outbound stream
//!
//! ```text
//! send_string ─► FrameEncoder ─► OutboundQueue ─► TransmissionCoordinator ─► LinkPlatform::write
//!                                                        ▲
//! platform callbacks ─► SignalSender ─► LinkDriver ──────┘ (gate, completions)
//!                                            │
//!                                            └─► broadcast<LinkEvent>
//! ```
//!
//! Synchronous calls (`connect`, `send_string`, ...) report precondition
//! failures as `Err`. Everything the platform reports later is published as a
//! `LinkEvent`.

use super::coordinator::{PendingWriteSlot, TransmissionCoordinator};
use super::frame::{FrameEncoder, FrameType};
use super::gatt::{CapabilitySet, GattService, LinkPlatform, PeerAddress};
use super::queue::OutboundQueue;
use super::router::{ChannelMap, Notification, NotificationRouter};
use super::session::{ConnectionState, LinkSession, LinkSignal, SignalReceiver};
use crate::{LinkError, LinkSettings, SettingsError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events published to the rest of the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The link came up
    Connected { address: PeerAddress },
    /// The link went down (requested or not)
    Disconnected { address: PeerAddress },
    /// Service discovery finished; queued packets start flowing
    CapabilitiesDiscovered { services: usize },
    /// Service discovery could not be started or failed
    CapabilityDiscoveryFailed { reason: String },
    /// A notification or read value arrived
    DataAvailable(Notification),
    /// One packet was written
    WriteCompleted { channel: Uuid, ordinal: u16 },
    /// One packet was dropped. Not retried.
    WriteFailed {
        channel: Option<Uuid>,
        ordinal: u16,
        error: LinkError,
    },
}

/// State shared by the service, the driver and the coordinator
pub(crate) struct LinkShared {
    pub(crate) settings: LinkSettings,
    pub(crate) platform: Arc<dyn LinkPlatform>,
    pub(crate) session: Mutex<Option<LinkSession>>,
    pub(crate) gate: watch::Sender<bool>,
    pub(crate) pending: PendingWriteSlot,
    events: broadcast::Sender<LinkEvent>,
    initialized: AtomicBool,
}

impl LinkShared {
    pub(crate) fn emit(&self, event: LinkEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    pub(crate) fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    pub(crate) fn close_gate(&self) {
        self.gate.send_replace(false);
    }
}

/// Applies platform signals to the session, one at a time
struct LinkDriver {
    shared: Arc<LinkShared>,
    router: NotificationRouter,
    signals: SignalReceiver,
}

impl LinkDriver {
    async fn run(mut self) {
        while let Some(signal) = self.signals.recv().await {
            self.handle(signal);
        }
        debug!("Signal channel closed, link driver exiting");
    }

    fn handle(&self, signal: LinkSignal) {
        match signal {
            LinkSignal::ConnectionStateChanged(ConnectionState::Connected) => self.on_connected(),
            LinkSignal::ConnectionStateChanged(ConnectionState::Disconnected) => {
                self.on_disconnected()
            }
            LinkSignal::ConnectionStateChanged(ConnectionState::Connecting) => {
                debug!("Platform reports connection in progress");
            }
            LinkSignal::CapabilitiesDiscovered(Ok(capabilities)) => {
                self.on_discovered(capabilities)
            }
            LinkSignal::CapabilitiesDiscovered(Err(reason)) => {
                warn!("Service discovery failed: {}", reason);
                self.shared
                    .emit(LinkEvent::CapabilityDiscoveryFailed { reason });
            }
            LinkSignal::WriteCompleted {
                channel,
                write,
                success,
            } => {
                if !success {
                    warn!("Characteristic write {} on {} failed", write, channel);
                }
                if !self.shared.pending.complete(&channel, write, success) {
                    debug!("Ignoring completion of write {}, not the pending write", write);
                }
            }
            LinkSignal::CharacteristicRead { channel, result } => match result {
                Ok(data) => self.shared.emit(self.router.route(channel, data)),
                Err(reason) => warn!("Read of {} failed: {}", channel, reason),
            },
            LinkSignal::NotificationReceived { channel, data } => {
                self.shared.emit(self.router.route(channel, data));
            }
        }
    }

    fn on_connected(&self) {
        let (address, requested) = {
            let mut guard = self.shared.session.lock();
            let Some(session) = guard.as_mut() else {
                warn!("Connected signal with no current session");
                return;
            };
            session.mark_connected();
            let requested = session
                .handle()
                .map(|handle| self.shared.platform.discover_capabilities(handle))
                .unwrap_or(false);
            (session.address(), requested)
        };

        info!("Connected to GATT server {}", address);
        self.shared.emit(LinkEvent::Connected { address });

        info!("Attempting to start service discovery: {}", requested);
        if !requested {
            self.shared.emit(LinkEvent::CapabilityDiscoveryFailed {
                reason: "discovery request refused".to_string(),
            });
        }
    }

    fn on_disconnected(&self) {
        let address = {
            let mut guard = self.shared.session.lock();
            guard.as_mut().map(|session| {
                session.mark_disconnected();
                session.address()
            })
        };

        self.shared.close_gate();
        if self.shared.pending.fail(LinkError::UnexpectedDisconnect) {
            warn!("In-flight write lost to disconnect");
        }

        match address {
            Some(address) => {
                info!("Disconnected from GATT server {}", address);
                self.shared.emit(LinkEvent::Disconnected { address });
            }
            None => debug!("Disconnected signal after close"),
        }
    }

    fn on_discovered(&self, capabilities: CapabilitySet) {
        let settings = &self.shared.settings;
        let services = capabilities.services().len();

        {
            let mut guard = self.shared.session.lock();
            let Some(session) = guard.as_mut() else {
                warn!("Capabilities discovered with no current session");
                return;
            };
            if !session.apply_capabilities(capabilities) {
                return;
            }

            if settings.subscribe_on_discovery {
                let data_channel = session
                    .capabilities()
                    .map(|caps| caps.resolve(&settings.service_uuid, &settings.data_uuid));
                match (session.handle(), data_channel) {
                    (Some(handle), Some(Ok(channel))) => {
                        info!("Enabling receive data from peer");
                        if !self
                            .shared
                            .platform
                            .set_notifications(handle, &channel, true)
                        {
                            warn!("Platform refused notifications on {}", channel);
                        }
                    }
                    _ => debug!("Data channel not offered by peer, not subscribing"),
                }
            }
        }

        info!("Services discovered ({}), starting packet queue", services);
        self.shared
            .emit(LinkEvent::CapabilitiesDiscovered { services });
        self.shared.open_gate();
    }
}

/// One peer connection plus its outbound packet stream
pub struct LinkService {
    shared: Arc<LinkShared>,
    encoder: FrameEncoder,
    queue: OutboundQueue,
    tasks: Vec<JoinHandle<()>>,
}

impl LinkService {
    /// Validate settings and spawn the driver and coordinator tasks.
    ///
    /// Must be called from within a tokio runtime. `signals` is the receiving
    /// half of [`link_signals`](super::session::link_signals); the platform
    /// keeps the sending half.
    pub fn start(
        settings: LinkSettings,
        platform: Arc<dyn LinkPlatform>,
        signals: SignalReceiver,
    ) -> Result<Self, SettingsError> {
        settings.validate()?;
        let encoder = FrameEncoder::for_write_size(settings.max_write_size, settings.max_payload_len)
            .map_err(|e| SettingsError::ConfigError(e.to_string()))?;

        let (events, _) = broadcast::channel(settings.event_capacity);
        let (gate, _) = watch::channel(false);
        let router = NotificationRouter::new(ChannelMap::from_settings(&settings));

        let shared = Arc::new(LinkShared {
            settings,
            platform,
            session: Mutex::new(None),
            gate,
            pending: PendingWriteSlot::default(),
            events,
            initialized: AtomicBool::new(false),
        });
        let queue = OutboundQueue::new();

        let driver = LinkDriver {
            shared: shared.clone(),
            router,
            signals,
        };
        let coordinator = TransmissionCoordinator::new(shared.clone(), queue.clone());

        let tasks = vec![
            tokio::spawn(driver.run()),
            tokio::spawn(coordinator.run()),
        ];

        Ok(Self {
            shared,
            encoder,
            queue,
            tasks,
        })
    }

    /// Subscribe to link events
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.shared.events.subscribe()
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.shared.settings
    }

    /// Check for a usable adapter. Required before `connect`.
    pub fn initialize(&self) -> Result<(), LinkError> {
        let available = self.shared.platform.is_available();
        self.shared.initialized.store(available, Ordering::SeqCst);
        if !available {
            error!("Unable to obtain a Bluetooth adapter");
            return Err(LinkError::NotInitialized);
        }
        debug!("Bluetooth adapter initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.initialized.load(Ordering::SeqCst)
    }

    /// Start connecting to `address`. The outcome arrives as a `LinkEvent`.
    ///
    /// A live session for the same address is resumed; any other session is
    /// released first.
    pub fn connect(&self, address: &str) -> Result<(), LinkError> {
        if !self.is_initialized() {
            warn!("Bluetooth adapter not initialized");
            return Err(LinkError::NotInitialized);
        }
        let address: PeerAddress = address.parse()?;

        let mut guard = self.shared.session.lock();

        if let Some(session) = guard.as_mut().filter(|s| s.can_resume(&address)) {
            debug!("Trying to use an existing connection to {}", address);
            let handle = session.handle().ok_or(LinkError::NotConnected)?;
            self.shared.platform.reconnect(handle)?;
            session.begin_reconnect();
            self.shared.close_gate();
            return Ok(());
        }

        if let Some(mut previous) = guard.take() {
            self.shared.close_gate();
            if let Some(handle) = previous.take_handle() {
                info!(
                    "Releasing connection to {} before connecting to {}",
                    previous.address(),
                    address
                );
                self.shared.platform.close(handle);
            }
            self.shared.pending.fail(LinkError::NotConnected);
        }

        let handle = self.shared.platform.connect(&address)?;
        debug!("Trying to create a new connection to {}", address);
        *guard = Some(LinkSession::new(address, handle));
        self.shared.close_gate();
        Ok(())
    }

    /// Request link teardown. Confirmation arrives as `LinkEvent::Disconnected`.
    pub fn disconnect(&self) -> Result<(), LinkError> {
        let guard = self.shared.session.lock();
        let Some(handle) = guard.as_ref().and_then(|s| s.handle()) else {
            warn!("Disconnect requested with no live connection");
            return Err(LinkError::NotConnected);
        };
        self.shared.platform.disconnect(handle);
        Ok(())
    }

    /// Release the transport handle and forget the session. Idempotent.
    ///
    /// Queued packets stay queued for the next connection.
    pub fn close(&self) {
        let session = self.shared.session.lock().take();
        self.shared.close_gate();

        if let Some(mut session) = session {
            if let Some(handle) = session.take_handle() {
                info!("Closing connection to {}", session.address());
                self.shared.platform.close(handle);
            }
        }

        if self.shared.pending.fail(LinkError::NotConnected) {
            debug!("Abandoned in-flight write on close");
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared
            .session
            .lock()
            .as_ref()
            .map(|s| s.state())
            .unwrap_or(ConnectionState::Disconnected)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Address of the peer, only while connected
    pub fn connected_device(&self) -> Option<PeerAddress> {
        self.shared
            .session
            .lock()
            .as_ref()
            .filter(|s| s.state() == ConnectionState::Connected && s.handle().is_some())
            .map(|s| s.address())
    }

    /// Services found by the last discovery on this connection
    pub fn supported_services(&self) -> Option<Vec<GattService>> {
        self.shared
            .session
            .lock()
            .as_ref()
            .and_then(|s| s.capabilities())
            .map(|caps| caps.services().to_vec())
    }

    /// Look up one service. If it is missing, a new discovery is requested.
    pub fn service(&self, uuid: &Uuid) -> Option<GattService> {
        let guard = self.shared.session.lock();
        let session = guard.as_ref()?;

        if let Some(found) = session.capabilities().and_then(|caps| caps.service(uuid)) {
            return Some(found.clone());
        }

        if let Some(handle) = session.handle() {
            debug!("Service {} not known, requesting discovery", uuid);
            if !self.shared.platform.discover_capabilities(handle) {
                warn!("Platform refused service discovery");
            }
        }
        None
    }

    /// Request a characteristic read. The value arrives as `DataAvailable`.
    pub fn read_characteristic(&self, channel: &Uuid) -> Result<(), LinkError> {
        let guard = self.shared.session.lock();
        let handle = guard
            .as_ref()
            .and_then(|s| s.handle())
            .ok_or(LinkError::NotConnected)?;

        if !self.shared.platform.read(handle, channel) {
            return Err(LinkError::RequestRefused(format!("read of {}", channel)));
        }
        Ok(())
    }

    /// Enable or disable notifications on a characteristic
    pub fn set_notifications(&self, channel: &Uuid, enabled: bool) -> Result<(), LinkError> {
        let guard = self.shared.session.lock();
        let handle = guard
            .as_ref()
            .and_then(|s| s.handle())
            .ok_or(LinkError::NotConnected)?;

        if *channel == self.shared.settings.data_uuid {
            info!("Setting receive data from peer: {}", enabled);
        }
        if !self.shared.platform.set_notifications(handle, channel, enabled) {
            return Err(LinkError::RequestRefused(format!(
                "notifications on {}",
                channel
            )));
        }
        Ok(())
    }

    /// Queue a string command. Returns the number of packets queued.
    pub fn send_string(&self, command: &str) -> Result<usize, LinkError> {
        self.send_frame(FrameType::String, command.as_bytes())
    }

    /// Frame and queue a payload. Oversize payloads queue nothing.
    pub fn send_frame(&self, frame_type: FrameType, payload: &[u8]) -> Result<usize, LinkError> {
        let packets = self.encoder.encode(frame_type, payload)?;
        debug!(
            "Add {} bytes to BLE queue as {} packets (queue size {})",
            payload.len(),
            packets.len(),
            self.queue.len()
        );
        Ok(self.queue.enqueue_frame(packets))
    }

    /// Packets waiting to be written
    pub fn queued_packets(&self) -> usize {
        self.queue.len()
    }

    /// Whether a write is waiting on its completion signal
    pub fn write_in_flight(&self) -> bool {
        self.shared.pending.is_armed()
    }

    pub fn encoder(&self) -> &FrameEncoder {
        &self.encoder
    }

    /// Close the session and stop the background tasks
    pub fn shutdown(self) {
        self.close();
    }
}

impl Drop for LinkService {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
