//! Link session state and inbound platform signals
//!
//! A `LinkSession` is the one current connection to a peer. Platform
//! callbacks never touch it directly: they are turned into `LinkSignal`s and
//! applied in order by the service's driver task.

use super::gatt::{CapabilitySet, PeerAddress, TransportHandle, WriteId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Connection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No link, or link torn down
    Disconnected,
    /// Connect requested, waiting for the platform
    Connecting,
    /// Link up (capabilities may still be undiscovered)
    Connected,
}

/// One logical connection to a peer
#[derive(Debug)]
pub struct LinkSession {
    address: PeerAddress,
    state: ConnectionState,
    capabilities: Option<CapabilitySet>,
    handle: Option<TransportHandle>,
}

impl LinkSession {
    /// New session for a freshly opened platform connection
    pub fn new(address: PeerAddress, handle: TransportHandle) -> Self {
        Self {
            address,
            state: ConnectionState::Connecting,
            capabilities: None,
            handle: Some(handle),
        }
    }

    pub fn address(&self) -> PeerAddress {
        self.address
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn handle(&self) -> Option<&TransportHandle> {
        self.handle.as_ref()
    }

    pub fn capabilities(&self) -> Option<&CapabilitySet> {
        self.capabilities.as_ref()
    }

    /// Connected with a completed discovery: packets may flow
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Connected
            && self.capabilities.is_some()
            && self.handle.is_some()
    }

    /// Whether `connect(address)` should resume this session
    pub fn can_resume(&self, address: &PeerAddress) -> bool {
        &self.address == address && self.handle.is_some()
    }

    /// Resume on the existing handle. Discovery must run again.
    pub fn begin_reconnect(&mut self) {
        self.state = ConnectionState::Connecting;
        self.capabilities = None;
    }

    pub fn mark_connected(&mut self) {
        self.state = ConnectionState::Connected;
    }

    /// Capabilities are only accepted on a live connection
    pub fn apply_capabilities(&mut self, capabilities: CapabilitySet) -> bool {
        if self.state != ConnectionState::Connected {
            debug!(
                "Ignoring capabilities for {} in state {:?}",
                self.address, self.state
            );
            return false;
        }
        self.capabilities = Some(capabilities);
        true
    }

    /// Link went down. The handle is kept until an explicit close.
    pub fn mark_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.capabilities = None;
    }

    /// Give up the transport handle
    pub fn take_handle(&mut self) -> Option<TransportHandle> {
        self.state = ConnectionState::Disconnected;
        self.capabilities = None;
        self.handle.take()
    }
}

/// Asynchronous callbacks from the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkSignal {
    /// Connection state reported by the link
    ConnectionStateChanged(ConnectionState),
    /// Service discovery finished
    CapabilitiesDiscovered(Result<CapabilitySet, String>),
    /// A submitted write completed
    WriteCompleted {
        channel: Uuid,
        write: WriteId,
        success: bool,
    },
    /// A requested read completed
    CharacteristicRead {
        channel: Uuid,
        result: Result<Vec<u8>, String>,
    },
    /// The peer pushed a value
    NotificationReceived { channel: Uuid, data: Vec<u8> },
}

/// Receiving half of a link's signal channel
pub type SignalReceiver = mpsc::UnboundedReceiver<LinkSignal>;

/// Create the signal channel the platform reports into
pub fn link_signals() -> (SignalSender, SignalReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SignalSender { tx }, rx)
}

/// Cloneable handle platform callbacks use to report into the link core
#[derive(Debug, Clone)]
pub struct SignalSender {
    tx: mpsc::UnboundedSender<LinkSignal>,
}

impl SignalSender {
    /// Deliver a signal. Returns false once the service has shut down.
    pub fn send(&self, signal: LinkSignal) -> bool {
        if self.tx.send(signal).is_err() {
            debug!("Link service gone, dropping platform signal");
            return false;
        }
        true
    }

    pub fn connection_state_changed(&self, state: ConnectionState) -> bool {
        self.send(LinkSignal::ConnectionStateChanged(state))
    }

    pub fn capabilities_discovered(&self, result: Result<CapabilitySet, String>) -> bool {
        self.send(LinkSignal::CapabilitiesDiscovered(result))
    }

    /// `write` is the id the core passed to [`LinkPlatform::write`](super::gatt::LinkPlatform::write)
    pub fn write_completed(&self, channel: Uuid, write: WriteId, success: bool) -> bool {
        self.send(LinkSignal::WriteCompleted {
            channel,
            write,
            success,
        })
    }

    pub fn characteristic_read(&self, channel: Uuid, result: Result<Vec<u8>, String>) -> bool {
        self.send(LinkSignal::CharacteristicRead { channel, result })
    }

    pub fn notification_received(&self, channel: Uuid, data: Vec<u8>) -> bool {
        self.send(LinkSignal::NotificationReceived { channel, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ble::gatt::{GattService, LINK_SERVICE_UUID};

    fn session() -> LinkSession {
        let address: PeerAddress = "00:11:22:33:44:55".parse().expect("Valid address");
        LinkSession::new(address, TransportHandle::new(1))
    }

    fn caps() -> CapabilitySet {
        CapabilitySet::new(vec![GattService::new(LINK_SERVICE_UUID, vec![])])
    }

    #[test]
    fn test_new_session_is_connecting() {
        let session = session();
        assert_eq!(session.state(), ConnectionState::Connecting);
        assert!(!session.is_ready());
        assert!(session.handle().is_some());
    }

    #[test]
    fn test_ready_requires_discovery() {
        let mut session = session();
        session.mark_connected();
        assert!(!session.is_ready());

        assert!(session.apply_capabilities(caps()));
        assert!(session.is_ready());
    }

    #[test]
    fn test_capabilities_ignored_while_connecting() {
        let mut session = session();
        assert!(!session.apply_capabilities(caps()));
        assert!(session.capabilities().is_none());
    }

    #[test]
    fn test_disconnect_keeps_handle_drops_capabilities() {
        let mut session = session();
        session.mark_connected();
        session.apply_capabilities(caps());

        session.mark_disconnected();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.capabilities().is_none());
        assert!(session.handle().is_some());
    }

    #[test]
    fn test_reconnect_forces_rediscovery() {
        let mut session = session();
        session.mark_connected();
        session.apply_capabilities(caps());

        session.begin_reconnect();
        assert_eq!(session.state(), ConnectionState::Connecting);
        assert!(session.capabilities().is_none());
    }

    #[test]
    fn test_resume_only_same_address_with_handle() {
        let mut session = session();
        let same: PeerAddress = "00:11:22:33:44:55".parse().expect("Valid");
        let other: PeerAddress = "00:11:22:33:44:66".parse().expect("Valid");

        assert!(session.can_resume(&same));
        assert!(!session.can_resume(&other));

        assert_eq!(session.take_handle(), Some(TransportHandle::new(1)));
        assert!(!session.can_resume(&same));
        assert!(session.take_handle().is_none());
    }

    #[tokio::test]
    async fn test_signal_sender_delivers_in_order() {
        let (sender, mut rx) = link_signals();
        assert!(sender.connection_state_changed(ConnectionState::Connected));
        assert!(sender.write_completed(LINK_SERVICE_UUID, WriteId::new(4), false));

        assert_eq!(
            rx.recv().await,
            Some(LinkSignal::ConnectionStateChanged(ConnectionState::Connected))
        );
        assert_eq!(
            rx.recv().await,
            Some(LinkSignal::WriteCompleted {
                channel: LINK_SERVICE_UUID,
                write: WriteId::new(4),
                success: false
            })
        );
    }

    #[test]
    fn test_signal_sender_reports_closed_channel() {
        let (sender, rx) = link_signals();
        drop(rx);
        assert!(!sender.notification_received(LINK_SERVICE_UUID, vec![1]));
    }
}
