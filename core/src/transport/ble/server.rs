//! Inbound endpoint
//!
//! Hosts the messaging service, tracks which remote peers are connected and
//! turns characteristic writes into [`Message::Remote`] events. A reactor task
//! owns the adapter event stream; writes are acknowledged before they are
//! decoded and published.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::error::BleError;
use super::gatt::GattServiceSpec;
use crate::config::EngineConfig;
use crate::message::{ConnectionEvent, Message};
use crate::transport::adapter::{
    GattStatus, LinkState, PeerId, RadioAdapter, RemoteDevice, ServerEvent, ServerHandle,
};

// ============================================================================
// CONNECTED PEER REGISTRY
// ============================================================================

/// Remote peers currently connected to the inbound endpoint.
///
/// Written only by the endpoint reactor; read by the reply path.
#[derive(Debug, Clone, Default)]
pub struct ConnectedPeerRegistry {
    peers: Arc<RwLock<HashMap<PeerId, RemoteDevice>>>,
}

impl ConnectedPeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the peer was not already present.
    pub fn insert(&self, device: RemoteDevice) -> bool {
        self.peers.write().insert(device.id.clone(), device).is_none()
    }

    pub fn remove(&self, peer: &PeerId) -> Option<RemoteDevice> {
        self.peers.write().remove(peer)
    }

    pub fn get(&self, peer: &PeerId) -> Option<RemoteDevice> {
        self.peers.read().get(peer).cloned()
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.peers.read().contains_key(peer)
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    pub fn peers(&self) -> Vec<RemoteDevice> {
        let mut peers: Vec<RemoteDevice> = self.peers.read().values().cloned().collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        peers
    }

    /// Remove every peer, returning the removed addresses in order.
    pub fn clear(&self) -> Vec<PeerId> {
        let mut removed: Vec<PeerId> = self.peers.write().drain().map(|(id, _)| id).collect();
        removed.sort();
        removed
    }
}

// ============================================================================
// ENDPOINT
// ============================================================================

/// Outward channels the endpoint publishes to.
#[derive(Clone)]
pub struct EndpointChannels {
    pub messages: broadcast::Sender<Message>,
    pub connections: broadcast::Sender<ConnectionEvent>,
    /// Decoded inbound texts for the notification worker
    pub notices: Option<mpsc::UnboundedSender<(PeerId, String)>>,
}

pub struct InboundEndpoint {
    adapter: Arc<dyn RadioAdapter>,
    server: ServerHandle,
    slot: Arc<RwLock<Vec<u8>>>,
    reactor: JoinHandle<()>,
}

impl InboundEndpoint {
    /// Host the messaging service and start the reactor.
    pub async fn open(
        adapter: Arc<dyn RadioAdapter>,
        config: &EngineConfig,
        registry: ConnectedPeerRegistry,
        channels: EndpointChannels,
    ) -> Result<Self, BleError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let service =
            GattServiceSpec::message_service(config.service_uuid, config.message_characteristic_uuid);

        let server = adapter
            .open_inbound_service(service, tx)
            .await
            .map_err(|e| BleError::ServerFailed(e.code))?;
        info!("Inbound service open ({})", server);

        let slot = Arc::new(RwLock::new(Vec::new()));
        let reactor = Reactor {
            adapter: adapter.clone(),
            server,
            characteristic: config.message_characteristic_uuid,
            registry,
            channels,
            slot: slot.clone(),
        };

        Ok(Self {
            adapter,
            server,
            slot,
            reactor: tokio::spawn(reactor.run(rx)),
        })
    }

    /// Most recent payload written by any peer.
    pub fn last_payload(&self) -> Vec<u8> {
        self.slot.read().clone()
    }

    pub fn close(self) {
        self.adapter.close_inbound_service(self.server);
        self.reactor.abort();
        info!("Inbound service closed ({})", self.server);
    }
}

struct Reactor {
    adapter: Arc<dyn RadioAdapter>,
    server: ServerHandle,
    characteristic: Uuid,
    registry: ConnectedPeerRegistry,
    channels: EndpointChannels,
    slot: Arc<RwLock<Vec<u8>>>,
}

impl Reactor {
    async fn run(self, mut events: mpsc::UnboundedReceiver<ServerEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        debug!("Inbound event stream closed");
    }

    async fn handle(&self, event: ServerEvent) {
        match event {
            ServerEvent::ConnectionStateChanged {
                device,
                status,
                state,
            } => self.on_connection_state(device, status, state),
            ServerEvent::WriteRequest {
                device,
                request_id,
                characteristic,
                response_needed,
                offset,
                value,
                ..
            } => {
                self.on_write(device, request_id, characteristic, response_needed, offset, value)
                    .await
            }
            ServerEvent::ReadRequest {
                device,
                request_id,
                characteristic,
                offset,
            } => self.on_read(device, request_id, characteristic, offset).await,
        }
    }

    fn on_connection_state(&self, device: RemoteDevice, status: GattStatus, state: LinkState) {
        if status.is_success() && state == LinkState::Connected {
            info!("{} connected to inbound service", device.id);
            self.registry.insert(device.clone());
            let _ = self
                .channels
                .connections
                .send(ConnectionEvent::Connected(device));
        } else {
            if status.is_success() {
                info!("{} disconnected from inbound service", device.id);
            } else {
                warn!("{} link failed with status {}", device.id, status);
            }
            self.registry.remove(&device.id);
            let _ = self
                .channels
                .connections
                .send(ConnectionEvent::Disconnected(device.id));
        }
    }

    async fn on_write(
        &self,
        device: RemoteDevice,
        request_id: u32,
        characteristic: Uuid,
        response_needed: bool,
        offset: usize,
        value: Option<Vec<u8>>,
    ) {
        if characteristic != self.characteristic {
            trace!("Ignoring write to {} from {}", characteristic, device.id);
            if response_needed {
                self.respond(&device.id, request_id, GattStatus::WRITE_NOT_PERMITTED, offset, None)
                    .await;
            }
            return;
        }

        if response_needed {
            self.respond(&device.id, request_id, GattStatus::SUCCESS, offset, None)
                .await;
        }

        let Some(bytes) = value else {
            debug!("Empty write from {}", device.id);
            return;
        };

        match String::from_utf8(bytes) {
            Ok(text) => {
                debug!("Received {} bytes from {}", text.len(), device.id);
                *self.slot.write() = text.as_bytes().to_vec();
                let _ = self.channels.messages.send(Message::Remote(text.clone()));
                if let Some(notices) = &self.channels.notices {
                    let _ = notices.send((device.id, text));
                }
            }
            Err(e) => {
                let err = BleError::MalformedPayload(e.into_bytes());
                warn!("Dropping write from {}: {}", device.id, err);
            }
        }
    }

    async fn on_read(
        &self,
        device: RemoteDevice,
        request_id: u32,
        characteristic: Uuid,
        offset: usize,
    ) {
        if characteristic != self.characteristic {
            self.respond(&device.id, request_id, GattStatus::READ_NOT_PERMITTED, offset, None)
                .await;
            return;
        }

        let payload = self.slot.read().clone();
        if offset > payload.len() {
            self.respond(&device.id, request_id, GattStatus::INVALID_OFFSET, offset, None)
                .await;
            return;
        }
        self.respond(
            &device.id,
            request_id,
            GattStatus::SUCCESS,
            offset,
            Some(payload[offset..].to_vec()),
        )
        .await;
    }

    async fn respond(
        &self,
        peer: &PeerId,
        request_id: u32,
        status: GattStatus,
        offset: usize,
        value: Option<Vec<u8>>,
    ) {
        if let Err(e) = self
            .adapter
            .send_response(self.server, peer, request_id, status, offset, value)
            .await
        {
            warn!("Response to {} failed: {}", peer, e);
        }
    }
}
