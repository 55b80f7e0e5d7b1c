//! Peer messaging engine
//!
//! Owns the advertiser, scanner, inbound endpoint and outbound delivery for
//! one local radio, and exposes the user-facing operations: lifecycle,
//! broadcast, reply and the outward event streams.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, EngineConfig};
use crate::message::envelope::{now_millis, PaymentRequest, TransactionReceipt};
use crate::message::{BroadcastRequest, ConnectionEvent, Message};
use crate::notify::{run_notifier, NotificationSink};
use crate::transport::adapter::{PeerId, RadioAdapter, RemoteDevice};
use crate::transport::ble::advertiser::Advertiser;
use crate::transport::ble::client::{
    Delivery, DeliveryOutcome, DeliveryResult, OutboundDelivery,
};
use crate::transport::ble::error::BleError;
use crate::transport::ble::scanner::{DiscoveredPeer, Scanner};
use crate::transport::ble::server::{ConnectedPeerRegistry, EndpointChannels, InboundEndpoint};

// ============================================================================
// REPORTS AND EVENTS
// ============================================================================

/// Progress of a broadcast, published on the delivery stream.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryEvent {
    Started { peers: usize },
    Delivered(Delivery),
    Failed { peer: PeerId, error: BleError },
    Finished { delivered: usize, failed: usize },
}

/// What happened to one broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastReport {
    /// The envelope as written to every peer
    pub envelope: String,
    pub discovered: Vec<DiscoveredPeer>,
    pub outcomes: Vec<DeliveryOutcome>,
}

impl BroadcastReport {
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_delivered()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.delivered()
    }

    pub fn outcome(&self, peer: &PeerId) -> Option<&DeliveryOutcome> {
        self.outcomes.iter().find(|o| o.peer == *peer)
    }
}

/// Snapshot of the engine for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub address: PeerId,
    pub running: bool,
    pub advertising: bool,
    pub connected_peers: Vec<RemoteDevice>,
}

// ============================================================================
// ENGINE
// ============================================================================

struct Running {
    endpoint: InboundEndpoint,
}

pub struct PeerMessagingEngine {
    config: EngineConfig,
    adapter: Arc<dyn RadioAdapter>,
    advertiser: Advertiser,
    scanner: Scanner,
    delivery: OutboundDelivery,
    registry: ConnectedPeerRegistry,
    messages: broadcast::Sender<Message>,
    connections: broadcast::Sender<ConnectionEvent>,
    deliveries: broadcast::Sender<DeliveryEvent>,
    notifier: Option<Arc<dyn NotificationSink>>,
    running: Mutex<Option<Running>>,
    broadcast_gate: Mutex<()>,
}

impl PeerMessagingEngine {
    pub fn new(config: EngineConfig, adapter: Arc<dyn RadioAdapter>) -> Result<Self, ConfigError> {
        config.validate()?;

        let (messages, _) = broadcast::channel(config.event_capacity);
        let (connections, _) = broadcast::channel(config.event_capacity);
        let (deliveries, _) = broadcast::channel(config.event_capacity);

        Ok(Self {
            advertiser: Advertiser::new(adapter.clone(), &config),
            scanner: Scanner::new(adapter.clone(), &config),
            delivery: OutboundDelivery::new(adapter.clone(), &config),
            registry: ConnectedPeerRegistry::new(),
            messages,
            connections,
            deliveries,
            notifier: None,
            running: Mutex::new(None),
            broadcast_gate: Mutex::new(()),
            adapter,
            config,
        })
    }

    /// Route inbound payment requests to `sink`. Takes effect on the next `init`.
    pub fn with_notifier(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(sink);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn local_address(&self) -> PeerId {
        self.adapter.local_address()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Open the inbound endpoint and start advertising.
    ///
    /// An advertising failure is logged and the engine keeps running without
    /// presence; a failure to host the endpoint is returned.
    pub async fn init(&self) -> Result<(), BleError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("Engine already running");
            return Ok(());
        }

        let notices = self.notifier.as_ref().map(|sink| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_notifier(rx, sink.clone()));
            tx
        });

        let endpoint = InboundEndpoint::open(
            self.adapter.clone(),
            &self.config,
            self.registry.clone(),
            EndpointChannels {
                messages: self.messages.clone(),
                connections: self.connections.clone(),
                notices,
            },
        )
        .await?;

        if let Err(e) = self.advertiser.start().await {
            warn!("Continuing without advertising: {}", e);
        }

        *running = Some(Running { endpoint });
        info!(
            "Engine started on {} as {:?}",
            self.adapter.local_address(),
            self.config.device_name
        );
        Ok(())
    }

    /// Stop advertising, cancel discovery and close the endpoint.
    ///
    /// Safe to call at any time and more than once.
    pub async fn shutdown(&self) {
        let running = self.running.lock().await.take();
        self.scanner.cancel();
        self.advertiser.stop().await;

        if let Some(state) = running {
            state.endpoint.close();
            for peer in self.registry.clear() {
                debug!("Dropping inbound link from {}", peer);
                let _ = self.connections.send(ConnectionEvent::Disconnected(peer));
            }
            info!("Engine stopped on {}", self.adapter.local_address());
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub async fn status(&self) -> EngineStatus {
        EngineStatus {
            address: self.adapter.local_address(),
            running: self.is_running().await,
            advertising: self.advertiser.is_advertising().await,
            connected_peers: self.registry.peers(),
        }
    }

    // ------------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------------

    /// Discover nearby peers and deliver the request to each of them in turn.
    ///
    /// A failure for one peer is recorded in the report and does not stop the
    /// remaining deliveries. Only one broadcast runs at a time; a shutdown
    /// ends it after the current attempt.
    pub async fn broadcast(&self, request: &BroadcastRequest) -> Result<BroadcastReport, BleError> {
        let _gate = self
            .broadcast_gate
            .try_lock()
            .map_err(|_| BleError::BroadcastInProgress)?;
        // read under the running lock so a concurrent shutdown is always seen
        let generation = match self.running.lock().await.as_ref() {
            Some(_) => self.scanner.generation(),
            None => return Err(BleError::NotRunning),
        };

        let envelope = PaymentRequest::from_broadcast(
            request,
            &self.config.payee,
            &self.config.currency,
            now_millis(),
        )?;
        let bytes = envelope.encode()?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        let payload: Arc<[u8]> = bytes.into();
        let _ = self.messages.send(Message::Local(text.clone()));

        let discovered = self
            .scanner
            .run_discovery_since(generation, self.config.discovery_window())
            .await?;
        info!("Broadcasting to {} peer(s)", discovered.len());
        let _ = self.deliveries.send(DeliveryEvent::Started {
            peers: discovered.len(),
        });

        let mut outcomes = Vec::with_capacity(discovered.len());
        for peer in &discovered {
            if !self.is_running().await {
                warn!("Engine stopped; abandoning remaining deliveries");
                break;
            }
            let result = self.delivery.deliver(&peer.id, &payload).await;
            let event = match &result {
                Ok(delivery) => DeliveryEvent::Delivered(delivery.clone()),
                Err(error) => DeliveryEvent::Failed {
                    peer: peer.id.clone(),
                    error: error.clone(),
                },
            };
            let _ = self.deliveries.send(event);
            outcomes.push(DeliveryOutcome {
                peer: peer.id.clone(),
                result,
            });
        }

        let report = BroadcastReport {
            envelope: text,
            discovered,
            outcomes,
        };
        let _ = self.deliveries.send(DeliveryEvent::Finished {
            delivered: report.delivered(),
            failed: report.failed(),
        });
        info!(
            "Broadcast finished: {} delivered, {} failed",
            report.delivered(),
            report.failed()
        );
        Ok(report)
    }

    /// Run [`broadcast`](Self::broadcast) on its own task.
    pub fn spawn_broadcast(
        self: &Arc<Self>,
        request: BroadcastRequest,
    ) -> JoinHandle<Result<BroadcastReport, BleError>> {
        let engine = self.clone();
        tokio::spawn(async move { engine.broadcast(&request).await })
    }

    /// Send a receipt to a peer currently connected to the inbound endpoint.
    pub async fn reply(&self, peer: &PeerId, receipt: &TransactionReceipt) -> DeliveryResult {
        let device = self
            .registry
            .get(peer)
            .ok_or_else(|| BleError::PeerNotConnected(peer.clone()))?;
        let bytes = receipt.encode()?;
        debug!("Replying to {} ({})", device.id, device.display_name());
        self.delivery.deliver(&device.id, &bytes).await
    }

    // ------------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------------

    pub fn subscribe_messages(&self) -> broadcast::Receiver<Message> {
        self.messages.subscribe()
    }

    pub fn subscribe_connections(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connections.subscribe()
    }

    pub fn subscribe_deliveries(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.deliveries.subscribe()
    }

    pub fn connected_peers(&self) -> &ConnectedPeerRegistry {
        &self.registry
    }

    /// Peers seen by the current or most recent discovery session.
    pub fn discovered_peers(&self) -> Vec<DiscoveredPeer> {
        self.scanner.discovered_peers()
    }
}
