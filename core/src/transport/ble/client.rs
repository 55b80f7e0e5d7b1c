//! Outbound delivery
//!
//! Delivers one encoded envelope to one peer by walking an explicit state
//! machine: connect, discover the messaging service, negotiate the transfer
//! unit, write, then release the link. Each attempt owns its connection handle
//! through a guard, so the handle is closed exactly once on every exit path,
//! including cancellation.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::error::BleError;
use super::gatt::{locate_characteristic, max_payload_for};
use crate::config::EngineConfig;
use crate::transport::adapter::{
    ClientEvent, ConnectionHandle, LinkState, PeerId, RadioAdapter,
};

// ============================================================================
// STATE MACHINE
// ============================================================================

/// Lifecycle of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected(PeerId),
    ServiceDiscovered,
    TransferUnitNegotiated(u16),
    Delivered,
    Failed(BleError),
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected(_) => "connected",
            ConnectionState::ServiceDiscovered => "service-discovered",
            ConnectionState::TransferUnitNegotiated(_) => "transfer-unit-negotiated",
            ConnectionState::Delivered => "delivered",
            ConnectionState::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Delivered | ConnectionState::Failed(_))
    }

    /// Whether `next` is a legal successor of this state.
    ///
    /// Any non-terminal state may fail; otherwise the attempt only moves forward.
    pub fn can_transition_to(&self, next: &ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (Delivered, _) | (Failed(_), _) => false,
            (_, Failed(_)) => true,
            (Disconnected, Connecting) => true,
            (Connecting, Connected(_)) => true,
            (Connected(_), ServiceDiscovered) => true,
            (ServiceDiscovered, TransferUnitNegotiated(_)) => true,
            (TransferUnitNegotiated(_), Delivered) => true,
            _ => false,
        }
    }
}

/// Tracks the state of one attempt and logs each transition.
struct DeliveryAttempt {
    peer: PeerId,
    state: ConnectionState,
}

impl DeliveryAttempt {
    fn new(peer: PeerId) -> Self {
        Self {
            peer,
            state: ConnectionState::Disconnected,
        }
    }

    fn advance(&mut self, next: ConnectionState) {
        if !self.state.can_transition_to(&next) {
            warn!(
                "Illegal delivery transition for {}: {} -> {}",
                self.peer,
                self.state.name(),
                next.name()
            );
            return;
        }
        debug!("{}: {} -> {}", self.peer, self.state.name(), next.name());
        self.state = next;
    }
}

// ============================================================================
// RESULTS
// ============================================================================

/// A successful delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub peer: PeerId,
    pub transfer_unit: u16,
    pub bytes: usize,
}

pub type DeliveryResult = Result<Delivery, BleError>;

/// Outcome of one peer inside a broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryOutcome {
    pub peer: PeerId,
    pub result: DeliveryResult,
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        self.result.is_ok()
    }

    pub fn terminal_state(&self) -> ConnectionState {
        match &self.result {
            Ok(_) => ConnectionState::Delivered,
            Err(e) => ConnectionState::Failed(e.clone()),
        }
    }
}

// ============================================================================
// CONNECTION GUARD
// ============================================================================

/// Releases the connection handle when the attempt ends.
struct ConnectionGuard {
    adapter: Arc<dyn RadioAdapter>,
    handle: ConnectionHandle,
    peer: PeerId,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.adapter.close(self.handle);
        trace!("Released {} to {}", self.handle, self.peer);
    }
}

// ============================================================================
// DELIVERY
// ============================================================================

/// Which event the attempt is currently waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Connection,
    Services,
    TransferUnit,
    Write,
}

impl Expect {
    fn matches(&self, event: &ClientEvent) -> bool {
        match (self, event) {
            // progress reports are not an outcome
            (Expect::Connection, ClientEvent::ConnectionStateChanged { status, state }) => {
                !status.is_success()
                    || matches!(state, LinkState::Connected | LinkState::Disconnected)
            }
            _ => self.matches_kind(event),
        }
    }

    fn matches_kind(&self, event: &ClientEvent) -> bool {
        matches!(
            (self, event),
            (Expect::Services, ClientEvent::ServicesDiscovered { .. })
                | (Expect::TransferUnit, ClientEvent::TransferUnitChanged { .. })
                | (Expect::Write, ClientEvent::CharacteristicWritten { .. })
        )
    }
}

pub struct OutboundDelivery {
    adapter: Arc<dyn RadioAdapter>,
    service: Uuid,
    characteristic: Uuid,
    requested_unit: u16,
    default_unit: u16,
    step_timeout: Option<Duration>,
}

impl OutboundDelivery {
    pub fn new(adapter: Arc<dyn RadioAdapter>, config: &EngineConfig) -> Self {
        Self {
            adapter,
            service: config.service_uuid,
            characteristic: config.message_characteristic_uuid,
            requested_unit: config.requested_transfer_unit,
            default_unit: config.default_transfer_unit,
            step_timeout: config.attempt_timeout(),
        }
    }

    /// Deliver `envelope` to `peer`. Never retries.
    pub async fn deliver(&self, peer: &PeerId, envelope: &[u8]) -> DeliveryResult {
        let mut attempt = DeliveryAttempt::new(peer.clone());
        let result = self.drive(&mut attempt, envelope).await;
        match &result {
            Ok(delivery) => {
                attempt.advance(ConnectionState::Delivered);
                info!(
                    "Delivered {} bytes to {} (unit {})",
                    delivery.bytes, peer, delivery.transfer_unit
                );
            }
            Err(e) => {
                attempt.advance(ConnectionState::Failed(e.clone()));
                warn!("Delivery to {} failed: {}", peer, e);
            }
        }
        result
    }

    async fn drive(&self, attempt: &mut DeliveryAttempt, envelope: &[u8]) -> DeliveryResult {
        let peer = attempt.peer.clone();
        let (tx, mut rx) = mpsc::unbounded_channel();

        attempt.advance(ConnectionState::Connecting);
        let handle = self
            .adapter
            .connect(&peer, tx)
            .await
            .map_err(|e| BleError::ConnectionFailed {
                peer: peer.clone(),
                code: e.code,
            })?;
        let _guard = ConnectionGuard {
            adapter: self.adapter.clone(),
            handle,
            peer: peer.clone(),
        };

        let event = self.wait_for(&mut rx, &peer, Expect::Connection).await?;
        match event {
            ClientEvent::ConnectionStateChanged {
                status,
                state: LinkState::Connected,
            } if status.is_success() => {}
            ClientEvent::ConnectionStateChanged { status, .. } => {
                return Err(BleError::ConnectionFailed {
                    peer,
                    code: status.0,
                })
            }
            _ => return Err(BleError::Disconnected(peer)),
        }
        attempt.advance(ConnectionState::Connected(peer.clone()));

        self.adapter
            .discover_services(handle)
            .await
            .map_err(|_| BleError::ServiceNotFound(peer.clone()))?;
        let event = self.wait_for(&mut rx, &peer, Expect::Services).await?;
        match event {
            ClientEvent::ServicesDiscovered { status, services }
                if status.is_success()
                    && locate_characteristic(&services, self.service, self.characteristic)
                        .is_some() => {}
            _ => return Err(BleError::ServiceNotFound(peer)),
        }
        attempt.advance(ConnectionState::ServiceDiscovered);

        let unit = self.negotiate(handle, &mut rx, &peer).await?;
        attempt.advance(ConnectionState::TransferUnitNegotiated(unit));

        if envelope.len() > max_payload_for(unit) {
            warn!(
                "Envelope of {} bytes exceeds single-write capacity {} for {}",
                envelope.len(),
                max_payload_for(unit),
                peer
            );
        }

        self.adapter
            .write_characteristic(handle, self.service, self.characteristic, envelope.to_vec())
            .await
            .map_err(|e| BleError::WriteFailed {
                peer: peer.clone(),
                code: e.code,
            })?;
        let event = self.wait_for(&mut rx, &peer, Expect::Write).await?;
        match event {
            ClientEvent::CharacteristicWritten { status, .. } if status.is_success() => {}
            ClientEvent::CharacteristicWritten { status, .. } => {
                return Err(BleError::WriteFailed {
                    peer,
                    code: status.0,
                })
            }
            _ => return Err(BleError::Disconnected(peer)),
        }

        Ok(Delivery {
            peer,
            transfer_unit: unit,
            bytes: envelope.len(),
        })
    }

    /// Request the configured transfer unit, falling back to the default.
    async fn negotiate(
        &self,
        handle: ConnectionHandle,
        rx: &mut mpsc::UnboundedReceiver<ClientEvent>,
        peer: &PeerId,
    ) -> Result<u16, BleError> {
        if let Err(e) = self
            .adapter
            .request_transfer_unit(handle, self.requested_unit)
            .await
        {
            debug!("Transfer unit request rejected: {}", e);
            warn!("{}; using {}", BleError::NegotiationFailed(peer.clone()), self.default_unit);
            return Ok(self.default_unit);
        }

        match self.wait_for(rx, peer, Expect::TransferUnit).await? {
            ClientEvent::TransferUnitChanged { unit, status } if status.is_success() => Ok(unit),
            _ => {
                warn!("{}; using {}", BleError::NegotiationFailed(peer.clone()), self.default_unit);
                Ok(self.default_unit)
            }
        }
    }

    /// Wait for the next event of the expected kind.
    ///
    /// A closed stream or a link drop ends the attempt; unrelated events are skipped.
    async fn wait_for(
        &self,
        rx: &mut mpsc::UnboundedReceiver<ClientEvent>,
        peer: &PeerId,
        expect: Expect,
    ) -> Result<ClientEvent, BleError> {
        let next = async {
            loop {
                match rx.recv().await {
                    None => return Err(BleError::Disconnected(peer.clone())),
                    Some(event) if expect.matches(&event) => return Ok(event),
                    Some(ClientEvent::ConnectionStateChanged {
                        state: LinkState::Disconnected,
                        ..
                    }) => return Err(BleError::Disconnected(peer.clone())),
                    Some(other) => trace!("Skipping {:?} while waiting for {:?}", other, expect),
                }
            }
        };

        match self.step_timeout {
            Some(limit) => tokio::time::timeout(limit, next)
                .await
                .map_err(|_| BleError::Timeout(peer.clone()))?,
            None => next.await,
        }
    }
}
