// BLE error taxonomy shared by the advertiser, scanner, endpoint and delivery

use thiserror::Error;

use crate::message::envelope::EnvelopeError;
use crate::transport::adapter::PeerId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BleError {
    #[error("Advertising failed with code {0}")]
    AdvertiseFailed(i32),
    #[error("Scan failed with code {0}")]
    ScanFailed(i32),
    #[error("Inbound service failed to open with code {0}")]
    ServerFailed(i32),
    #[error("Connection to {peer} failed with code {code}")]
    ConnectionFailed { peer: PeerId, code: i32 },
    #[error("Message service not found on {0}")]
    ServiceNotFound(PeerId),
    #[error("Transfer unit negotiation with {0} failed")]
    NegotiationFailed(PeerId),
    #[error("Malformed payload ({} bytes)", .0.len())]
    MalformedPayload(Vec<u8>),
    #[error("Write to {peer} failed with code {code}")]
    WriteFailed { peer: PeerId, code: i32 },
    #[error("Link to {0} dropped")]
    Disconnected(PeerId),
    #[error("Timed out waiting on {0}")]
    Timeout(PeerId),
    #[error("Peer {0} is not connected")]
    PeerNotConnected(PeerId),
    #[error("A broadcast is already in progress")]
    BroadcastInProgress,
    #[error("A discovery session is already in progress")]
    ScanInProgress,
    #[error("Engine is not running")]
    NotRunning,
    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),
}

impl BleError {
    /// Peer the failure is attributed to, if any.
    pub fn peer(&self) -> Option<&PeerId> {
        match self {
            BleError::ConnectionFailed { peer, .. } | BleError::WriteFailed { peer, .. } => {
                Some(peer)
            }
            BleError::ServiceNotFound(peer)
            | BleError::NegotiationFailed(peer)
            | BleError::Disconnected(peer)
            | BleError::Timeout(peer)
            | BleError::PeerNotConnected(peer) => Some(peer),
            _ => None,
        }
    }
}
