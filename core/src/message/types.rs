// Message types: what flows between the engine and its consumers

use serde::{Deserialize, Serialize};

use crate::transport::adapter::{PeerId, RemoteDevice};

/// A payment request as entered by the user, before it is wrapped in an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastRequest {
    /// Decimal amount as typed (e.g. "12.50")
    pub amount: String,
    /// Free-form description shown to the payer
    pub description: String,
}

impl BroadcastRequest {
    pub fn new(amount: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            amount: amount.into(),
            description: description.into(),
        }
    }
}

/// A message observed by this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Sent by this node (echo of the encoded envelope)
    Local(String),
    /// Received from a remote peer over the inbound endpoint
    Remote(String),
}

impl Message {
    pub fn text(&self) -> &str {
        match self {
            Message::Local(text) | Message::Remote(text) => text,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Message::Remote(_))
    }
}

/// Inbound connection changes on the hosted service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionEvent {
    Connected(RemoteDevice),
    Disconnected(PeerId),
}

impl ConnectionEvent {
    pub fn peer(&self) -> &PeerId {
        match self {
            ConnectionEvent::Connected(device) => &device.id,
            ConnectionEvent::Disconnected(peer) => peer,
        }
    }
}
