// NearPay Core — peer-to-peer payment requests over BLE
//
// A node advertises itself, discovers nearby nodes for a bounded window and
// writes a JSON payment request to each of them. Inbound requests surface as
// events and user notices.

pub mod config;
pub mod engine;
pub mod message;
pub mod notify;
pub mod transport;

pub use config::{ConfigError, EngineConfig};
pub use engine::{BroadcastReport, DeliveryEvent, EngineStatus, PeerMessagingEngine};
pub use message::{
    BroadcastRequest, ConnectionEvent, EnvelopeError, Message, PaymentRequest, Receiver,
    TransactionReceipt,
};
pub use notify::{NotificationSink, PaymentNotice};
pub use transport::ble::{
    BleError, ConnectedPeerRegistry, ConnectionState, Delivery, DeliveryOutcome,
    DeliveryResult, DiscoveredPeer,
};
pub use transport::{LoopbackMedium, LoopbackRadio, PeerId, RadioAdapter, RemoteDevice};
