/// BLE (Bluetooth Low Energy) Transport Module
///
/// Protocol-level pieces of peer-to-peer payment-request messaging over a
/// single GATT characteristic:
///
/// - **gatt**: service and characteristic definitions, transfer unit limits
/// - **advertiser**: presence advertising
/// - **scanner**: bounded discovery sessions
/// - **server**: the hosted inbound endpoint and connected peer registry
/// - **client**: outbound delivery state machine
///
/// Radio access goes through [`RadioAdapter`](crate::transport::adapter::RadioAdapter),
/// so everything here is testable without hardware.

pub mod advertiser;
pub mod client;
pub mod error;
pub mod gatt;
pub mod scanner;
pub mod server;

#[cfg(test)]
pub(crate) mod testing;

pub use advertiser::Advertiser;
pub use client::{
    ConnectionState, Delivery, DeliveryOutcome, DeliveryResult, OutboundDelivery,
};
pub use error::BleError;
pub use gatt::{
    GattServiceSpec, DEFAULT_TRANSFER_UNIT, MAX_TRANSFER_UNIT, MESSAGE_CHARACTERISTIC_UUID,
    REQUESTED_TRANSFER_UNIT, SERVICE_UUID,
};
pub use scanner::{DiscoveredPeer, Scanner, ScannerState};
pub use server::{ConnectedPeerRegistry, EndpointChannels, InboundEndpoint};
