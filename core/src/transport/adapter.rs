//! Radio adapter capability surface
//!
//! The engine never talks to a concrete radio stack. Everything it needs from
//! the local adapter is expressed by [`RadioAdapter`]: advertising, scanning,
//! hosting the inbound GATT service and driving outbound connections.
//! Asynchronous results are pushed by the adapter onto the unbounded channel
//! handed over when the session is opened, so every consumer reads a flat
//! stream of events instead of nesting callbacks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use super::ble::gatt::GattServiceSpec;

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Transport address of a remote node (e.g. `"AA:BB:CC:DD:EE:FF"`).
///
/// Unique per physical device for the lifetime of a session, so it is the key
/// of every peer map in the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<String> for PeerId {
    fn from(address: String) -> Self {
        Self(address)
    }
}

/// A remote device as reported by the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDevice {
    pub id: PeerId,
    pub name: Option<String>,
}

impl RemoteDevice {
    pub fn new(id: impl Into<PeerId>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
        }
    }

    /// Name to show in logs and notices.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unnamed Device")
    }
}

macro_rules! adapter_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

adapter_handle!(
    /// Registration of an active advertisement.
    AdvertiseHandle
);
adapter_handle!(
    /// Registration of an active scan session.
    ScanHandle
);
adapter_handle!(
    /// The hosted inbound GATT service.
    ServerHandle
);
adapter_handle!(
    /// One outbound connection attempt. Must be released with [`RadioAdapter::close`].
    ConnectionHandle
);

// ============================================================================
// STATUS AND ERRORS
// ============================================================================

/// Status code carried by GATT callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GattStatus(pub i32);

impl GattStatus {
    pub const SUCCESS: GattStatus = GattStatus(0);
    pub const READ_NOT_PERMITTED: GattStatus = GattStatus(0x02);
    pub const WRITE_NOT_PERMITTED: GattStatus = GattStatus(0x03);
    pub const REQUEST_NOT_SUPPORTED: GattStatus = GattStatus(0x06);
    pub const INVALID_OFFSET: GattStatus = GattStatus(0x07);
    /// Generic link-layer error most stacks report for failed connects.
    pub const ERROR: GattStatus = GattStatus(0x85);
    pub const FAILURE: GattStatus = GattStatus(0x101);

    pub fn is_success(&self) -> bool {
        *self == Self::SUCCESS
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Synchronous rejection of an adapter request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("adapter error {code}: {message}")]
pub struct AdapterError {
    pub code: i32,
    pub message: String,
}

impl AdapterError {
    /// Radio is disabled or absent.
    pub const RADIO_OFF: i32 = -1;
    /// Handle does not refer to a live session.
    pub const UNKNOWN_HANDLE: i32 = -2;
    /// Advertiser slots exhausted.
    pub const TOO_MANY_ADVERTISERS: i32 = 2;
    /// Same registration already active.
    pub const ALREADY_STARTED: i32 = 3;
    pub const INTERNAL_ERROR: i32 = 4;
    pub const FEATURE_UNSUPPORTED: i32 = 5;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn radio_off() -> Self {
        Self::new(Self::RADIO_OFF, "radio is powered off")
    }

    pub fn unknown_handle(handle: u64) -> Self {
        Self::new(Self::UNKNOWN_HANDLE, format!("unknown handle {}", handle))
    }
}

// ============================================================================
// SETTINGS
// ============================================================================

/// Power/latency trade-off requested from the radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RadioMode {
    LowPower,
    Balanced,
    LowLatency,
}

/// Payload of the advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertiseData {
    pub service_uuid: Uuid,
    pub include_device_name: bool,
    pub device_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertiseSettings {
    pub mode: RadioMode,
    /// Zero advertises until explicitly stopped.
    pub timeout_ms: u64,
    pub connectable: bool,
}

impl Default for AdvertiseSettings {
    fn default() -> Self {
        Self {
            mode: RadioMode::LowLatency,
            timeout_ms: 0,
            connectable: true,
        }
    }
}

/// Only advertisements carrying `service_uuid` are reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFilter {
    pub service_uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSettings {
    pub mode: RadioMode,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            mode: RadioMode::LowLatency,
        }
    }
}

// ============================================================================
// EVENTS
// ============================================================================

/// Link state reported with connection changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// A single advertisement observation.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRecord {
    pub device: RemoteDevice,
    /// RSSI in dBm
    pub rssi: i32,
    pub service_uuids: Vec<Uuid>,
}

/// Events delivered to an active scan session.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    Result(ScanRecord),
    Batch(Vec<ScanRecord>),
    /// The scan could not be started; no further results will arrive.
    Failed(i32),
}

/// Events delivered to the hosted inbound service.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    ConnectionStateChanged {
        device: RemoteDevice,
        status: GattStatus,
        state: LinkState,
    },
    WriteRequest {
        device: RemoteDevice,
        request_id: u32,
        characteristic: Uuid,
        prepared: bool,
        response_needed: bool,
        offset: usize,
        value: Option<Vec<u8>>,
    },
    ReadRequest {
        device: RemoteDevice,
        request_id: u32,
        characteristic: Uuid,
        offset: usize,
    },
}

/// Events delivered to one outbound connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    ConnectionStateChanged {
        status: GattStatus,
        state: LinkState,
    },
    ServicesDiscovered {
        status: GattStatus,
        services: Vec<GattServiceSpec>,
    },
    TransferUnitChanged {
        unit: u16,
        status: GattStatus,
    },
    CharacteristicWritten {
        characteristic: Uuid,
        status: GattStatus,
    },
}

// ============================================================================
// ADAPTER TRAIT
// ============================================================================

/// The single process-wide handle to the local radio.
///
/// Implementations wrap a platform stack (or the in-memory loopback medium).
/// Teardown calls (`stop_*`, `close*`) are synchronous so they can be issued
/// from any context, including drop paths.
#[async_trait]
pub trait RadioAdapter: Send + Sync {
    /// Address of the local radio.
    fn local_address(&self) -> PeerId;

    /// Begin broadcasting `data`.
    async fn start_advertising(
        &self,
        data: AdvertiseData,
        settings: AdvertiseSettings,
    ) -> Result<AdvertiseHandle, AdapterError>;

    fn stop_advertising(&self, handle: AdvertiseHandle);

    /// Begin scanning. Results are pushed onto `events` until the scan is stopped.
    async fn start_scan(
        &self,
        filter: ScanFilter,
        settings: ScanSettings,
        events: UnboundedSender<ScanEvent>,
    ) -> Result<ScanHandle, AdapterError>;

    fn stop_scan(&self, handle: ScanHandle);

    /// Host `service` and route its connection, read and write events to `events`.
    async fn open_inbound_service(
        &self,
        service: GattServiceSpec,
        events: UnboundedSender<ServerEvent>,
    ) -> Result<ServerHandle, AdapterError>;

    /// Answer a read or write request received on the hosted service.
    async fn send_response(
        &self,
        server: ServerHandle,
        device: &PeerId,
        request_id: u32,
        status: GattStatus,
        offset: usize,
        value: Option<Vec<u8>>,
    ) -> Result<(), AdapterError>;

    fn close_inbound_service(&self, server: ServerHandle);

    /// Open a connection to `peer`. Progress is reported on `events`; a
    /// connect that fails asynchronously still yields a handle to release.
    async fn connect(
        &self,
        peer: &PeerId,
        events: UnboundedSender<ClientEvent>,
    ) -> Result<ConnectionHandle, AdapterError>;

    async fn discover_services(&self, connection: ConnectionHandle) -> Result<(), AdapterError>;

    /// Ask for a larger transfer unit. Reported via `ClientEvent::TransferUnitChanged`.
    async fn request_transfer_unit(
        &self,
        connection: ConnectionHandle,
        size: u16,
    ) -> Result<(), AdapterError>;

    async fn write_characteristic(
        &self,
        connection: ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
    ) -> Result<(), AdapterError>;

    /// Release a connection handle and tear down its link.
    fn close(&self, connection: ConnectionHandle);
}
