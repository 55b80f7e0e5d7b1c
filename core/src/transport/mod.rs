// Transport module: radio adapter surface, BLE messaging and loopback medium

pub mod adapter;
pub mod ble;
pub mod loopback;

pub use adapter::{
    AdapterError, ClientEvent, ConnectionHandle, GattStatus, LinkState, PeerId, RadioAdapter,
    RemoteDevice, ScanEvent, ServerEvent,
};
pub use loopback::{LoopbackMedium, LoopbackRadio};
