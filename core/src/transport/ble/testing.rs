//! Scripted radio adapter for unit tests
//!
//! Records every call it receives and answers outbound connections according
//! to a per-peer [`LinkScript`].

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use super::gatt::{GattServiceSpec, MESSAGE_CHARACTERISTIC_UUID, SERVICE_UUID};
use crate::transport::adapter::*;

/// How a scripted peer answers an outbound connection.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkScript {
    Succeed,
    /// `connect` itself is rejected
    Refuse(i32),
    /// connection reported as failed with this status
    FailConnect(GattStatus),
    /// reports `Connecting` before `Connected`
    SlowConnect,
    /// discovery returns no services
    NoService,
    /// transfer unit request rejected outright
    NegotiationRejected,
    /// transfer unit change reported with a failure status
    NegotiationFailed,
    /// write completes with this status
    WriteFails(GattStatus),
    /// link drops after the write is issued
    DropAfterWrite,
    /// event stream closes right after connect
    Vanish,
    /// connects but never answers discovery
    Stall,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RadioCall {
    StartAdvertising,
    StopAdvertising(AdvertiseHandle),
    StartScan,
    StopScan(ScanHandle),
    OpenServer,
    CloseServer(ServerHandle),
    Respond {
        device: PeerId,
        request_id: u32,
        status: GattStatus,
        value: Option<Vec<u8>>,
    },
    ConnectRefused(PeerId),
    Connect(PeerId, ConnectionHandle),
    DiscoverServices(ConnectionHandle),
    RequestTransferUnit(ConnectionHandle, u16),
    Write(ConnectionHandle, Vec<u8>),
    Close(ConnectionHandle),
}

pub struct ScriptedRadio {
    address: PeerId,
    next_handle: AtomicU64,
    calls: Mutex<Vec<RadioCall>>,
    advertise_failure: Mutex<Option<i32>>,
    scan_failure: Mutex<Option<i32>>,
    server_failure: Mutex<Option<i32>>,
    scan_script: Mutex<Vec<ScanEvent>>,
    scan_events: Mutex<Option<UnboundedSender<ScanEvent>>>,
    server_events: Mutex<Option<UnboundedSender<ServerEvent>>>,
    scripts: Mutex<HashMap<PeerId, LinkScript>>,
    links: Mutex<HashMap<u64, (PeerId, UnboundedSender<ClientEvent>)>>,
}

impl ScriptedRadio {
    pub fn new(address: &str) -> Arc<Self> {
        Arc::new(Self {
            address: PeerId::from(address),
            next_handle: AtomicU64::new(1),
            calls: Mutex::new(Vec::new()),
            advertise_failure: Mutex::new(None),
            scan_failure: Mutex::new(None),
            server_failure: Mutex::new(None),
            scan_script: Mutex::new(Vec::new()),
            scan_events: Mutex::new(None),
            server_events: Mutex::new(None),
            scripts: Mutex::new(HashMap::new()),
            links: Mutex::new(HashMap::new()),
        })
    }

    pub fn fail_advertising(&self, code: Option<i32>) {
        *self.advertise_failure.lock() = code;
    }

    pub fn fail_scan(&self, code: Option<i32>) {
        *self.scan_failure.lock() = code;
    }

    pub fn fail_server(&self, code: Option<i32>) {
        *self.server_failure.lock() = code;
    }

    /// Events replayed to every scan session as soon as it starts.
    pub fn script_scan(&self, events: Vec<ScanEvent>) {
        *self.scan_script.lock() = events;
    }

    pub fn script_link(&self, peer: &str, script: LinkScript) {
        self.scripts.lock().insert(PeerId::from(peer), script);
    }

    /// Push an event into the running scan session.
    pub fn inject_scan_event(&self, event: ScanEvent) -> bool {
        match self.scan_events.lock().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Push an event into the hosted inbound service.
    pub fn inject_server_event(&self, event: ServerEvent) -> bool {
        match self.server_events.lock().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn calls(&self) -> Vec<RadioCall> {
        self.calls.lock().clone()
    }

    pub fn count(&self, predicate: impl Fn(&RadioCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| predicate(c)).count()
    }

    /// Handles handed out for connections to `peer`.
    pub fn connections_to(&self, peer: &str) -> Vec<ConnectionHandle> {
        let peer = PeerId::from(peer);
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                RadioCall::Connect(p, handle) if *p == peer => Some(*handle),
                _ => None,
            })
            .collect()
    }

    pub fn closes(&self, handle: ConnectionHandle) -> usize {
        self.count(|c| *c == RadioCall::Close(handle))
    }

    pub fn open_links(&self) -> usize {
        self.links.lock().len()
    }

    fn record(&self, call: RadioCall) {
        self.calls.lock().push(call);
    }

    fn next(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::SeqCst)
    }

    fn script_for(&self, peer: &PeerId) -> LinkScript {
        self.scripts
            .lock()
            .get(peer)
            .cloned()
            .unwrap_or(LinkScript::Succeed)
    }

    fn link(&self, handle: ConnectionHandle) -> Result<(LinkScript, UnboundedSender<ClientEvent>), AdapterError> {
        let links = self.links.lock();
        let (peer, tx) = links
            .get(&handle.0)
            .ok_or_else(|| AdapterError::unknown_handle(handle.0))?;
        Ok((self.script_for(peer), tx.clone()))
    }
}

/// Advertisement observation of the messaging service.
pub fn scan_record(address: &str, name: Option<&str>, rssi: i32) -> ScanRecord {
    ScanRecord {
        device: RemoteDevice::new(address, name.map(str::to_string)),
        rssi,
        service_uuids: vec![SERVICE_UUID],
    }
}

pub fn device(address: &str) -> RemoteDevice {
    RemoteDevice::new(address, None)
}

#[async_trait]
impl RadioAdapter for ScriptedRadio {
    fn local_address(&self) -> PeerId {
        self.address.clone()
    }

    async fn start_advertising(
        &self,
        _data: AdvertiseData,
        _settings: AdvertiseSettings,
    ) -> Result<AdvertiseHandle, AdapterError> {
        self.record(RadioCall::StartAdvertising);
        if let Some(code) = *self.advertise_failure.lock() {
            return Err(AdapterError::new(code, "scripted advertise failure"));
        }
        Ok(AdvertiseHandle(self.next()))
    }

    fn stop_advertising(&self, handle: AdvertiseHandle) {
        self.record(RadioCall::StopAdvertising(handle));
    }

    async fn start_scan(
        &self,
        _filter: ScanFilter,
        _settings: ScanSettings,
        events: UnboundedSender<ScanEvent>,
    ) -> Result<ScanHandle, AdapterError> {
        self.record(RadioCall::StartScan);
        if let Some(code) = *self.scan_failure.lock() {
            return Err(AdapterError::new(code, "scripted scan failure"));
        }
        for event in self.scan_script.lock().iter().cloned() {
            let _ = events.send(event);
        }
        *self.scan_events.lock() = Some(events);
        Ok(ScanHandle(self.next()))
    }

    fn stop_scan(&self, handle: ScanHandle) {
        self.record(RadioCall::StopScan(handle));
        self.scan_events.lock().take();
    }

    async fn open_inbound_service(
        &self,
        _service: GattServiceSpec,
        events: UnboundedSender<ServerEvent>,
    ) -> Result<ServerHandle, AdapterError> {
        self.record(RadioCall::OpenServer);
        if let Some(code) = *self.server_failure.lock() {
            return Err(AdapterError::new(code, "scripted server failure"));
        }
        *self.server_events.lock() = Some(events);
        Ok(ServerHandle(self.next()))
    }

    async fn send_response(
        &self,
        _server: ServerHandle,
        device: &PeerId,
        request_id: u32,
        status: GattStatus,
        _offset: usize,
        value: Option<Vec<u8>>,
    ) -> Result<(), AdapterError> {
        self.record(RadioCall::Respond {
            device: device.clone(),
            request_id,
            status,
            value,
        });
        Ok(())
    }

    fn close_inbound_service(&self, server: ServerHandle) {
        self.record(RadioCall::CloseServer(server));
        self.server_events.lock().take();
    }

    async fn connect(
        &self,
        peer: &PeerId,
        events: UnboundedSender<ClientEvent>,
    ) -> Result<ConnectionHandle, AdapterError> {
        let script = self.script_for(peer);
        if let LinkScript::Refuse(code) = script {
            self.record(RadioCall::ConnectRefused(peer.clone()));
            return Err(AdapterError::new(code, "scripted connect refusal"));
        }

        let handle = ConnectionHandle(self.next());
        self.record(RadioCall::Connect(peer.clone(), handle));

        match script {
            LinkScript::FailConnect(status) => {
                let _ = events.send(ClientEvent::ConnectionStateChanged {
                    status,
                    state: LinkState::Disconnected,
                });
            }
            LinkScript::Vanish => return Ok(handle),
            LinkScript::SlowConnect => {
                for state in [LinkState::Connecting, LinkState::Connected] {
                    let _ = events.send(ClientEvent::ConnectionStateChanged {
                        status: GattStatus::SUCCESS,
                        state,
                    });
                }
            }
            _ => {
                let _ = events.send(ClientEvent::ConnectionStateChanged {
                    status: GattStatus::SUCCESS,
                    state: LinkState::Connected,
                });
            }
        }
        self.links.lock().insert(handle.0, (peer.clone(), events));
        Ok(handle)
    }

    async fn discover_services(&self, connection: ConnectionHandle) -> Result<(), AdapterError> {
        self.record(RadioCall::DiscoverServices(connection));
        let (script, tx) = self.link(connection)?;
        let services = match script {
            LinkScript::Stall => return Ok(()),
            LinkScript::NoService => Vec::new(),
            _ => vec![GattServiceSpec::message_service(
                SERVICE_UUID,
                MESSAGE_CHARACTERISTIC_UUID,
            )],
        };
        let _ = tx.send(ClientEvent::ServicesDiscovered {
            status: GattStatus::SUCCESS,
            services,
        });
        Ok(())
    }

    async fn request_transfer_unit(
        &self,
        connection: ConnectionHandle,
        size: u16,
    ) -> Result<(), AdapterError> {
        self.record(RadioCall::RequestTransferUnit(connection, size));
        let (script, tx) = self.link(connection)?;
        let event = match script {
            LinkScript::NegotiationRejected => {
                return Err(AdapterError::new(
                    AdapterError::FEATURE_UNSUPPORTED,
                    "scripted negotiation rejection",
                ))
            }
            LinkScript::NegotiationFailed => ClientEvent::TransferUnitChanged {
                unit: 23,
                status: GattStatus::FAILURE,
            },
            _ => ClientEvent::TransferUnitChanged {
                unit: size,
                status: GattStatus::SUCCESS,
            },
        };
        let _ = tx.send(event);
        Ok(())
    }

    async fn write_characteristic(
        &self,
        connection: ConnectionHandle,
        _service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
    ) -> Result<(), AdapterError> {
        self.record(RadioCall::Write(connection, value));
        let (script, tx) = self.link(connection)?;
        let event = match script {
            LinkScript::WriteFails(status) => ClientEvent::CharacteristicWritten {
                characteristic,
                status,
            },
            LinkScript::DropAfterWrite => ClientEvent::ConnectionStateChanged {
                status: GattStatus::ERROR,
                state: LinkState::Disconnected,
            },
            _ => ClientEvent::CharacteristicWritten {
                characteristic,
                status: GattStatus::SUCCESS,
            },
        };
        let _ = tx.send(event);
        Ok(())
    }

    fn close(&self, connection: ConnectionHandle) {
        self.record(RadioCall::Close(connection));
        self.links.lock().remove(&connection.0);
    }
}
