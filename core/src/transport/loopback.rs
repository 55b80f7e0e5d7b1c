// Loopback radio: an in-memory medium connecting several simulated nodes
//
// Every node gets a LoopbackRadio implementing RadioAdapter. Advertisements,
// scans, hosted services and links are routed through a shared medium so that
// several engines in one process can discover and message each other.
// Nodes can be powered off to exercise failure paths.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace};
use uuid::Uuid;

use super::adapter::{
    AdapterError, AdvertiseData, AdvertiseHandle, AdvertiseSettings, ClientEvent,
    ConnectionHandle, GattStatus, LinkState, PeerId, RadioAdapter, RemoteDevice, ScanEvent,
    ScanFilter, ScanHandle, ScanRecord, ScanSettings, ServerEvent, ServerHandle,
};
use super::ble::gatt::{GattServiceSpec, DEFAULT_TRANSFER_UNIT, MAX_TRANSFER_UNIT};

// ============================================================================
// MEDIUM STATE
// ============================================================================

struct Node {
    name: String,
    powered: bool,
}

struct Advert {
    owner: PeerId,
    data: AdvertiseData,
}

struct ScanSession {
    owner: PeerId,
    filter: ScanFilter,
    events: UnboundedSender<ScanEvent>,
}

struct HostedService {
    owner: PeerId,
    service: GattServiceSpec,
    events: UnboundedSender<ServerEvent>,
}

struct Link {
    client: PeerId,
    server: PeerId,
    events: UnboundedSender<ClientEvent>,
}

struct PendingWrite {
    link: u64,
    characteristic: Uuid,
}

#[derive(Default)]
struct MediumState {
    nodes: HashMap<PeerId, Node>,
    adverts: HashMap<u64, Advert>,
    scans: HashMap<u64, ScanSession>,
    services: HashMap<u64, HostedService>,
    links: HashMap<u64, Link>,
    pending_writes: HashMap<(u64, PeerId, u32), PendingWrite>,
    next_request_id: u32,
}

impl MediumState {
    fn is_powered(&self, address: &PeerId) -> bool {
        self.nodes.get(address).map(|n| n.powered).unwrap_or(false)
    }

    fn device(&self, address: &PeerId) -> RemoteDevice {
        RemoteDevice::new(
            address.clone(),
            self.nodes.get(address).map(|n| n.name.clone()),
        )
    }

    fn server_of(&self, owner: &PeerId) -> Option<(u64, &HostedService)> {
        self.services
            .iter()
            .find(|(_, s)| s.owner == *owner)
            .map(|(handle, s)| (*handle, s))
    }

    fn sighting(&self, advert: &Advert) -> ScanRecord {
        ScanRecord {
            device: RemoteDevice::new(
                advert.owner.clone(),
                advert
                    .data
                    .include_device_name
                    .then(|| advert.data.device_name.clone()),
            ),
            rssi: rand::thread_rng().gen_range(-90..=-40),
            service_uuids: vec![advert.data.service_uuid],
        }
    }

    /// Tear down every link touching `address`, notifying the other side.
    fn drop_links_of(&mut self, address: &PeerId) {
        let doomed: Vec<u64> = self
            .links
            .iter()
            .filter(|(_, l)| l.client == *address || l.server == *address)
            .map(|(handle, _)| *handle)
            .collect();
        for handle in doomed {
            self.teardown_link(handle, GattStatus::ERROR);
        }
    }

    fn teardown_link(&mut self, handle: u64, status: GattStatus) {
        let Some(link) = self.links.remove(&handle) else {
            return;
        };
        self.pending_writes.retain(|_, w| w.link != handle);

        let _ = link.events.send(ClientEvent::ConnectionStateChanged {
            status,
            state: LinkState::Disconnected,
        });
        let client = self.device(&link.client);
        if let Some((_, service)) = self.server_of(&link.server) {
            let _ = service.events.send(ServerEvent::ConnectionStateChanged {
                device: client,
                status,
                state: LinkState::Disconnected,
            });
        }
    }
}

// ============================================================================
// MEDIUM
// ============================================================================

/// Shared air between loopback radios.
#[derive(Default)]
pub struct LoopbackMedium {
    state: Mutex<MediumState>,
    next_handle: AtomicU64,
}

impl LoopbackMedium {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a new node to the medium.
    pub fn radio(
        self: &Arc<Self>,
        address: impl Into<PeerId>,
        name: impl Into<String>,
    ) -> Arc<LoopbackRadio> {
        let address = address.into();
        self.state.lock().nodes.insert(
            address.clone(),
            Node {
                name: name.into(),
                powered: true,
            },
        );
        Arc::new(LoopbackRadio {
            medium: self.clone(),
            address,
        })
    }

    /// Toggle a node's radio. Powering off drops all its sessions and links.
    pub fn set_powered(&self, address: &PeerId, powered: bool) {
        let mut state = self.state.lock();
        if let Some(node) = state.nodes.get_mut(address) {
            node.powered = powered;
        }
        if !powered {
            state.adverts.retain(|_, a| a.owner != *address);
            state.scans.retain(|_, s| s.owner != *address);
            state.drop_links_of(address);
            state.services.retain(|_, s| s.owner != *address);
            debug!("{} powered off", address);
        }
    }

    /// Number of live client links.
    pub fn open_links(&self) -> usize {
        self.state.lock().links.len()
    }

    fn next(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::SeqCst) + 1
    }
}

// ============================================================================
// RADIO
// ============================================================================

pub struct LoopbackRadio {
    medium: Arc<LoopbackMedium>,
    address: PeerId,
}

impl LoopbackRadio {
    pub fn medium(&self) -> &Arc<LoopbackMedium> {
        &self.medium
    }

    fn ensure_powered(&self, state: &MediumState) -> Result<(), AdapterError> {
        if state.is_powered(&self.address) {
            Ok(())
        } else {
            Err(AdapterError::radio_off())
        }
    }
}

#[async_trait]
impl RadioAdapter for LoopbackRadio {
    fn local_address(&self) -> PeerId {
        self.address.clone()
    }

    async fn start_advertising(
        &self,
        data: AdvertiseData,
        _settings: AdvertiseSettings,
    ) -> Result<AdvertiseHandle, AdapterError> {
        let mut state = self.medium.state.lock();
        self.ensure_powered(&state)?;
        if state.adverts.values().any(|a| a.owner == self.address) {
            return Err(AdapterError::new(
                AdapterError::ALREADY_STARTED,
                "advertisement already registered",
            ));
        }

        let handle = self.medium.next();
        let advert = Advert {
            owner: self.address.clone(),
            data,
        };
        for scan in state.scans.values() {
            if scan.owner != self.address && scan.filter.service_uuid == advert.data.service_uuid {
                let _ = scan.events.send(ScanEvent::Result(state.sighting(&advert)));
            }
        }
        state.adverts.insert(handle, advert);
        trace!("{} advertising ({})", self.address, handle);
        Ok(AdvertiseHandle(handle))
    }

    fn stop_advertising(&self, handle: AdvertiseHandle) {
        self.medium.state.lock().adverts.remove(&handle.0);
    }

    async fn start_scan(
        &self,
        filter: ScanFilter,
        _settings: ScanSettings,
        events: UnboundedSender<ScanEvent>,
    ) -> Result<ScanHandle, AdapterError> {
        let mut state = self.medium.state.lock();
        self.ensure_powered(&state)?;

        let visible: Vec<ScanRecord> = state
            .adverts
            .values()
            .filter(|a| a.owner != self.address && a.data.service_uuid == filter.service_uuid)
            .map(|a| state.sighting(a))
            .collect();
        if !visible.is_empty() {
            let _ = events.send(ScanEvent::Batch(visible));
        }

        let handle = self.medium.next();
        state.scans.insert(
            handle,
            ScanSession {
                owner: self.address.clone(),
                filter,
                events,
            },
        );
        Ok(ScanHandle(handle))
    }

    fn stop_scan(&self, handle: ScanHandle) {
        self.medium.state.lock().scans.remove(&handle.0);
    }

    async fn open_inbound_service(
        &self,
        service: GattServiceSpec,
        events: UnboundedSender<ServerEvent>,
    ) -> Result<ServerHandle, AdapterError> {
        let mut state = self.medium.state.lock();
        self.ensure_powered(&state)?;
        let handle = self.medium.next();
        state.services.insert(
            handle,
            HostedService {
                owner: self.address.clone(),
                service,
                events,
            },
        );
        Ok(ServerHandle(handle))
    }

    async fn send_response(
        &self,
        server: ServerHandle,
        device: &PeerId,
        request_id: u32,
        status: GattStatus,
        _offset: usize,
        _value: Option<Vec<u8>>,
    ) -> Result<(), AdapterError> {
        let mut state = self.medium.state.lock();
        let Some(pending) = state
            .pending_writes
            .remove(&(server.0, device.clone(), request_id))
        else {
            return Ok(());
        };
        if let Some(link) = state.links.get(&pending.link) {
            let _ = link.events.send(ClientEvent::CharacteristicWritten {
                characteristic: pending.characteristic,
                status,
            });
        }
        Ok(())
    }

    fn close_inbound_service(&self, server: ServerHandle) {
        let mut state = self.medium.state.lock();
        if state.services.remove(&server.0).is_none() {
            return;
        }
        let orphaned: Vec<u64> = state
            .links
            .iter()
            .filter(|(_, l)| l.server == self.address)
            .map(|(handle, _)| *handle)
            .collect();
        for handle in orphaned {
            if let Some(link) = state.links.remove(&handle) {
                let _ = link.events.send(ClientEvent::ConnectionStateChanged {
                    status: GattStatus::ERROR,
                    state: LinkState::Disconnected,
                });
            }
        }
        state.pending_writes.retain(|(s, _, _), _| *s != server.0);
    }

    async fn connect(
        &self,
        peer: &PeerId,
        events: UnboundedSender<ClientEvent>,
    ) -> Result<ConnectionHandle, AdapterError> {
        let mut state = self.medium.state.lock();
        self.ensure_powered(&state)?;
        let handle = self.medium.next();

        let reachable = state.is_powered(peer) && state.server_of(peer).is_some();
        if !reachable {
            debug!("{} cannot reach {}", self.address, peer);
            let _ = events.send(ClientEvent::ConnectionStateChanged {
                status: GattStatus::ERROR,
                state: LinkState::Disconnected,
            });
            return Ok(ConnectionHandle(handle));
        }

        let client = state.device(&self.address);
        if let Some((_, service)) = state.server_of(peer) {
            let _ = service.events.send(ServerEvent::ConnectionStateChanged {
                device: client,
                status: GattStatus::SUCCESS,
                state: LinkState::Connected,
            });
        }
        let _ = events.send(ClientEvent::ConnectionStateChanged {
            status: GattStatus::SUCCESS,
            state: LinkState::Connected,
        });
        state.links.insert(
            handle,
            Link {
                client: self.address.clone(),
                server: peer.clone(),
                events,
            },
        );
        Ok(ConnectionHandle(handle))
    }

    async fn discover_services(&self, connection: ConnectionHandle) -> Result<(), AdapterError> {
        let state = self.medium.state.lock();
        let link = state
            .links
            .get(&connection.0)
            .ok_or_else(|| AdapterError::unknown_handle(connection.0))?;
        let services: Vec<GattServiceSpec> = state
            .services
            .values()
            .filter(|s| s.owner == link.server)
            .map(|s| s.service.clone())
            .collect();
        let _ = link.events.send(ClientEvent::ServicesDiscovered {
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
        let state = self.medium.state.lock();
        let link = state
            .links
            .get(&connection.0)
            .ok_or_else(|| AdapterError::unknown_handle(connection.0))?;
        let _ = link.events.send(ClientEvent::TransferUnitChanged {
            unit: size.clamp(DEFAULT_TRANSFER_UNIT, MAX_TRANSFER_UNIT),
            status: GattStatus::SUCCESS,
        });
        Ok(())
    }

    async fn write_characteristic(
        &self,
        connection: ConnectionHandle,
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
    ) -> Result<(), AdapterError> {
        let mut state = self.medium.state.lock();
        let (server_address, link_events) = {
            let link = state
                .links
                .get(&connection.0)
                .ok_or_else(|| AdapterError::unknown_handle(connection.0))?;
            (link.server.clone(), link.events.clone())
        };

        let target = state
            .services
            .iter()
            .find(|(_, s)| {
                s.owner == server_address
                    && s.service.uuid == service
                    && s.service.has_characteristic(characteristic)
            })
            .map(|(handle, s)| (*handle, s.events.clone()));

        let Some((server_handle, server_events)) = target else {
            let _ = link_events.send(ClientEvent::CharacteristicWritten {
                characteristic,
                status: GattStatus::FAILURE,
            });
            return Ok(());
        };

        state.next_request_id = state.next_request_id.wrapping_add(1);
        let request_id = state.next_request_id;
        state.pending_writes.insert(
            (server_handle, self.address.clone(), request_id),
            PendingWrite {
                link: connection.0,
                characteristic,
            },
        );
        let _ = server_events.send(ServerEvent::WriteRequest {
            device: state.device(&self.address),
            request_id,
            characteristic,
            prepared: false,
            response_needed: true,
            offset: 0,
            value: Some(value),
        });
        Ok(())
    }

    fn close(&self, connection: ConnectionHandle) {
        self.medium
            .state
            .lock()
            .teardown_link(connection.0, GattStatus::SUCCESS);
    }
}
