/// Discovery controller
///
/// Runs a bounded scan session filtered on the messaging service and collects
/// the peers seen during the window, deduplicated by transport address. Only
/// one session runs at a time; the adapter scan is stopped exactly once per
/// session whether the window elapses, the scan fails or the session is
/// cancelled.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, trace, warn};

use super::error::BleError;
use crate::config::EngineConfig;
use crate::transport::adapter::{
    PeerId, RadioAdapter, ScanEvent, ScanFilter, ScanHandle, ScanRecord, ScanSettings,
};

/// A peer seen during the current discovery session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredPeer {
    pub id: PeerId,
    pub display_name: Option<String>,
    /// Most recent RSSI in dBm
    pub signal_strength: i32,
}

/// Scanner state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScannerState {
    /// Idle, not scanning
    Idle,
    /// A session is listening for advertisements
    Scanning,
}

pub struct Scanner {
    adapter: Arc<dyn RadioAdapter>,
    filter: ScanFilter,
    settings: ScanSettings,
    peers: Arc<RwLock<HashMap<PeerId, DiscoveredPeer>>>,
    session: tokio::sync::Mutex<()>,
    active: Mutex<Option<ScanHandle>>,
    cancel: Notify,
    /// Bumped by every `cancel`
    generation: AtomicU64,
}

impl Scanner {
    pub fn new(adapter: Arc<dyn RadioAdapter>, config: &EngineConfig) -> Self {
        Self {
            adapter,
            filter: ScanFilter {
                service_uuid: config.service_uuid,
            },
            settings: ScanSettings::default(),
            peers: Arc::new(RwLock::new(HashMap::new())),
            session: tokio::sync::Mutex::new(()),
            active: Mutex::new(None),
            cancel: Notify::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Scan for `window` and return the peers seen, ordered by address.
    ///
    /// A scan that fails to start yields an empty set rather than an error.
    pub async fn run_discovery(&self, window: Duration) -> Result<Vec<DiscoveredPeer>, BleError> {
        self.run_discovery_since(self.generation(), window).await
    }

    /// Like [`Scanner::run_discovery`], but yields an empty set without
    /// scanning if `cancel` was called after `generation` was read.
    pub async fn run_discovery_since(
        &self,
        generation: u64,
        window: Duration,
    ) -> Result<Vec<DiscoveredPeer>, BleError> {
        let _session = self
            .session
            .try_lock()
            .map_err(|_| BleError::ScanInProgress)?;

        let cancelled = self.cancel.notified();
        tokio::pin!(cancelled);
        cancelled.as_mut().enable();

        self.peers.write().clear();
        if self.generation() != generation {
            debug!("Discovery cancelled before the scan started");
            return Ok(Vec::new());
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = match self
            .adapter
            .start_scan(self.filter.clone(), self.settings.clone(), tx)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                warn!("{}", BleError::ScanFailed(e.code));
                return Ok(Vec::new());
            }
        };
        *self.active.lock() = Some(handle);
        info!("Discovery started for {:?}", window);

        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);
        let mut events_open = true;

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                _ = &mut cancelled => {
                    debug!("Discovery cancelled");
                    break;
                }
                event = rx.recv(), if events_open => match event {
                    Some(ScanEvent::Result(record)) => self.record(record),
                    Some(ScanEvent::Batch(records)) => {
                        for record in records {
                            self.record(record);
                        }
                    }
                    Some(ScanEvent::Failed(code)) => {
                        warn!("{}", BleError::ScanFailed(code));
                        self.peers.write().clear();
                        break;
                    }
                    None => events_open = false,
                },
            }
        }

        self.release();
        let peers = self.discovered_peers();
        info!("Discovery finished with {} peer(s)", peers.len());
        Ok(peers)
    }

    /// Abort the running session, if any. Safe to call at any time.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cancel.notify_waiters();
        self.release();
    }

    /// Current cancellation generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ScannerState {
        if self.active.lock().is_some() {
            ScannerState::Scanning
        } else {
            ScannerState::Idle
        }
    }

    /// Peers seen by the current or most recent session, ordered by address.
    pub fn discovered_peers(&self) -> Vec<DiscoveredPeer> {
        let mut peers: Vec<DiscoveredPeer> = self.peers.read().values().cloned().collect();
        peers.sort_by(|a, b| a.id.cmp(&b.id));
        peers
    }

    fn release(&self) {
        if let Some(handle) = self.active.lock().take() {
            self.adapter.stop_scan(handle);
            debug!("Stopped {}", handle);
        }
    }

    fn record(&self, record: ScanRecord) {
        if !record.service_uuids.contains(&self.filter.service_uuid) {
            trace!("Ignoring {} without messaging service", record.device.id);
            return;
        }

        let mut peers = self.peers.write();
        match peers.get_mut(&record.device.id) {
            Some(existing) => {
                existing.signal_strength = record.rssi;
                if record.device.name.is_some() {
                    existing.display_name = record.device.name;
                }
            }
            None => {
                debug!("Discovered {} ({} dBm)", record.device.id, record.rssi);
                peers.insert(
                    record.device.id.clone(),
                    DiscoveredPeer {
                        id: record.device.id,
                        display_name: record.device.name,
                        signal_strength: record.rssi,
                    },
                );
            }
        }
    }
}
