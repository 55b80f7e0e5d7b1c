// Engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::message::envelope::{Receiver, DEFAULT_CURRENCY};
use crate::transport::ble::gatt::{
    DEFAULT_TRANSFER_UNIT, MAX_TRANSFER_UNIT, MESSAGE_CHARACTERISTIC_UUID, REQUESTED_TRANSFER_UNIT,
    SERVICE_UUID,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Device name must not be empty")]
    EmptyDeviceName,
    #[error("Discovery window must be greater than zero")]
    ZeroDiscoveryWindow,
    #[error("Transfer unit {0} outside 23..=517")]
    TransferUnitOutOfRange(u16),
    #[error("Default transfer unit {default} exceeds requested {requested}")]
    DefaultExceedsRequested { default: u16, requested: u16 },
    #[error("Event capacity must be greater than zero")]
    ZeroEventCapacity,
    #[error("Currency must not be empty")]
    EmptyCurrency,
}

/// Configuration for one [`PeerMessagingEngine`](crate::PeerMessagingEngine).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name included in advertisements
    pub device_name: String,
    /// Service advertised, filtered on and hosted
    pub service_uuid: Uuid,
    /// Characteristic carrying envelopes
    pub message_characteristic_uuid: Uuid,
    /// How long each discovery session listens
    pub discovery_window_ms: u64,
    /// Transfer unit requested after service discovery
    pub requested_transfer_unit: u16,
    /// Transfer unit assumed when negotiation fails
    pub default_transfer_unit: u16,
    /// Per-step limit for outbound attempts; `None` waits on the adapter
    pub attempt_timeout_ms: Option<u64>,
    /// Buffer depth of each outward event stream
    pub event_capacity: usize,
    /// Currency stamped on outgoing requests
    pub currency: String,
    /// Payee profile stamped on outgoing requests
    pub payee: Receiver,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_name: "nearpay".to_string(),
            service_uuid: SERVICE_UUID,
            message_characteristic_uuid: MESSAGE_CHARACTERISTIC_UUID,
            discovery_window_ms: 5000,
            requested_transfer_unit: REQUESTED_TRANSFER_UNIT,
            default_transfer_unit: DEFAULT_TRANSFER_UNIT,
            attempt_timeout_ms: None,
            event_capacity: 64,
            currency: DEFAULT_CURRENCY.to_string(),
            payee: Receiver::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    pub fn with_discovery_window(mut self, window: Duration) -> Self {
        self.discovery_window_ms = window.as_millis() as u64;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_payee(mut self, payee: Receiver) -> Self {
        self.payee = payee;
        self
    }

    pub fn discovery_window(&self) -> Duration {
        Duration::from_millis(self.discovery_window_ms)
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_name.trim().is_empty() {
            return Err(ConfigError::EmptyDeviceName);
        }
        if self.discovery_window_ms == 0 {
            return Err(ConfigError::ZeroDiscoveryWindow);
        }
        for unit in [self.requested_transfer_unit, self.default_transfer_unit] {
            if !(DEFAULT_TRANSFER_UNIT..=MAX_TRANSFER_UNIT).contains(&unit) {
                return Err(ConfigError::TransferUnitOutOfRange(unit));
            }
        }
        if self.default_transfer_unit > self.requested_transfer_unit {
            return Err(ConfigError::DefaultExceedsRequested {
                default: self.default_transfer_unit,
                requested: self.requested_transfer_unit,
            });
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::ZeroEventCapacity);
        }
        if self.currency.trim().is_empty() {
            return Err(ConfigError::EmptyCurrency);
        }
        Ok(())
    }
}
