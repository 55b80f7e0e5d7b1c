//! GATT service definition for payment-request messaging
//!
//! Every node hosts one primary service with a single characteristic. Remote
//! peers write a UTF-8 envelope to it; reads return the most recent payload.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Primary service advertised by every node and used as the scan filter.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000b81d_0000_1000_8000_00805f9b34fb);

/// The read/write message characteristic inside [`SERVICE_UUID`].
pub const MESSAGE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x7db3e235_3608_41f3_a03c_955fcbd2ea4b);

/// Transfer unit every link starts with.
pub const DEFAULT_TRANSFER_UNIT: u16 = 23;

/// Transfer unit requested after service discovery.
pub const REQUESTED_TRANSFER_UNIT: u16 = 256;

/// Largest transfer unit a link can negotiate.
pub const MAX_TRANSFER_UNIT: u16 = 517;

/// ATT opcode + handle overhead per write.
pub const ATT_HEADER_SIZE: usize = 3;

/// Maximum attribute value length (protocol limitation)
pub const MAX_ATTRIBUTE_SIZE: usize = 512;

/// Payload bytes that fit in a single write for a given transfer unit.
pub fn max_payload_for(transfer_unit: u16) -> usize {
    (transfer_unit as usize).saturating_sub(ATT_HEADER_SIZE)
}

/// Characteristic access flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
}

impl CharacteristicProperties {
    pub const READ_WRITE: CharacteristicProperties = CharacteristicProperties {
        read: true,
        write: true,
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattCharacteristicSpec {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
}

/// A primary service and its characteristics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GattServiceSpec {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristicSpec>,
}

impl GattServiceSpec {
    /// The messaging service: one readable and writable characteristic.
    pub fn message_service(service_uuid: Uuid, characteristic_uuid: Uuid) -> Self {
        Self {
            uuid: service_uuid,
            characteristics: vec![GattCharacteristicSpec {
                uuid: characteristic_uuid,
                properties: CharacteristicProperties::READ_WRITE,
            }],
        }
    }

    pub fn has_characteristic(&self, uuid: Uuid) -> bool {
        self.characteristics.iter().any(|c| c.uuid == uuid)
    }

    pub fn characteristic(&self, uuid: Uuid) -> Option<&GattCharacteristicSpec> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

/// Find `characteristic` under `service` in a discovery result.
pub fn locate_characteristic(
    services: &[GattServiceSpec],
    service: Uuid,
    characteristic: Uuid,
) -> Option<&GattCharacteristicSpec> {
    services
        .iter()
        .filter(|s| s.uuid == service)
        .find_map(|s| s.characteristic(characteristic))
}
