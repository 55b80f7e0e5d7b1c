//! Presence advertiser
//!
//! Makes the node discoverable by advertising the messaging service with the
//! device name. Start and stop are idempotent; a failed start leaves the
//! advertiser idle so it can be retried.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::error::BleError;
use crate::config::EngineConfig;
use crate::transport::adapter::{
    AdvertiseData, AdvertiseHandle, AdvertiseSettings, RadioAdapter,
};

pub struct Advertiser {
    adapter: Arc<dyn RadioAdapter>,
    data: AdvertiseData,
    settings: AdvertiseSettings,
    handle: Mutex<Option<AdvertiseHandle>>,
}

impl Advertiser {
    pub fn new(adapter: Arc<dyn RadioAdapter>, config: &EngineConfig) -> Self {
        Self {
            adapter,
            data: AdvertiseData {
                service_uuid: config.service_uuid,
                include_device_name: true,
                device_name: config.device_name.clone(),
            },
            settings: AdvertiseSettings::default(),
            handle: Mutex::new(None),
        }
    }

    pub async fn start(&self) -> Result<(), BleError> {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            debug!("Advertising already active");
            return Ok(());
        }

        match self
            .adapter
            .start_advertising(self.data.clone(), self.settings.clone())
            .await
        {
            Ok(registered) => {
                info!(
                    "Advertising {} as {:?}",
                    self.data.service_uuid, self.data.device_name
                );
                *handle = Some(registered);
                Ok(())
            }
            Err(e) => {
                warn!("Advertising failed: {}", e);
                Err(BleError::AdvertiseFailed(e.code))
            }
        }
    }

    pub async fn stop(&self) {
        if let Some(registered) = self.handle.lock().await.take() {
            self.adapter.stop_advertising(registered);
            info!("Advertising stopped");
        }
    }

    pub async fn is_advertising(&self) -> bool {
        self.handle.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ble::testing::{RadioCall, ScriptedRadio};

    fn advertiser(radio: &Arc<ScriptedRadio>) -> Advertiser {
        Advertiser::new(radio.clone(), &EngineConfig::default())
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let radio = ScriptedRadio::new("AA:00:00:00:00:01");
        let advertiser = advertiser(&radio);

        advertiser.start().await.expect("first start");
        advertiser.start().await.expect("second start");

        assert!(advertiser.is_advertising().await);
        assert_eq!(radio.count(|c| *c == RadioCall::StartAdvertising), 1);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let radio = ScriptedRadio::new("AA:00:00:00:00:01");
        let advertiser = advertiser(&radio);

        advertiser.stop().await;
        advertiser.start().await.expect("start");
        advertiser.stop().await;
        advertiser.stop().await;

        assert!(!advertiser.is_advertising().await);
        assert_eq!(
            radio.count(|c| matches!(c, RadioCall::StopAdvertising(_))),
            1
        );
    }

    #[tokio::test]
    async fn test_failure_leaves_advertiser_idle() {
        let radio = ScriptedRadio::new("AA:00:00:00:00:01");
        radio.fail_advertising(Some(2));
        let advertiser = advertiser(&radio);

        let result = advertiser.start().await;
        assert_eq!(result, Err(BleError::AdvertiseFailed(2)));
        assert!(!advertiser.is_advertising().await);

        radio.fail_advertising(None);
        advertiser.start().await.expect("retry should succeed");
        assert!(advertiser.is_advertising().await);
        assert_eq!(radio.count(|c| *c == RadioCall::StartAdvertising), 2);
    }
}
