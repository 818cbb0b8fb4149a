use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::inner::conf::dto::known_device::KnownDeviceDto;
use crate::inner::conf::traits::Evaluate;
use crate::inner::error::{SessionError, SessionResult};
use crate::inner::model::peripheral::Peripheral;

/// Known device profiles in configuration order; the first matching profile wins.
#[derive(Default)]
pub(crate) struct ConfigurationManager {
    known_devices: Mutex<Vec<Arc<KnownDeviceDto>>>,
}

impl ConfigurationManager {
    pub(crate) async fn add_known_devices(&self, known_devices: Vec<KnownDeviceDto>) -> SessionResult<()> {
        let mut unique_names = HashSet::new();
        for known_device in known_devices.iter() {
            if !unique_names.insert(known_device.name.clone()) {
                return Err(SessionError::DuplicateConfiguration(known_device.name.clone()));
            }
        }

        let mut existing = self.known_devices.lock().await;
        if let Some(duplicate) = existing.iter().find(|conf| unique_names.contains(&conf.name)) {
            return Err(SessionError::DuplicateConfiguration(duplicate.name.clone()));
        }

        existing.extend(known_devices.into_iter().map(Arc::new));
        Ok(())
    }

    pub(crate) async fn list_known_devices(&self) -> Vec<Arc<KnownDeviceDto>> {
        self.known_devices.lock().await.clone()
    }

    pub(crate) async fn get_matching_config(&self, peripheral: &Peripheral) -> Option<Arc<KnownDeviceDto>> {
        let known_devices = self.known_devices.lock().await;
        known_devices.iter().find(|conf| conf.evaluate(peripheral)).cloned()
    }
}
