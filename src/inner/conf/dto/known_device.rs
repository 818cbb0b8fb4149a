use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::inner::conf::model::filter::{evaluate_optional_name, Filter};
use crate::inner::conf::model::service_characteristic_key::ServiceCharacteristicKey;
use crate::inner::conf::traits::Evaluate;
use crate::inner::model::peripheral::Peripheral;

/// A peripheral the session may connect to without being told its address.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct KnownDeviceDto {
    pub name: String,
    pub device_id: Option<Filter>,
    pub device_name: Option<Filter>,
    /// Services the device advertises; used as the scan filter when looking for it
    #[serde(default)]
    pub services: Vec<Uuid>,
    /// The characteristic carrying the device's notifications and commands
    pub characteristic: Option<ServiceCharacteristicKey>,
}

impl Evaluate<&Peripheral, bool> for KnownDeviceDto {
    fn evaluate(&self, source: &Peripheral) -> bool {
        let device_id_matches = self
            .device_id
            .as_ref()
            .map(|filter| filter.evaluate(&source.address.to_string()))
            .unwrap_or(true);

        let name_matches = evaluate_optional_name(self.device_name.as_ref(), source.name.as_deref());

        let services_match = self.services.is_empty() || self.services.iter().any(|uuid| source.advertises(uuid));

        device_id_matches && name_matches && services_match
    }
}
