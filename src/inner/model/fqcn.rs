use std::fmt::{Display, Formatter};

use btleplug::api::BDAddr;
use metrics::Label;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::inner::conf::model::service_characteristic_key::ServiceCharacteristicKey;

/// Fully qualified characteristic name: a characteristic of a service of a particular peripheral.
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Clone, Hash, Serialize, Deserialize)]
pub struct Fqcn {
    pub peripheral: BDAddr,
    pub service: Uuid,
    pub characteristic: Uuid,
}

impl Display for Fqcn {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}:{}", self.peripheral, self.service, self.characteristic)
    }
}

impl Fqcn {
    pub fn new(peripheral: BDAddr, key: &ServiceCharacteristicKey) -> Self {
        Self {
            peripheral,
            service: key.service_uuid,
            characteristic: key.characteristic_uuid,
        }
    }

    pub fn key(&self) -> ServiceCharacteristicKey {
        ServiceCharacteristicKey {
            service_uuid: self.service,
            characteristic_uuid: self.characteristic,
        }
    }

    pub(crate) fn peripheral_label(&self) -> Label {
        Label::new("peripheral", self.peripheral.to_string())
    }

    pub(crate) fn characteristic_label(&self) -> Label {
        Label::new("characteristic", self.characteristic.to_string())
    }
}
