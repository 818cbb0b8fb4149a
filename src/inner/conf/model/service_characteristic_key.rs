use std::fmt::{Display, Formatter};
use std::str::FromStr;

use anyhow::Context;
use btleplug::api::Characteristic;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies a characteristic within a peripheral's GATT table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ServiceCharacteristicKey {
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
}

impl ServiceCharacteristicKey {
    pub fn new(service_uuid: Uuid, characteristic_uuid: Uuid) -> Self {
        Self {
            service_uuid,
            characteristic_uuid,
        }
    }

    pub(crate) fn matches(&self, characteristic: &Characteristic) -> bool {
        self.service_uuid == characteristic.service_uuid && self.characteristic_uuid == characteristic.uuid
    }
}

impl From<&Characteristic> for ServiceCharacteristicKey {
    fn from(value: &Characteristic) -> Self {
        Self {
            service_uuid: value.service_uuid,
            characteristic_uuid: value.uuid,
        }
    }
}

impl Display for ServiceCharacteristicKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.service_uuid, self.characteristic_uuid)
    }
}

impl FromStr for ServiceCharacteristicKey {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (service, characteristic) = value
            .split_once('/')
            .context("Expected <service uuid>/<characteristic uuid>")?;
        Ok(Self {
            service_uuid: Uuid::parse_str(service.trim())?,
            characteristic_uuid: Uuid::parse_str(characteristic.trim())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        let key: ServiceCharacteristicKey =
            "4fafc201-1fb5-459e-8fcc-c5c9c331914b/beb5483e-36e1-4688-b7f5-ea07361b26a8"
                .parse()
                .unwrap();
        assert_eq!(key.service_uuid.to_string(), "4fafc201-1fb5-459e-8fcc-c5c9c331914b");
        assert_eq!(key.characteristic_uuid.to_string(), "beb5483e-36e1-4688-b7f5-ea07361b26a8");

        assert!("4fafc201-1fb5-459e-8fcc-c5c9c331914b".parse::<ServiceCharacteristicKey>().is_err());
    }
}
