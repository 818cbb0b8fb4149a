use std::fmt::{Display, Formatter};

use btleplug::api::BDAddr;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

/// Snapshot of what is known about a discovered peripheral.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Peripheral {
    pub address: BDAddr,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub services: Vec<Uuid>,
    #[serde(skip)]
    pub last_seen: Instant,
    pub seen_at: DateTime<Utc>,
}

impl Peripheral {
    pub fn advertises(&self, service: &Uuid) -> bool {
        self.services.contains(service)
    }
}

impl Display for Peripheral {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = self.name.as_deref().unwrap_or("Unknown");
        write!(f, "{name}[{}]", self.address)?;
        if let Some(rssi) = self.rssi {
            write!(f, " {rssi}dBm")?;
        }
        Ok(())
    }
}
