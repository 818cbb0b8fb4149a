use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use btleplug::api::BDAddr;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::inner::conf::traits::Evaluate;
use crate::inner::model::peripheral::Peripheral;
use crate::inner::model::scan_filters::ScanFilters;

/// A registry record, updated in place so that weak references held by connections stay valid.
#[derive(Debug)]
pub(crate) struct TrackedPeripheral {
    peripheral: RwLock<Peripheral>,
}

impl TrackedPeripheral {
    pub(crate) fn snapshot(&self) -> Peripheral {
        self.peripheral.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn merge(&self, sighting: Peripheral) -> Peripheral {
        let mut peripheral = self.peripheral.write().unwrap_or_else(PoisonError::into_inner);
        if sighting.name.is_some() {
            peripheral.name = sighting.name;
        }
        if sighting.rssi.is_some() {
            peripheral.rssi = sighting.rssi;
        }
        if !sighting.services.is_empty() {
            peripheral.services = sighting.services;
        }
        peripheral.last_seen = sighting.last_seen;
        peripheral.seen_at = sighting.seen_at;
        peripheral.clone()
    }

    fn is_stale(&self, now: Instant, staleness_timeout: Duration) -> bool {
        let last_seen = self.peripheral.read().unwrap_or_else(PoisonError::into_inner).last_seen;
        now.saturating_duration_since(last_seen) >= staleness_timeout
    }
}

/// Peripherals discovered so far, keyed by address. Reads return copies.
pub struct DeviceRegistry {
    peripherals: DashMap<BDAddr, Arc<TrackedPeripheral>>,
    staleness_timeout: Duration,
}

impl DeviceRegistry {
    pub fn new(staleness_timeout: Duration) -> Self {
        Self {
            peripherals: DashMap::new(),
            staleness_timeout,
        }
    }

    /// Inserts a new record or merges the sighting into the existing one, keeping a known name.
    pub fn upsert(&self, sighting: Peripheral) -> Peripheral {
        let tracked = self.peripherals.entry(sighting.address).or_insert_with(|| {
            Arc::new(TrackedPeripheral {
                peripheral: RwLock::new(sighting.clone()),
            })
        });
        tracked.merge(sighting)
    }

    pub fn get(&self, address: &BDAddr) -> Option<Peripheral> {
        self.peripherals.get(address).map(|tracked| tracked.snapshot())
    }

    /// Matching peripherals ordered by address.
    pub fn list(&self, filters: &ScanFilters) -> Vec<Peripheral> {
        let mut peripherals: Vec<Peripheral> = self
            .peripherals
            .iter()
            .map(|entry| entry.value().snapshot())
            .filter(|peripheral| filters.evaluate(peripheral))
            .collect();
        peripherals.sort_unstable_by_key(|peripheral| peripheral.address);
        peripherals
    }

    pub fn evict_stale(&self, now: Instant) -> Vec<BDAddr> {
        let mut evicted = vec![];
        self.peripherals.retain(|address, tracked| {
            if tracked.is_stale(now, self.staleness_timeout) {
                evicted.push(*address);
                return false;
            }
            true
        });
        if !evicted.is_empty() {
            debug!(?evicted, "Evicted stale peripherals");
        }
        evicted
    }

    pub(crate) fn handle(&self, address: &BDAddr) -> Weak<TrackedPeripheral> {
        self.peripherals
            .get(address)
            .map(|tracked| Arc::downgrade(tracked.value()))
            .unwrap_or_default()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.peripherals.len()
    }
}
