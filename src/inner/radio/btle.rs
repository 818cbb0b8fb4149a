use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures_util::StreamExt;
use retainer::Cache;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::inner::conf::model::service_characteristic_key::ServiceCharacteristicKey;
use crate::inner::error::{SessionError, SessionResult};
use crate::inner::model::adapter_info::AdapterInfo;
use crate::inner::radio::{
    Advertisement, Notification, NotificationStream, Radio, RadioEvent, RadioEventStream, RadioLink, RadioState,
};

/// btleplug does not expose the negotiated ATT MTU.
const DEFAULT_ATT_MTU: u16 = 23;

impl From<CentralState> for RadioState {
    fn from(value: CentralState) -> Self {
        match value {
            CentralState::PoweredOn => RadioState::PoweredOn,
            CentralState::PoweredOff => RadioState::PoweredOff,
            _ => RadioState::Unknown,
        }
    }
}

pub struct BtleRadio {
    adapter: Adapter,
    peripheral_cache: Arc<Cache<BDAddr, Arc<Peripheral>>>,
    peripheral_cache_ttl: Duration,
    cache_monitor: JoinHandle<()>,
}

impl Drop for BtleRadio {
    fn drop(&mut self) {
        self.cache_monitor.abort();
    }
}

impl BtleRadio {
    pub fn new(adapter: Adapter, peripheral_cache_ttl: Duration) -> Self {
        let cache = Arc::new(Cache::new());
        let clone = cache.clone();
        let monitor = tokio::spawn(async move { clone.monitor(10, 0.25, Duration::from_secs(10)).await });

        Self {
            adapter,
            peripheral_cache: cache,
            peripheral_cache_ttl,
            cache_monitor: monitor,
        }
    }

    /// Picks the adapter with the given id, or the first one.
    pub async fn from_platform(adapter_id: Option<&str>, peripheral_cache_ttl: Duration) -> SessionResult<Self> {
        let manager = Manager::new().await?;
        for adapter in manager.adapters().await? {
            let adapter_info = AdapterInfo::try_from(adapter.adapter_info().await?)?;
            info!(%adapter_info, "Discovered adapter");
            if adapter_id.map(|id| id == adapter_info.id).unwrap_or(true) {
                return Ok(Self::new(adapter, peripheral_cache_ttl));
            }
        }

        Err(SessionError::RadioUnavailable(
            adapter_id.map(|id| format!("No adapter {id}")).unwrap_or_else(|| "No adapters".to_string()),
        ))
    }

    #[tracing::instrument(level = "debug", skip(self), err)]
    async fn get_peripheral(&self, address: BDAddr) -> SessionResult<Arc<Peripheral>> {
        if let Some(peripheral) = self.peripheral_cache.get(&address).await {
            return Ok(Arc::clone(&peripheral));
        }

        debug!("Cache miss");
        let mut found = None;
        for peripheral in self.adapter.peripherals().await? {
            let peripheral = Arc::new(peripheral);
            self.peripheral_cache
                .insert(peripheral.address(), peripheral.clone(), self.peripheral_cache_ttl)
                .await;
            if peripheral.address() == address {
                found = Some(peripheral);
            }
        }

        found.ok_or_else(|| SessionError::ConnectFailed(address, "Unknown peripheral".to_string()))
    }
}

async fn to_radio_event(adapter: &Adapter, event: CentralEvent) -> Option<RadioEvent> {
    let id = match event {
        CentralEvent::StateUpdate(state) => return Some(RadioEvent::StateChanged(state.into())),
        CentralEvent::DeviceDisconnected(id) => {
            let peripheral = adapter.peripheral(&id).await.ok()?;
            return Some(RadioEvent::Disconnected(peripheral.address()));
        }
        CentralEvent::DeviceDiscovered(id)
        | CentralEvent::DeviceUpdated(id)
        | CentralEvent::ManufacturerDataAdvertisement { id, .. }
        | CentralEvent::ServiceDataAdvertisement { id, .. }
        | CentralEvent::ServicesAdvertisement { id, .. } => id,
        _ => return None,
    };

    let peripheral = adapter.peripheral(&id).await.ok()?;
    let properties = peripheral.properties().await.ok()??;
    Some(RadioEvent::Advertisement(Advertisement {
        address: peripheral.address(),
        name: properties.local_name,
        rssi: properties.rssi,
        services: properties.services,
    }))
}

#[async_trait]
impl Radio for BtleRadio {
    async fn info(&self) -> SessionResult<AdapterInfo> {
        Ok(AdapterInfo::try_from(self.adapter.adapter_info().await?)?)
    }

    async fn state(&self) -> SessionResult<RadioState> {
        Ok(self.adapter.adapter_state().await?.into())
    }

    async fn events(&self) -> SessionResult<RadioEventStream> {
        let adapter = self.adapter.clone();
        let events = self.adapter.events().await?.filter_map(move |event| {
            let adapter = adapter.clone();
            async move { to_radio_event(&adapter, event).await }
        });
        Ok(Box::pin(events))
    }

    async fn start_scan(&self, services: &[Uuid]) -> SessionResult<()> {
        self.adapter
            .start_scan(ScanFilter {
                services: services.to_vec(),
            })
            .await?;
        Ok(())
    }

    async fn stop_scan(&self) -> SessionResult<()> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self), err)]
    async fn connect(&self, address: BDAddr) -> SessionResult<Arc<dyn RadioLink>> {
        let peripheral = self.get_peripheral(address).await?;
        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        peripheral.discover_services().await?;
        info!(characteristics = peripheral.characteristics().len(), "Connected to peripheral");
        Ok(Arc::new(BtleLink { peripheral }))
    }
}

struct BtleLink {
    peripheral: Arc<Peripheral>,
}

impl BtleLink {
    fn characteristic(&self, key: &ServiceCharacteristicKey) -> SessionResult<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|characteristic| key.matches(characteristic))
            .ok_or_else(|| SessionError::InvalidCharacteristic(key.to_string()))
    }
}

#[async_trait]
impl RadioLink for BtleLink {
    fn address(&self) -> BDAddr {
        self.peripheral.address()
    }

    fn mtu(&self) -> u16 {
        DEFAULT_ATT_MTU
    }

    async fn read(&self, key: &ServiceCharacteristicKey) -> SessionResult<Vec<u8>> {
        let characteristic = self.characteristic(key)?;
        Ok(self.peripheral.read(&characteristic).await?)
    }

    async fn write(&self, key: &ServiceCharacteristicKey, value: &[u8], write_type: WriteType) -> SessionResult<()> {
        let characteristic = self.characteristic(key)?;
        self.peripheral.write(&characteristic, value, write_type).await?;
        Ok(())
    }

    async fn subscribe(&self, key: &ServiceCharacteristicKey) -> SessionResult<()> {
        let characteristic = self.characteristic(key)?;
        self.peripheral.subscribe(&characteristic).await?;
        Ok(())
    }

    async fn unsubscribe(&self, key: &ServiceCharacteristicKey) -> SessionResult<()> {
        let characteristic = self.characteristic(key)?;
        self.peripheral.unsubscribe(&characteristic).await?;
        Ok(())
    }

    async fn notifications(&self) -> SessionResult<NotificationStream> {
        let notifications = self.peripheral.notifications().await?.map(|notification| Notification {
            characteristic_uuid: notification.uuid,
            value: notification.value,
        });
        Ok(Box::pin(notifications))
    }

    async fn disconnect(&self) -> SessionResult<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}
