use std::sync::Arc;
use std::time::Duration;

use btleplug::api::{BDAddr, WriteType};
use kanal::AsyncReceiver;

use crate::inner::conf::dto::known_device::KnownDeviceDto;
use crate::inner::conf::manager::ConfigurationManager;
use crate::inner::conf::model::service_characteristic_key::ServiceCharacteristicKey;
use crate::inner::conf::model::session_conf::SessionConf;
use crate::inner::connection::state::ConnectionInfo;
use crate::inner::connection::{ConnectionManager, KnownDeviceConnection};
use crate::inner::error::SessionResult;
use crate::inner::events::FanOutSender;
use crate::inner::gatt::{GattOperation, Subscription};
use crate::inner::model::adapter_info::AdapterInfo;
use crate::inner::model::connection_state::ConnectionState;
use crate::inner::model::peripheral::Peripheral;
use crate::inner::model::scan_filters::ScanFilters;
use crate::inner::model::session_event::SessionEvent;
use crate::inner::radio::Radio;
use crate::inner::registry::DeviceRegistry;
use crate::inner::scanner::{ScanSession, Scanner};

/// The public entry point: discovery, connections and GATT I/O over one radio.
pub struct Session {
    radio: Arc<dyn Radio>,
    registry: Arc<DeviceRegistry>,
    scanner: Scanner,
    connections: Arc<ConnectionManager>,
    events: Arc<FanOutSender<SessionEvent>>,
}

impl Session {
    pub async fn new(radio: Arc<dyn Radio>, conf: SessionConf) -> SessionResult<Self> {
        let conf = Arc::new(conf);
        let registry = Arc::new(DeviceRegistry::new(conf.staleness_timeout));
        let events = Arc::new(FanOutSender::default());
        let scanner = Scanner::new(radio.clone(), registry.clone(), events.clone(), conf.clone());
        let connections = ConnectionManager::new(
            radio.clone(),
            registry.clone(),
            events.clone(),
            conf,
            Arc::new(ConfigurationManager::default()),
        )
        .await?;

        Ok(Self {
            radio,
            registry,
            scanner,
            connections,
            events,
        })
    }

    /// Known device names must be unique across calls.
    pub async fn add_known_devices(&self, known_devices: Vec<KnownDeviceDto>) -> SessionResult<()> {
        self.connections
            .configuration_manager()
            .add_known_devices(known_devices)
            .await
    }

    pub async fn known_devices(&self) -> Vec<Arc<KnownDeviceDto>> {
        self.connections.configuration_manager().list_known_devices().await
    }

    pub async fn adapter_info(&self) -> SessionResult<AdapterInfo> {
        self.radio.info().await
    }

    /// Uses the configured default scan timeout when `timeout` is `None`.
    pub async fn scan(&self, filters: ScanFilters, timeout: Option<Duration>) -> SessionResult<ScanSession> {
        self.scanner.start_scan(filters, timeout).await
    }

    pub async fn stop_scan(&self) -> SessionResult<()> {
        self.scanner.stop_scan().await
    }

    pub async fn connect(&self, address: BDAddr) -> SessionResult<ConnectionInfo> {
        self.connections.connect(address).await
    }

    pub async fn connect_known(&self) -> SessionResult<KnownDeviceConnection> {
        self.connections.connect_known().await
    }

    pub async fn read(&self, address: BDAddr, target: ServiceCharacteristicKey) -> SessionResult<Vec<u8>> {
        self.connections.enqueue(&address, GattOperation::read(target)).await
    }

    pub async fn write(
        &self,
        address: BDAddr,
        target: ServiceCharacteristicKey,
        value: Vec<u8>,
        write_type: WriteType,
    ) -> SessionResult<()> {
        self.connections
            .enqueue(&address, GattOperation::write(target, value, write_type))
            .await?;
        Ok(())
    }

    /// Writes UTF-8 text with response.
    pub async fn write_text(&self, address: BDAddr, target: ServiceCharacteristicKey, text: &str) -> SessionResult<()> {
        self.write(address, target, text.as_bytes().to_vec(), WriteType::WithResponse)
            .await
    }

    /// Submits any operation, e.g. one with its own timeout. Returns the read value, empty for the rest.
    pub async fn execute(&self, address: BDAddr, operation: GattOperation) -> SessionResult<Vec<u8>> {
        self.connections.enqueue(&address, operation).await
    }

    pub async fn subscribe(&self, address: BDAddr, target: ServiceCharacteristicKey) -> SessionResult<Subscription> {
        self.connections.subscribe(&address, target).await
    }

    pub async fn unsubscribe(&self, address: BDAddr, target: ServiceCharacteristicKey) -> SessionResult<()> {
        self.connections.unsubscribe(&address, target).await
    }

    /// Always succeeds.
    pub async fn disconnect(&self, address: BDAddr) -> SessionResult<()> {
        self.connections.disconnect(address).await
    }

    pub fn devices(&self, filters: &ScanFilters) -> Vec<Peripheral> {
        self.registry.list(filters)
    }

    pub fn connection_state(&self, address: &BDAddr) -> ConnectionState {
        self.connections.connection_state(address)
    }

    pub async fn connection_info(&self, address: &BDAddr) -> Option<ConnectionInfo> {
        self.connections.connection_info(address).await
    }

    /// Every subscriber receives all events published after subscribing.
    pub async fn events(&self) -> AsyncReceiver<SessionEvent> {
        self.events.subscribe().await
    }
}
