use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use btleplug::api::BDAddr;
use futures_util::StreamExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info_span, Instrument};

use crate::inner::conf::dto::known_device::KnownDeviceDto;
use crate::inner::conf::manager::ConfigurationManager;
use crate::inner::conf::model::session_conf::SessionConf;
use crate::inner::error::{SessionError, SessionResult};
use crate::inner::events::FanOutSender;
use crate::inner::gatt::queue::GattQueue;
use crate::inner::gatt::{GattOperation, Subscription};
use crate::inner::conf::model::service_characteristic_key::ServiceCharacteristicKey;
use crate::inner::key_lock::KeyLock;
use crate::inner::model::connection_state::ConnectionState;
use crate::inner::model::session_event::SessionEvent;
use crate::inner::radio::{Radio, RadioEvent};
use crate::inner::registry::DeviceRegistry;

use self::state::{Connection, ConnectionInfo};

pub mod backoff;
mod connect;
mod link_loss;
pub mod state;

#[derive(Debug, Clone, Serialize)]
pub struct KnownDeviceConnection {
    pub device: Arc<KnownDeviceDto>,
    pub info: ConnectionInfo,
}

/// Owns the per-device connection state machines.
pub struct ConnectionManager {
    radio: Arc<dyn Radio>,
    registry: Arc<DeviceRegistry>,
    events: Arc<FanOutSender<SessionEvent>>,
    conf: Arc<SessionConf>,
    configuration_manager: Arc<ConfigurationManager>,
    connections: Mutex<HashMap<BDAddr, Arc<Connection>>>,
    connect_lock: KeyLock<BDAddr>,
    link_monitor: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(handle) = self.link_monitor.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
    }
}

impl ConnectionManager {
    pub(crate) async fn new(
        radio: Arc<dyn Radio>,
        registry: Arc<DeviceRegistry>,
        events: Arc<FanOutSender<SessionEvent>>,
        conf: Arc<SessionConf>,
        configuration_manager: Arc<ConfigurationManager>,
    ) -> SessionResult<Arc<Self>> {
        let mut radio_events = radio.events().await?;
        let manager = Arc::new(Self {
            radio,
            registry,
            events,
            conf,
            configuration_manager,
            connections: Default::default(),
            connect_lock: Default::default(),
            link_monitor: Default::default(),
        });

        let weak = Arc::downgrade(&manager);
        let monitor = tokio::spawn(
            async move {
                while let Some(event) = radio_events.next().await {
                    let RadioEvent::Disconnected(address) = event else {
                        continue;
                    };
                    let Some(manager) = weak.upgrade() else {
                        break;
                    };
                    manager.handle_link_loss(address).await;
                }
                debug!("Radio event stream ended");
            }
            .instrument(info_span!("link_monitor")),
        );
        *manager.link_monitor.lock().unwrap_or_else(PoisonError::into_inner) = Some(monitor);

        Ok(manager)
    }

    fn connections(&self) -> std::sync::MutexGuard<'_, HashMap<BDAddr, Arc<Connection>>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, address: &BDAddr) -> Option<Arc<Connection>> {
        self.connections().get(address).cloned()
    }

    fn get_or_create(&self, address: BDAddr) -> Arc<Connection> {
        self.connections()
            .entry(address)
            .or_insert_with(|| {
                Arc::new(Connection::new(
                    address,
                    self.registry.handle(&address),
                    self.events.clone(),
                ))
            })
            .clone()
    }

    /// Drops the record once it has settled in `Disconnected`, unless it was already replaced.
    fn forget(&self, connection: &Arc<Connection>) {
        let mut connections = self.connections();
        if let Some(existing) = connections.get(&connection.address) {
            if Arc::ptr_eq(existing, connection) && existing.state() == ConnectionState::Disconnected {
                connections.remove(&connection.address);
            }
        }
    }

    pub fn connection_state(&self, address: &BDAddr) -> ConnectionState {
        self.lookup(address)
            .map(|connection| connection.state())
            .unwrap_or_default()
    }

    pub async fn connection_info(&self, address: &BDAddr) -> Option<ConnectionInfo> {
        let connection = self.lookup(address)?;
        let mut cell = connection.lock().await;
        cell.track(self.registry.handle(address));
        Some(connection.info(&cell))
    }

    async fn queue(&self, address: &BDAddr) -> SessionResult<Arc<GattQueue>> {
        let connection = self.lookup(address).ok_or(SessionError::ConnectionLost)?;
        let cell = connection.lock().await;
        cell.queue.clone().ok_or(SessionError::ConnectionLost)
    }

    /// Queues the operation behind every operation submitted earlier for the same device.
    pub async fn enqueue(&self, address: &BDAddr, operation: GattOperation) -> SessionResult<Vec<u8>> {
        let queue = self.queue(address).await?;
        queue.enqueue(operation).await
    }

    pub async fn subscribe(&self, address: &BDAddr, target: ServiceCharacteristicKey) -> SessionResult<Subscription> {
        let queue = self.queue(address).await?;
        queue.subscribe(target, None).await
    }

    pub async fn unsubscribe(&self, address: &BDAddr, target: ServiceCharacteristicKey) -> SessionResult<()> {
        let queue = self.queue(address).await?;
        queue.unsubscribe(target, None).await
    }

    pub(crate) fn configuration_manager(&self) -> &ConfigurationManager {
        &self.configuration_manager
    }
}
