use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{BDAddr, WriteType};
use futures_util::Stream;
use serde::Serialize;
use uuid::Uuid;

use crate::inner::conf::model::service_characteristic_key::ServiceCharacteristicKey;
use crate::inner::error::SessionResult;
use crate::inner::model::adapter_info::AdapterInfo;

pub mod btle;
#[cfg(test)]
pub(crate) mod mock;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, strum_macros::Display)]
pub enum RadioState {
    Unknown,
    PoweredOn,
    PoweredOff,
}

/// A single advertisement as seen by the adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    pub address: BDAddr,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub services: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    Advertisement(Advertisement),
    Disconnected(BDAddr),
    StateChanged(RadioState),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub characteristic_uuid: Uuid,
    pub value: Vec<u8>,
}

pub type RadioEventStream = Pin<Box<dyn Stream<Item = RadioEvent> + Send>>;
pub type NotificationStream = Pin<Box<dyn Stream<Item = Notification> + Send>>;

/// The adapter handle shared by the scanner and the connection manager.
#[async_trait]
pub trait Radio: Send + Sync + 'static {
    async fn info(&self) -> SessionResult<AdapterInfo>;

    async fn state(&self) -> SessionResult<RadioState>;

    /// Every call returns an independent stream of adapter events.
    async fn events(&self) -> SessionResult<RadioEventStream>;

    /// Empty `services` scans for everything.
    async fn start_scan(&self, services: &[Uuid]) -> SessionResult<()>;

    async fn stop_scan(&self) -> SessionResult<()>;

    /// Establishes a link and discovers its GATT table. Not bounded by any timeout.
    async fn connect(&self, address: BDAddr) -> SessionResult<Arc<dyn RadioLink>>;
}

/// An established link to a peripheral.
#[async_trait]
pub trait RadioLink: Send + Sync + 'static {
    fn address(&self) -> BDAddr;

    fn mtu(&self) -> u16;

    async fn read(&self, key: &ServiceCharacteristicKey) -> SessionResult<Vec<u8>>;

    async fn write(&self, key: &ServiceCharacteristicKey, value: &[u8], write_type: WriteType) -> SessionResult<()>;

    async fn subscribe(&self, key: &ServiceCharacteristicKey) -> SessionResult<()>;

    async fn unsubscribe(&self, key: &ServiceCharacteristicKey) -> SessionResult<()>;

    /// Notifications of all subscribed characteristics of this link.
    async fn notifications(&self) -> SessionResult<NotificationStream>;

    async fn disconnect(&self) -> SessionResult<()>;
}
