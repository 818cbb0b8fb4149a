use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use btleplug::api::BDAddr;
use kanal::AsyncReceiver;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use crate::inner::conf::dto::known_device::KnownDeviceDto;
use crate::inner::conf::model::service_characteristic_key::ServiceCharacteristicKey;
use crate::inner::conf::model::session_conf::SessionConf;
use crate::inner::connection::state::ConnectionInfo;
use crate::inner::connection::KnownDeviceConnection;
use crate::inner::dto::{ReadCommandDto, ResultDto, WriteCommandDto};
use crate::inner::error::SessionResult;
use crate::inner::model::adapter_info::AdapterInfo;
use crate::inner::model::connection_state::ConnectionState;
use crate::inner::model::peripheral::Peripheral;
use crate::inner::model::scan_filters::ScanFilters;
use crate::inner::model::session_event::SessionEvent;
use crate::inner::radio::Radio;
use crate::inner::session::Session;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize, strum_macros::Display)]
pub enum Profile {
    Classic,
    LowEnergy,
}

type SubscriptionKey = (BDAddr, ServiceCharacteristicKey);

/// Host facing handle of one radio profile. Every call settles into a `ResultDto`.
pub struct ProfileModule {
    profile: Profile,
    session: Session,
    subscriptions: Mutex<HashMap<SubscriptionKey, JoinHandle<()>>>,
}

impl Drop for ProfileModule {
    fn drop(&mut self) {
        for (_, task) in self.subscriptions.get_mut().drain() {
            task.abort();
        }
    }
}

impl ProfileModule {
    pub async fn new(profile: Profile, radio: Arc<dyn Radio>, conf: SessionConf) -> SessionResult<Self> {
        Ok(Self {
            profile,
            session: Session::new(radio, conf).await?,
            subscriptions: Default::default(),
        })
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub async fn adapter_info(&self) -> ResultDto<AdapterInfo> {
        self.session.adapter_info().await.into()
    }

    pub async fn add_known_devices(&self, known_devices: Vec<KnownDeviceDto>) -> ResultDto<()> {
        self.session.add_known_devices(known_devices).await.into()
    }

    /// Sightings are delivered through `events()`.
    pub async fn start_scan(&self, filters: ScanFilters, timeout: Option<Duration>) -> ResultDto<()> {
        self.session.scan(filters, timeout).await.map(|_| ()).into()
    }

    pub async fn stop_scan(&self) -> ResultDto<()> {
        self.session.stop_scan().await.into()
    }

    pub async fn connect(&self, address: BDAddr) -> ResultDto<ConnectionInfo> {
        self.session.connect(address).await.into()
    }

    pub async fn connect_known(&self) -> ResultDto<KnownDeviceConnection> {
        self.session.connect_known().await.into()
    }

    pub async fn read(&self, command: ReadCommandDto) -> ResultDto<Vec<u8>> {
        self.session
            .execute(command.peripheral_address, (&command).into())
            .await
            .into()
    }

    pub async fn write(&self, command: WriteCommandDto) -> ResultDto<()> {
        self.session
            .execute(command.peripheral_address, (&command).into())
            .await
            .map(|_| ())
            .into()
    }

    pub async fn write_text(
        &self,
        address: BDAddr,
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
        message: &str,
    ) -> ResultDto<()> {
        let target = ServiceCharacteristicKey::new(service_uuid, characteristic_uuid);
        self.session.write_text(address, target, message).await.into()
    }

    /// Values are delivered through `events()` until `unsubscribe` or the connection ends.
    pub async fn subscribe(&self, address: BDAddr, target: ServiceCharacteristicKey) -> ResultDto<()> {
        let mut subscription = match self.session.subscribe(address, target).await {
            Ok(subscription) => subscription,
            Err(error) => return error.into(),
        };

        let span = info_span!("host_subscription", profile = %self.profile, peripheral = %address, %target);
        let task = tokio::spawn(
            async move {
                while let Some(update) = subscription.recv().await {
                    if let Err(error) = update {
                        warn!(%error, "Subscription ended");
                    }
                }
                debug!("Subscription closed");
            }
            .instrument(span),
        );

        if let Some(previous) = self.subscriptions.lock().await.insert((address, target), task) {
            previous.abort();
        }
        ResultDto::Ok { data: () }
    }

    pub async fn unsubscribe(&self, address: BDAddr, target: ServiceCharacteristicKey) -> ResultDto<()> {
        let result = self.session.unsubscribe(address, target).await;
        if let Some(task) = self.subscriptions.lock().await.remove(&(address, target)) {
            task.abort();
        }
        result.into()
    }

    pub async fn disconnect(&self, address: BDAddr) -> ResultDto<()> {
        let result = self.session.disconnect(address).await;
        self.subscriptions.lock().await.retain(|(subscribed, _), task| {
            let keep = *subscribed != address;
            if !keep {
                task.abort();
            }
            keep
        });
        result.into()
    }

    pub fn devices(&self, filters: &ScanFilters) -> ResultDto<Vec<Peripheral>> {
        ResultDto::Ok {
            data: self.session.devices(filters),
        }
    }

    pub fn connection_state(&self, address: &BDAddr) -> ConnectionState {
        self.session.connection_state(address)
    }

    pub async fn events(&self) -> AsyncReceiver<SessionEvent> {
        self.session.events().await
    }
}

/// The two long-lived handles a host obtains at startup.
pub struct HostModules {
    pub classic: ProfileModule,
    pub low_energy: ProfileModule,
}

impl HostModules {
    pub async fn new(classic_radio: Arc<dyn Radio>, le_radio: Arc<dyn Radio>, conf: SessionConf) -> SessionResult<Self> {
        Ok(Self {
            classic: ProfileModule::new(Profile::Classic, classic_radio, conf.clone()).await?,
            low_energy: ProfileModule::new(Profile::LowEnergy, le_radio, conf).await?,
        })
    }

    pub fn module(&self, profile: Profile) -> &ProfileModule {
        match profile {
            Profile::Classic => &self.classic,
            Profile::LowEnergy => &self.low_energy,
        }
    }
}
