use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{BDAddr, WriteType};
use futures_util::stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use uuid::Uuid;

use crate::inner::conf::model::service_characteristic_key::ServiceCharacteristicKey;
use crate::inner::error::{SessionError, SessionResult};
use crate::inner::model::adapter_info::AdapterInfo;
use crate::inner::radio::{
    Advertisement, Notification, NotificationStream, Radio, RadioEvent, RadioEventStream, RadioLink, RadioState,
};

fn broadcast_stream<T: Clone + Send + 'static>(
    receiver: broadcast::Receiver<T>,
) -> impl futures_util::Stream<Item = T> + Send {
    stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(value) => return Some((value, receiver)),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

#[derive(Debug, Clone)]
pub(crate) struct MockDevice {
    pub(crate) reachable: bool,
    pub(crate) connect_delay: Duration,
    pub(crate) op_delay: Duration,
    pub(crate) mtu: u16,
    pub(crate) values: HashMap<ServiceCharacteristicKey, Vec<u8>>,
    /// Connects whose link is reported lost right after it is established.
    pub(crate) lost_on_connect: usize,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self {
            reachable: true,
            connect_delay: Duration::ZERO,
            op_delay: Duration::ZERO,
            mtu: 247,
            values: HashMap::new(),
            lost_on_connect: 0,
        }
    }
}

impl MockDevice {
    pub(crate) fn with_characteristic(mut self, key: ServiceCharacteristicKey, value: &[u8]) -> Self {
        self.values.insert(key, value.to_vec());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OperationRecord {
    pub(crate) kind: &'static str,
    pub(crate) key: ServiceCharacteristicKey,
    pub(crate) started_at: Instant,
    pub(crate) finished_at: Instant,
}

struct MockState {
    radio_state: RadioState,
    permission_denied: bool,
    scanning: Option<Vec<Uuid>>,
    devices: HashMap<BDAddr, MockDevice>,
    connect_attempts: HashMap<BDAddr, Vec<Instant>>,
    links: HashMap<BDAddr, Arc<MockLink>>,
}

/// An in-memory adapter driven by the test.
pub(crate) struct MockRadio {
    state: Mutex<MockState>,
    events: broadcast::Sender<RadioEvent>,
}

impl Default for MockRadio {
    fn default() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            state: Mutex::new(MockState {
                radio_state: RadioState::PoweredOn,
                permission_denied: false,
                scanning: None,
                devices: HashMap::new(),
                connect_attempts: HashMap::new(),
                links: HashMap::new(),
            }),
            events,
        }
    }
}

impl MockRadio {
    pub(crate) fn add_device(&self, address: BDAddr, device: MockDevice) {
        self.state.lock().unwrap().devices.insert(address, device);
    }

    pub(crate) fn set_reachable(&self, address: BDAddr, reachable: bool) {
        if let Some(device) = self.state.lock().unwrap().devices.get_mut(&address) {
            device.reachable = reachable;
        }
    }

    pub(crate) fn set_radio_state(&self, radio_state: RadioState) {
        self.state.lock().unwrap().radio_state = radio_state;
        let _ = self.events.send(RadioEvent::StateChanged(radio_state));
    }

    pub(crate) fn deny_permission(&self) {
        self.state.lock().unwrap().permission_denied = true;
    }

    pub(crate) fn scanning(&self) -> Option<Vec<Uuid>> {
        self.state.lock().unwrap().scanning.clone()
    }

    pub(crate) fn advertise(&self, address: BDAddr, name: Option<&str>, rssi: i16, services: Vec<Uuid>) {
        let _ = self.events.send(RadioEvent::Advertisement(Advertisement {
            address,
            name: name.map(str::to_string),
            rssi: Some(rssi),
            services,
        }));
    }

    pub(crate) fn connect_attempts(&self, address: BDAddr) -> Vec<Instant> {
        self.state
            .lock()
            .unwrap()
            .connect_attempts
            .get(&address)
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn link(&self, address: BDAddr) -> Option<Arc<MockLink>> {
        self.state.lock().unwrap().links.get(&address).cloned()
    }

    /// The next connect succeeds, but the radio reports the link lost before `connect` returns.
    pub(crate) fn lose_next_connect(&self, address: BDAddr) {
        if let Some(device) = self.state.lock().unwrap().devices.get_mut(&address) {
            device.lost_on_connect += 1;
        }
    }

    /// Simulates the peripheral going out of range.
    pub(crate) fn drop_link(&self, address: BDAddr) {
        if let Some(link) = self.state.lock().unwrap().links.remove(&address) {
            link.close();
        }
        let _ = self.events.send(RadioEvent::Disconnected(address));
    }
}

#[async_trait]
impl Radio for MockRadio {
    async fn info(&self) -> SessionResult<AdapterInfo> {
        Ok(AdapterInfo::try_from("mock0 (virtual)".to_string())?)
    }

    async fn state(&self) -> SessionResult<RadioState> {
        Ok(self.state.lock().unwrap().radio_state)
    }

    async fn events(&self) -> SessionResult<RadioEventStream> {
        Ok(Box::pin(broadcast_stream(self.events.subscribe())))
    }

    async fn start_scan(&self, services: &[Uuid]) -> SessionResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.permission_denied {
            return Err(SessionError::PermissionDenied);
        }
        state.scanning = Some(services.to_vec());
        Ok(())
    }

    async fn stop_scan(&self) -> SessionResult<()> {
        self.state.lock().unwrap().scanning = None;
        Ok(())
    }

    async fn connect(&self, address: BDAddr) -> SessionResult<Arc<dyn RadioLink>> {
        let device = {
            let mut state = self.state.lock().unwrap();
            state.connect_attempts.entry(address).or_default().push(Instant::now());
            if state.radio_state != RadioState::PoweredOn {
                return Err(SessionError::RadioUnavailable(state.radio_state.to_string()));
            }
            if state.permission_denied {
                return Err(SessionError::PermissionDenied);
            }
            state.devices.get(&address).cloned()
        };

        let Some(device) = device else {
            return Err(SessionError::ConnectFailed(address, "Unknown peripheral".to_string()));
        };
        tokio::time::sleep(device.connect_delay).await;
        if !device.reachable {
            return Err(SessionError::ConnectFailed(address, "Unreachable".to_string()));
        }

        let link = Arc::new(MockLink::new(address, &device));
        let lost = {
            let mut state = self.state.lock().unwrap();
            state.links.insert(address, link.clone());
            match state.devices.get_mut(&address) {
                Some(device) if device.lost_on_connect > 0 => {
                    device.lost_on_connect -= 1;
                    true
                }
                _ => false,
            }
        };
        if lost {
            let _ = self.events.send(RadioEvent::Disconnected(address));
            // Lets the link monitor observe the loss first.
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Ok(link)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) struct MockLink {
    address: BDAddr,
    mtu: u16,
    op_delay: Duration,
    op_delays: Mutex<HashMap<ServiceCharacteristicKey, Duration>>,
    values: Mutex<HashMap<ServiceCharacteristicKey, Vec<u8>>>,
    subscribed: Mutex<HashSet<ServiceCharacteristicKey>>,
    connected: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    disconnect_calls: AtomicUsize,
    log: Mutex<Vec<OperationRecord>>,
    notifications: Mutex<Option<broadcast::Sender<Notification>>>,
}

impl MockLink {
    fn new(address: BDAddr, device: &MockDevice) -> Self {
        let (notifications, _) = broadcast::channel(1024);
        Self {
            address,
            mtu: device.mtu,
            op_delay: device.op_delay,
            op_delays: Mutex::new(HashMap::new()),
            values: Mutex::new(device.values.clone()),
            subscribed: Mutex::new(HashSet::new()),
            connected: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            log: Mutex::new(vec![]),
            notifications: Mutex::new(Some(notifications)),
        }
    }

    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.notifications.lock().unwrap().take();
    }

    pub(crate) fn set_op_delay(&self, key: ServiceCharacteristicKey, delay: Duration) {
        self.op_delays.lock().unwrap().insert(key, delay);
    }

    pub(crate) fn value(&self, key: &ServiceCharacteristicKey) -> Option<Vec<u8>> {
        self.values.lock().unwrap().get(key).cloned()
    }

    pub(crate) fn is_subscribed(&self, key: &ServiceCharacteristicKey) -> bool {
        self.subscribed.lock().unwrap().contains(key)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn log(&self) -> Vec<OperationRecord> {
        self.log.lock().unwrap().clone()
    }

    /// Delivered only for subscribed characteristics.
    pub(crate) fn notify(&self, key: &ServiceCharacteristicKey, value: &[u8]) -> bool {
        if !self.is_subscribed(key) {
            return false;
        }
        let notifications = self.notifications.lock().unwrap();
        let Some(sender) = notifications.as_ref() else {
            return false;
        };
        sender
            .send(Notification {
                characteristic_uuid: key.characteristic_uuid,
                value: value.to_vec(),
            })
            .is_ok()
    }

    async fn perform(&self, kind: &'static str, key: &ServiceCharacteristicKey) -> SessionResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SessionError::ConnectionLost);
        }
        if !self.values.lock().unwrap().contains_key(key) {
            return Err(SessionError::InvalidCharacteristic(key.to_string()));
        }

        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let started_at = Instant::now();
        let delay = self.op_delays.lock().unwrap().get(key).copied().unwrap_or(self.op_delay);
        tokio::time::sleep(delay).await;

        if !self.connected.load(Ordering::SeqCst) {
            return Err(SessionError::ConnectionLost);
        }
        self.log.lock().unwrap().push(OperationRecord {
            kind,
            key: *key,
            started_at,
            finished_at: Instant::now(),
        });
        Ok(())
    }
}

#[async_trait]
impl RadioLink for MockLink {
    fn address(&self) -> BDAddr {
        self.address
    }

    fn mtu(&self) -> u16 {
        self.mtu
    }

    async fn read(&self, key: &ServiceCharacteristicKey) -> SessionResult<Vec<u8>> {
        self.perform("read", key).await?;
        Ok(self.value(key).unwrap_or_default())
    }

    async fn write(&self, key: &ServiceCharacteristicKey, value: &[u8], _write_type: WriteType) -> SessionResult<()> {
        self.perform("write", key).await?;
        self.values.lock().unwrap().insert(*key, value.to_vec());
        Ok(())
    }

    async fn subscribe(&self, key: &ServiceCharacteristicKey) -> SessionResult<()> {
        self.perform("subscribe", key).await?;
        self.subscribed.lock().unwrap().insert(*key);
        Ok(())
    }

    async fn unsubscribe(&self, key: &ServiceCharacteristicKey) -> SessionResult<()> {
        self.perform("unsubscribe", key).await?;
        self.subscribed.lock().unwrap().remove(key);
        Ok(())
    }

    async fn notifications(&self) -> SessionResult<NotificationStream> {
        let notifications = self.notifications.lock().unwrap();
        let Some(sender) = notifications.as_ref() else {
            return Err(SessionError::ConnectionLost);
        };
        Ok(Box::pin(broadcast_stream(sender.subscribe())))
    }

    async fn disconnect(&self) -> SessionResult<()> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.close();
        Ok(())
    }
}
