use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use btleplug::api::BDAddr;
use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info_span, warn, Instrument, Span};

use crate::inner::conf::model::service_characteristic_key::ServiceCharacteristicKey;
use crate::inner::error::{SessionError, SessionResult};
use crate::inner::events::FanOutSender;
use crate::inner::gatt::{GattOperation, GattOperationKind, OperationHandle, Subscription};
use crate::inner::metrics::measure_execution_time::Measure;
use crate::inner::metrics::{GATT_OPERATION_DURATION, GATT_OPERATION_TIMEOUTS};
use crate::inner::model::characteristic_payload::CharacteristicPayload;
use crate::inner::model::fqcn::Fqcn;
use crate::inner::model::session_event::SessionEvent;
use crate::inner::radio::{NotificationStream, RadioLink};

type SubscriberSender = mpsc::UnboundedSender<SessionResult<Arc<CharacteristicPayload>>>;

struct QueuedOperation {
    operation: GattOperation,
    responder: oneshot::Sender<SessionResult<Vec<u8>>>,
}

#[derive(Default)]
struct Subscribers {
    next_id: AtomicU64,
    by_key: Mutex<HashMap<ServiceCharacteristicKey, Vec<(u64, SubscriberSender)>>>,
}

impl Subscribers {
    fn add(&self, key: ServiceCharacteristicKey, sender: SubscriberSender) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().entry(key).or_default().push((id, sender));
        id
    }

    fn remove(&self, key: &ServiceCharacteristicKey, id: u64) {
        if let Some(senders) = self.lock().get_mut(key) {
            senders.retain(|(existing, _)| *existing != id);
        }
    }

    fn remove_key(&self, key: &ServiceCharacteristicKey) {
        self.lock().remove(key);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ServiceCharacteristicKey, Vec<(u64, SubscriberSender)>>> {
        self.by_key.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Executes GATT operations of one connection strictly one after another.
pub(crate) struct GattQueue {
    address: BDAddr,
    sender: mpsc::UnboundedSender<QueuedOperation>,
    shutdown: watch::Sender<bool>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    pump: JoinHandle<()>,
    subscribers: Arc<Subscribers>,
}

impl Drop for GattQueue {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        self.pump.abort();
    }
}

impl GattQueue {
    pub(crate) async fn start(
        link: Arc<dyn RadioLink>,
        events: Arc<FanOutSender<SessionEvent>>,
        default_timeout: Duration,
    ) -> SessionResult<Self> {
        let address = link.address();
        let notifications = link.notifications().await?;
        let subscribers = Arc::new(Subscribers::default());
        let (sender, receiver) = mpsc::unbounded_channel();
        let (shutdown, shutdown_receiver) = watch::channel(false);

        let span = info_span!("gatt_queue", peripheral = %address);
        let worker = tokio::spawn(
            run_worker(link, receiver, shutdown_receiver, default_timeout).instrument(span.clone()),
        );
        let pump = tokio::spawn(pump_notifications(address, notifications, subscribers.clone(), events).instrument(span));

        Ok(Self {
            address,
            sender,
            shutdown,
            worker: tokio::sync::Mutex::new(Some(worker)),
            pump,
            subscribers,
        })
    }

    /// Operations enqueued after the queue has failed resolve to `ConnectionLost`.
    pub(crate) fn enqueue(&self, operation: GattOperation) -> OperationHandle {
        let (responder, receiver) = oneshot::channel();
        if let Err(error) = self.sender.send(QueuedOperation { operation, responder }) {
            let _ = error.0.responder.send(Err(SessionError::ConnectionLost));
        }
        OperationHandle::new(receiver)
    }

    pub(crate) async fn subscribe(&self, target: ServiceCharacteristicKey, timeout: Option<Duration>) -> SessionResult<Subscription> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.subscribers.add(target, sender);

        let mut operation = GattOperation::subscribe(target);
        operation.timeout = timeout;
        if let Err(error) = self.enqueue(operation).await {
            self.subscribers.remove(&target, id);
            return Err(error);
        }
        Ok(Subscription::new(target, receiver))
    }

    /// Ends every subscription of `target`.
    pub(crate) async fn unsubscribe(&self, target: ServiceCharacteristicKey, timeout: Option<Duration>) -> SessionResult<()> {
        let mut operation = GattOperation::unsubscribe(target);
        operation.timeout = timeout;
        self.enqueue(operation).await?;
        self.subscribers.remove_key(&target);
        Ok(())
    }

    /// Fails the in-flight and all queued operations and ends every subscription with `ConnectionLost`.
    pub(crate) async fn fail_all(&self) {
        self.shutdown.send_replace(true);
        if let Some(worker) = self.worker.lock().await.take() {
            if let Err(error) = worker.await {
                warn!(peripheral = %self.address, ?error, "GATT worker failed");
            }
        }
        self.pump.abort();

        let subscribers = std::mem::take(&mut *self.subscribers.lock());
        for sender in subscribers.into_values().flatten().map(|(_, sender)| sender) {
            let _ = sender.send(Err(SessionError::ConnectionLost));
        }
    }
}

async fn run_worker(
    link: Arc<dyn RadioLink>,
    mut receiver: mpsc::UnboundedReceiver<QueuedOperation>,
    mut shutdown: watch::Receiver<bool>,
    default_timeout: Duration,
) {
    loop {
        let queued = tokio::select! {
            biased;
            _ = shutdown.wait_for(|stop| *stop) => break,
            queued = receiver.recv() => match queued {
                Some(queued) => queued,
                None => break,
            },
        };

        let QueuedOperation { operation, responder } = queued;
        let operation_timeout = operation.timeout.unwrap_or(default_timeout);
        let labels = vec![
            metrics::Label::new("peripheral", link.address().to_string()),
            metrics::Label::new("operation", operation.kind.to_string()),
        ];
        let execution = timeout(operation_timeout, execute(link.as_ref(), &operation)).measure_execution_time(
            &GATT_OPERATION_DURATION,
            labels.clone(),
            Span::current(),
        );

        let result = tokio::select! {
            biased;
            _ = shutdown.wait_for(|stop| *stop) => {
                let _ = responder.send(Err(SessionError::ConnectionLost));
                break;
            }
            result = execution => match result {
                Ok(result) => result,
                Err(_) => {
                    warn!(kind = %operation.kind, target = %operation.target, ?operation_timeout, "GATT operation timed out");
                    GATT_OPERATION_TIMEOUTS.increment(1, labels);
                    Err(SessionError::OperationTimedOut(operation_timeout))
                }
            },
        };
        let _ = responder.send(result);
    }

    receiver.close();
    while let Ok(queued) = receiver.try_recv() {
        let _ = queued.responder.send(Err(SessionError::ConnectionLost));
    }
    debug!("GATT worker stopped");
}

async fn execute(link: &dyn RadioLink, operation: &GattOperation) -> SessionResult<Vec<u8>> {
    let target = &operation.target;
    match operation.kind {
        GattOperationKind::Read => link.read(target).await,
        GattOperationKind::Write => {
            link.write(target, &operation.payload, operation.write_type).await?;
            Ok(vec![])
        }
        GattOperationKind::Subscribe => {
            link.subscribe(target).await?;
            Ok(vec![])
        }
        GattOperationKind::Unsubscribe => {
            link.unsubscribe(target).await?;
            Ok(vec![])
        }
    }
}

async fn pump_notifications(
    address: BDAddr,
    mut notifications: NotificationStream,
    subscribers: Arc<Subscribers>,
    events: Arc<FanOutSender<SessionEvent>>,
) {
    while let Some(notification) = notifications.next().await {
        let mut payloads = vec![];
        {
            let mut by_key = subscribers.lock();
            for (key, senders) in by_key
                .iter_mut()
                .filter(|(key, _)| key.characteristic_uuid == notification.characteristic_uuid)
            {
                let fqcn = Arc::new(Fqcn::new(address, key));
                let payload = Arc::new(CharacteristicPayload::new(fqcn, notification.value.clone()));
                senders.retain(|(_, sender)| sender.send(Ok(payload.clone())).is_ok());
                payloads.push(payload);
            }
        }

        for payload in payloads {
            events.send(SessionEvent::ValueUpdated(payload)).await;
        }
    }
    debug!("Notification stream ended");
}
