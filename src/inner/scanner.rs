use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{Stream, StreamExt};
use metrics::Label;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::inner::conf::model::session_conf::SessionConf;
use crate::inner::conf::traits::Evaluate;
use crate::inner::debounce_limiter::DebounceLimiter;
use crate::inner::error::{ErrorKind, SessionError, SessionResult};
use crate::inner::events::FanOutSender;
use crate::inner::metrics::{REGISTRY_EVICTED, SIGHTING_COUNT, SIGHTING_THROTTLED_COUNT};
use crate::inner::model::peripheral::Peripheral;
use crate::inner::model::scan_filters::ScanFilters;
use crate::inner::model::session_event::{ScanCompletion, SessionEvent};
use crate::inner::radio::{Advertisement, Radio, RadioEvent, RadioEventStream, RadioState};
use crate::inner::registry::DeviceRegistry;

#[derive(Debug, Clone, PartialEq)]
pub enum ScanUpdate {
    Sighting(Peripheral),
    Completed(ScanCompletion),
}

/// Sightings of one scan; always ends with `Completed`.
pub struct ScanSession {
    receiver: mpsc::UnboundedReceiver<ScanUpdate>,
}

impl ScanSession {
    pub async fn recv(&mut self) -> Option<ScanUpdate> {
        self.receiver.recv().await
    }

    pub fn into_stream(self) -> impl Stream<Item = ScanUpdate> + Send {
        futures_util::stream::unfold(self, |mut session| async move {
            let update = session.recv().await?;
            Some((update, session))
        })
    }
}

struct ActiveScan {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ActiveScan {
    async fn stop(self) {
        let _ = self.stop.send(());
        if let Err(error) = self.task.await {
            warn!(?error, "Scan task failed");
        }
    }
}

struct ScanContext {
    radio: Arc<dyn Radio>,
    registry: Arc<DeviceRegistry>,
    events: Arc<FanOutSender<SessionEvent>>,
    filters: ScanFilters,
    limiter: DebounceLimiter<btleplug::api::BDAddr>,
    updates: mpsc::UnboundedSender<ScanUpdate>,
}

pub struct Scanner {
    radio: Arc<dyn Radio>,
    registry: Arc<DeviceRegistry>,
    events: Arc<FanOutSender<SessionEvent>>,
    conf: Arc<SessionConf>,
    active: Mutex<Option<ActiveScan>>,
}

impl Drop for Scanner {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            active.task.abort();
        }
    }
}

impl Scanner {
    pub(crate) fn new(
        radio: Arc<dyn Radio>,
        registry: Arc<DeviceRegistry>,
        events: Arc<FanOutSender<SessionEvent>>,
        conf: Arc<SessionConf>,
    ) -> Self {
        Self {
            radio,
            registry,
            events,
            conf,
            active: Mutex::new(None),
        }
    }

    /// Starts a scan, stopping the running one first.
    #[tracing::instrument(level = "info", skip(self), err)]
    pub async fn start_scan(&self, filters: ScanFilters, timeout: Option<Duration>) -> SessionResult<ScanSession> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            info!("Stopping the previous scan");
            previous.stop().await;
        }

        if self.radio.state().await? == RadioState::PoweredOff {
            return Err(SessionError::RadioUnavailable("Adapter is powered off".to_string()));
        }

        let radio_events = self.radio.events().await?;
        self.radio.start_scan(&filters.services).await?;

        let timeout = timeout.unwrap_or(self.conf.default_scan_timeout);
        let (updates, receiver) = mpsc::unbounded_channel();
        let (stop, stop_receiver) = oneshot::channel();
        let context = ScanContext {
            radio: self.radio.clone(),
            registry: self.registry.clone(),
            events: self.events.clone(),
            limiter: DebounceLimiter::new(self.conf.sighting_throttling),
            filters,
            updates,
        };
        let evict_period = (self.conf.staleness_timeout / 2).max(Duration::from_millis(100));

        let task = tokio::spawn(
            context
                .run(radio_events, Instant::now() + timeout, evict_period, stop_receiver)
                .instrument(info_span!("scan", ?timeout)),
        );
        *active = Some(ActiveScan { stop, task });

        Ok(ScanSession { receiver })
    }

    /// A no-op when nothing is being scanned.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn stop_scan(&self) -> SessionResult<()> {
        if let Some(active) = self.active.lock().await.take() {
            active.stop().await;
        }
        Ok(())
    }
}

impl ScanContext {
    async fn run(
        self,
        mut radio_events: RadioEventStream,
        deadline: Instant,
        evict_period: Duration,
        mut stop: oneshot::Receiver<()>,
    ) {
        let timeout = tokio::time::sleep_until(deadline);
        tokio::pin!(timeout);
        let mut evict = tokio::time::interval(evict_period);

        let completion = loop {
            tokio::select! {
                biased;
                _ = &mut stop => break ScanCompletion::Stopped,
                _ = &mut timeout => break ScanCompletion::TimedOut,
                _ = evict.tick() => {
                    let evicted = self.registry.evict_stale(Instant::now());
                    if !evicted.is_empty() {
                        REGISTRY_EVICTED.increment(evicted.len() as u64, Vec::<Label>::new());
                    }
                }
                event = radio_events.next() => match event {
                    Some(RadioEvent::Advertisement(advertisement)) => self.handle_advertisement(advertisement).await,
                    Some(RadioEvent::StateChanged(RadioState::PoweredOff)) | None => {
                        break ScanCompletion::Failed(ErrorKind::RadioUnavailable)
                    }
                    Some(_) => {}
                },
            }
        };

        if let Err(error) = self.radio.stop_scan().await {
            warn!(%error, "Failed to stop scanning");
        }
        info!(?completion, "Scan completed");
        let _ = self.updates.send(ScanUpdate::Completed(completion));
        self.events.send(SessionEvent::ScanCompleted(completion)).await;
    }

    async fn handle_advertisement(&self, advertisement: Advertisement) {
        let known = self.registry.get(&advertisement.address);
        let sighting = Peripheral {
            address: advertisement.address,
            name: advertisement
                .name
                .or_else(|| known.as_ref().and_then(|peripheral| peripheral.name.clone())),
            rssi: advertisement.rssi,
            services: if advertisement.services.is_empty() {
                known.map(|peripheral| peripheral.services).unwrap_or_default()
            } else {
                advertisement.services
            },
            last_seen: Instant::now(),
            seen_at: Utc::now(),
        };
        if !self.filters.evaluate(&sighting) {
            return;
        }

        let labels = [Label::new("peripheral", sighting.address.to_string())];
        SIGHTING_COUNT.increment(1, labels.clone());
        let peripheral = self.registry.upsert(sighting);
        let _ = self.updates.send(ScanUpdate::Sighting(peripheral.clone()));

        if self.limiter.throttle(peripheral.address).await {
            debug!(%peripheral, "Throttled sighting");
            SIGHTING_THROTTLED_COUNT.increment(1, labels);
            return;
        }
        self.events.send(SessionEvent::Sighting(peripheral)).await;
    }
}
