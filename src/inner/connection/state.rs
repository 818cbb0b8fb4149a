use std::sync::{Arc, Weak};

use btleplug::api::BDAddr;
use chrono::{DateTime, Utc};
use metrics::Label;
use serde::Serialize;
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::inner::error::{ErrorKind, SessionError, SessionResult};
use crate::inner::events::FanOutSender;
use crate::inner::gatt::queue::GattQueue;
use crate::inner::metrics::{CONNECTED_PERIPHERALS, CONNECTION_DURATION};
use crate::inner::model::connection_state::ConnectionState;
use crate::inner::model::peripheral::Peripheral;
use crate::inner::model::session_event::{SessionEvent, StateChange};
use crate::inner::radio::RadioLink;
use crate::inner::registry::TrackedPeripheral;

/// What callers learn about a connection.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConnectionInfo {
    pub address: BDAddr,
    pub name: Option<String>,
    pub state: ConnectionState,
    pub mtu: Option<u16>,
    pub retries: u32,
    pub connected_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub(crate) struct StateCell {
    pub(crate) state: ConnectionState,
    pub(crate) retries: u32,
    pub(crate) mtu: Option<u16>,
    /// Set when the radio reports the link lost before it could be attached.
    pub(crate) link_lost: bool,
    peripheral: Weak<TrackedPeripheral>,
    connected_at: Option<(Instant, DateTime<Utc>)>,
    pub(crate) link: Option<Arc<dyn RadioLink>>,
    pub(crate) queue: Option<Arc<GattQueue>>,
}

impl StateCell {
    /// `None` until the peripheral is sighted, and again once the registry evicts it.
    fn peripheral(&self) -> Option<Peripheral> {
        self.peripheral.upgrade().map(|tracked| tracked.snapshot())
    }

    /// Picks up a new registry record when the previous one was never sighted or has been evicted.
    pub(crate) fn track(&mut self, peripheral: Weak<TrackedPeripheral>) {
        if self.peripheral.strong_count() == 0 {
            self.peripheral = peripheral;
        }
    }
}

pub(crate) struct Connection {
    pub(crate) address: BDAddr,
    cell: Mutex<StateCell>,
    state_sender: watch::Sender<ConnectionState>,
    cancel: watch::Sender<bool>,
    events: Arc<FanOutSender<SessionEvent>>,
}

impl Connection {
    pub(crate) fn new(
        address: BDAddr,
        peripheral: Weak<TrackedPeripheral>,
        events: Arc<FanOutSender<SessionEvent>>,
    ) -> Self {
        Self {
            address,
            cell: Mutex::new(StateCell {
                peripheral,
                ..Default::default()
            }),
            state_sender: watch::channel(ConnectionState::Disconnected).0,
            cancel: watch::channel(false).0,
            events,
        }
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, StateCell> {
        self.cell.lock().await
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state_sender.borrow()
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_sender.subscribe()
    }

    pub(crate) fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once `cancel` has been called.
    pub(crate) async fn cancelled(&self) {
        let mut receiver = self.cancel.subscribe();
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }

    pub(crate) fn info(&self, cell: &StateCell) -> ConnectionInfo {
        ConnectionInfo {
            address: self.address,
            name: cell.peripheral().and_then(|peripheral| peripheral.name),
            state: cell.state,
            mtu: cell.mtu,
            retries: cell.retries,
            connected_at: cell.connected_at.map(|(_, at)| at),
        }
    }

    /// Applies a validated transition and publishes exactly one `StateChanged` for it.
    ///
    /// Leaving `Connected` fails every pending GATT operation of the link first.
    pub(crate) async fn transition(
        &self,
        cell: &mut StateCell,
        to: ConnectionState,
        error: Option<ErrorKind>,
        attempt: u32,
    ) -> SessionResult<()> {
        let from = cell.state;
        if !from.can_transition_to(to) {
            warn!(peripheral = %self.address, %from, %to, "Rejected state transition");
            return Err(SessionError::InvalidTransition {
                address: self.address,
                from,
                to,
            });
        }

        let mut connected_for = None;
        if from == ConnectionState::Connected {
            if let Some(queue) = cell.queue.take() {
                queue.fail_all().await;
            }
            if let Some((connected_at, _)) = cell.connected_at.take() {
                let elapsed = connected_at.elapsed();
                CONNECTION_DURATION.histogram(elapsed.as_millis() as f64, [Label::new("peripheral", self.address.to_string())]);
                connected_for = Some(elapsed);
            }
            cell.mtu = None;
            CONNECTED_PERIPHERALS.adjust(-1.0, Vec::<Label>::new());
        }
        if to == ConnectionState::Connected {
            cell.connected_at = Some((Instant::now(), Utc::now()));
            CONNECTED_PERIPHERALS.adjust(1.0, Vec::<Label>::new());
        }

        cell.state = to;
        self.state_sender.send_replace(to);

        let change = StateChange {
            address: self.address,
            from,
            to,
            error,
            attempt,
            connected_for,
            at: Utc::now(),
        };
        info!(%change, "Connection state changed");
        self.events.send(SessionEvent::StateChanged(change)).await;
        Ok(())
    }

    /// Installs a freshly established link and its operation queue.
    pub(crate) async fn attach(
        &self,
        cell: &mut StateCell,
        link: Arc<dyn RadioLink>,
        queue: GattQueue,
        peripheral: Weak<TrackedPeripheral>,
        attempt: u32,
    ) -> SessionResult<()> {
        cell.track(peripheral);
        cell.mtu = Some(link.mtu());
        cell.link = Some(link);
        cell.queue = Some(Arc::new(queue));
        self.transition(cell, ConnectionState::Connected, None, attempt).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn connection() -> (Connection, Arc<FanOutSender<SessionEvent>>) {
        let events = Arc::new(FanOutSender::default());
        let address = BDAddr::from([0xAA, 0, 0, 0, 0, 1]);
        (Connection::new(address, Weak::new(), events.clone()), events)
    }

    #[tokio::test]
    async fn rejects_invalid_transition_without_event() {
        let (connection, events) = connection();
        let receiver = events.subscribe().await;
        let mut cell = connection.lock().await;

        let error = connection
            .transition(&mut cell, ConnectionState::Connected, None, 1)
            .await
            .unwrap_err();
        assert!(matches!(error, SessionError::InvalidTransition { .. }));
        assert_eq!(cell.state, ConnectionState::Disconnected);
        assert!(receiver.try_recv().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn reports_connected_duration_when_leaving_connected() {
        let (connection, events) = connection();
        let receiver = events.subscribe().await;
        let mut state = connection.watch_state();
        let mut cell = connection.lock().await;

        connection
            .transition(&mut cell, ConnectionState::Connecting, None, 1)
            .await
            .unwrap();
        connection
            .transition(&mut cell, ConnectionState::Connected, None, 1)
            .await
            .unwrap();
        assert!(cell.connected_at.is_some());
        assert_eq!(*state.borrow_and_update(), ConnectionState::Connected);

        tokio::time::sleep(Duration::from_secs(63)).await;
        connection
            .transition(&mut cell, ConnectionState::Disconnected, Some(ErrorKind::LinkLost), 0)
            .await
            .unwrap();
        assert_eq!(connection.info(&cell).connected_at, None);

        let mut changes = vec![];
        while let Ok(Some(SessionEvent::StateChanged(change))) = receiver.try_recv() {
            changes.push(change);
        }
        assert_eq!(changes.len(), 3);
        assert_eq!(changes[1].connected_for, None);
        assert_eq!(changes[2].connected_for, Some(Duration::from_secs(63)));
        assert_eq!(changes[2].error, Some(ErrorKind::LinkLost));
    }
}
