use std::sync::Arc;

use btleplug::api::BDAddr;
use metrics::Label;
use tokio::time::timeout;
use tracing::{debug, info, warn, Span};

use crate::inner::connection::state::{Connection, ConnectionInfo, StateCell};
use crate::inner::connection::{ConnectionManager, KnownDeviceConnection};
use crate::inner::error::{ErrorKind, SessionError, SessionResult};
use crate::inner::gatt::queue::GattQueue;
use crate::inner::metrics::measure_execution_time::Measure;
use crate::inner::metrics::{CONNECTING_DURATION, CONNECTING_ERRORS, CONNECT_ATTEMPTS};
use crate::inner::model::connection_state::ConnectionState;
use crate::inner::model::scan_filters::ScanFilters;
use crate::inner::radio::RadioLink;

pub(super) fn cancelled(address: BDAddr) -> SessionError {
    SessionError::ConnectFailed(address, "Cancelled by disconnect".to_string())
}

/// Rejects a link the radio reported lost between connecting and attaching.
pub(super) async fn verify_established(
    cell: &StateCell,
    address: BDAddr,
    outcome: SessionResult<(Arc<dyn RadioLink>, GattQueue)>,
) -> SessionResult<(Arc<dyn RadioLink>, GattQueue)> {
    match outcome {
        Ok((link, queue)) if cell.link_lost => {
            drop(queue);
            release(link).await;
            Err(SessionError::ConnectFailed(address, "Link lost while connecting".to_string()))
        }
        outcome => outcome,
    }
}

fn peripheral_labels(address: BDAddr) -> Vec<Label> {
    vec![Label::new("peripheral", address.to_string())]
}

impl ConnectionManager {
    /// Connects or returns the existing connection; concurrent calls for one device are serialized.
    #[tracing::instrument(level = "info", skip(self), err)]
    pub async fn connect(&self, address: BDAddr) -> SessionResult<ConnectionInfo> {
        loop {
            let guard = self.connect_lock.lock_for(address).await;
            let connection = self.get_or_create(address);

            match connection.state() {
                ConnectionState::Connected => {
                    let cell = connection.lock().await;
                    return Ok(connection.info(&cell));
                }
                ConnectionState::Disconnected => {
                    let result = self
                        .connect_cycle(connection)
                        .measure_execution_time(&CONNECTING_DURATION, peripheral_labels(address), Span::current())
                        .await;
                    drop(guard);
                    return result;
                }
                ConnectionState::Reconnecting => {
                    drop(guard);
                    let mut state = connection.watch_state();
                    let _ = state
                        .wait_for(|state| matches!(state, ConnectionState::Connected | ConnectionState::Disconnected))
                        .await;

                    let cell = connection.lock().await;
                    if cell.state == ConnectionState::Connected {
                        return Ok(connection.info(&cell));
                    }
                    if connection.is_cancelled() {
                        return Err(cancelled(address));
                    }
                    return Err(SessionError::ConnectExhausted {
                        address,
                        attempts: cell.retries,
                    });
                }
                ConnectionState::Connecting | ConnectionState::Disconnecting => {
                    drop(guard);
                    debug!(state = %connection.state(), "Waiting for the connection to settle");
                    let mut state = connection.watch_state();
                    let _ = state
                        .wait_for(|state| matches!(state, ConnectionState::Connected | ConnectionState::Disconnected))
                        .await;
                    self.forget(&connection);
                }
            }
        }
    }

    /// Connects to the most recently seen registry peripheral matching a known device profile.
    #[tracing::instrument(level = "info", skip(self), err)]
    pub async fn connect_known(&self) -> SessionResult<KnownDeviceConnection> {
        let mut candidates = self.registry.list(&ScanFilters::default());
        candidates.sort_by(|left, right| right.last_seen.cmp(&left.last_seen));

        for peripheral in candidates {
            let Some(device) = self.configuration_manager.get_matching_config(&peripheral).await else {
                continue;
            };
            info!(%peripheral, device = %device.name, "Found known device");
            let info = self.connect(peripheral.address).await?;
            return Ok(KnownDeviceConnection { device, info });
        }

        Err(SessionError::NoKnownDevice)
    }

    async fn connect_cycle(&self, connection: Arc<Connection>) -> SessionResult<ConnectionInfo> {
        let result = self.run_connect_cycle(&connection).await;
        if result.is_err() {
            self.forget(&connection);
        }
        result
    }

    async fn run_connect_cycle(&self, connection: &Arc<Connection>) -> SessionResult<ConnectionInfo> {
        let address = connection.address;
        let max_attempts = self.conf.max_connect_attempts();

        for attempt in 1..=max_attempts {
            {
                let mut cell = connection.lock().await;
                if connection.is_cancelled() {
                    return Err(cancelled(address));
                }
                cell.retries = attempt - 1;
                cell.link_lost = false;
                connection
                    .transition(&mut cell, ConnectionState::Connecting, None, attempt)
                    .await?;
            }

            CONNECT_ATTEMPTS.increment(1, peripheral_labels(address));
            let outcome = tokio::select! {
                biased;
                _ = connection.cancelled() => None,
                outcome = self.attempt(address) => Some(outcome),
            };

            let mut cell = connection.lock().await;
            let outcome = match outcome {
                Some(outcome) if cell.state == ConnectionState::Connecting => outcome,
                Some(Ok((link, _))) => {
                    release(link).await;
                    return Err(cancelled(address));
                }
                _ => return Err(cancelled(address)),
            };

            match verify_established(&cell, address, outcome).await {
                Ok((link, queue)) => {
                    connection
                        .attach(&mut cell, link, queue, self.registry.handle(&address), attempt)
                        .await?;
                    return Ok(connection.info(&cell));
                }
                Err(error) => {
                    warn!(attempt, %error, "Connection attempt failed");
                    CONNECTING_ERRORS.increment(1, peripheral_labels(address));

                    let kind = error.kind();
                    if kind.is_fatal() {
                        connection
                            .transition(&mut cell, ConnectionState::Disconnected, Some(kind), attempt)
                            .await?;
                        return Err(error);
                    }
                    if attempt == max_attempts {
                        connection
                            .transition(&mut cell, ConnectionState::Disconnected, Some(ErrorKind::ConnectExhausted), attempt)
                            .await?;
                        break;
                    }
                    connection
                        .transition(&mut cell, ConnectionState::Disconnected, Some(ErrorKind::ConnectFailed), attempt)
                        .await?;
                }
            }
            drop(cell);

            let delay = self.conf.backoff.delay(attempt - 1);
            debug!(?delay, attempt, "Backing off");
            tokio::select! {
                biased;
                _ = connection.cancelled() => return Err(cancelled(address)),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        Err(SessionError::ConnectExhausted {
            address,
            attempts: max_attempts,
        })
    }

    /// One bounded attempt: establish the link and start its operation queue.
    pub(super) async fn attempt(&self, address: BDAddr) -> SessionResult<(Arc<dyn RadioLink>, GattQueue)> {
        let link = match timeout(self.conf.connect_timeout, self.radio.connect(address)).await {
            Ok(link) => link?,
            Err(_) => {
                return Err(SessionError::ConnectFailed(
                    address,
                    format!("Timed out after {:?}", self.conf.connect_timeout),
                ))
            }
        };

        match GattQueue::start(link.clone(), self.events.clone(), self.conf.operation_timeout).await {
            Ok(queue) => Ok((link, queue)),
            Err(error) => {
                release(link).await;
                Err(error)
            }
        }
    }
}

/// Best effort link teardown; failures are only logged.
pub(super) async fn release(link: Arc<dyn RadioLink>) {
    if let Err(error) = link.disconnect().await {
        warn!(peripheral = %link.address(), %error, "Failed to disconnect");
    }
}
