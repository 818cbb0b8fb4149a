use std::sync::Arc;

use btleplug::api::BDAddr;
use metrics::Label;
use tokio::time::timeout;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::inner::connection::connect::{release, verify_established};
use crate::inner::connection::state::Connection;
use crate::inner::connection::ConnectionManager;
use crate::inner::error::{ErrorKind, SessionResult};
use crate::inner::metrics::{CONNECTING_ERRORS, CONNECTIONS_DROPPED, CONNECT_ATTEMPTS};
use crate::inner::model::connection_state::ConnectionState;

impl ConnectionManager {
    /// Tears the connection down from any state, cancelling a running connect or reconnect cycle.
    ///
    /// Never fails: link level errors are logged.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn disconnect(&self, address: BDAddr) -> SessionResult<()> {
        let Some(connection) = self.lookup(&address) else {
            debug!("Not connected");
            return Ok(());
        };
        connection.cancel();

        let mut cell = connection.lock().await;
        if cell.state.is_active() {
            if let Err(error) = connection
                .transition(&mut cell, ConnectionState::Disconnecting, None, 0)
                .await
            {
                warn!(%error, "Failed to start disconnecting");
            }
            if let Some(link) = cell.link.take() {
                if timeout(self.conf.operation_timeout, release(link)).await.is_err() {
                    warn!("Timed out disconnecting");
                }
            }
            if let Err(error) = connection
                .transition(&mut cell, ConnectionState::Disconnected, None, 0)
                .await
            {
                warn!(%error, "Failed to finish disconnecting");
            }
        }
        drop(cell);

        self.forget(&connection);
        Ok(())
    }

    /// Reacts to the radio reporting a lost link.
    ///
    /// While a link is being established the loss is recorded, and the attempt fails instead of attaching.
    pub(crate) async fn handle_link_loss(self: Arc<Self>, address: BDAddr) {
        let Some(connection) = self.lookup(&address) else {
            return;
        };

        let mut cell = connection.lock().await;
        match cell.state {
            ConnectionState::Connected => {}
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                debug!(peripheral = %address, state = %cell.state, "Link lost while connecting");
                cell.link_lost = true;
                return;
            }
            state => {
                debug!(peripheral = %address, %state, "Ignoring disconnect event");
                return;
            }
        }
        warn!(peripheral = %address, "Link lost");
        CONNECTIONS_DROPPED.increment(1, [Label::new("peripheral", address.to_string())]);
        cell.link = None;

        if !self.conf.auto_reconnect {
            if let Err(error) = connection
                .transition(&mut cell, ConnectionState::Disconnected, Some(ErrorKind::LinkLost), 0)
                .await
            {
                warn!(%error, "Failed to record link loss");
            }
            drop(cell);
            self.forget(&connection);
            return;
        }

        if let Err(error) = connection
            .transition(&mut cell, ConnectionState::Reconnecting, Some(ErrorKind::LinkLost), 0)
            .await
        {
            warn!(%error, "Failed to start reconnecting");
            return;
        }
        drop(cell);

        let span = info_span!("reconnect", peripheral = %address);
        tokio::spawn(async move { self.reconnect(connection).await }.instrument(span));
    }

    /// Stays in `Reconnecting` until an attempt succeeds, attempts run out or the device is disconnected.
    async fn reconnect(&self, connection: Arc<Connection>) {
        let address = connection.address;
        let max_attempts = self.conf.max_connect_attempts();

        for attempt in 1..=max_attempts {
            {
                let mut cell = connection.lock().await;
                if cell.state != ConnectionState::Reconnecting {
                    return;
                }
                cell.link_lost = false;
            }

            CONNECT_ATTEMPTS.increment(1, [Label::new("peripheral", address.to_string())]);
            let outcome = tokio::select! {
                biased;
                _ = connection.cancelled() => None,
                outcome = self.attempt(address) => Some(outcome),
            };

            let mut cell = connection.lock().await;
            let outcome = match outcome {
                Some(outcome) if cell.state == ConnectionState::Reconnecting => outcome,
                Some(Ok((link, _))) => {
                    release(link).await;
                    return;
                }
                _ => return,
            };

            match verify_established(&cell, address, outcome).await {
                Ok((link, queue)) => {
                    cell.retries = attempt;
                    if let Err(error) = connection
                        .attach(&mut cell, link, queue, self.registry.handle(&address), attempt)
                        .await
                    {
                        warn!(%error, "Failed to restore connection");
                    }
                    info!(attempt, "Reconnected");
                    return;
                }
                Err(error) => {
                    warn!(attempt, %error, "Reconnect attempt failed");
                    CONNECTING_ERRORS.increment(1, [Label::new("peripheral", address.to_string())]);
                    cell.retries = attempt;

                    let kind = error.kind();
                    if kind.is_fatal() || attempt == max_attempts {
                        let kind = if kind.is_fatal() { kind } else { ErrorKind::ConnectExhausted };
                        if let Err(error) = connection
                            .transition(&mut cell, ConnectionState::Disconnected, Some(kind), attempt)
                            .await
                        {
                            warn!(%error, "Failed to give up reconnecting");
                        }
                        drop(cell);
                        self.forget(&connection);
                        return;
                    }
                }
            }
            drop(cell);

            let delay = self.conf.backoff.delay(attempt - 1);
            debug!(?delay, attempt, "Backing off");
            tokio::select! {
                biased;
                _ = connection.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
