use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use btleplug::api::BDAddr;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::inner::error::ErrorKind;
use crate::inner::model::characteristic_payload::CharacteristicPayload;
use crate::inner::model::connection_state::ConnectionState;
use crate::inner::model::peripheral::Peripheral;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub enum ScanCompletion {
    Stopped,
    TimedOut,
    Failed(ErrorKind),
}

impl ScanCompletion {
    /// `ScanTimedOut` is informational; only `Failed` carries a fatal kind.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            ScanCompletion::Stopped => None,
            ScanCompletion::TimedOut => Some(ErrorKind::ScanTimedOut),
            ScanCompletion::Failed(kind) => Some(*kind),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StateChange {
    pub address: BDAddr,
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub error: Option<ErrorKind>,
    pub attempt: u32,
    #[serde(with = "humantime_serde")]
    pub connected_for: Option<Duration>,
    pub at: DateTime<Utc>,
}

impl Display for StateChange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} -> {}", self.address, self.from, self.to)?;
        if let Some(error) = self.error {
            write!(f, " ({error})")?;
        }
        if let Some(connected_for) = self.connected_for {
            let rounded = Duration::from_secs(connected_for.as_secs());
            write!(f, ", connected for {}", humantime::format_duration(rounded))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub enum SessionEvent {
    Sighting(Peripheral),
    ScanCompleted(ScanCompletion),
    StateChanged(StateChange),
    ValueUpdated(Arc<CharacteristicPayload>),
}

impl SessionEvent {
    pub fn address(&self) -> Option<BDAddr> {
        match self {
            SessionEvent::Sighting(peripheral) => Some(peripheral.address),
            SessionEvent::ScanCompleted(_) => None,
            SessionEvent::StateChanged(change) => Some(change.address),
            SessionEvent::ValueUpdated(payload) => Some(payload.fqcn.peripheral),
        }
    }
}
