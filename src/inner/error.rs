use std::time::Duration;

use btleplug::api::BDAddr;
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize, strum_macros::Display, strum_macros::AsRefStr,
)]
pub enum ErrorKind {
    RadioUnavailable,
    PermissionDenied,
    ConnectFailed,
    ConnectExhausted,
    LinkLost,
    OperationTimedOut,
    ConnectionLost,
    InvalidCharacteristic,
    ScanTimedOut,
    Internal,
}

impl ErrorKind {
    /// Adapter-level failures abort the current scan / connect attempt without retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RadioUnavailable | Self::PermissionDenied)
    }

    pub fn is_informational(&self) -> bool {
        matches!(self, Self::ScanTimedOut)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Radio unavailable: {0}")]
    RadioUnavailable(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Failed to connect to {0}: {1}")]
    ConnectFailed(BDAddr, String),

    #[error("Gave up connecting to {address} after {attempts} attempts")]
    ConnectExhausted { address: BDAddr, attempts: u32 },

    #[error("Operation timed out after {0:?}")]
    OperationTimedOut(Duration),

    #[error("Connection lost")]
    ConnectionLost,

    #[error("Invalid characteristic: {0}")]
    InvalidCharacteristic(String),

    #[error("Invalid state transition for {address}: {from} -> {to}")]
    InvalidTransition {
        address: BDAddr,
        from: crate::inner::model::connection_state::ConnectionState,
        to: crate::inner::model::connection_state::ConnectionState,
    },

    #[error("No known device matches the configuration")]
    NoKnownDevice,

    #[error("Bluetooth error: {0:?}")]
    BluetoothError(btleplug::Error),

    #[error("Duplicate configuration: {0}")]
    DuplicateConfiguration(String),

    #[error("IoError: {0:?}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization Error: {0:?}")]
    SerializationError(#[from] serde_yaml::Error),

    #[error("Error: {0:?}")]
    AnyError(#[from] anyhow::Error),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RadioUnavailable(_) => ErrorKind::RadioUnavailable,
            Self::PermissionDenied => ErrorKind::PermissionDenied,
            Self::ConnectFailed(..) => ErrorKind::ConnectFailed,
            Self::ConnectExhausted { .. } => ErrorKind::ConnectExhausted,
            Self::OperationTimedOut(_) => ErrorKind::OperationTimedOut,
            Self::ConnectionLost => ErrorKind::ConnectionLost,
            Self::InvalidCharacteristic(_) => ErrorKind::InvalidCharacteristic,
            Self::BluetoothError(_) => ErrorKind::ConnectFailed,
            Self::InvalidTransition { .. }
            | Self::NoKnownDevice
            | Self::DuplicateConfiguration(_)
            | Self::IoError(_)
            | Self::SerializationError(_)
            | Self::AnyError(_) => ErrorKind::Internal,
        }
    }
}

impl From<btleplug::Error> for SessionError {
    fn from(value: btleplug::Error) -> Self {
        match value {
            btleplug::Error::PermissionDenied => Self::PermissionDenied,
            btleplug::Error::NotConnected => Self::ConnectionLost,
            btleplug::Error::NoSuchCharacteristic => Self::InvalidCharacteristic("no such characteristic".to_string()),
            btleplug::Error::UnexpectedCharacteristic => {
                Self::InvalidCharacteristic("unexpected characteristic".to_string())
            }
            btleplug::Error::TimedOut(duration) => Self::OperationTimedOut(duration),
            other => Self::BluetoothError(other),
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
