use std::time::Duration;

use btleplug::api::{BDAddr, WriteType};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use uuid::Uuid;

use crate::inner::conf::model::service_characteristic_key::ServiceCharacteristicKey;
use crate::inner::error::{ErrorKind, SessionError, SessionResult};
use crate::inner::gatt::GattOperation;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResultDto<T> {
    Ok { data: T },
    Error { kind: ErrorKind, message: String },
}

impl<T> ResultDto<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Ok { .. } => None,
            Self::Error { kind, .. } => Some(*kind),
        }
    }

    pub fn into_result(self) -> Result<T, (ErrorKind, String)> {
        match self {
            Self::Ok { data } => Ok(data),
            Self::Error { kind, message } => Err((kind, message)),
        }
    }
}

impl<T> From<SessionError> for ResultDto<T> {
    fn from(error: SessionError) -> Self {
        Self::Error {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl<T> From<SessionResult<T>> for ResultDto<T> {
    fn from(value: SessionResult<T>) -> Self {
        match value {
            Ok(data) => Self::Ok { data },
            Err(error) => error.into(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteCommandDto {
    pub peripheral_address: BDAddr,
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    pub value: Vec<u8>,
    #[serde(default)]
    pub wait_response: bool,
    #[serde(default)]
    #[serde_as(as = "Option<DurationMilliSeconds>")]
    pub timeout_ms: Option<Duration>,
}

impl WriteCommandDto {
    pub fn get_write_type(&self) -> WriteType {
        if self.wait_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        }
    }

    pub(crate) fn key(&self) -> ServiceCharacteristicKey {
        ServiceCharacteristicKey::new(self.service_uuid, self.characteristic_uuid)
    }
}

impl From<&WriteCommandDto> for GattOperation {
    fn from(value: &WriteCommandDto) -> Self {
        let operation = GattOperation::write(value.key(), value.value.clone(), value.get_write_type());
        match value.timeout_ms {
            Some(timeout) => operation.with_timeout(timeout),
            None => operation,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadCommandDto {
    pub peripheral_address: BDAddr,
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    #[serde(default)]
    #[serde_as(as = "Option<DurationMilliSeconds>")]
    pub timeout_ms: Option<Duration>,
}

impl ReadCommandDto {
    pub(crate) fn key(&self) -> ServiceCharacteristicKey {
        ServiceCharacteristicKey::new(self.service_uuid, self.characteristic_uuid)
    }
}

impl From<&ReadCommandDto> for GattOperation {
    fn from(value: &ReadCommandDto) -> Self {
        let operation = GattOperation::read(value.key());
        match value.timeout_ms {
            Some(timeout) => operation.with_timeout(timeout),
            None => operation,
        }
    }
}
