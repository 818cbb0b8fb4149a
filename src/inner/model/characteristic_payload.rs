use std::fmt::{Display, Formatter};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::inner::model::fqcn::Fqcn;

#[derive(Debug, Clone, Serialize)]
pub struct CharacteristicPayload {
    pub created_at: chrono::DateTime<Utc>,
    pub value: Vec<u8>,
    pub fqcn: Arc<Fqcn>,
}

impl CharacteristicPayload {
    pub(crate) fn new(fqcn: Arc<Fqcn>, value: Vec<u8>) -> Self {
        Self {
            created_at: Utc::now(),
            value,
            fqcn,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }
}

impl Display for CharacteristicPayload {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.as_text() {
            Some(text) => write!(f, "{}={text:?}", self.fqcn),
            None => write!(f, "{}={:02x?}", self.fqcn, self.value),
        }
    }
}
