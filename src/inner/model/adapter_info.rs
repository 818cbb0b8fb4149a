use std::fmt::{Display, Formatter};

use anyhow::Context;
use metrics::Label;
use serde::{Deserialize, Serialize};

/// Parsed form of the adapter description btleplug reports, e.g. `hci0 (usb:v1D6Bp0246d0541)`.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct AdapterInfo {
    pub id: String,
    pub modalias: String,
}

impl AdapterInfo {
    pub(crate) fn adapter_label(&self) -> Label {
        Label::new("adapter", self.id.clone())
    }
}

impl Display for AdapterInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.modalias.is_empty() {
            return write!(f, "{}", self.id);
        }
        write!(f, "{} {}", self.id, self.modalias)
    }
}

impl TryFrom<String> for AdapterInfo {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let mut pair = value.split_whitespace();
        let id = pair.next().context("No id")?.to_string();
        // macOS and Windows adapters report a bare name
        let modalias = pair.next().unwrap_or_default().trim();
        let modalias = modalias.strip_prefix('(').unwrap_or(modalias);
        let modalias = modalias.strip_suffix(')').unwrap_or(modalias);
        let modalias = modalias.to_string();
        Ok(Self { id, modalias })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bluez_description() {
        let info = AdapterInfo::try_from("hci0 (usb:v1D6Bp0246d0541)".to_string()).unwrap();
        assert_eq!(info.id, "hci0");
        assert_eq!(info.modalias, "usb:v1D6Bp0246d0541");
    }

    #[test]
    fn parses_bare_name() {
        let info = AdapterInfo::try_from("CoreBluetooth".to_string()).unwrap();
        assert_eq!(info.id, "CoreBluetooth");
        assert!(info.modalias.is_empty());
        assert!(AdapterInfo::try_from("  ".to_string()).is_err());
    }
}
