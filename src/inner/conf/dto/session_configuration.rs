use serde::{Deserialize, Serialize};

use crate::inner::conf::dto::known_device::KnownDeviceDto;
use crate::inner::conf::model::session_conf::SessionConf;

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Default)]
pub struct SessionConfigurationDto {
    /// Overrides the command line session settings when present
    #[serde(default)]
    pub session: Option<SessionConf>,
    #[serde(default)]
    pub known_devices: Vec<KnownDeviceDto>,
}
