use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::inner::conf::cmd_args::AppConf;
use crate::inner::connection::backoff::BackoffPolicy;

/// Tunables shared by the scanner, the connection manager and the GATT queues.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct SessionConf {
    /// Registry entries not re-sighted for this long are evicted
    #[serde(with = "humantime_serde")]
    pub staleness_timeout: Duration,

    /// Sighting events for the same peripheral are published at most once per this period
    #[serde(with = "humantime_serde")]
    pub sighting_throttling: Duration,

    #[serde(with = "humantime_serde")]
    pub default_scan_timeout: Duration,

    /// Upper bound of a single connection attempt
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    pub max_connect_attempts: u32,

    pub backoff: BackoffPolicy,

    /// Default timeout of a single GATT operation
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,

    pub auto_reconnect: bool,

    /// How long resolved platform peripherals stay cached by the btleplug radio
    #[serde(with = "humantime_serde")]
    pub peripheral_cache_ttl: Duration,
}

impl Default for SessionConf {
    fn default() -> Self {
        Self {
            staleness_timeout: Duration::from_secs(30),
            sighting_throttling: Duration::from_secs(1),
            default_scan_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            max_connect_attempts: 3,
            backoff: BackoffPolicy::default(),
            operation_timeout: Duration::from_secs(5),
            auto_reconnect: false,
            peripheral_cache_ttl: Duration::from_secs(60),
        }
    }
}

impl SessionConf {
    pub(crate) fn max_connect_attempts(&self) -> u32 {
        self.max_connect_attempts.max(1)
    }
}

impl From<&AppConf> for SessionConf {
    fn from(value: &AppConf) -> Self {
        Self {
            staleness_timeout: value.staleness_timeout,
            sighting_throttling: value.sighting_throttling,
            default_scan_timeout: value.scan_timeout,
            connect_timeout: value.connect_timeout,
            max_connect_attempts: value.max_connect_attempts,
            backoff: BackoffPolicy {
                base: value.backoff_base,
                factor: value.backoff_factor,
                cap: value.backoff_cap,
            },
            operation_timeout: value.operation_timeout,
            auto_reconnect: value.auto_reconnect,
            peripheral_cache_ttl: value.peripheral_cache_ttl,
        }
    }
}
