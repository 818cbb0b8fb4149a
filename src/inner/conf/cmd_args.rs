use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use btleplug::api::BDAddr;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::inner::conf::dto::session_configuration::SessionConfigurationDto;
use crate::inner::conf::model::service_characteristic_key::ServiceCharacteristicKey;
use crate::inner::error::SessionError;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    long_about = r###"BLE session manager: scan, connect and talk GATT to peripherals
"###
)]
pub struct AppConf {
    /// A YAML file with session settings and known devices
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Adapter id to use, e.g. hci0; the first adapter when omitted
    #[arg(long)]
    pub adapter: Option<String>,

    /// Expose Prometheus metrics on this address
    #[arg(long)]
    pub metrics_address: Option<SocketAddr>,

    /// Evict peripherals not seen for this long
    #[arg(long, value_parser = humantime::parse_duration, default_value = "30s")]
    pub staleness_timeout: Duration,

    /// Publish at most one sighting per peripheral within this period
    #[arg(long, value_parser = humantime::parse_duration, default_value = "1s")]
    pub sighting_throttling: Duration,

    /// Scan duration when none is given
    #[arg(long, value_parser = humantime::parse_duration, default_value = "10s")]
    pub scan_timeout: Duration,

    /// Single connection attempt timeout
    #[arg(long, value_parser = humantime::parse_duration, default_value = "10s")]
    pub connect_timeout: Duration,

    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..=32))]
    pub max_connect_attempts: u32,

    #[arg(long, value_parser = humantime::parse_duration, default_value = "500ms")]
    pub backoff_base: Duration,

    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(1..=16))]
    pub backoff_factor: u32,

    #[arg(long, value_parser = humantime::parse_duration, default_value = "8s")]
    pub backoff_cap: Duration,

    /// Default GATT operation timeout
    #[arg(long, value_parser = humantime::parse_duration, default_value = "5s")]
    pub operation_timeout: Duration,

    /// Reconnect when an established link is lost
    #[arg(long)]
    pub auto_reconnect: bool,

    /// Store resolved peripherals for at least this time
    #[arg(long, value_parser = humantime::parse_duration, default_value = "60s")]
    pub peripheral_cache_ttl: Duration,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Scan and print matching peripherals
    Scan {
        /// Only peripherals advertising any of these services
        #[arg(long)]
        service: Vec<Uuid>,
        #[arg(long)]
        name_prefix: Option<String>,
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,
    },
    /// Connect and print the link state changes until interrupted
    Connect { address: BDAddr },
    /// Read a characteristic once, given as <service uuid>/<characteristic uuid>
    Read {
        address: BDAddr,
        characteristic: ServiceCharacteristicKey,
    },
    /// Write UTF-8 text to a characteristic
    Write {
        address: BDAddr,
        characteristic: ServiceCharacteristicKey,
        value: String,
        /// Use write without response
        #[arg(long)]
        no_response: bool,
    },
    /// Connect to the first known device and decode its telemetry notifications
    Monitor {
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,
    },
}

impl TryFrom<&AppConf> for SessionConfigurationDto {
    type Error = SessionError;

    fn try_from(value: &AppConf) -> Result<Self, Self::Error> {
        let Some(path) = value.config.as_ref() else {
            return Ok(Self::default());
        };
        let config = std::fs::read_to_string(path)?;
        let config: SessionConfigurationDto = serde_yaml::from_str(&config)?;
        Ok(config)
    }
}
