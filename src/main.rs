use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use ble_session_rs::inner::conf::cmd_args::{AppConf, Command};
use ble_session_rs::inner::conf::dto::session_configuration::SessionConfigurationDto;
use ble_session_rs::inner::conf::model::filter::Filter;
use ble_session_rs::inner::model::scan_filters::ScanFilters;
use ble_session_rs::inner::scanner::ScanUpdate;
use ble_session_rs::inner::telemetry::{DeviceMessage, LowVoltageMonitor, VoltageStatus};
use ble_session_rs::{BtleRadio, Session, SessionConf};
use btleplug::api::WriteType;
use clap::Parser;
use tracing::{debug, info, warn};

use crate::init::{init_prometheus, init_tracing};

mod init;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let app_conf = AppConf::parse();
    let _prometheus_handle = match app_conf.metrics_address {
        Some(listen_address) => Some(init_prometheus(listen_address, Duration::from_secs(60 * 60))?),
        None => None,
    };

    let configuration = SessionConfigurationDto::try_from(&app_conf)?;
    let conf = configuration
        .session
        .clone()
        .unwrap_or_else(|| SessionConf::from(&app_conf));

    let radio = Arc::new(BtleRadio::from_platform(app_conf.adapter.as_deref(), conf.peripheral_cache_ttl).await?);
    let session = Session::new(radio, conf).await?;
    session.add_known_devices(configuration.known_devices).await?;
    info!(adapter = %session.adapter_info().await?, "Using adapter");

    match app_conf.command {
        Command::Scan {
            service,
            name_prefix,
            timeout,
        } => {
            let filters = ScanFilters {
                services: service,
                name: name_prefix.map(Filter::StartsWith),
            };
            scan(&session, filters, timeout).await?;
        }
        Command::Connect { address } => {
            let connection = session.connect(address).await?;
            println!("{}", serde_json::to_string_pretty(&connection)?);
            session.disconnect(address).await?;
        }
        Command::Read {
            address,
            characteristic,
        } => {
            session.connect(address).await?;
            let value = session.read(address, characteristic).await?;
            println!("{value:?}");
            if let Ok(text) = std::str::from_utf8(&value) {
                println!("{text}");
            }
            session.disconnect(address).await?;
        }
        Command::Write {
            address,
            characteristic,
            value,
            no_response,
        } => {
            let write_type = if no_response {
                WriteType::WithoutResponse
            } else {
                WriteType::WithResponse
            };
            session.connect(address).await?;
            session
                .write(address, characteristic, value.into_bytes(), write_type)
                .await?;
            session.disconnect(address).await?;
        }
        Command::Monitor { timeout } => {
            tokio::select! {
                result = monitor(&session, timeout) => result?,
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            }
        }
    }

    Ok(())
}

async fn scan(session: &Session, filters: ScanFilters, timeout: Option<Duration>) -> anyhow::Result<()> {
    let mut scan = session.scan(filters, timeout).await?;
    while let Some(update) = scan.recv().await {
        match update {
            ScanUpdate::Sighting(peripheral) => println!("{}", serde_json::to_string(&peripheral)?),
            ScanUpdate::Completed(completion) => {
                let devices = session.devices(&ScanFilters::default()).len();
                match completion.error_kind() {
                    Some(kind) if !kind.is_informational() => warn!(%kind, devices, "Scan failed"),
                    kind => info!(?kind, devices, "Scan finished"),
                }
                break;
            }
        }
    }
    Ok(())
}

/// Finds a known device, subscribes to its characteristic and decodes the telemetry it sends.
async fn monitor(session: &Session, timeout: Option<Duration>) -> anyhow::Result<()> {
    if session.known_devices().await.is_empty() {
        anyhow::bail!("No known devices configured, pass --config");
    }

    let mut scan = session.scan(ScanFilters::default(), timeout).await?;
    let connection = loop {
        match scan.recv().await {
            Some(ScanUpdate::Sighting(peripheral)) => {
                debug!(%peripheral, "Sighting");
                match session.connect_known().await {
                    Ok(connection) => break connection,
                    Err(error) => debug!(%error, "No known device connected yet"),
                }
            }
            Some(ScanUpdate::Completed(completion)) => anyhow::bail!("Known device not found: {completion:?}"),
            None => anyhow::bail!("Scan ended"),
        }
    };
    session.stop_scan().await?;

    let address = connection.info.address;
    let characteristic = connection
        .device
        .characteristic
        .with_context(|| format!("Known device {} has no characteristic configured", connection.device.name))?;
    info!(device = %connection.device.name, %address, %characteristic, "Monitoring");

    let mut subscription = session.subscribe(address, characteristic).await?;
    let mut low_voltage = LowVoltageMonitor::default();
    while let Some(update) = subscription.recv().await {
        let payload = update?;
        let Some(frame) = payload.as_text() else {
            debug!(value = ?payload.value, "Binary payload");
            continue;
        };

        match DeviceMessage::parse(frame) {
            DeviceMessage::LightAlert => warn!("Light alert"),
            DeviceMessage::ChargeStatus { charging } => {
                info!(charging, "Charge status");
                if charging {
                    low_voltage.reset();
                }
            }
            DeviceMessage::Reading(reading) => {
                info!(
                    voltage = reading.voltage,
                    rssi = reading.rssi,
                    light_level = reading.light_level,
                    charging = ?reading.charging,
                    "Reading"
                );
                if low_voltage.observe(reading.voltage) == VoltageStatus::Alert {
                    warn!(voltage = reading.voltage, "Low voltage");
                }
            }
            DeviceMessage::Text(text) => info!(%text, "Message"),
            DeviceMessage::Empty => {}
        }
    }

    session.disconnect(address).await?;
    Ok(())
}
