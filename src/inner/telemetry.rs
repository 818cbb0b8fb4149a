use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

pub const LOW_VOLTAGE_THRESHOLD: f64 = 1.4;
const LOW_READINGS_BEFORE_ALERT: u32 = 3;

lazy_static! {
    static ref VOLTAGE: Regex = Regex::new(r"V([\d.]+)").unwrap();
    static ref RSSI: Regex = Regex::new(r"R(-?\d+)").unwrap();
    static ref LIGHT_LEVEL: Regex = Regex::new(r"L([\d.]+)").unwrap();
    static ref BATTERY: Regex = Regex::new(r"B(\d)").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SensorReading {
    pub voltage: f64,
    pub rssi: i32,
    /// Percent
    pub light_level: f64,
    pub charging: Option<bool>,
}

/// A text frame sent by the sensor over its notify characteristic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DeviceMessage {
    LightAlert,
    ChargeStatus { charging: bool },
    Reading(SensorReading),
    Text(String),
    Empty,
}

fn capture<'a>(regex: &Regex, frame: &'a str) -> Option<&'a str> {
    regex.captures(frame)?.get(1).map(|group| group.as_str())
}

impl DeviceMessage {
    pub fn parse(frame: &str) -> Self {
        if frame.contains("LDR!") {
            return Self::LightAlert;
        }
        if frame.contains("Charging") {
            return Self::ChargeStatus {
                charging: !frame.contains("Not"),
            };
        }

        let voltage = capture(&VOLTAGE, frame).and_then(|value| value.parse::<f64>().ok());
        let rssi = capture(&RSSI, frame).and_then(|value| value.parse::<i32>().ok());
        let light_level = capture(&LIGHT_LEVEL, frame).and_then(|value| value.parse::<f64>().ok());

        match (voltage, rssi, light_level) {
            (Some(voltage), Some(rssi), Some(light_level)) => Self::Reading(SensorReading {
                voltage,
                rssi,
                light_level,
                charging: match capture(&BATTERY, frame) {
                    Some("0") => Some(true),
                    Some("1") => Some(false),
                    _ => None,
                },
            }),
            _ if frame.trim().is_empty() => Self::Empty,
            _ => Self::Text(frame.trim().to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub enum VoltageStatus {
    Normal,
    Low,
    /// Raised once per reset
    Alert,
}

/// Debounces low battery alerts: the third low reading raises an alert, then alerts stay latched until `reset`.
#[derive(Debug, Clone)]
pub struct LowVoltageMonitor {
    threshold: f64,
    low_readings: u32,
    alerted: bool,
}

impl Default for LowVoltageMonitor {
    fn default() -> Self {
        Self::new(LOW_VOLTAGE_THRESHOLD)
    }
}

impl LowVoltageMonitor {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            low_readings: 0,
            alerted: false,
        }
    }

    pub fn observe(&mut self, voltage: f64) -> VoltageStatus {
        if voltage >= self.threshold {
            return VoltageStatus::Normal;
        }
        if self.alerted {
            return VoltageStatus::Low;
        }

        self.low_readings += 1;
        if self.low_readings < LOW_READINGS_BEFORE_ALERT {
            return VoltageStatus::Low;
        }
        self.low_readings = 0;
        self.alerted = true;
        VoltageStatus::Alert
    }

    pub fn has_alerted(&self) -> bool {
        self.alerted
    }

    pub fn reset(&mut self) {
        self.low_readings = 0;
        self.alerted = false;
    }
}

#[cfg(test)]
mod tests {
    use float_cmp::approx_eq;

    use super::*;

    #[test]
    fn parses_frames() {
        assert_eq!(DeviceMessage::parse("LDR! triggered"), DeviceMessage::LightAlert);
        assert_eq!(
            DeviceMessage::parse("Not Charging"),
            DeviceMessage::ChargeStatus { charging: false }
        );
        assert_eq!(DeviceMessage::parse("Charging"), DeviceMessage::ChargeStatus { charging: true });
        assert_eq!(DeviceMessage::parse("  "), DeviceMessage::Empty);
        assert_eq!(
            DeviceMessage::parse(" Booted fw 1.2 "),
            DeviceMessage::Text("Booted fw 1.2".to_string())
        );

        let DeviceMessage::Reading(reading) = DeviceMessage::parse("V1.35 R-67 L42.5 B0") else {
            panic!("Expected a reading");
        };
        assert!(approx_eq!(f64, reading.voltage, 1.35, ulps = 2));
        assert_eq!(reading.rssi, -67);
        assert!(approx_eq!(f64, reading.light_level, 42.5, ulps = 2));
        assert_eq!(reading.charging, Some(true));

        let DeviceMessage::Reading(reading) = DeviceMessage::parse("V3.3 R-40 L7") else {
            panic!("Expected a reading");
        };
        assert_eq!(reading.charging, None);

        assert_eq!(DeviceMessage::parse("V3.3 R-40"), DeviceMessage::Text("V3.3 R-40".to_string()));
    }

    #[test]
    fn alerts_on_third_low_reading_and_latches() {
        let mut monitor = LowVoltageMonitor::default();

        assert_eq!(monitor.observe(1.3), VoltageStatus::Low);
        assert_eq!(monitor.observe(1.5), VoltageStatus::Normal);
        assert_eq!(monitor.observe(1.2), VoltageStatus::Low);
        assert_eq!(monitor.observe(1.1), VoltageStatus::Alert);
        assert!(monitor.has_alerted());

        for _ in 0..5 {
            assert_eq!(monitor.observe(1.0), VoltageStatus::Low);
        }

        monitor.reset();
        assert_eq!(monitor.observe(1.0), VoltageStatus::Low);
        assert_eq!(monitor.observe(1.0), VoltageStatus::Low);
        assert_eq!(monitor.observe(1.0), VoltageStatus::Alert);
    }
}
