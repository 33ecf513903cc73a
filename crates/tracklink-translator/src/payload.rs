//! JSON documents published for each event kind.
//!
//! Field names are part of the downstream contract; keep them stable.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;
use tracklink_protocol::{
    AlarmFlags, BatchLocationUpload, ExtraItem, LocationReport, RegistrationRequest, StatusFlags,
    body::location::extra_id,
};

/// ISO-8601 UTC with millisecond precision, `Z` suffix.
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Serialize)]
pub struct EventPayload {
    pub device_id: String,
    pub timestamp: String,
    pub event: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationPayload {
    pub device_id: String,
    pub timestamp: String,
    pub event: &'static str,
    pub province_id: u16,
    pub city_id: u16,
    pub manufacturer_id: String,
    pub terminal_model: String,
    pub terminal_id: String,
    pub license_plate_color: u8,
    pub license_plate: String,
}

impl RegistrationPayload {
    pub fn new(device_id: String, timestamp: String, request: &RegistrationRequest) -> Self {
        Self {
            device_id,
            timestamp,
            event: "registration",
            province_id: request.province,
            city_id: request.city,
            manufacturer_id: request.manufacturer_id.clone(),
            terminal_model: request.terminal_model.clone(),
            terminal_id: request.terminal_id.clone(),
            license_plate_color: request.plate_color,
            license_plate: request.plate.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationFields {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: u16,
    /// km/h
    pub speed: f64,
    pub direction: u16,
}

impl From<&LocationReport> for LocationFields {
    fn from(report: &LocationReport) -> Self {
        Self {
            latitude: report.latitude_deg(),
            longitude: report.longitude_deg(),
            altitude: report.altitude,
            speed: report.speed_kmh(),
            direction: report.direction,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationPayload {
    pub device_id: String,
    pub timestamp: String,
    pub event: &'static str,
    pub location: LocationFields,
    pub status: BTreeMap<String, bool>,
    pub alarm: BTreeMap<String, bool>,
    pub additional: Map<String, Value>,
}

impl LocationPayload {
    pub fn new(device_id: String, fallback: DateTime<Utc>, report: &LocationReport) -> Self {
        Self {
            device_id,
            timestamp: report_timestamp(report, fallback),
            event: "location",
            location: LocationFields::from(report),
            status: status_map(report.status),
            alarm: alarm_map(report.alarm),
            additional: additional_info(&report.extras),
        }
    }
}

/// Lighter document for live map consumers.
#[derive(Debug, Clone, Serialize)]
pub struct TrackingPayload {
    pub device_id: String,
    pub timestamp: String,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    pub direction: u16,
}

impl TrackingPayload {
    pub fn new(device_id: String, timestamp: String, report: &LocationReport) -> Self {
        Self {
            device_id,
            timestamp,
            latitude: report.latitude_deg(),
            longitude: report.longitude_deg(),
            speed: report.speed_kmh(),
            direction: report.direction,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    pub timestamp: String,
    #[serde(flatten)]
    pub location: LocationFields,
    pub status: BTreeMap<String, bool>,
    pub alarm: BTreeMap<String, bool>,
    pub additional: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchLocationPayload {
    pub device_id: String,
    pub timestamp: String,
    pub event: &'static str,
    #[serde(rename = "type")]
    pub report_type: u8,
    pub count: usize,
    pub locations: Vec<BatchItem>,
}

impl BatchLocationPayload {
    pub fn new(device_id: String, received_at: DateTime<Utc>, batch: &BatchLocationUpload) -> Self {
        let locations: Vec<BatchItem> = batch
            .items
            .iter()
            .map(|report| BatchItem {
                timestamp: report_timestamp(report, received_at),
                location: LocationFields::from(report),
                status: status_map(report.status),
                alarm: alarm_map(report.alarm),
                additional: additional_info(&report.extras),
            })
            .collect();

        Self {
            device_id,
            timestamp: iso_timestamp(received_at),
            event: "batch_location",
            report_type: batch.report_type,
            count: locations.len(),
            locations,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusPayload {
    pub device_id: String,
    pub timestamp: String,
    /// `online` or `offline`
    pub status: &'static str,
    pub reason: &'static str,
}

/// Device clock time of a report, or `fallback` if its BCD time is invalid.
fn report_timestamp(report: &LocationReport, fallback: DateTime<Utc>) -> String {
    match report.time.to_datetime() {
        Ok(at) => at.to_rfc3339_opts(SecondsFormat::Secs, true),
        Err(e) => {
            debug!(time = %report.time, error = %e, "Invalid device time, using receive time");
            iso_timestamp(fallback)
        }
    }
}

pub fn status_map(status: StatusFlags) -> BTreeMap<String, bool> {
    StatusFlags::all()
        .iter_names()
        .map(|(name, flag)| (name.to_lowercase(), status.contains(flag)))
        .collect()
}

pub fn alarm_map(alarm: AlarmFlags) -> BTreeMap<String, bool> {
    AlarmFlags::all()
        .iter_names()
        .map(|(name, flag)| (name.to_lowercase(), alarm.contains(flag)))
        .collect()
}

/// Known extras become scaled numbers; everything else is kept as hex
/// under `id_XX`. A known id with an unexpected width is treated as unknown.
pub fn additional_info(extras: &[ExtraItem]) -> Map<String, Value> {
    let mut out = Map::new();
    for item in extras {
        let raw = item.as_uint();
        let (key, value) = match (item.id, item.value.len(), raw) {
            (extra_id::MILEAGE, 4, Some(v)) => ("mileage".to_string(), Value::from(v as f64 / 10.0)),
            (extra_id::FUEL, 2, Some(v)) => ("fuel".to_string(), Value::from(v as f64 / 10.0)),
            (extra_id::RECORDER_SPEED, 2, Some(v)) => {
                ("speed_sensor".to_string(), Value::from(v as f64 / 10.0))
            }
            (extra_id::ALTITUDE_SENSOR, 2, Some(v)) => ("altitude_sensor".to_string(), Value::from(v)),
            _ => (format!("id_{:02X}", item.id), Value::from(hex(&item.value))),
        };
        out.insert(key, value);
    }
    out
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
