//! Simulator configuration, loadable from JSON.
//!
//! Every field has a default, so a partial file (or `{}`) is valid.

use crate::error::{GeneratorError, Result};
use crate::kinematics::KinematicState;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tracklink_core::{BcdTimestamp, PhoneId, constants::MAX_BODY_LENGTH};
use tracklink_protocol::RegistrationRequest;

/// Identity and starting state of the simulated terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceProfile {
    pub device_id: String,
    pub province_id: u16,
    pub city_id: u16,
    pub manufacturer_id: String,
    pub terminal_model: String,
    pub terminal_id: String,
    pub license_plate_color: u8,
    pub license_plate: String,

    pub start_latitude: f64,
    pub start_longitude: f64,
    pub altitude: u16,
    /// Base speed in km/h; the simulation jitters around it.
    pub speed: f64,
    pub direction: u16,
    #[serde(rename = "move")]
    pub moving: bool,

    /// Reported as extra 0x01, raw 0.1 km units.
    pub mileage: u32,
    /// Reported as extra 0x02, raw 0.1 L units.
    pub fuel: u16,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            device_id: "123456789012".into(),
            province_id: 11,
            city_id: 1,
            manufacturer_id: "SIMUL".into(),
            terminal_model: "SIM808".into(),
            terminal_id: "SIM0001".into(),
            license_plate_color: 0,
            license_plate: "DEMO".into(),
            start_latitude: 39.908722,
            start_longitude: 116.397499,
            altitude: 100,
            speed: 60.0,
            direction: 45,
            moving: true,
            mileage: 10000,
            fuel: 75,
        }
    }
}

impl DeviceProfile {
    pub fn phone(&self) -> Result<PhoneId> {
        PhoneId::from_short(&self.device_id).map_err(|e| GeneratorError::Config(e.to_string()))
    }

    pub fn registration(&self) -> RegistrationRequest {
        RegistrationRequest {
            province: self.province_id,
            city: self.city_id,
            manufacturer_id: self.manufacturer_id.clone(),
            terminal_model: self.terminal_model.clone(),
            terminal_id: self.terminal_id.clone(),
            plate_color: self.license_plate_color,
            plate: self.license_plate.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub server_ip: String,
    pub server_port: u16,

    #[serde(flatten)]
    pub device: DeviceProfile,

    pub location_interval: u64,
    pub heartbeat_interval: u64,
    pub status_interval: u64,

    pub batch_enabled: bool,
    pub batch_size: usize,

    /// Per-request reply timeout, milliseconds.
    pub request_timeout_ms: u64,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            server_ip: "127.0.0.1".into(),
            server_port: 8808,
            device: DeviceProfile::default(),
            location_interval: 5,
            heartbeat_interval: 30,
            status_interval: 300,
            batch_enabled: false,
            batch_size: 5,
            request_timeout_ms: 5000,
            reconnect_initial_ms: 1000,
            reconnect_max_ms: 60_000,
        }
    }
}

/// Loop periods and transport timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub location_interval: Duration,
    pub heartbeat_interval: Duration,
    pub status_interval: Duration,
    pub request_timeout: Duration,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<()> {
        self.device.phone()?;
        if self.location_interval == 0 || self.heartbeat_interval == 0 || self.status_interval == 0 {
            return Err(GeneratorError::Config("intervals must be > 0".into()));
        }
        if self.batch_enabled {
            let max = self.max_batch_size();
            if self.batch_size == 0 || self.batch_size > max {
                return Err(GeneratorError::Config(format!(
                    "batch_size must be between 1 and {max}, got {}",
                    self.batch_size
                )));
            }
        }
        if self.reconnect_initial_ms == 0 || self.reconnect_max_ms < self.reconnect_initial_ms {
            return Err(GeneratorError::Config(
                "reconnect delays must satisfy 0 < initial <= max".into(),
            ));
        }
        if !(-90.0..=90.0).contains(&self.device.start_latitude)
            || !(-180.0..=180.0).contains(&self.device.start_longitude)
        {
            return Err(GeneratorError::Config("start position out of range".into()));
        }
        Ok(())
    }

    /// Largest batch whose 0x0704 body fits in one frame. Every report this
    /// profile produces has the same encoded size.
    pub fn max_batch_size(&self) -> usize {
        let item = KinematicState::new(&self.device).report(BcdTimestamp::from_bcd([0; 6]));
        (MAX_BODY_LENGTH - 3) / (2 + item.encoded_len())
    }

    pub fn server_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server_ip, self.server_port)
            .parse()
            .map_err(|e| GeneratorError::Config(format!("server address: {e}")))
    }

    pub fn timing(&self) -> Timing {
        Timing {
            location_interval: Duration::from_secs(self.location_interval),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval),
            status_interval: Duration::from_secs(self.status_interval),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            reconnect_initial: Duration::from_millis(self.reconnect_initial_ms),
            reconnect_max: Duration::from_millis(self.reconnect_max_ms),
        }
    }
}
