//! Simulated JT/T808 terminal.
//!
//! Registers, authenticates, then streams location reports through a dual
//! distance/time gate alongside heartbeats and periodic status reports.

pub mod backoff;
pub mod config;
pub mod error;
pub mod gate;
pub mod generator;
pub mod kinematics;
pub mod link;

pub use backoff::Backoff;
pub use config::{DeviceProfile, GeneratorConfig, Timing};
pub use error::{GeneratorError, Result};
pub use gate::{GateDecision, SpeedTier};
pub use generator::{GeneratorStats, TrafficGenerator};
pub use kinematics::{GeoPoint, KinematicState};
pub use link::DeviceLink;
