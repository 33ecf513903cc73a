//! Dual distance + time suppression of location reports.
//!
//! A report goes out only when the vehicle has moved at least the tier
//! distance AND the tier time has passed since the last accepted report.
//!
//! | Speed | Distance | Time |
//! |-------|----------|------|
//! | > 20 km/h | 5 m | 5 s |
//! | 5–20 km/h | 10 m | 60 s |
//! | ≤ 5 km/h | 15 m | 300 s |

use crate::kinematics::KinematicState;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedTier {
    Fast,
    Moderate,
    Slow,
}

impl SpeedTier {
    pub fn for_speed(speed_kmh: f64) -> Self {
        if speed_kmh > 20.0 {
            SpeedTier::Fast
        } else if speed_kmh > 5.0 {
            SpeedTier::Moderate
        } else {
            SpeedTier::Slow
        }
    }

    pub fn min_distance_m(&self) -> f64 {
        match self {
            SpeedTier::Fast => 5.0,
            SpeedTier::Moderate => 10.0,
            SpeedTier::Slow => 15.0,
        }
    }

    pub fn min_interval(&self) -> Duration {
        match self {
            SpeedTier::Fast => Duration::from_secs(5),
            SpeedTier::Moderate => Duration::from_secs(60),
            SpeedTier::Slow => Duration::from_secs(300),
        }
    }
}

impl fmt::Display for SpeedTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SpeedTier::Fast => "fast",
            SpeedTier::Moderate => "moderate",
            SpeedTier::Slow => "slow",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateDecision {
    /// No report has been accepted yet.
    First,
    Publish {
        moved_m: f64,
        elapsed: Duration,
    },
    Suppress {
        tier: SpeedTier,
        moved_m: f64,
        elapsed: Duration,
        distance_ok: bool,
        time_ok: bool,
    },
}

impl GateDecision {
    pub fn should_publish(&self) -> bool {
        !matches!(self, GateDecision::Suppress { .. })
    }

    /// Which gate held the report back.
    pub fn failed_gate(&self) -> Option<&'static str> {
        match self {
            GateDecision::Suppress {
                distance_ok: false,
                time_ok: false,
                ..
            } => Some("distance+time"),
            GateDecision::Suppress {
                distance_ok: false, ..
            } => Some("distance"),
            GateDecision::Suppress { time_ok: false, .. } => Some("time"),
            _ => None,
        }
    }
}

/// Evaluate the gate for the current state at `now`, using the tier of the
/// current speed.
pub fn evaluate(state: &KinematicState, now: Instant) -> GateDecision {
    let Some(last) = state.last_published() else {
        return GateDecision::First;
    };

    let tier = SpeedTier::for_speed(state.speed_kmh);
    let moved_m = last.position.distance_to(&state.position);
    let elapsed = now.saturating_duration_since(last.at);
    let distance_ok = moved_m >= tier.min_distance_m();
    let time_ok = elapsed >= tier.min_interval();

    if distance_ok && time_ok {
        GateDecision::Publish { moved_m, elapsed }
    } else {
        GateDecision::Suppress {
            tier,
            moved_m,
            elapsed,
            distance_ok,
            time_ok,
        }
    }
}
