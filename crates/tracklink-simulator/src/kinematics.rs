//! Simulated vehicle motion.

use crate::config::DeviceProfile;
use crate::gate::SpeedTier;
use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;
use tracklink_core::BcdTimestamp;
use tracklink_protocol::{ExtraItem, LocationReport, body::location::extra_id};

const EARTH_RADIUS_M: f64 = 6_371_000.0;
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Ground speed used for drift, independent of the reported speed.
pub const DRIFT_SPEED_MPS: f64 = 5.0;
const HEADING_JITTER_DEG: f64 = 10.0;
const SPEED_JITTER_KMH: f64 = 10.0;
const MAX_SPEED_KMH: f64 = 120.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance in meters.
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }

    /// Point `meters` away along `heading_deg` (0 = north, clockwise).
    pub fn offset(&self, heading_deg: f64, meters: f64) -> GeoPoint {
        let heading = heading_deg.to_radians();
        let dlat = meters * heading.cos() / METERS_PER_DEGREE;
        let lon_scale = (METERS_PER_DEGREE * self.latitude.to_radians().cos()).max(1.0);
        let dlon = meters * heading.sin() / lon_scale;
        GeoPoint {
            latitude: (self.latitude + dlat).clamp(-90.0, 90.0),
            longitude: wrap_longitude(self.longitude + dlon),
        }
    }
}

fn wrap_longitude(lon: f64) -> f64 {
    if lon > 180.0 {
        lon - 360.0
    } else if lon < -180.0 {
        lon + 360.0
    } else {
        lon
    }
}

/// What was true at the last accepted publish.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PublishMark {
    pub position: GeoPoint,
    pub at: Instant,
    pub tier: SpeedTier,
}

#[derive(Debug, Clone)]
pub struct KinematicState {
    pub position: GeoPoint,
    pub heading: f64,
    pub speed_kmh: f64,
    base_speed_kmh: f64,
    altitude: u16,
    mileage: u32,
    fuel: u16,
    moving: bool,
    last_published: Option<PublishMark>,
}

impl KinematicState {
    pub fn new(profile: &DeviceProfile) -> Self {
        Self {
            position: GeoPoint::new(profile.start_latitude, profile.start_longitude),
            heading: f64::from(profile.direction % 360),
            speed_kmh: profile.speed.clamp(0.0, MAX_SPEED_KMH),
            base_speed_kmh: profile.speed,
            altitude: profile.altitude,
            mileage: profile.mileage,
            fuel: profile.fuel,
            moving: profile.moving,
            last_published: None,
        }
    }

    pub fn last_published(&self) -> Option<&PublishMark> {
        self.last_published.as_ref()
    }

    /// Advance one tick of `dt`. No-op when movement is disabled.
    pub fn drift(&mut self, dt: Duration, rng: &mut impl Rng) {
        if !self.moving {
            return;
        }
        let meters = DRIFT_SPEED_MPS * dt.as_secs_f64();
        self.position = self.position.offset(self.heading, meters);
        self.heading = (self.heading + rng.gen_range(-HEADING_JITTER_DEG..=HEADING_JITTER_DEG))
            .rem_euclid(360.0);
        self.speed_kmh = (self.base_speed_kmh
            + rng.gen_range(-SPEED_JITTER_KMH..=SPEED_JITTER_KMH))
        .clamp(0.0, MAX_SPEED_KMH);
    }

    /// Record a publish; position, time and tier move together.
    pub fn mark_published(&mut self, now: Instant) {
        self.last_published = Some(PublishMark {
            position: self.position,
            at: now,
            tier: SpeedTier::for_speed(self.speed_kmh),
        });
    }

    pub fn report(&self, time: BcdTimestamp) -> LocationReport {
        LocationReport::new(
            self.position.latitude,
            self.position.longitude,
            self.altitude,
            self.speed_kmh,
            (self.heading.round() as u16) % 360,
            time,
        )
        .with_extra(ExtraItem::u32(extra_id::MILEAGE, self.mileage))
        .with_extra(ExtraItem::u16(extra_id::FUEL, self.fuel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_distance_one_degree_latitude() {
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(1.0, 0.0);
        let d = a.distance_to(&b);
        assert!((d - 111_195.0).abs() < 50.0, "got {d}");
    }

    #[test]
    fn test_offset_roundtrips_distance() {
        let start = GeoPoint::new(39.908722, 116.397499);
        for heading in [0.0, 45.0, 90.0, 200.0] {
            let moved = start.offset(heading, 25.0);
            let d = start.distance_to(&moved);
            assert!((d - 25.0).abs() < 0.5, "heading {heading}: {d}");
        }
    }

    #[test]
    fn test_drift_moves_about_five_meters_per_second() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut state = KinematicState::new(&DeviceProfile::default());
        let before = state.position;

        state.drift(Duration::from_secs(5), &mut rng);

        let d = before.distance_to(&state.position);
        assert!((d - 25.0).abs() < 0.5, "moved {d}");
        assert!((0.0..360.0).contains(&state.heading));
        assert!((50.0..=70.0).contains(&state.speed_kmh));
    }

    #[test]
    fn test_drift_disabled() {
        let mut rng = StdRng::seed_from_u64(7);
        let profile = DeviceProfile {
            moving: false,
            ..DeviceProfile::default()
        };
        let mut state = KinematicState::new(&profile);
        let before = state.position;
        state.drift(Duration::from_secs(60), &mut rng);
        assert_eq!(state.position, before);
    }

    #[test]
    fn test_report_carries_extras() {
        let state = KinematicState::new(&DeviceProfile::default());
        let report = state.report(BcdTimestamp::now());
        assert_eq!(report.latitude, 39_908_722);
        assert_eq!(report.direction, 45);
        assert_eq!(report.extras.len(), 2);
        assert_eq!(report.extras[0].as_uint(), Some(10000));
    }
}
