//! Location report (0x0200) body.
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4 | alarm bits |
//! | 4 | 4 | status bits |
//! | 8 | 4 | latitude, 1e-6 degrees |
//! | 12 | 4 | longitude, 1e-6 degrees |
//! | 16 | 2 | altitude, m |
//! | 18 | 2 | speed, 0.1 km/h |
//! | 20 | 2 | direction, 0-359 |
//! | 22 | 6 | BCD time `YYMMDDhhmmss` |
//! | 28 | .. | extra items: id(1) len(1) value(len), until the end of the body |

use super::require;
use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracklink_core::{
    BcdTimestamp, Error, Result,
    constants::{COORDINATE_SCALE, LOCATION_BASE_LENGTH, message_id},
};

bitflags! {
    /// Vehicle status word. Unknown bits are retained.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StatusFlags: u32 {
        const ACC_ON = 1 << 0;
        const LOCATION_FIXED = 1 << 1;
        const LAT_SOUTH = 1 << 2;
        const LON_WEST = 1 << 3;
        const IN_OPERATION = 1 << 4;
        const ENCRYPTED = 1 << 5;
    }
}

bitflags! {
    /// Alarm word. Unknown bits are retained.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AlarmFlags: u32 {
        const EMERGENCY = 1 << 0;
        const OVERSPEED = 1 << 1;
        const FATIGUE_DRIVING = 1 << 2;
        const DANGER_WARNING = 1 << 3;
        const GNSS_MODULE_FAULT = 1 << 4;
        const GNSS_ANTENNA_DISCONNECTED = 1 << 5;
        const GNSS_ANTENNA_SHORT_CIRCUIT = 1 << 6;
        const MAIN_POWER_UNDERVOLTAGE = 1 << 7;
    }
}

/// Well-known extra item ids.
pub mod extra_id {
    /// Odometer, u32 in 0.1 km.
    pub const MILEAGE: u8 = 0x01;
    /// Fuel, u16 in 0.1 L.
    pub const FUEL: u8 = 0x02;
    /// Speed from the tachograph, u16 in 0.1 km/h.
    pub const RECORDER_SPEED: u8 = 0x03;
    /// Altitude from a dedicated sensor, u16 in m.
    pub const ALTITUDE_SENSOR: u8 = 0x04;
}

/// One TLV entry trailing the fixed location fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraItem {
    pub id: u8,
    pub value: Bytes,
}

impl ExtraItem {
    pub fn new(id: u8, value: impl Into<Bytes>) -> Self {
        ExtraItem {
            id,
            value: value.into(),
        }
    }

    pub fn u16(id: u8, value: u16) -> Self {
        Self::new(id, value.to_be_bytes().to_vec())
    }

    pub fn u32(id: u8, value: u32) -> Self {
        Self::new(id, value.to_be_bytes().to_vec())
    }

    /// Big-endian unsigned value, if the item is 1 to 8 bytes wide.
    pub fn as_uint(&self) -> Option<u64> {
        if self.value.is_empty() || self.value.len() > 8 {
            return None;
        }
        Some(self.value.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationReport {
    pub alarm: AlarmFlags,
    pub status: StatusFlags,
    /// Absolute latitude in millionths of a degree; hemisphere is in `status`.
    pub latitude: u32,
    /// Absolute longitude in millionths of a degree; hemisphere is in `status`.
    pub longitude: u32,
    pub altitude: u16,
    /// Tenths of km/h.
    pub speed: u16,
    pub direction: u16,
    pub time: BcdTimestamp,
    pub extras: Vec<ExtraItem>,
}

impl LocationReport {
    /// Build a fixed report from signed degrees; hemisphere bits follow the signs.
    pub fn new(
        latitude: f64,
        longitude: f64,
        altitude: u16,
        speed_kmh: f64,
        direction: u16,
        time: BcdTimestamp,
    ) -> Self {
        let mut status = StatusFlags::LOCATION_FIXED;
        status.set(StatusFlags::LAT_SOUTH, latitude < 0.0);
        status.set(StatusFlags::LON_WEST, longitude < 0.0);

        LocationReport {
            alarm: AlarmFlags::empty(),
            status,
            latitude: (latitude.abs() * COORDINATE_SCALE).round() as u32,
            longitude: (longitude.abs() * COORDINATE_SCALE).round() as u32,
            altitude,
            speed: (speed_kmh * 10.0).round().clamp(0.0, f64::from(u16::MAX)) as u16,
            direction: direction % 360,
            time,
            extras: Vec::new(),
        }
    }

    pub fn with_extra(mut self, item: ExtraItem) -> Self {
        self.extras.push(item);
        self
    }

    /// Signed latitude in degrees.
    pub fn latitude_deg(&self) -> f64 {
        let value = f64::from(self.latitude) / COORDINATE_SCALE;
        if self.status.contains(StatusFlags::LAT_SOUTH) {
            -value
        } else {
            value
        }
    }

    /// Signed longitude in degrees.
    pub fn longitude_deg(&self) -> f64 {
        let value = f64::from(self.longitude) / COORDINATE_SCALE;
        if self.status.contains(StatusFlags::LON_WEST) {
            -value
        } else {
            value
        }
    }

    pub fn speed_kmh(&self) -> f64 {
        f64::from(self.speed) / 10.0
    }

    pub fn encoded_len(&self) -> usize {
        LOCATION_BASE_LENGTH + self.extras.iter().map(|e| 2 + e.value.len()).sum::<usize>()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        Self::decode_for(message_id::LOCATION_REPORT, buf)
    }

    /// Decode, attributing errors to `message_id` (batch items reuse this layout).
    pub(crate) fn decode_for(message_id: u16, mut buf: &[u8]) -> Result<Self> {
        require(message_id, buf, LOCATION_BASE_LENGTH, "location report")?;

        let alarm = AlarmFlags::from_bits_retain(buf.get_u32());
        let status = StatusFlags::from_bits_retain(buf.get_u32());
        let latitude = buf.get_u32();
        let longitude = buf.get_u32();
        let altitude = buf.get_u16();
        let speed = buf.get_u16();
        let direction = buf.get_u16();
        let mut time = [0u8; 6];
        buf.copy_to_slice(&mut time);

        let mut extras = Vec::new();
        while buf.has_remaining() {
            require(message_id, buf, 2, "extra item header")?;
            let id = buf.get_u8();
            let len = usize::from(buf.get_u8());
            if buf.len() < len {
                return Err(Error::invalid_body(
                    message_id,
                    format!("extra item 0x{id:02x} declares {len} bytes, {} left", buf.len()),
                ));
            }
            extras.push(ExtraItem::new(id, buf.copy_to_bytes(len)));
        }

        Ok(LocationReport {
            alarm,
            status,
            latitude,
            longitude,
            altitude,
            speed,
            direction,
            time: BcdTimestamp::from_bcd(time),
            extras,
        })
    }

    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        self.encode_for(message_id::LOCATION_REPORT, dst)
    }

    pub(crate) fn encode_for(&self, message_id: u16, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(self.encoded_len());
        dst.put_u32(self.alarm.bits());
        dst.put_u32(self.status.bits());
        dst.put_u32(self.latitude);
        dst.put_u32(self.longitude);
        dst.put_u16(self.altitude);
        dst.put_u16(self.speed);
        dst.put_u16(self.direction);
        dst.put_slice(self.time.as_bcd());

        for item in &self.extras {
            let len = u8::try_from(item.value.len()).map_err(|_| {
                Error::invalid_body(
                    message_id,
                    format!("extra item 0x{:02x} exceeds 255 bytes", item.id),
                )
            })?;
            dst.put_u8(item.id);
            dst.put_u8(len);
            dst.put_slice(&item.value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample_time() -> BcdTimestamp {
        BcdTimestamp::from_datetime(Utc.with_ymd_and_hms(2025, 6, 1, 8, 30, 0).unwrap())
    }

    #[test]
    fn test_hemisphere_bits_follow_sign() {
        let report = LocationReport::new(-33.8688, -151.2093, 20, 42.5, 370, sample_time());
        assert!(report.status.contains(StatusFlags::LAT_SOUTH));
        assert!(report.status.contains(StatusFlags::LON_WEST));
        assert_eq!(report.latitude, 33_868_800);
        assert_eq!(report.speed, 425);
        assert_eq!(report.direction, 10);
        assert!((report.latitude_deg() + 33.8688).abs() < 1e-9);
        assert!((report.longitude_deg() + 151.2093).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_status_bits_survive() {
        let mut report = LocationReport::new(1.0, 2.0, 0, 0.0, 0, sample_time());
        report.status = StatusFlags::from_bits_retain(0x8000_0003);
        report.alarm = AlarmFlags::from_bits_retain(0x0001_0001);

        let mut buf = BytesMut::new();
        report.encode(&mut buf).unwrap();
        let decoded = LocationReport::decode(&buf).unwrap();
        assert_eq!(decoded.status.bits(), 0x8000_0003);
        assert_eq!(decoded.alarm.bits(), 0x0001_0001);
        assert!(decoded.alarm.contains(AlarmFlags::EMERGENCY));
    }

    #[test]
    fn test_extras_consume_rest_of_body() {
        let report = LocationReport::new(39.908722, 116.397499, 100, 60.0, 45, sample_time())
            .with_extra(ExtraItem::u32(extra_id::MILEAGE, 100_000))
            .with_extra(ExtraItem::u16(extra_id::FUEL, 750))
            .with_extra(ExtraItem::new(0x30, vec![0x1f]));

        let mut buf = BytesMut::new();
        report.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), report.encoded_len());
        assert_eq!(buf.len(), 28 + 6 + 4 + 3);

        let decoded = LocationReport::decode(&buf).unwrap();
        assert_eq!(decoded.extras.len(), 3);
        assert_eq!(decoded.extras[0].as_uint(), Some(100_000));
        assert_eq!(decoded.extras[2].id, 0x30);
        assert_eq!(decoded, report);
    }

    #[test]
    fn test_truncated_extra_item() {
        let report = LocationReport::new(1.0, 1.0, 0, 0.0, 0, sample_time());
        let mut buf = BytesMut::new();
        report.encode(&mut buf).unwrap();
        buf.put_slice(&[0x01, 0x04, 0x00]);
        assert!(matches!(
            LocationReport::decode(&buf),
            Err(Error::InvalidBody { message_id: 0x0200, .. })
        ));

        // A lone id byte without a length.
        buf.truncate(29);
        assert!(LocationReport::decode(&buf).is_err());
    }

    #[test]
    fn test_short_body() {
        assert!(LocationReport::decode(&[0u8; 27]).is_err());
    }
}
