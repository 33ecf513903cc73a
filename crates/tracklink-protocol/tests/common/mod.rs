//! Shared fixtures for protocol integration tests.

#![allow(dead_code)]

use tracklink_core::PhoneId;

/// Literal heartbeat frame from a real terminal.
pub const HEARTBEAT_HEX: &str = "7e00020000999999999118000c877e";

/// Location report from terminal 013800138000, serial 1:
/// emergency alarm, ACC on + fixed, 39.908722 N 116.397499 E, 100 m,
/// 60.0 km/h, heading 126, 2025-06-01 08:30:00, mileage 1000.0 km, fuel 10.0 L.
/// The heading byte is 0x7e and appears stuffed as `7d02`.
pub const LOCATION_HEX: &str = "7e02000026013800138000000100000001000000030260f57206f015bb00640258007d02250601083000010400002710020200643c7e";

pub fn hex(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
        .collect()
}

pub fn phone(digits: &str) -> PhoneId {
    PhoneId::new(digits).unwrap()
}
