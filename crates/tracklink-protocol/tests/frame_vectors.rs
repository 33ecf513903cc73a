//! Known-good frames decoded and re-encoded byte for byte.

mod common;

use chrono::{TimeZone, Utc};
use common::{HEARTBEAT_HEX, LOCATION_HEX, hex};
use tracklink_protocol::{
    AlarmFlags, Body, MessageRegistry, StatusFlags,
    body::location::extra_id,
    frame::{decode, encode},
};

#[test]
fn test_heartbeat_vector() {
    let raw = hex(HEARTBEAT_HEX);
    let msg = decode(&raw).unwrap();

    assert_eq!(msg.message_id, 0x0002);
    assert_eq!(msg.phone.to_string(), "999999999118");
    assert!(msg.body.is_empty());
    assert_eq!(msg.checksum, 0x87);
    assert_eq!(MessageRegistry::decode_message(&msg).unwrap(), Body::Heartbeat);
    assert_eq!(encode(&msg).unwrap().to_vec(), raw);
}

#[test]
fn test_location_vector_interpretation() {
    let raw = hex(LOCATION_HEX);
    let msg = decode(&raw).unwrap();
    assert_eq!(msg.message_id, 0x0200);
    assert_eq!(msg.phone.to_string(), "013800138000");
    assert_eq!(msg.serial, 1);
    assert_eq!(msg.attributes.body_length, 38);

    let Body::Location(report) = MessageRegistry::decode_message(&msg).unwrap() else {
        panic!("expected a location body");
    };

    assert_eq!(report.alarm, AlarmFlags::EMERGENCY);
    assert!(!report.alarm.contains(AlarmFlags::OVERSPEED));
    assert_eq!(report.status, StatusFlags::ACC_ON | StatusFlags::LOCATION_FIXED);
    assert!(!report.status.contains(StatusFlags::LAT_SOUTH));
    assert!(!report.status.contains(StatusFlags::LON_WEST));

    assert!((report.latitude_deg() - 39.908722).abs() < 1e-9);
    assert!((report.longitude_deg() - 116.397499).abs() < 1e-9);
    assert_eq!(report.altitude, 100);
    assert!((report.speed_kmh() - 60.0).abs() < 1e-9);
    assert_eq!(report.direction, 126);
    assert_eq!(
        report.time.to_datetime().unwrap(),
        Utc.with_ymd_and_hms(2025, 6, 1, 8, 30, 0).unwrap()
    );

    assert_eq!(report.extras.len(), 2);
    assert_eq!(report.extras[0].id, extra_id::MILEAGE);
    assert_eq!(report.extras[0].as_uint(), Some(10_000));
    assert_eq!(report.extras[1].id, extra_id::FUEL);
    assert_eq!(report.extras[1].as_uint(), Some(100));
}

#[test]
fn test_location_vector_reencodes_identically() {
    let raw = hex(LOCATION_HEX);
    let msg = decode(&raw).unwrap();
    let body = MessageRegistry::decode_message(&msg).unwrap();

    let rebuilt = MessageRegistry::build(msg.phone, msg.serial, &body).unwrap();
    assert_eq!(rebuilt, msg);
    assert_eq!(encode(&rebuilt).unwrap().to_vec(), raw);
}
