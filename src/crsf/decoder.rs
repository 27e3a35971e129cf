//! # CRSF Packet Decoder
//!
//! Validates complete CRSF frames and decodes the telemetry payloads the
//! bridge extracts (Link Statistics, Battery, Attitude, Flight Mode, GPS).

use super::crc::Crc8;
use super::protocol::*;
use crate::error::{BridgeError, Result};

/// Decode a complete CRSF frame
///
/// # Arguments
///
/// * `frame` - Exactly one frame: sync, length, type, [addresses], payload, crc
///
/// # Errors
///
/// Returns error if:
/// - Frame is shorter than 4 bytes
/// - Sync byte is not a known device address
/// - Length byte disagrees with the number of bytes supplied
/// - An extended frame is too short to hold its addresses
/// - CRC check fails
pub fn decode_frame(frame: &[u8]) -> Result<CrsfFrame> {
    if frame.len() < CRSF_MIN_FRAME_SIZE {
        return Err(BridgeError::CrsfProtocol(format!(
            "Frame too short: {} bytes",
            frame.len()
        )));
    }

    let sync_byte = frame[0];
    if !is_sync_byte(sync_byte) {
        return Err(BridgeError::CrsfProtocol(format!(
            "Invalid sync byte: 0x{:02X}",
            sync_byte
        )));
    }

    let length = frame[1] as usize;
    if frame.len() != length + 2 {
        return Err(BridgeError::CrsfProtocol(format!(
            "Length mismatch: header declares {} bytes, got {}",
            length + 2,
            frame.len()
        )));
    }

    let frame_type = frame[2];
    let crc_index = frame.len() - 1;

    let (address, payload_start) = if is_extended_type(frame_type) {
        // type + dest + orig + crc
        if length < 4 {
            return Err(BridgeError::CrsfProtocol(format!(
                "Extended frame 0x{:02X} too short for addresses",
                frame_type
            )));
        }
        (Some(ExtendedAddress::new(frame[3], frame[4])), 5)
    } else {
        (None, 3)
    };

    let mut crc = Crc8::new();
    crc.update(&frame[2..crc_index]);
    let calculated_crc = crc.finish();
    let received_crc = frame[crc_index];

    if calculated_crc != received_crc {
        return Err(BridgeError::CrsfProtocol(format!(
            "CRC mismatch: expected 0x{:02X}, got 0x{:02X}",
            calculated_crc, received_crc
        )));
    }

    let payload = frame[payload_start..crc_index].to_vec();
    Ok(CrsfFrame::from_parts(sync_byte, frame_type, address, payload))
}

/// RSSI bytes hold a positive magnitude; zero means "not measured"
fn rssi_dbm(raw: u8) -> Option<i16> {
    if raw == 0 {
        None
    } else {
        Some(-(raw as i16))
    }
}

/// Decode Link Statistics telemetry payload (10 bytes)
pub fn decode_link_statistics(payload: &[u8]) -> Result<LinkStatistics> {
    if payload.len() < CRSF_LINK_STATS_PAYLOAD_SIZE {
        return Err(BridgeError::CrsfProtocol(format!(
            "Link stats payload too short: {} bytes",
            payload.len()
        )));
    }

    Ok(LinkStatistics {
        uplink_rssi_1: rssi_dbm(payload[0]),
        uplink_rssi_2: rssi_dbm(payload[1]),
        uplink_quality: payload[2],
        uplink_snr: payload[3] as i8,
        antenna: payload[4],
        rf_mode: payload[5],
        tx_power: payload[6],
        downlink_rssi: rssi_dbm(payload[7]),
        downlink_quality: payload[8],
        downlink_snr: payload[9] as i8,
    })
}

/// Decode Battery Sensor telemetry payload (8 bytes)
pub fn decode_battery_sensor(payload: &[u8]) -> Result<BatterySensor> {
    if payload.len() < CRSF_BATTERY_SENSOR_PAYLOAD_SIZE {
        return Err(BridgeError::CrsfProtocol(format!(
            "Battery sensor payload too short: {} bytes",
            payload.len()
        )));
    }

    // Voltage: 2 bytes, big-endian, centi-volts
    let voltage_cv = u16::from_be_bytes([payload[0], payload[1]]);
    let voltage = voltage_cv as f32 / 100.0;

    // Current: 2 bytes, big-endian, signed centi-amps
    let current_ca = i16::from_be_bytes([payload[2], payload[3]]);
    let current = current_ca as f32 / 100.0;

    // Capacity: 3 bytes, big-endian, mAh
    let capacity_used = u32::from_be_bytes([0, payload[4], payload[5], payload[6]]);

    let remaining_percent = payload[7];

    Ok(BatterySensor {
        voltage,
        current,
        capacity_used,
        remaining_percent,
    })
}

/// Decode Attitude telemetry payload (6 bytes)
pub fn decode_attitude(payload: &[u8]) -> Result<Attitude> {
    if payload.len() < CRSF_ATTITUDE_PAYLOAD_SIZE {
        return Err(BridgeError::CrsfProtocol(format!(
            "Attitude payload too short: {} bytes",
            payload.len()
        )));
    }

    // Each angle: signed big-endian, radians x 10000
    let angle = |i: usize| i16::from_be_bytes([payload[i], payload[i + 1]]) as f32 / 10_000.0;

    Ok(Attitude {
        pitch: angle(0),
        roll: angle(2),
        yaw: angle(4),
    })
}

/// Decode Flight Mode telemetry payload (null-padded text)
///
/// # Errors
///
/// Returns error if the text is not valid UTF-8.
pub fn decode_flight_mode(payload: &[u8]) -> Result<String> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| BridgeError::CrsfProtocol(format!("Flight mode is not valid text: {}", e)))?;

    Ok(text.trim_end_matches('\0').to_string())
}

/// Decode GPS telemetry payload (15 bytes)
pub fn decode_gps(payload: &[u8]) -> Result<GpsData> {
    if payload.len() < CRSF_GPS_PAYLOAD_SIZE {
        return Err(BridgeError::CrsfProtocol(format!(
            "GPS payload too short: {} bytes",
            payload.len()
        )));
    }

    // Latitude: 4 bytes, big-endian, degrees × 10^7
    let lat_raw = i32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let latitude = lat_raw as f64 / 10_000_000.0;

    // Longitude: 4 bytes, big-endian, degrees × 10^7
    let lon_raw = i32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
    let longitude = lon_raw as f64 / 10_000_000.0;

    // Ground speed: 2 bytes, big-endian, km/h × 10
    let speed_raw = u16::from_be_bytes([payload[8], payload[9]]);
    let ground_speed = speed_raw as f32 / 10.0;

    // Heading: 2 bytes, big-endian, degrees × 100
    let heading_raw = u16::from_be_bytes([payload[10], payload[11]]);
    let heading = heading_raw as f32 / 100.0;

    // Altitude: 2 bytes, big-endian, meters + 1000
    let altitude_raw = u16::from_be_bytes([payload[12], payload[13]]);
    let altitude = altitude_raw as i32 - 1000;

    let satellites = payload[14];

    Ok(GpsData {
        latitude,
        longitude,
        ground_speed,
        heading,
        altitude,
        satellites,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crsf::encoder::{encode, encode_frame};
    use proptest::prelude::*;

    #[test]
    fn test_decode_frame_too_short() {
        let frame = [CRSF_SYNC_BYTE, 0x03];
        assert!(decode_frame(&frame).is_err());
    }

    #[test]
    fn test_decode_frame_invalid_sync() {
        let frame = [0xFF, 0x02, 0x16, 0x00];
        assert!(decode_frame(&frame).is_err());
    }

    #[test]
    fn test_decode_frame_length_mismatch() {
        let mut bytes = encode(0x14, &[1u8; 10], None).unwrap();
        bytes.push(0x00);
        assert!(decode_frame(&bytes).is_err());

        let bytes = encode(0x14, &[1u8; 10], None).unwrap();
        assert!(decode_frame(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_decode_valid_frame() {
        let bytes = encode(0x16, &[0x55; 22], None).unwrap();
        let decoded = decode_frame(&bytes).unwrap();

        assert_eq!(decoded.frame_type(), 0x16);
        assert_eq!(decoded.kind(), FrameType::RcChannelsPacked);
        assert_eq!(decoded.payload(), &[0x55; 22][..]);
        assert!(!decoded.is_extended());
    }

    #[test]
    fn test_decode_alternate_sync_byte() {
        let frame = CrsfFrame::with_sync(0xEA, 0x14, vec![0; 10], None).unwrap();
        let decoded = decode_frame(&encode_frame(&frame)).unwrap();
        assert_eq!(decoded.sync_byte(), 0xEA);
    }

    #[test]
    fn test_decode_extended_frame() {
        let bytes = encode(0x2D, &[0x05, 0x01], Some(ExtendedAddress::new(0xEE, 0xEA))).unwrap();
        let decoded = decode_frame(&bytes).unwrap();

        assert!(decoded.is_extended());
        assert_eq!(decoded.destination(), Some(0xEE));
        assert_eq!(decoded.origin(), Some(0xEA));
        assert_eq!(decoded.payload(), &[0x05, 0x01]);
    }

    #[test]
    fn test_decode_extended_frame_without_room_for_addresses() {
        // Length 2 with an extended type: CRC is valid but addresses are missing
        let crc = crate::crsf::crc::crc8_dvb_s2(&[0x28]);
        assert!(decode_frame(&[0xC8, 0x02, 0x28, crc]).is_err());
    }

    #[test]
    fn test_decode_frame_crc_error() {
        let mut bytes = encode(0x16, &[0x00; 22], None).unwrap();
        bytes[25] ^= 0xFF;
        assert!(decode_frame(&bytes).is_err());
    }

    #[test]
    fn test_decode_link_statistics() {
        let payload = [80u8, 0, 95, 250, 1, 2, 20, 0, 90, 6];
        let stats = decode_link_statistics(&payload).unwrap();

        assert_eq!(stats.uplink_rssi_1, Some(-80));
        assert_eq!(stats.uplink_rssi_2, None);
        assert_eq!(stats.uplink_quality, 95);
        assert_eq!(stats.uplink_snr, -6);
        assert_eq!(stats.antenna, 1);
        assert_eq!(stats.rf_mode, 2);
        assert_eq!(stats.tx_power, 20);
        assert_eq!(stats.downlink_rssi, None);
        assert_eq!(stats.downlink_quality, 90);
        assert_eq!(stats.downlink_snr, 6);
    }

    #[test]
    fn test_decode_link_statistics_too_short() {
        assert!(decode_link_statistics(&[100u8; 5]).is_err());
    }

    #[test]
    fn test_decode_battery_sensor() {
        let payload = [
            0x06, 0x8A, // Voltage: 1674 cV = 16.74V
            0xFF, 0x38, // Current: -200 cA = -2.00A
            0x00, 0x03, 0xE8, // Capacity: 1000 mAh
            0x4B, // Remaining: 75%
        ];

        let battery = decode_battery_sensor(&payload).unwrap();
        assert!((battery.voltage - 16.74).abs() < 0.001);
        assert!((battery.current - (-2.0)).abs() < 0.001);
        assert_eq!(battery.capacity_used, 1000);
        assert_eq!(battery.remaining_percent, 75);
    }

    #[test]
    fn test_decode_battery_sensor_too_short() {
        assert!(decode_battery_sensor(&[0u8; 7]).is_err());
    }

    #[test]
    fn test_decode_attitude() {
        let pitch: i16 = 1571; // ~0.1571 rad
        let roll: i16 = -3142;
        let yaw: i16 = 0;
        let mut payload = Vec::new();
        payload.extend_from_slice(&pitch.to_be_bytes());
        payload.extend_from_slice(&roll.to_be_bytes());
        payload.extend_from_slice(&yaw.to_be_bytes());

        let attitude = decode_attitude(&payload).unwrap();
        assert!((attitude.pitch - 0.1571).abs() < 1e-6);
        assert!((attitude.roll - (-0.3142)).abs() < 1e-6);
        assert_eq!(attitude.yaw, 0.0);
    }

    #[test]
    fn test_decode_attitude_too_short() {
        assert!(decode_attitude(&[0u8; 5]).is_err());
    }

    #[test]
    fn test_decode_flight_mode_trims_padding() {
        assert_eq!(decode_flight_mode(b"ANGL\0\0\0").unwrap(), "ANGL");
        assert_eq!(decode_flight_mode(b"").unwrap(), "");
    }

    #[test]
    fn test_decode_flight_mode_rejects_invalid_text() {
        assert!(decode_flight_mode(&[0xFF, 0xFE, 0x00]).is_err());
    }

    #[test]
    fn test_decode_gps() {
        let lat_raw: i32 = 377_749_000; // 37.7749 × 10^7
        let lon_raw: i32 = -1_224_194_000; // -122.4194 × 10^7

        let mut payload = Vec::new();
        payload.extend_from_slice(&lat_raw.to_be_bytes());
        payload.extend_from_slice(&lon_raw.to_be_bytes());
        payload.extend_from_slice(&[0x00, 0xFF]); // 25.5 km/h
        payload.extend_from_slice(&[0x23, 0x28]); // 90.00°
        payload.extend_from_slice(&[0x04, 0x4C]); // 1100 - 1000 = 100 m
        payload.push(12);

        let gps = decode_gps(&payload).unwrap();
        assert!((gps.latitude - 37.7749).abs() < 0.0001);
        assert!((gps.longitude - (-122.4194)).abs() < 0.0001);
        assert!((gps.ground_speed - 25.5).abs() < 0.1);
        assert!((gps.heading - 90.0).abs() < 0.1);
        assert_eq!(gps.altitude, 100);
        assert_eq!(gps.satellites, 12);
    }

    #[test]
    fn test_decode_gps_below_sea_level() {
        let mut payload = vec![0u8; 15];
        payload[12..14].copy_from_slice(&500u16.to_be_bytes());
        assert_eq!(decode_gps(&payload).unwrap().altitude, -500);
    }

    fn arb_frame() -> impl Strategy<Value = CrsfFrame> {
        let sync = proptest::sample::select(CRSF_SYNC_BYTES.to_vec());
        (sync, any::<u8>(), any::<u8>(), any::<u8>(), proptest::collection::vec(any::<u8>(), 0..=60))
            .prop_map(|(sync, frame_type, dest, orig, mut payload)| {
                if is_extended_type(frame_type) {
                    payload.truncate(CRSF_MAX_EXTENDED_PAYLOAD_SIZE);
                    CrsfFrame::with_sync(sync, frame_type, payload, Some(ExtendedAddress::new(dest, orig)))
                        .unwrap()
                } else {
                    CrsfFrame::with_sync(sync, frame_type, payload, None).unwrap()
                }
            })
    }

    proptest! {
        #[test]
        fn prop_encode_decode_round_trip(frame in arb_frame()) {
            let decoded = decode_frame(&encode_frame(&frame)).unwrap();
            prop_assert_eq!(decoded, frame);
        }

        #[test]
        fn prop_bit_flip_in_checked_region_is_rejected(
            frame in arb_frame(),
            index in any::<proptest::sample::Index>(),
            bit in 0u8..8,
        ) {
            let mut bytes = encode_frame(&frame);
            // Checked region: type through last payload byte
            let checked = bytes.len() - 3;
            let i = 2 + index.index(checked);
            bytes[i] ^= 1 << bit;

            // A flipped type byte can change the extended classification and
            // thus the layout; either way the frame must not decode unchanged.
            match decode_frame(&bytes) {
                Err(_) => {}
                Ok(decoded) => prop_assert_ne!(decoded, frame),
            }
        }
    }
}
