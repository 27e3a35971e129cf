//! # Telemetry Module
//!
//! Keeps the last decoded value of every telemetry kind seen on the serial
//! side of the bridge.
//!
//! This module handles:
//! - Dispatching frames to the per-type payload decoders
//! - Time-stamping each value on update
//! - Serializing the snapshot for STATUS envelopes

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::crsf::decoder::{
    decode_attitude, decode_battery_sensor, decode_flight_mode, decode_gps,
    decode_link_statistics,
};
use crate::crsf::protocol::{Attitude, BatterySensor, GpsData, LinkStatistics};
use crate::crsf::{CrsfFrame, FrameType};

/// A value and the wall-clock time it was last replaced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stamped<T> {
    pub value: T,
    pub updated_at: DateTime<Utc>,
}

impl<T> Stamped<T> {
    fn now(value: T) -> Self {
        Self {
            value,
            updated_at: Utc::now(),
        }
    }
}

/// Last-known telemetry values
///
/// Each entry is overwritten whole by the next frame of its kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub link_statistics: Option<Stamped<LinkStatistics>>,
    pub battery: Option<Stamped<BatterySensor>>,
    pub attitude: Option<Stamped<Attitude>>,
    pub flight_mode: Option<Stamped<String>>,
    pub gps: Option<Stamped<GpsData>>,
}

impl TelemetrySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update from one frame; returns whether anything changed
    ///
    /// Frames of other types, and telemetry frames whose payload does not
    /// decode, leave the snapshot untouched.
    pub fn apply(&mut self, frame: &CrsfFrame) -> bool {
        let payload = frame.payload();

        let updated = match frame.kind() {
            FrameType::LinkStatistics => decode_link_statistics(payload)
                .map(|v| self.link_statistics = Some(Stamped::now(v))),
            FrameType::BatterySensor => {
                decode_battery_sensor(payload).map(|v| self.battery = Some(Stamped::now(v)))
            }
            FrameType::Attitude => {
                decode_attitude(payload).map(|v| self.attitude = Some(Stamped::now(v)))
            }
            FrameType::FlightMode => {
                decode_flight_mode(payload).map(|v| self.flight_mode = Some(Stamped::now(v)))
            }
            FrameType::Gps => decode_gps(payload).map(|v| self.gps = Some(Stamped::now(v))),
            FrameType::Heartbeat
            | FrameType::RcChannelsPacked
            | FrameType::Ping
            | FrameType::DeviceInfo
            | FrameType::ParamEntry
            | FrameType::ParamRead
            | FrameType::ParamWrite
            | FrameType::Other(_) => return false,
        };

        match updated {
            Ok(()) => {
                debug!("Telemetry updated from {}", frame);
                true
            }
            Err(e) => {
                debug!("Skipping telemetry from {}: {}", frame, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crsf::ExtendedAddress;

    fn frame(frame_type: u8, payload: &[u8]) -> CrsfFrame {
        CrsfFrame::new(frame_type, payload.to_vec(), None).unwrap()
    }

    #[test]
    fn test_link_statistics_update() {
        let mut snapshot = TelemetrySnapshot::new();
        assert!(snapshot.apply(&frame(0x14, &[80, 0, 95, 250, 1, 2, 20, 0, 90, 6])));

        let stats = snapshot.link_statistics.as_ref().unwrap();
        assert_eq!(stats.value.uplink_rssi_1, Some(-80));
        assert_eq!(stats.value.uplink_rssi_2, None);
        assert_eq!(stats.value.uplink_quality, 95);
        assert_eq!(stats.value.uplink_snr, -6);
        assert_eq!(stats.value.downlink_snr, 6);
    }

    #[test]
    fn test_battery_update() {
        let mut snapshot = TelemetrySnapshot::new();
        // 16.8 V, -1.50 A, 1200 mAh, 87 %
        let payload = [0x06, 0x90, 0xFF, 0x6A, 0x00, 0x04, 0xB0, 87];
        assert!(snapshot.apply(&frame(0x08, &payload)));

        let battery = &snapshot.battery.as_ref().unwrap().value;
        assert!((battery.voltage - 16.8).abs() < 1e-4);
        assert!((battery.current + 1.5).abs() < 1e-4);
        assert_eq!(battery.capacity_used, 1200);
        assert_eq!(battery.remaining_percent, 87);
    }

    #[test]
    fn test_short_payload_is_skipped() {
        let mut snapshot = TelemetrySnapshot::new();
        assert!(!snapshot.apply(&frame(0x1E, &[0x00, 0x01])));
        assert!(snapshot.attitude.is_none());
    }

    #[test]
    fn test_malformed_flight_mode_keeps_last_value() {
        let mut snapshot = TelemetrySnapshot::new();
        assert!(snapshot.apply(&frame(0x21, b"ANGL\0\0")));
        assert!(!snapshot.apply(&frame(0x21, &[0xFF, 0xFE, 0x00])));

        assert_eq!(snapshot.flight_mode.as_ref().unwrap().value, "ANGL");
    }

    #[test]
    fn test_non_telemetry_frames_are_ignored() {
        let mut snapshot = TelemetrySnapshot::new();
        assert!(!snapshot.apply(&frame(0x0B, &[0xC8])));
        assert!(!snapshot.apply(&frame(0x27, &[1, 2, 3])));

        // Unknown extended types need addresses
        let extended = CrsfFrame::new(
            0x7A,
            vec![1, 2, 3],
            Some(ExtendedAddress::new(0xC8, 0xEA)),
        )
        .unwrap();
        assert_eq!(extended.kind(), FrameType::Other(0x7A));
        assert!(!snapshot.apply(&extended));

        assert_eq!(snapshot, TelemetrySnapshot::default());
    }

    #[test]
    fn test_newer_value_overwrites() {
        let mut snapshot = TelemetrySnapshot::new();
        snapshot.apply(&frame(0x21, b"ACRO\0"));
        let first = snapshot.flight_mode.clone().unwrap();

        snapshot.apply(&frame(0x21, b"HOR\0"));
        let second = snapshot.flight_mode.clone().unwrap();
        assert_eq!(second.value, "HOR");
        assert!(second.updated_at >= first.updated_at);
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut snapshot = TelemetrySnapshot::new();
        snapshot.apply(&frame(0x21, b"ACRO\0"));

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["flight_mode"]["value"], "ACRO");
        assert!(json["battery"].is_null());
        assert!(json["flight_mode"]["updated_at"].is_string());
    }
}
