//! # CRSF Protocol Constants and Types
//!
//! Core protocol definitions for CRSF (Crossfire) communication.
//!
//! Wire layout of a frame:
//!
//! ```text
//! [sync:1][len:1][type:1]([dest:1][orig:1] if type >= 0x28)[payload][crc:1]
//! ```
//!
//! `len` counts everything after itself: type, addresses, payload and CRC.

use serde::Serialize;

use crate::error::{BridgeError, Result};

/// Default CRSF frame sync byte (flight controller address)
pub const CRSF_SYNC_BYTE: u8 = 0xC8;

/// Bytes that may open a frame. CRSF reuses device addresses as sync bytes.
pub const CRSF_SYNC_BYTES: [u8; 4] = [0xC8, 0xEA, 0xEC, 0xEE];

/// Smallest legal value of the length byte (type + crc)
pub const CRSF_MIN_LENGTH: u8 = 2;

/// Largest legal value of the length byte
pub const CRSF_MAX_LENGTH: u8 = 62;

/// Maximum complete frame size on the wire (sync + len + 62)
pub const CRSF_MAX_FRAME_SIZE: usize = CRSF_MAX_LENGTH as usize + 2;

/// Minimum complete frame size on the wire: sync(1) + length(1) + type(1) + crc(1)
pub const CRSF_MIN_FRAME_SIZE: usize = 4;

/// Maximum payload of a standard frame (62 - type - crc)
pub const CRSF_MAX_PAYLOAD_SIZE: usize = 60;

/// Maximum payload of an extended frame (62 - type - dest - orig - crc)
pub const CRSF_MAX_EXTENDED_PAYLOAD_SIZE: usize = 58;

/// Frame types at or above this value carry destination/origin addresses
pub const CRSF_EXTENDED_TYPE_THRESHOLD: u8 = 0x28;

/// Link Statistics payload size
pub const CRSF_LINK_STATS_PAYLOAD_SIZE: usize = 10;

/// Battery Sensor payload size
pub const CRSF_BATTERY_SENSOR_PAYLOAD_SIZE: usize = 8;

/// Attitude payload size
pub const CRSF_ATTITUDE_PAYLOAD_SIZE: usize = 6;

/// GPS payload size
pub const CRSF_GPS_PAYLOAD_SIZE: usize = 15;

/// Returns `true` if `byte` may start a CRSF frame
pub fn is_sync_byte(byte: u8) -> bool {
    CRSF_SYNC_BYTES.contains(&byte)
}

/// Returns `true` if frames of this raw type carry extended addressing
pub fn is_extended_type(frame_type: u8) -> bool {
    frame_type >= CRSF_EXTENDED_TYPE_THRESHOLD
}

/// Known CRSF frame types.
///
/// Anything else is kept verbatim in [`FrameType::Other`] so the bridge can
/// relay it without understanding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FrameType {
    Gps,
    BatterySensor,
    Heartbeat,
    LinkStatistics,
    RcChannelsPacked,
    Attitude,
    FlightMode,
    Ping,
    DeviceInfo,
    ParamEntry,
    ParamRead,
    ParamWrite,
    Other(u8),
}

impl FrameType {
    /// Raw wire value
    pub fn as_u8(self) -> u8 {
        match self {
            FrameType::Gps => 0x02,
            FrameType::BatterySensor => 0x08,
            FrameType::Heartbeat => 0x0B,
            FrameType::LinkStatistics => 0x14,
            FrameType::RcChannelsPacked => 0x16,
            FrameType::Attitude => 0x1E,
            FrameType::FlightMode => 0x21,
            FrameType::Ping => 0x28,
            FrameType::DeviceInfo => 0x29,
            FrameType::ParamEntry => 0x2B,
            FrameType::ParamRead => 0x2C,
            FrameType::ParamWrite => 0x2D,
            FrameType::Other(raw) => raw,
        }
    }

    pub fn is_extended(self) -> bool {
        is_extended_type(self.as_u8())
    }
}

impl From<u8> for FrameType {
    fn from(raw: u8) -> Self {
        match raw {
            0x02 => FrameType::Gps,
            0x08 => FrameType::BatterySensor,
            0x0B => FrameType::Heartbeat,
            0x14 => FrameType::LinkStatistics,
            0x16 => FrameType::RcChannelsPacked,
            0x1E => FrameType::Attitude,
            0x21 => FrameType::FlightMode,
            0x28 => FrameType::Ping,
            0x29 => FrameType::DeviceInfo,
            0x2B => FrameType::ParamEntry,
            0x2C => FrameType::ParamRead,
            0x2D => FrameType::ParamWrite,
            other => FrameType::Other(other),
        }
    }
}

impl From<FrameType> for u8 {
    fn from(frame_type: FrameType) -> Self {
        frame_type.as_u8()
    }
}

/// CRSF device addresses
pub mod address {
    pub const BROADCAST: u8 = 0x00;
    pub const FLIGHT_CONTROLLER: u8 = 0xC8;
    pub const REMOTE: u8 = 0xEA;
    pub const RECEIVER: u8 = 0xEC;
    pub const TRANSMITTER: u8 = 0xEE;
}

/// Destination/origin pair carried by extended frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtendedAddress {
    pub destination: u8,
    pub origin: u8,
}

impl ExtendedAddress {
    pub fn new(destination: u8, origin: u8) -> Self {
        Self { destination, origin }
    }
}

/// CRSF frame structure
///
/// Frames are only constructed through [`CrsfFrame::new`] /
/// [`CrsfFrame::with_sync`] or by the decoder, so every instance satisfies the
/// length limit and carries addresses exactly when its type is extended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrsfFrame {
    sync_byte: u8,
    frame_type: u8,
    address: Option<ExtendedAddress>,
    payload: Vec<u8>,
}

impl CrsfFrame {
    /// Create a new CRSF frame with the default sync byte
    ///
    /// # Arguments
    ///
    /// * `frame_type` - Raw frame type byte
    /// * `payload` - Payload data
    /// * `address` - Destination/origin, required iff the type is extended
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Payload exceeds the room left by the 62-byte length limit
    /// - An extended type has no address, or a standard type has one
    pub fn new(frame_type: u8, payload: Vec<u8>, address: Option<ExtendedAddress>) -> Result<Self> {
        Self::with_sync(CRSF_SYNC_BYTE, frame_type, payload, address)
    }

    /// Create a new CRSF frame with an explicit sync byte
    pub fn with_sync(
        sync_byte: u8,
        frame_type: u8,
        payload: Vec<u8>,
        address: Option<ExtendedAddress>,
    ) -> Result<Self> {
        if !is_sync_byte(sync_byte) {
            return Err(BridgeError::CrsfProtocol(format!(
                "Invalid sync byte: 0x{:02X}",
                sync_byte
            )));
        }

        let extended = is_extended_type(frame_type);
        match (extended, address.is_some()) {
            (true, false) => {
                return Err(BridgeError::CrsfProtocol(format!(
                    "Extended frame type 0x{:02X} requires destination and origin",
                    frame_type
                )));
            }
            (false, true) => {
                return Err(BridgeError::CrsfProtocol(format!(
                    "Frame type 0x{:02X} is not extended and cannot carry addresses",
                    frame_type
                )));
            }
            _ => {}
        }

        let max_payload = if extended {
            CRSF_MAX_EXTENDED_PAYLOAD_SIZE
        } else {
            CRSF_MAX_PAYLOAD_SIZE
        };
        if payload.len() > max_payload {
            return Err(BridgeError::CrsfProtocol(format!(
                "Payload size {} exceeds maximum {}",
                payload.len(),
                max_payload
            )));
        }

        Ok(Self {
            sync_byte,
            frame_type,
            address,
            payload,
        })
    }

    /// Assemble a frame whose invariants the caller has already checked
    pub(crate) fn from_parts(
        sync_byte: u8,
        frame_type: u8,
        address: Option<ExtendedAddress>,
        payload: Vec<u8>,
    ) -> Self {
        debug_assert_eq!(is_extended_type(frame_type), address.is_some());
        debug_assert!(payload.len() <= CRSF_MAX_PAYLOAD_SIZE);
        Self {
            sync_byte,
            frame_type,
            address,
            payload,
        }
    }

    pub fn sync_byte(&self) -> u8 {
        self.sync_byte
    }

    /// Raw frame type byte
    pub fn frame_type(&self) -> u8 {
        self.frame_type
    }

    /// Classified frame type
    pub fn kind(&self) -> FrameType {
        FrameType::from(self.frame_type)
    }

    pub fn is_extended(&self) -> bool {
        self.address.is_some()
    }

    pub fn address(&self) -> Option<ExtendedAddress> {
        self.address
    }

    pub fn destination(&self) -> Option<u8> {
        self.address.map(|a| a.destination)
    }

    pub fn origin(&self) -> Option<u8> {
        self.address.map(|a| a.origin)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Value of the length byte (type + addresses + payload + crc)
    ///
    /// Cannot overflow: the constructor caps the payload so this is at most 62.
    pub fn length(&self) -> u8 {
        let address_len = if self.address.is_some() { 2 } else { 0 };
        (1 + address_len + self.payload.len() + 1) as u8
    }

    /// Total size on the wire (length + sync + length byte)
    pub fn wire_len(&self) -> usize {
        self.length() as usize + 2
    }
}

impl std::fmt::Display for CrsfFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CRSF[{:02X}", self.frame_type)?;
        if let Some(addr) = self.address {
            write!(f, " {:02X}->{:02X}", addr.origin, addr.destination)?;
        }
        write!(f, "] len={} payload={}b", self.length(), self.payload.len())
    }
}

/// Link statistics telemetry data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkStatistics {
    /// Uplink RSSI antenna 1 in dBm, `None` when the module reports 0
    pub uplink_rssi_1: Option<i16>,

    /// Uplink RSSI antenna 2 in dBm, `None` when the module reports 0
    pub uplink_rssi_2: Option<i16>,

    /// Uplink link quality (0-100%)
    pub uplink_quality: u8,

    /// Uplink SNR in dB
    pub uplink_snr: i8,

    /// Active antenna index
    pub antenna: u8,

    /// RF mode / packet rate index
    pub rf_mode: u8,

    /// Uplink TX power index
    pub tx_power: u8,

    /// Downlink RSSI in dBm, `None` when the module reports 0
    pub downlink_rssi: Option<i16>,

    /// Downlink link quality (0-100%)
    pub downlink_quality: u8,

    /// Downlink SNR in dB
    pub downlink_snr: i8,
}

/// Battery sensor telemetry data
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatterySensor {
    /// Battery voltage in volts
    pub voltage: f32,

    /// Current draw in amperes (negative while charging)
    pub current: f32,

    /// Capacity used in mAh
    pub capacity_used: u32,

    /// Battery remaining percentage (0-100%)
    pub remaining_percent: u8,
}

/// Attitude telemetry data, all angles in radians
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Attitude {
    pub pitch: f32,
    pub roll: f32,
    pub yaw: f32,
}

/// GPS telemetry data
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GpsData {
    /// Latitude in degrees
    pub latitude: f64,

    /// Longitude in degrees
    pub longitude: f64,

    /// Ground speed in km/h
    pub ground_speed: f32,

    /// Heading in degrees
    pub heading: f32,

    /// Altitude in meters
    pub altitude: i32,

    /// Number of satellites
    pub satellites: u8,
}
