//! # CRC8-DVB-S2 Implementation
//!
//! CRC-8-DVB-S2 checksum used by every CRSF frame.
//!
//! **Polynomial**: 0xD5 (x^8 + x^7 + x^6 + x^4 + x^2 + 1), MSB first, no reflection
//! **Initial Value**: 0x00
//!
//! The checksum covers the frame type, the extended addresses (if any) and the
//! payload. Sync and length bytes are never included.

/// CRC-8-DVB-S2 polynomial
const CRC8_POLY: u8 = 0xD5;

/// Precomputed CRC8 lookup table
const CRC8_TABLE: [u8; 256] = generate_crc8_table();

const fn generate_crc8_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = i as u8;
        let mut j = 0;

        while j < 8 {
            if (crc & 0x80) != 0 {
                crc = (crc << 1) ^ CRC8_POLY;
            } else {
                crc <<= 1;
            }
            j += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

/// Running CRC8-DVB-S2 state.
///
/// Lets a frame be checksummed piecewise (type, then addresses, then payload)
/// without first copying the pieces into one buffer.
///
/// ```
/// use crsf_bridge::crsf::crc::{crc8_dvb_s2, Crc8};
///
/// let mut crc = Crc8::new();
/// crc.update(&[0x28]);
/// crc.update(&[0x00, 0xC8]);
/// assert_eq!(crc.finish(), crc8_dvb_s2(&[0x28, 0x00, 0xC8]));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Crc8 {
    value: u8,
}

impl Crc8 {
    pub const fn new() -> Self {
        Self { value: 0 }
    }

    /// Feed more bytes into the checksum
    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.value = CRC8_TABLE[(self.value ^ byte) as usize];
        }
    }

    /// Current checksum value
    pub fn finish(&self) -> u8 {
        self.value
    }
}

/// Calculate CRC8-DVB-S2 over a contiguous byte slice
///
/// # Examples
///
/// ```
/// use crsf_bridge::crsf::crc::crc8_dvb_s2;
///
/// assert_eq!(crc8_dvb_s2(b"123456789"), 0xBC);
/// ```
pub fn crc8_dvb_s2(data: &[u8]) -> u8 {
    let mut crc = Crc8::new();
    crc.update(data);
    crc.finish()
}
