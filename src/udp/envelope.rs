//! # UDP Envelope Codec
//!
//! Every datagram exchanged between two bridges is one envelope:
//!
//! ```text
//! [packet_type:1][timestamp_us:8 BE][payload_len:2 BE][payload]
//! ```
//!
//! The timestamp is the sender's wall clock in microseconds since the UNIX
//! epoch. It is advisory only; nothing on the receive side depends on it.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Header size: type + timestamp + length
pub const ENVELOPE_HEADER_SIZE: usize = 11;

/// Largest payload an envelope may carry
pub const MAX_ENVELOPE_PAYLOAD: usize = 65_523;

/// Heartbeat request body
pub const HEARTBEAT_PING: &[u8] = b"ping";

/// Heartbeat echo body
pub const HEARTBEAT_PONG: &[u8] = b"pong";

/// Envelope decoding/encoding errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("envelope too short: {0} bytes")]
    TooShort(usize),

    #[error("unknown packet type 0x{0:02X}")]
    UnknownType(u8),

    #[error("declared payload length {declared} but {actual} bytes follow the header")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("payload of {0} bytes exceeds envelope limit")]
    PayloadTooLarge(usize),
}

/// Envelope packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    CrsfData,
    Heartbeat,
    Status,
}

impl PacketType {
    pub fn as_u8(self) -> u8 {
        match self {
            PacketType::CrsfData => 0x01,
            PacketType::Heartbeat => 0x02,
            PacketType::Status => 0x03,
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = EnvelopeError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0x01 => Ok(PacketType::CrsfData),
            0x02 => Ok(PacketType::Heartbeat),
            0x03 => Ok(PacketType::Status),
            other => Err(EnvelopeError::UnknownType(other)),
        }
    }
}

/// One decoded envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpEnvelope {
    pub packet_type: PacketType,
    pub timestamp_us: u64,
    pub payload: Bytes,
}

impl UdpEnvelope {
    /// Serialize into a datagram
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::PayloadTooLarge`] if the payload exceeds
    /// [`MAX_ENVELOPE_PAYLOAD`].
    pub fn encode(&self) -> Result<Bytes, EnvelopeError> {
        encode(self.packet_type, self.timestamp_us, &self.payload)
    }

    /// Parse one datagram
    ///
    /// The whole datagram must be exactly one envelope: trailing bytes beyond
    /// the declared length are a mismatch, same as missing ones.
    pub fn decode(datagram: &[u8]) -> Result<Self, EnvelopeError> {
        if datagram.len() < ENVELOPE_HEADER_SIZE {
            return Err(EnvelopeError::TooShort(datagram.len()));
        }

        let mut header = &datagram[..ENVELOPE_HEADER_SIZE];
        let packet_type = PacketType::try_from(header.get_u8())?;
        let timestamp_us = header.get_u64();
        let declared = header.get_u16() as usize;

        let body = &datagram[ENVELOPE_HEADER_SIZE..];
        if body.len() != declared {
            return Err(EnvelopeError::LengthMismatch {
                declared,
                actual: body.len(),
            });
        }

        Ok(Self {
            packet_type,
            timestamp_us,
            payload: Bytes::copy_from_slice(body),
        })
    }

    pub fn is_heartbeat_ping(&self) -> bool {
        self.packet_type == PacketType::Heartbeat && &self.payload[..] == HEARTBEAT_PING
    }
}

/// Build one envelope datagram
pub fn encode(packet_type: PacketType, timestamp_us: u64, payload: &[u8]) -> Result<Bytes, EnvelopeError> {
    if payload.len() > MAX_ENVELOPE_PAYLOAD {
        return Err(EnvelopeError::PayloadTooLarge(payload.len()));
    }

    let mut out = BytesMut::with_capacity(ENVELOPE_HEADER_SIZE + payload.len());
    out.put_u8(packet_type.as_u8());
    out.put_u64(timestamp_us);
    out.put_u16(payload.len() as u16);
    out.put_slice(payload);
    Ok(out.freeze())
}

/// Microseconds since the UNIX epoch, as stamped on outgoing envelopes
pub fn now_micros() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_micros()).unwrap_or(0)
}
