//! # CRSF Frame Encoder
//!
//! Serializes [`CrsfFrame`]s into wire bytes and builds the small control
//! frames the bridge injects on its own (heartbeat and ping).

use super::crc::Crc8;
use super::protocol::*;
use crate::error::Result;

/// Encode a complete CRSF frame
///
/// # Returns
///
/// * `Vec<u8>` - sync + length + type [+ dest + orig] + payload + crc
///
/// # Examples
///
/// ```
/// use crsf_bridge::crsf::encoder::encode_frame;
/// use crsf_bridge::crsf::protocol::CrsfFrame;
///
/// let frame = CrsfFrame::new(0x14, vec![0u8; 10], None).unwrap();
/// let bytes = encode_frame(&frame);
/// assert_eq!(bytes.len(), 14);
/// assert_eq!(bytes[1], 12);
/// ```
pub fn encode_frame(frame: &CrsfFrame) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame.wire_len());
    out.push(frame.sync_byte());
    out.push(frame.length());
    out.push(frame.frame_type());

    if let Some(addr) = frame.address() {
        out.push(addr.destination);
        out.push(addr.origin);
    }

    out.extend_from_slice(frame.payload());

    // Checksum starts at the type byte; sync and length are excluded
    let mut crc = Crc8::new();
    crc.update(&out[2..]);
    out.push(crc.finish());

    out
}

/// Validate the pieces of a frame and encode it in one step
///
/// # Errors
///
/// Returns error if the payload is too large for the length byte or the
/// addressing does not match the extended-type threshold.
pub fn encode(frame_type: u8, payload: &[u8], address: Option<ExtendedAddress>) -> Result<Vec<u8>> {
    let frame = CrsfFrame::new(frame_type, payload.to_vec(), address)?;
    Ok(encode_frame(&frame))
}

/// Build a heartbeat frame announcing `origin`
pub fn heartbeat_frame(origin: u8) -> CrsfFrame {
    CrsfFrame::from_parts(CRSF_SYNC_BYTE, FrameType::Heartbeat.as_u8(), None, vec![origin])
}

/// Build an extended ping frame from `origin` to `destination`
pub fn ping_frame(destination: u8, origin: u8) -> CrsfFrame {
    CrsfFrame::from_parts(
        CRSF_SYNC_BYTE,
        FrameType::Ping.as_u8(),
        Some(ExtendedAddress::new(destination, origin)),
        Vec::new(),
    )
}
