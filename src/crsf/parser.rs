//! # CRSF Stream Parser
//!
//! Turns an arbitrary chunked byte stream into validated [`CrsfFrame`]s.
//!
//! The parser owns its buffer outright. Each relay direction keeps its own
//! instance, so nothing here needs locking.
//!
//! Resynchronization rules, applied until no progress can be made:
//!
//! 1. Drop everything before the first sync byte (or the whole buffer if
//!    there is none).
//! 2. A length byte outside `[2, 62]` means the "sync" was really noise: drop
//!    one byte and rescan.
//! 3. Wait for `length + 2` bytes, then cut exactly that many and validate.
//!    A CRC failure drops the cut bytes and scanning continues.

use bytes::{Buf, BytesMut};
use tracing::{debug, trace};

use super::decoder::decode_frame;
use super::protocol::*;

/// Counters kept by a [`CrsfParser`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParserStats {
    /// Frames that passed validation
    pub frames_decoded: u64,
    /// Candidate frames dropped by validation (CRC, addressing)
    pub invalid_frames: u64,
    /// Bytes skipped while hunting for a sync byte
    pub bytes_discarded: u64,
    /// Times the whole buffer was dropped because no sync byte was present
    pub sync_losses: u64,
}

/// Resynchronizing CRSF stream parser
#[derive(Debug, Default)]
pub struct CrsfParser {
    buffer: BytesMut,
    lost_sync: bool,
    stats: ParserStats,
}

impl CrsfParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(CRSF_MAX_FRAME_SIZE * 2),
            lost_sync: false,
            stats: ParserStats::default(),
        }
    }

    /// Append a chunk and return every frame now complete
    ///
    /// Never blocks and never needs a flush: an incomplete tail stays
    /// buffered until the next call supplies the rest.
    ///
    /// # Examples
    ///
    /// ```
    /// use crsf_bridge::crsf::encoder::encode;
    /// use crsf_bridge::crsf::parser::CrsfParser;
    ///
    /// let bytes = encode(0x14, &[0u8; 10], None).unwrap();
    /// let mut parser = CrsfParser::new();
    ///
    /// assert!(parser.add_data(&bytes[..5]).is_empty());
    /// let frames = parser.add_data(&bytes[5..]);
    /// assert_eq!(frames.len(), 1);
    /// ```
    pub fn add_data(&mut self, chunk: &[u8]) -> Vec<CrsfFrame> {
        self.buffer.extend_from_slice(chunk);
        self.lost_sync = false;

        let mut frames = Vec::new();

        loop {
            let Some(sync_pos) = self.buffer.iter().position(|&b| is_sync_byte(b)) else {
                if !self.buffer.is_empty() {
                    trace!("No sync byte in {} buffered bytes, dropping", self.buffer.len());
                    self.stats.bytes_discarded += self.buffer.len() as u64;
                    self.stats.sync_losses += 1;
                    self.buffer.clear();
                    self.lost_sync = true;
                }
                break;
            };

            if sync_pos > 0 {
                self.stats.bytes_discarded += sync_pos as u64;
                self.buffer.advance(sync_pos);
            }

            if self.buffer.len() < 2 {
                break;
            }

            let length = self.buffer[1];
            if !(CRSF_MIN_LENGTH..=CRSF_MAX_LENGTH).contains(&length) {
                self.stats.bytes_discarded += 1;
                self.buffer.advance(1);
                continue;
            }

            let total = length as usize + 2;
            if self.buffer.len() < total {
                break;
            }

            let candidate = self.buffer.split_to(total);
            match decode_frame(&candidate) {
                Ok(frame) => {
                    self.stats.frames_decoded += 1;
                    frames.push(frame);
                }
                Err(e) => {
                    debug!("Dropping candidate frame: {}", e);
                    self.stats.invalid_frames += 1;
                }
            }
        }

        frames
    }

    /// Whether the most recent [`add_data`](Self::add_data) threw bytes away
    /// because no sync byte could be found anywhere in the buffer
    pub fn lost_sync(&self) -> bool {
        self.lost_sync
    }

    /// Number of bytes waiting for the rest of a frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    /// Forget any partially received frame
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.lost_sync = false;
    }
}
