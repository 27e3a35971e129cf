//! One direction of the bridge: raw chunks in, forwardable byte blocks out

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, trace};

use crate::crsf::encoder::encode_frame;
use crate::crsf::parser::{CrsfParser, ParserStats};
use crate::crsf::CrsfFrame;

/// Counters for one relay direction
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RelayStats {
    pub chunks_in: u64,
    pub bytes_in: u64,
    pub frames_in: u64,
    pub frames_out: u64,
    pub bytes_out: u64,
    /// Chunks forwarded verbatim because no sync byte was found
    pub raw_fallbacks: u64,
    pub send_failures: u64,
    /// Decoded frames per CRSF type byte
    pub frame_types: BTreeMap<u8, u64>,
    pub last_frame_time: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub parser: ParserStats,
}

/// Result of feeding one chunk into a [`FrameRelay`]
#[derive(Debug, Default)]
pub struct RelayBatch {
    /// Frames completed by this chunk
    pub frames: Vec<CrsfFrame>,
    /// The chunk itself, when it had to be forwarded unparsed
    pub raw: Option<Vec<u8>>,
}

impl RelayBatch {
    /// Byte blocks to forward, in order
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        let mut out: Vec<Vec<u8>> = self.frames.iter().map(encode_frame).collect();
        if let Some(raw) = &self.raw {
            out.push(raw.clone());
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty() && self.raw.is_none()
    }
}

/// Parser plus statistics for one direction
///
/// Owned by the activity that feeds it.
#[derive(Debug)]
pub struct FrameRelay {
    name: &'static str,
    parser: CrsfParser,
    stats: RelayStats,
}

impl FrameRelay {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            parser: CrsfParser::new(),
            stats: RelayStats::default(),
        }
    }

    /// Feed one chunk
    ///
    /// Incomplete frames stay buffered. A chunk is passed through untouched
    /// only if it decoded to nothing and the parser found no sync byte in it.
    pub fn process(&mut self, chunk: &[u8]) -> RelayBatch {
        self.stats.chunks_in += 1;
        self.stats.bytes_in += chunk.len() as u64;
        trace!("{} in {:02X?}", self.name, chunk);

        let frames = self.parser.add_data(chunk);
        self.stats.parser = self.parser.stats();

        if !frames.is_empty() {
            self.stats.last_frame_time = Some(Utc::now());
        }
        for frame in &frames {
            self.stats.frames_in += 1;
            *self.stats.frame_types.entry(frame.frame_type()).or_insert(0) += 1;
            debug!("{}: {}", self.name, frame);
        }

        let raw = if frames.is_empty() && self.parser.lost_sync() && !chunk.is_empty() {
            debug!("{}: no sync in {} bytes, forwarding raw", self.name, chunk.len());
            self.stats.raw_fallbacks += 1;
            Some(chunk.to_vec())
        } else {
            None
        };

        RelayBatch { frames, raw }
    }

    /// Account for one forwarded block
    pub fn record_sent(&mut self, bytes: usize, ok: bool) {
        if ok {
            self.stats.frames_out += 1;
            self.stats.bytes_out += bytes as u64;
        } else {
            self.stats.send_failures += 1;
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }
}
