//! # CRSF Protocol Module
//!
//! Implementation of the Crossfire (CRSF) frame format.
//!
//! This module handles:
//! - Frame encoding with standard and extended (addressed) layouts
//! - Frame validation and telemetry payload decoding
//! - CRC8-DVB-S2 checksum calculation
//! - Stream resynchronization over noisy, chunked input

pub mod protocol;
pub mod encoder;
pub mod decoder;
pub mod crc;
pub mod parser;

pub use parser::CrsfParser;
pub use protocol::{CrsfFrame, ExtendedAddress, FrameType};
