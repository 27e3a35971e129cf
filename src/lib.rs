//! # CRSF Bridge Library
//!
//! Relay CRSF (Crossfire) frames between a half-duplex serial radio link and
//! a UDP peer.
//!
//! Two bridges, one on each side of a network hop, let a flight-controller
//! side radio module and a ground-station side module talk as if they were
//! wired together. Frame boundaries and CRCs are preserved end to end, and
//! telemetry passing through is decoded along the way.

pub mod bridge;
pub mod config;
pub mod crsf;
pub mod error;
pub mod serial;
pub mod telemetry;
pub mod udp;
