//! # Serial Communication Module
//!
//! Handles the half-duplex serial link to the CRSF radio module.
//!
//! This module handles:
//! - Opening the serial port 8N1 at the configured CRSF baud rate
//! - Direction-pin control (see [`direction`])
//! - Minimum-duration settle delays (see [`timer`])
//! - Exclusive transmit/receive arbitration (see [`transceiver`])

pub mod direction;
pub mod port_trait;
pub mod timer;
pub mod transceiver;

use std::time::Duration;

use tracing::info;

use crate::config::{DirectionConfig, SerialConfig};
use crate::error::{BridgeError, Result};
use direction::DirectionControl;
use timer::MonotonicDelay;
pub use transceiver::{HalfDuplexTransceiver, LineTiming};

/// Default CRSF baud rate for ELRS receivers
pub const CRSF_BAUD_RATE: u32 = 416_666;

/// Baud rates CRSF peripherals are known to run at
pub const SUPPORTED_BAUD_RATES: &[u32] = &[
    115_200, 400_000, 416_666, 420_000, 921_600, 1_870_000, 3_750_000,
];

/// Read timeout of the native port; reads are only issued for pending bytes
const PORT_TIMEOUT: Duration = Duration::from_millis(10);

/// Open a specific serial port with CRSF settings
///
/// # Arguments
///
/// * `path` - Device path (e.g., "/dev/serial0")
/// * `baud_rate` - Line speed
///
/// # Returns
///
/// * `Result<Box<dyn SerialPort>>` - Opened blocking serial port
pub fn open_port(path: &str, baud_rate: u32) -> Result<Box<dyn tokio_serial::SerialPort>> {
    let port = tokio_serial::new(path, baud_rate)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .timeout(PORT_TIMEOUT)
        .open()
        .map_err(|e| BridgeError::Serial(format!("Failed to open {}: {}", path, e)))?;

    Ok(port)
}

/// Open the port, claim the direction pins and build the transceiver
///
/// # Errors
///
/// Returns error if the port cannot be opened or a GPIO cannot be exported.
pub fn open_transceiver(
    serial: &SerialConfig,
    direction: &DirectionConfig,
) -> Result<HalfDuplexTransceiver> {
    let port = open_port(&serial.port, serial.baud_rate)?;
    let control = DirectionControl::from_config(direction)?;

    let timing = LineTiming {
        baud_rate: serial.baud_rate,
        settle: Duration::from_micros(direction.settle_us),
        tx_tail: Duration::from_micros(direction.tx_tail_us),
    };

    info!(
        "Opened {} at {} baud (direction: {:?}, invert: {})",
        serial.port, serial.baud_rate, direction.mode, serial.invert
    );

    HalfDuplexTransceiver::new(
        Box::new(port),
        control,
        timing,
        serial.invert,
        Box::new(MonotonicDelay),
    )
}
