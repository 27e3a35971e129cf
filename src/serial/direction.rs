//! # Direction Control
//!
//! Drives the transceiver's direction pins. Three wirings are supported:
//!
//! - `Single`: one `DIR` pin, high = transmit (SN74LVC1T45 style buffers)
//! - `Dual`: separate active-high `TX_EN` and `RX_EN` pins
//! - `None`: full-duplex wiring, nothing to switch
//!
//! GPIO lines are requested from the kernel's character device
//! (`/dev/gpiochipN`) by line offset.

use std::path::PathBuf;

use gpio_cdev::{Chip, LineHandle, LineRequestFlags};
use tracing::{debug, warn};

use crate::config::{DirectionConfig, DirectionMode};
use crate::error::{BridgeError, Result};

/// Consumer label shown by `gpioinfo` for lines we hold
const GPIO_CONSUMER: &str = "crsf-bridge";

/// Which way the shared line is currently driven
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Receive,
    Transmit,
}

/// A single digital output
#[cfg_attr(test, mockall::automock)]
pub trait OutputLine: Send {
    /// Drive the line high (`true`) or low (`false`)
    fn set(&mut self, high: bool) -> Result<()>;
}

/// Resolve a chip name to its device path
///
/// Bare names such as `gpiochip4` live under `/dev`.
pub fn chip_path(chip: &str) -> PathBuf {
    if chip.contains('/') {
        PathBuf::from(chip)
    } else {
        PathBuf::from("/dev").join(chip)
    }
}

/// Output line held through the GPIO character device
///
/// Driven low when dropped; the kernel releases the line with the handle.
pub struct CdevGpioLine {
    chip: String,
    offset: u32,
    handle: LineHandle,
}

impl std::fmt::Debug for CdevGpioLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CdevGpioLine")
            .field("chip", &self.chip)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

impl CdevGpioLine {
    /// Request `offset` on `chip` as an output, initially low
    pub fn open(chip: &str, offset: u32) -> Result<Self> {
        let path = chip_path(chip);
        let gpio_error = |e: gpio_cdev::errors::Error| {
            BridgeError::Gpio(format!(
                "Failed to claim GPIO {} on {}: {}",
                offset,
                path.display(),
                e
            ))
        };

        let mut device = Chip::new(&path).map_err(gpio_error)?;
        let handle = device
            .get_line(offset)
            .and_then(|line| line.request(LineRequestFlags::OUTPUT, 0, GPIO_CONSUMER))
            .map_err(gpio_error)?;

        debug!("GPIO {} on {} claimed as output", offset, path.display());

        Ok(Self {
            chip: chip.to_string(),
            offset,
            handle,
        })
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }
}

impl OutputLine for CdevGpioLine {
    fn set(&mut self, high: bool) -> Result<()> {
        self.handle.set_value(u8::from(high)).map_err(|e| {
            BridgeError::Gpio(format!(
                "Failed to write GPIO {} on {}: {}",
                self.offset, self.chip, e
            ))
        })
    }
}

impl Drop for CdevGpioLine {
    fn drop(&mut self) {
        if let Err(e) = self.handle.set_value(0) {
            warn!("Failed to drive GPIO {} on {} low: {}", self.offset, self.chip, e);
        }
    }
}

/// The set of pins steering the line
pub enum DirectionControl {
    Single(Box<dyn OutputLine>),
    Dual {
        tx_en: Box<dyn OutputLine>,
        rx_en: Box<dyn OutputLine>,
    },
    None,
}

impl std::fmt::Debug for DirectionControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self {
            DirectionControl::Single(_) => "single",
            DirectionControl::Dual { .. } => "dual",
            DirectionControl::None => "none",
        };
        f.debug_tuple("DirectionControl").field(&mode).finish()
    }
}

impl DirectionControl {
    /// Claim the pins named in the configuration
    pub fn from_config(config: &DirectionConfig) -> Result<Self> {
        Ok(match config.mode {
            DirectionMode::Single => DirectionControl::Single(Box::new(CdevGpioLine::open(
                &config.chip,
                config.dir_pin,
            )?)),
            DirectionMode::Dual => DirectionControl::Dual {
                tx_en: Box::new(CdevGpioLine::open(&config.chip, config.tx_en_pin)?),
                rx_en: Box::new(CdevGpioLine::open(&config.chip, config.rx_en_pin)?),
            },
            DirectionMode::None => DirectionControl::None,
        })
    }

    /// Drive the pins for `direction`
    ///
    /// With two enables the active one is always released first so both
    /// drivers are never on at once.
    pub fn apply(&mut self, direction: Direction) -> Result<()> {
        let transmit = direction == Direction::Transmit;
        match self {
            DirectionControl::Single(dir) => dir.set(transmit),
            DirectionControl::Dual { tx_en, rx_en } => {
                if transmit {
                    rx_en.set(false)?;
                    tx_en.set(true)
                } else {
                    tx_en.set(false)?;
                    rx_en.set(true)
                }
            }
            DirectionControl::None => Ok(()),
        }
    }

    /// Whether switching has any physical effect
    pub fn is_switched(&self) -> bool {
        !matches!(self, DirectionControl::None)
    }
}
