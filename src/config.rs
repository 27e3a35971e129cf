//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{BridgeError, Result};
use crate::serial::SUPPORTED_BAUD_RATES;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub direction: DirectionConfig,
    pub udp: UdpConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Complement every byte on the wire (inverted-UART wiring)
    #[serde(default)]
    pub invert: bool,

    /// Back-off of the receive poll when the line is idle
    #[serde(default = "default_poll_interval_us")]
    pub poll_interval_us: u64,
}

/// How the transceiver's direction is switched
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DirectionMode {
    /// One DIR pin, high = transmit
    Single,
    /// Separate TX_EN and RX_EN pins
    Dual,
    /// Full-duplex wiring
    None,
}

/// Direction-control pins and timing
#[derive(Debug, Deserialize, Clone)]
pub struct DirectionConfig {
    #[serde(default = "default_direction_mode")]
    pub mode: DirectionMode,

    /// GPIO character device: a bare name under `/dev` or a full path
    #[serde(default = "default_gpio_chip")]
    pub chip: String,

    /// Pins are line offsets on `chip`
    #[serde(default = "default_dir_pin")]
    pub dir_pin: u32,

    #[serde(default = "default_tx_en_pin")]
    pub tx_en_pin: u32,

    #[serde(default = "default_rx_en_pin")]
    pub rx_en_pin: u32,

    #[serde(default = "default_settle_us")]
    pub settle_us: u64,

    #[serde(default = "default_tx_tail_us")]
    pub tx_tail_us: u64,
}

/// UDP peer configuration
#[derive(Debug, Deserialize, Clone)]
pub struct UdpConfig {
    #[serde(default = "default_local_port")]
    pub local_port: u16,

    pub remote_host: String,

    #[serde(default = "default_remote_port")]
    pub remote_port: u16,
}

/// Frame injected into the serial side to keep the radio module talking
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum KeepaliveMode {
    /// CRSF heartbeat frame (0x0B)
    Heartbeat,
    /// Extended device ping (0x28) to broadcast
    Ping,
    Off,
}

/// Bridge timers
#[derive(Debug, Deserialize, Clone)]
pub struct BridgeConfig {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_keepalive")]
    pub keepalive: KeepaliveMode,

    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,

    #[serde(default = "default_stats_interval_ms")]
    pub stats_interval_ms: u64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Raise the default filter from INFO to DEBUG
    #[serde(default)]
    pub debug: bool,

    /// Also write daily-rolled log files here when non-empty
    #[serde(default)]
    pub log_dir: String,
}

// Default value functions
fn default_serial_port() -> String { "/dev/serial0".to_string() }
fn default_baud_rate() -> u32 { 416_666 }
fn default_poll_interval_us() -> u64 { 1000 }

fn default_direction_mode() -> DirectionMode { DirectionMode::Dual }
fn default_gpio_chip() -> String { "gpiochip4".to_string() }
fn default_dir_pin() -> u32 { 18 }
fn default_tx_en_pin() -> u32 { 24 }
fn default_rx_en_pin() -> u32 { 23 }
fn default_settle_us() -> u64 { 100 }
fn default_tx_tail_us() -> u64 { 100 }

fn default_local_port() -> u16 { 5001 }
fn default_remote_port() -> u16 { 5000 }

fn default_heartbeat_interval_ms() -> u64 { 5000 }
fn default_keepalive() -> KeepaliveMode { KeepaliveMode::Heartbeat }
fn default_keepalive_interval_ms() -> u64 { 10_000 }
fn default_stats_interval_ms() -> u64 { 30_000 }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            invert: false,
            poll_interval_us: default_poll_interval_us(),
        }
    }
}

impl Default for DirectionConfig {
    fn default() -> Self {
        Self {
            mode: default_direction_mode(),
            chip: default_gpio_chip(),
            dir_pin: default_dir_pin(),
            tx_en_pin: default_tx_en_pin(),
            rx_en_pin: default_rx_en_pin(),
            settle_us: default_settle_us(),
            tx_tail_us: default_tx_tail_us(),
        }
    }
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            local_port: default_local_port(),
            remote_host: "127.0.0.1".to_string(),
            remote_port: default_remote_port(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            keepalive: default_keepalive(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
            stats_interval_ms: default_stats_interval_ms(),
        }
    }
}

impl SerialConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }
}

impl BridgeConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }
}

fn invalid(msg: impl std::fmt::Display) -> BridgeError {
    BridgeError::Config(toml::de::Error::custom(msg))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use crsf_bridge::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // Validate serial port configuration
        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if !SUPPORTED_BAUD_RATES.contains(&self.serial.baud_rate) {
            return Err(invalid(format!(
                "baud_rate must be one of: {:?}",
                SUPPORTED_BAUD_RATES
            )));
        }

        if self.serial.poll_interval_us == 0 || self.serial.poll_interval_us > 100_000 {
            return Err(invalid("poll_interval_us must be between 1 and 100000"));
        }

        // Validate direction control
        if self.direction.mode != DirectionMode::None && self.direction.chip.is_empty() {
            return Err(invalid("direction chip cannot be empty"));
        }

        if self.direction.mode == DirectionMode::Dual
            && self.direction.tx_en_pin == self.direction.rx_en_pin
        {
            return Err(invalid("tx_en_pin and rx_en_pin must differ"));
        }

        if self.direction.settle_us > 10_000 {
            return Err(invalid("settle_us must be at most 10000"));
        }

        if self.direction.tx_tail_us > 10_000 {
            return Err(invalid("tx_tail_us must be at most 10000"));
        }

        // Validate UDP peer
        if self.udp.local_port == 0 {
            return Err(invalid("udp local_port cannot be 0"));
        }

        if self.udp.remote_host.is_empty() {
            return Err(invalid("udp remote_host cannot be empty"));
        }

        if self.udp.remote_port == 0 {
            return Err(invalid("udp remote_port cannot be 0"));
        }

        // Validate timers
        for (name, value) in [
            ("heartbeat_interval_ms", self.bridge.heartbeat_interval_ms),
            ("keepalive_interval_ms", self.bridge.keepalive_interval_ms),
            ("stats_interval_ms", self.bridge.stats_interval_ms),
        ] {
            if value == 0 || value > 3_600_000 {
                return Err(invalid(format!("{} must be between 1 and 3600000", name)));
            }
        }

        Ok(())
    }
}
