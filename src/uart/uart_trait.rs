use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

// ================ 线路参数与错误类型 ================

/// Parity setting of a UART line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl FromStr for Parity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Parity::None),
            "odd" => Ok(Parity::Odd),
            "even" => Ok(Parity::Even),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Parity::None => "none",
            Parity::Odd => "odd",
            Parity::Even => "even",
        };
        f.write_str(name)
    }
}

/// Number of stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopBits {
    One,
    Two,
}

impl StopBits {
    pub fn from_count(count: u32) -> Option<Self> {
        match count {
            1 => Some(StopBits::One),
            2 => Some(StopBits::Two),
            _ => None,
        }
    }

    pub fn count(&self) -> u8 {
        match self {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

/// Character width, 5 to 8 bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DataBits(u8);

impl DataBits {
    pub const MIN: u32 = 5;
    pub const MAX: u32 = 8;

    pub fn new(bits: u32) -> Option<Self> {
        if (Self::MIN..=Self::MAX).contains(&bits) {
            Some(DataBits(bits as u8))
        } else {
            None
        }
    }

    pub fn get(&self) -> u8 {
        self.0
    }
}

/// Complete line configuration applied when a port is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineSettings {
    pub baud: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl fmt::Display for LineSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}{}{}",
            self.baud,
            self.data_bits.get(),
            match self.parity {
                Parity::None => 'N',
                Parity::Odd => 'O',
                Parity::Even => 'E',
            },
            self.stop_bits.count()
        )
    }
}

#[derive(Debug, Error)]
pub enum UartError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("UART device {0} not available")]
    NotAvailable(usize),
    #[error("UART device not configured")]
    NotConfigured,
    #[error("Configure failed: {0}")]
    ConfigureFailed(String),
    #[error("Flush failed: {0}")]
    FlushFailed(String),
    #[error("Read failed: {0}")]
    ReadFailed(String),
    #[error("Write failed: {0}")]
    WriteFailed(String),
    #[error("Line multiplexer error: {0}")]
    Mux(String),
    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),
}

// ================ 核心Trait定义 ================

/// Byte level access to one physical UART.
///
/// Methods take `&self` because the reader task and the session controller
/// drive the same port concurrently; implementations synchronise internally.
#[async_trait]
pub trait UartPort: Send + Sync {
    /// Apply baud rate, width, parity and stop bits
    async fn configure(&self, settings: &LineSettings) -> Result<(), UartError>;

    /// Discard stale received bytes
    async fn flush(&self) -> Result<(), UartError>;

    /// Wait up to `timeout` for at least one received byte.
    /// A zero timeout is a non-blocking peek.
    async fn byte_available(&self, timeout: Duration) -> bool;

    /// Take one received byte
    async fn read_byte(&self) -> Result<u8, UartError>;

    /// Transmit all of `data`
    async fn write_bytes(&self, data: &[u8]) -> Result<(), UartError>;
}

/// The set of UART devices plus the board level helpers that share them
#[async_trait]
pub trait UartBackend: Send + Sync {
    /// Number of addressable devices
    fn device_count(&self) -> usize;

    /// Port for a device index
    fn port(&self, device: usize) -> Option<Arc<dyn UartPort>>;

    /// Switch the shared B45/B67 lines
    async fn set_mux(&self, on: bool) -> Result<(), UartError>;

    /// Return the driver receive-callback counter and reset it to zero
    fn take_callback_count(&self) -> u32;
}
