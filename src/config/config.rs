/// Configuration data structures for uart_bridge
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top level configuration
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct BridgeServerConfig {
    /// Listener settings
    pub server: ServerConfig,

    /// UART devices
    pub uart: UartConfig,

    /// Bridge timings and buffer sizes
    pub bridge: BridgeConfig,

    /// Logging output
    pub logging: LoggingConfig,
}

/// Network listener configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// Address of the command/bridge TCP listener
    pub command_addr: String,

    /// Address of the HTTP diagnostics server
    pub http_addr: String,

    /// Whether to start the HTTP diagnostics server
    pub http_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command_addr: "0.0.0.0:5000".to_string(),
            http_addr: "0.0.0.0:8080".to_string(),
            http_enabled: true,
        }
    }
}

/// Which device backend drives the UARTs
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Serial,
}

/// OS serial port bound to a device index
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PortConfig {
    pub device: usize,
    pub path: String,
}

/// UART device configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct UartConfig {
    /// Number of addressable devices
    pub device_count: usize,

    /// Highest accepted baud rate
    pub max_baud: u32,

    /// Backend implementation
    pub backend: BackendKind,

    /// Port paths (serial backend only)
    pub ports: Vec<PortConfig>,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            device_count: 4,
            max_baud: 921_600,
            backend: BackendKind::Memory,
            ports: Vec::new(),
        }
    }
}

/// Bridge timings and sizes. All durations are in milliseconds.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct BridgeConfig {
    /// Reader wait for device data before re-checking the stop flag
    pub poll_interval_ms: u64,

    /// Delay after the first byte so a burst lands in one frame
    pub settle_delay_ms: u64,

    /// Sleep after a send that made no progress
    pub send_backoff_ms: u64,

    /// Bounded wait of one network receive
    pub receive_timeout_ms: u64,

    /// A zero-byte receive faster than this is a dead transport
    pub dead_transport_threshold_ms: u64,

    /// Wait for a stale reader, in poll intervals
    pub prior_closure_polls: u32,

    /// Bounded wait for the reader to finish during teardown
    pub teardown_wait_ms: u64,

    /// Outbound (device to network) frame capacity
    pub frame_capacity: usize,

    /// Inbound (network to device) buffer capacity
    pub inbound_capacity: usize,

    /// Byte sent ahead of the first outbound frame
    pub marker_byte: u8,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5000,
            settle_delay_ms: 90,
            send_backoff_ms: 1000,
            receive_timeout_ms: 1000,
            dead_transport_threshold_ms: 1,
            prior_closure_polls: 4,
            teardown_wait_ms: 5000,
            frame_capacity: 1024,
            inbound_capacity: 1024,
            marker_byte: b'+',
        }
    }
}

impl BridgeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn send_backoff(&self) -> Duration {
        Duration::from_millis(self.send_backoff_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn dead_transport_threshold(&self) -> Duration {
        Duration::from_millis(self.dead_transport_threshold_ms)
    }

    /// Total wait for a stale reader before giving up on an Open
    pub fn prior_closure_wait(&self) -> Duration {
        self.poll_interval() * self.prior_closure_polls
    }

    pub fn teardown_wait(&self) -> Duration {
        Duration::from_millis(self.teardown_wait_ms)
    }
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    pub level: String,

    /// Emit JSON lines instead of human readable text
    pub json: bool,

    /// Directory for daily rolled log files
    pub directory: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            directory: None,
        }
    }
}
