/// UART device access for the bridge
/// This module provides a trait abstraction over the physical UART driver
/// with an in-memory implementation and an optional OS serial port one

mod memory_uart;
#[cfg(feature = "serial")]
mod serial_uart;
mod uart_trait;

// Export all public types and traits
pub use memory_uart::{MemoryBackend, MemoryUart};
#[cfg(feature = "serial")]
pub use serial_uart::{SerialBackend, SerialUart};
pub use uart_trait::*;

use std::sync::Arc;

use crate::config::{BackendKind, UartConfig};

/// Create the UART backend selected by the configuration
pub fn create_backend(config: &UartConfig) -> Result<Arc<dyn UartBackend>, UartError> {
    match config.backend {
        BackendKind::Memory => {
            tracing::info!(
                "Using in-memory UART backend with {} devices",
                config.device_count
            );
            Ok(Arc::new(MemoryBackend::new(config.device_count)))
        }
        #[cfg(feature = "serial")]
        BackendKind::Serial => {
            tracing::info!(
                "Using serial UART backend with {} configured ports",
                config.ports.len()
            );
            Ok(Arc::new(SerialBackend::new(config.device_count, &config.ports)))
        }
        #[cfg(not(feature = "serial"))]
        BackendKind::Serial => Err(UartError::Unsupported(
            "serial backend requires the `serial` feature",
        )),
    }
}
