/// UART backend on top of OS serial ports (`serialport` crate)
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serialport::{ClearBuffer, SerialPort};
use tokio::task::spawn_blocking;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::PortConfig;
use crate::uart::uart_trait::{
    LineSettings, Parity, StopBits, UartBackend, UartError, UartPort,
};

/// Poll step used while waiting for receive data
const AVAILABLE_POLL: Duration = Duration::from_millis(2);

/// One OS serial port, opened lazily by `configure`.
///
/// Every call into `serialport` blocks, so it runs on the blocking pool.
pub struct SerialUart {
    device: usize,
    path: String,
    port: Arc<Mutex<Option<Box<dyn SerialPort>>>>,
    callbacks: Arc<AtomicU32>,
}

impl SerialUart {
    fn new(device: usize, path: String, callbacks: Arc<AtomicU32>) -> Self {
        Self {
            device,
            path,
            port: Arc::new(Mutex::new(None)),
            callbacks,
        }
    }

    /// Run `f` against the open port on the blocking pool
    async fn with_port<T, F>(&self, f: F) -> Result<T, UartError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Box<dyn SerialPort>) -> Result<T, UartError> + Send + 'static,
    {
        let port = self.port.clone();
        spawn_blocking(move || {
            let mut guard = port.lock().unwrap_or_else(|e| e.into_inner());
            match guard.as_mut() {
                Some(port) => f(port),
                None => Err(UartError::NotConfigured),
            }
        })
        .await
        .map_err(|e| UartError::Io(std::io::Error::other(e)))?
    }

    async fn bytes_to_read(&self) -> u32 {
        self.with_port(|port| {
            port.bytes_to_read()
                .map_err(|e| UartError::ReadFailed(e.to_string()))
        })
        .await
        .unwrap_or(0)
    }
}

fn map_data_bits(settings: &LineSettings) -> serialport::DataBits {
    match settings.data_bits.get() {
        5 => serialport::DataBits::Five,
        6 => serialport::DataBits::Six,
        7 => serialport::DataBits::Seven,
        _ => serialport::DataBits::Eight,
    }
}

fn map_parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Odd => serialport::Parity::Odd,
        Parity::Even => serialport::Parity::Even,
    }
}

fn map_stop_bits(stop_bits: StopBits) -> serialport::StopBits {
    match stop_bits {
        StopBits::One => serialport::StopBits::One,
        StopBits::Two => serialport::StopBits::Two,
    }
}

#[async_trait]
impl UartPort for SerialUart {
    async fn configure(&self, settings: &LineSettings) -> Result<(), UartError> {
        let builder = serialport::new(&self.path, settings.baud)
            .data_bits(map_data_bits(settings))
            .parity(map_parity(settings.parity))
            .stop_bits(map_stop_bits(settings.stop_bits))
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(10));
        let opened = spawn_blocking(move || builder.open())
            .await
            .map_err(|e| UartError::Io(std::io::Error::other(e)))?;
        let port = opened.map_err(|e| {
            error!("SerialUart {}: failed to open {}: {}", self.device, self.path, e);
            UartError::ConfigureFailed(e.to_string())
        })?;

        // Replacing the handle closes the previous one
        let previous = self.port.clone();
        spawn_blocking(move || {
            *previous.lock().unwrap_or_else(|e| e.into_inner()) = Some(port);
        })
        .await
        .map_err(|e| UartError::Io(std::io::Error::other(e)))?;
        info!("SerialUart {}: opened {} at {}", self.device, self.path, settings);
        Ok(())
    }

    async fn flush(&self) -> Result<(), UartError> {
        self.with_port(|port| {
            port.clear(ClearBuffer::Input)
                .map_err(|e| UartError::FlushFailed(e.to_string()))
        })
        .await
    }

    async fn byte_available(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let available = self.bytes_to_read().await;
            if available > 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(AVAILABLE_POLL).await;
        }
    }

    async fn read_byte(&self) -> Result<u8, UartError> {
        let byte = self
            .with_port(|port| {
                let mut byte = [0u8; 1];
                match port.read(&mut byte) {
                    Ok(1) => Ok(byte[0]),
                    Ok(_) => Err(UartError::ReadFailed("no data".to_string())),
                    Err(e) => Err(UartError::ReadFailed(e.to_string())),
                }
            })
            .await?;
        self.callbacks.fetch_add(1, Ordering::Relaxed);
        Ok(byte)
    }

    async fn write_bytes(&self, data: &[u8]) -> Result<(), UartError> {
        let data = data.to_vec();
        let len = data.len();
        self.with_port(move |port| {
            port.write_all(&data)
                .and_then(|_| port.flush())
                .map_err(|e| UartError::WriteFailed(e.to_string()))
        })
        .await?;
        debug!("SerialUart {}: wrote {} bytes", self.device, len);
        Ok(())
    }
}

/// Backend mapping device indices to OS serial port paths
pub struct SerialBackend {
    ports: Vec<Option<Arc<SerialUart>>>,
    callbacks: Arc<AtomicU32>,
}

impl SerialBackend {
    pub fn new(device_count: usize, ports: &[PortConfig]) -> Self {
        let callbacks = Arc::new(AtomicU32::new(0));
        let mut slots: Vec<Option<Arc<SerialUart>>> = vec![None; device_count];
        for port in ports {
            match slots.get_mut(port.device) {
                Some(slot) => {
                    *slot = Some(Arc::new(SerialUart::new(
                        port.device,
                        port.path.clone(),
                        callbacks.clone(),
                    )));
                }
                None => warn!(
                    "Ignoring serial port {} for device {}: only {} devices",
                    port.path, port.device, device_count
                ),
            }
        }
        Self {
            ports: slots,
            callbacks,
        }
    }
}

#[async_trait]
impl UartBackend for SerialBackend {
    fn device_count(&self) -> usize {
        self.ports.len()
    }

    fn port(&self, device: usize) -> Option<Arc<dyn UartPort>> {
        self.ports
            .get(device)
            .and_then(|port| port.clone())
            .map(|port| port as Arc<dyn UartPort>)
    }

    async fn set_mux(&self, _on: bool) -> Result<(), UartError> {
        Err(UartError::Unsupported("line multiplexer on serial backend"))
    }

    fn take_callback_count(&self) -> u32 {
        self.callbacks.swap(0, Ordering::Relaxed)
    }
}
