/// In-memory UART backend used for tests and hardware-less runs
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::uart::uart_trait::{LineSettings, UartBackend, UartError, UartPort};

/// A UART whose wire is a pair of in-memory queues.
///
/// `inject` plays the role of the remote equipment sending bytes to us,
/// `transmitted` shows what the bridge wrote to the line.
pub struct MemoryUart {
    device: usize,
    rx: Mutex<VecDeque<u8>>,
    rx_ready: Notify,
    tx: Mutex<Vec<u8>>,
    tx_ready: Notify,
    settings: Mutex<Option<LineSettings>>,
    configure_count: AtomicU32,
    flush_count: AtomicU32,
    callbacks: Arc<AtomicU32>,
    fail_configure: AtomicBool,
    fail_flush: AtomicBool,
    fail_write: AtomicBool,
    fail_read: AtomicBool,
}

impl MemoryUart {
    fn new(device: usize, callbacks: Arc<AtomicU32>) -> Self {
        Self {
            device,
            rx: Mutex::new(VecDeque::new()),
            rx_ready: Notify::new(),
            tx: Mutex::new(Vec::new()),
            tx_ready: Notify::new(),
            settings: Mutex::new(None),
            configure_count: AtomicU32::new(0),
            flush_count: AtomicU32::new(0),
            callbacks,
            fail_configure: AtomicBool::new(false),
            fail_flush: AtomicBool::new(false),
            fail_write: AtomicBool::new(false),
            fail_read: AtomicBool::new(false),
        }
    }

    /// Queue bytes as if they had arrived on the line
    pub fn inject(&self, data: &[u8]) {
        {
            let mut rx = self.rx.lock().unwrap_or_else(|e| e.into_inner());
            rx.extend(data.iter().copied());
        }
        // The driver raises one receive callback per burst
        self.callbacks.fetch_add(1, Ordering::Relaxed);
        self.rx_ready.notify_waiters();
        debug!("MemoryUart {}: injected {} bytes", self.device, data.len());
    }

    /// Everything written to the line so far
    pub fn transmitted(&self) -> Vec<u8> {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Wait until at least `len` bytes have been transmitted or `timeout` elapses
    pub async fn wait_transmitted(&self, len: usize, timeout: Duration) -> Vec<u8> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.tx_ready.notified();
            let current = self.transmitted();
            if current.len() >= len {
                return current;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.transmitted();
            }
        }
    }

    /// Bytes still waiting in the receive queue
    pub fn pending_rx(&self) -> usize {
        self.rx.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Line settings of the last successful configure
    pub fn settings(&self) -> Option<LineSettings> {
        *self.settings.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn configure_count(&self) -> u32 {
        self.configure_count.load(Ordering::Relaxed)
    }

    pub fn flush_count(&self) -> u32 {
        self.flush_count.load(Ordering::Relaxed)
    }

    pub fn fail_configure(&self, fail: bool) {
        self.fail_configure.store(fail, Ordering::SeqCst);
    }

    pub fn fail_flush(&self, fail: bool) {
        self.fail_flush.store(fail, Ordering::SeqCst);
    }

    pub fn fail_write(&self, fail: bool) {
        self.fail_write.store(fail, Ordering::SeqCst);
    }

    pub fn fail_read(&self, fail: bool) {
        self.fail_read.store(fail, Ordering::SeqCst);
    }

    fn has_rx(&self) -> bool {
        !self.rx.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }
}

#[async_trait]
impl UartPort for MemoryUart {
    async fn configure(&self, settings: &LineSettings) -> Result<(), UartError> {
        if self.fail_configure.load(Ordering::SeqCst) {
            return Err(UartError::ConfigureFailed(format!(
                "device {} rejected {}",
                self.device, settings
            )));
        }
        *self.settings.lock().unwrap_or_else(|e| e.into_inner()) = Some(*settings);
        self.configure_count.fetch_add(1, Ordering::Relaxed);
        info!("MemoryUart {}: configured {}", self.device, settings);
        Ok(())
    }

    async fn flush(&self) -> Result<(), UartError> {
        if self.fail_flush.load(Ordering::SeqCst) {
            return Err(UartError::FlushFailed(format!("device {}", self.device)));
        }
        let dropped = {
            let mut rx = self.rx.lock().unwrap_or_else(|e| e.into_inner());
            let dropped = rx.len();
            rx.clear();
            dropped
        };
        self.flush_count.fetch_add(1, Ordering::Relaxed);
        debug!("MemoryUart {}: flushed {} stale bytes", self.device, dropped);
        Ok(())
    }

    async fn byte_available(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            // Register before checking so an inject in between is not missed
            let notified = self.rx_ready.notified();
            if self.has_rx() {
                return true;
            }
            if timeout.is_zero() {
                return false;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.has_rx();
            }
        }
    }

    async fn read_byte(&self) -> Result<u8, UartError> {
        if self.fail_read.load(Ordering::SeqCst) {
            return Err(UartError::ReadFailed(format!("device {}", self.device)));
        }
        self.rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .ok_or_else(|| UartError::ReadFailed("receive queue empty".to_string()))
    }

    async fn write_bytes(&self, data: &[u8]) -> Result<(), UartError> {
        if self.fail_write.load(Ordering::SeqCst) {
            return Err(UartError::WriteFailed(format!("device {}", self.device)));
        }
        self.tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(data);
        self.tx_ready.notify_waiters();
        debug!("MemoryUart {}: transmitted {} bytes", self.device, data.len());
        Ok(())
    }
}

/// Backend made of `MemoryUart` devices and a simulated line multiplexer
pub struct MemoryBackend {
    ports: Vec<Arc<MemoryUart>>,
    mux_on: AtomicBool,
    fail_mux: AtomicBool,
    callbacks: Arc<AtomicU32>,
}

impl MemoryBackend {
    pub fn new(device_count: usize) -> Self {
        let callbacks = Arc::new(AtomicU32::new(0));
        let ports = (0..device_count)
            .map(|device| Arc::new(MemoryUart::new(device, callbacks.clone())))
            .collect();
        Self {
            ports,
            mux_on: AtomicBool::new(false),
            fail_mux: AtomicBool::new(false),
            callbacks,
        }
    }

    /// Concrete handle on a device, for driving it from tests
    pub fn uart(&self, device: usize) -> Option<Arc<MemoryUart>> {
        self.ports.get(device).cloned()
    }

    pub fn mux_on(&self) -> bool {
        self.mux_on.load(Ordering::SeqCst)
    }

    pub fn fail_mux(&self, fail: bool) {
        self.fail_mux.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl UartBackend for MemoryBackend {
    fn device_count(&self) -> usize {
        self.ports.len()
    }

    fn port(&self, device: usize) -> Option<Arc<dyn UartPort>> {
        self.ports
            .get(device)
            .map(|port| port.clone() as Arc<dyn UartPort>)
    }

    async fn set_mux(&self, on: bool) -> Result<(), UartError> {
        if self.fail_mux.load(Ordering::SeqCst) {
            return Err(UartError::Mux("multiplexer did not respond".to_string()));
        }
        self.mux_on.store(on, Ordering::SeqCst);
        info!("MemoryBackend: B45/B67 mux {}", if on { "on" } else { "off" });
        Ok(())
    }

    fn take_callback_count(&self) -> u32 {
        self.callbacks.swap(0, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn byte_available_times_out_on_empty_queue() {
        let backend = MemoryBackend::new(1);
        let uart = backend.uart(0).unwrap();
        let start = Instant::now();
        assert!(!uart.byte_available(Duration::from_millis(30)).await);
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(!uart.byte_available(Duration::ZERO).await);
    }

    #[tokio::test]
    async fn byte_available_wakes_on_inject() {
        let backend = MemoryBackend::new(1);
        let uart = backend.uart(0).unwrap();
        let waiter = {
            let uart = uart.clone();
            tokio::spawn(async move { uart.byte_available(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        uart.inject(b"x");
        assert!(waiter.await.unwrap());
        assert_eq!(uart.read_byte().await.unwrap(), b'x');
        assert!(uart.read_byte().await.is_err());
    }

    #[tokio::test]
    async fn flush_discards_stale_bytes() {
        let backend = MemoryBackend::new(1);
        let uart = backend.uart(0).unwrap();
        uart.inject(b"stale");
        uart.flush().await.unwrap();
        assert_eq!(uart.pending_rx(), 0);
        assert_eq!(uart.flush_count(), 1);
    }

    #[tokio::test]
    async fn callback_counter_is_read_and_reset() {
        let backend = MemoryBackend::new(2);
        backend.uart(0).unwrap().inject(b"a");
        backend.uart(1).unwrap().inject(b"bc");
        assert_eq!(backend.take_callback_count(), 2);
        assert_eq!(backend.take_callback_count(), 0);
    }

    #[tokio::test]
    async fn mux_failure_is_reported() {
        let backend = MemoryBackend::new(1);
        backend.set_mux(true).await.unwrap();
        assert!(backend.mux_on());
        backend.fail_mux(true);
        assert!(backend.set_mux(false).await.is_err());
        assert!(backend.mux_on());
    }
}
