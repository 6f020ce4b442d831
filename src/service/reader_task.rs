/// Reader task: pumps bytes from a UART to the network session
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::app_state::{ReaderGuard, StopFlag};
use crate::config::BridgeConfig;
use crate::protocol::{DisconnectFlag, SharedSender};
use crate::uart::UartPort;

/// Why a reader task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderExit {
    /// The stop flag was raised
    Stopped,
    /// The device reported a read error
    DeviceReadFailed,
    /// The network send failed
    SendFailed,
}

/// Device to network half of a bridge
pub struct ReaderTask {
    pub device: usize,
    pub port: Arc<dyn UartPort>,
    pub sender: SharedSender,
    /// Disconnect flag of the bridged session
    pub disconnect: DisconnectFlag,
    pub stop: StopFlag,
    pub config: BridgeConfig,
}

impl ReaderTask {
    /// Run until stopped or a path fails. `guard` marks the device's reader
    /// idle when this returns or the task is dropped.
    pub async fn run(self, guard: ReaderGuard) -> ReaderExit {
        let _guard = guard;
        info!("Reader task started for UART {}", self.device);
        let exit = self.pump().await;
        if exit != ReaderExit::Stopped {
            // A failed reader takes the whole bridge down with it
            self.disconnect.request();
        }
        info!("Reader task for UART {} closing: {:?}", self.device, exit);
        exit
    }

    async fn pump(&self) -> ReaderExit {
        let capacity = self.config.frame_capacity;
        let mut frame: Vec<u8> = Vec::with_capacity(capacity);
        // The first frame of a session is the marker alone
        frame.push(self.config.marker_byte);
        let mut sent = 0;

        loop {
            if sent == frame.len() {
                frame.clear();
                sent = 0;
                if self.wait_for_data().await {
                    // Let the rest of a burst arrive
                    tokio::time::sleep(self.config.settle_delay()).await;
                    if !self.drain(&mut frame).await {
                        return ReaderExit::DeviceReadFailed;
                    }
                    debug!("UART {}: {} bytes ready to send", self.device, frame.len());
                }
            }

            // Stop wins over pending bytes
            if self.stop.is_raised() {
                return ReaderExit::Stopped;
            }

            if sent < frame.len() {
                // Stop abandons a send to a peer that no longer drains
                let result = tokio::select! {
                    result = self.send(&frame[sent..]) => result,
                    _ = self.stop.raised() => return ReaderExit::Stopped,
                };
                match result {
                    Ok(0) => {
                        debug!("UART {}: send made no progress, backing off", self.device);
                        tokio::time::sleep(self.config.send_backoff()).await;
                    }
                    Ok(count) => sent += count,
                    Err(e) => {
                        error!("UART {}: network send failed: {}", self.device, e);
                        return ReaderExit::SendFailed;
                    }
                }
            }
        }
    }

    async fn send(&self, data: &[u8]) -> std::io::Result<usize> {
        self.sender.lock().await.send(data).await
    }

    /// Wait one poll interval for device data; a stop request cuts the wait short
    async fn wait_for_data(&self) -> bool {
        tokio::select! {
            available = self.port.byte_available(self.config.poll_interval()) => available,
            _ = self.stop.raised() => false,
        }
    }

    /// Move available device bytes into `frame` up to its capacity.
    /// Returns false on a device read error.
    async fn drain(&self, frame: &mut Vec<u8>) -> bool {
        while frame.len() < self.config.frame_capacity
            && self.port.byte_available(Duration::ZERO).await
        {
            match self.port.read_byte().await {
                Ok(byte) => frame.push(byte),
                Err(e) => {
                    error!("UART {}: read failed: {}", self.device, e);
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    use tokio::sync::Mutex;

    use crate::app_state::ReaderStatus;
    use crate::protocol::NetSender;
    use crate::service::test_bridge_config;
    use crate::uart::{MemoryBackend, MemoryUart};

    #[derive(Debug, Clone, Copy)]
    enum Step {
        /// Accept at most this many bytes
        Accept(usize),
        /// Accept nothing
        Stall,
        /// Fail the send
        Fail,
    }

    /// Sender following a script, then accepting everything
    #[derive(Debug)]
    struct ScriptedSender {
        script: VecDeque<Step>,
        delivered: Arc<StdMutex<Vec<u8>>>,
        stalls: Arc<StdMutex<usize>>,
    }

    #[async_trait::async_trait]
    impl NetSender for ScriptedSender {
        async fn send(&mut self, data: &[u8]) -> std::io::Result<usize> {
            let step = self.script.pop_front().unwrap_or(Step::Accept(usize::MAX));
            match step {
                Step::Accept(max) => {
                    let count = max.min(data.len());
                    self.delivered.lock().unwrap().extend_from_slice(&data[..count]);
                    Ok(count)
                }
                Step::Stall => {
                    *self.stalls.lock().unwrap() += 1;
                    Ok(0)
                }
                Step::Fail => Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe)),
            }
        }

        async fn shutdown(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct Harness {
        uart: Arc<MemoryUart>,
        delivered: Arc<StdMutex<Vec<u8>>>,
        stalls: Arc<StdMutex<usize>>,
        stop: StopFlag,
        disconnect: DisconnectFlag,
        status: Arc<ReaderStatus>,
        task: Option<ReaderTask>,
    }

    fn harness(script: Vec<Step>, config: BridgeConfig) -> Harness {
        let backend = MemoryBackend::new(1);
        let uart = backend.uart(0).unwrap();
        let delivered = Arc::new(StdMutex::new(Vec::new()));
        let stalls = Arc::new(StdMutex::new(0));
        let sender: Box<dyn NetSender> = Box::new(ScriptedSender {
            script: script.into(),
            delivered: delivered.clone(),
            stalls: stalls.clone(),
        });
        let stop = StopFlag::new();
        let disconnect = DisconnectFlag::new();
        let task = ReaderTask {
            device: 0,
            port: uart.clone(),
            sender: Arc::new(Mutex::new(sender)),
            disconnect: disconnect.clone(),
            stop: stop.clone(),
            config,
        };
        Harness {
            uart,
            delivered,
            stalls,
            stop,
            disconnect,
            status: Arc::new(ReaderStatus::default()),
            task: Some(task),
        }
    }

    impl Harness {
        fn spawn(&mut self) -> tokio::task::JoinHandle<ReaderExit> {
            let task = self.task.take().unwrap();
            let guard = self.status.start();
            tokio::spawn(task.run(guard))
        }

        async fn wait_delivered(&self, len: usize) -> Vec<u8> {
            for _ in 0..200 {
                let delivered = self.delivered.lock().unwrap().clone();
                if delivered.len() >= len {
                    return delivered;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            self.delivered.lock().unwrap().clone()
        }
    }

    #[tokio::test]
    async fn marker_precedes_device_bytes() {
        let mut h = harness(vec![], test_bridge_config());
        let handle = h.spawn();
        assert_eq!(h.wait_delivered(1).await, b"+");

        h.uart.inject(b"hello");
        assert_eq!(h.wait_delivered(6).await, b"+hello");
        h.uart.inject(b" world");
        assert_eq!(h.wait_delivered(12).await, b"+hello world");

        h.stop.raise();
        assert_eq!(handle.await.unwrap(), ReaderExit::Stopped);
        assert_eq!(h.status.state(), crate::app_state::ReaderState::Idle);
        assert!(!h.disconnect.is_requested());
    }

    #[tokio::test]
    async fn partial_sends_deliver_every_byte_once() {
        let script = vec![
            Step::Accept(1),
            Step::Accept(2),
            Step::Stall,
            Step::Accept(1),
            Step::Stall,
            Step::Accept(3),
        ];
        let mut h = harness(script, test_bridge_config());
        h.uart.inject(b"abcdefghij");
        let handle = h.spawn();

        assert_eq!(h.wait_delivered(11).await, b"+abcdefghij");
        assert_eq!(*h.stalls.lock().unwrap(), 2);

        h.stop.raise();
        assert_eq!(handle.await.unwrap(), ReaderExit::Stopped);
    }

    #[tokio::test]
    async fn frames_are_bounded_by_capacity() {
        let mut config = test_bridge_config();
        config.frame_capacity = 4;
        let mut h = harness(vec![], config);
        let handle = h.spawn();
        h.uart.inject(b"0123456789");

        assert_eq!(h.wait_delivered(11).await, b"+0123456789");
        h.stop.raise();
        assert_eq!(handle.await.unwrap(), ReaderExit::Stopped);
    }

    #[tokio::test]
    async fn send_error_ends_the_task() {
        let mut h = harness(vec![Step::Fail], test_bridge_config());
        let handle = h.spawn();
        assert_eq!(handle.await.unwrap(), ReaderExit::SendFailed);
        assert!(h.delivered.lock().unwrap().is_empty());
        assert!(h.disconnect.is_requested());
        assert_eq!(h.status.state(), crate::app_state::ReaderState::Idle);
    }

    #[tokio::test]
    async fn raised_stop_suppresses_pending_bytes() {
        let mut h = harness(vec![], test_bridge_config());
        h.stop.raise();
        let handle = h.spawn();
        assert_eq!(handle.await.unwrap(), ReaderExit::Stopped);
        assert!(h.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn device_read_error_ends_the_task() {
        let mut h = harness(vec![], test_bridge_config());
        let handle = h.spawn();
        assert_eq!(h.wait_delivered(1).await, b"+");

        h.uart.fail_read(true);
        h.uart.inject(b"zz");
        assert_eq!(handle.await.unwrap(), ReaderExit::DeviceReadFailed);
        assert_eq!(h.delivered.lock().unwrap().as_slice(), b"+");
        assert!(h.disconnect.is_requested());
    }

    #[tokio::test]
    async fn stop_interrupts_the_poll_wait() {
        let mut config = test_bridge_config();
        config.poll_interval_ms = 60_000;
        let mut h = harness(vec![], config);
        let handle = h.spawn();
        assert_eq!(h.wait_delivered(1).await, b"+");

        h.stop.raise();
        let exit = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("reader should notice the stop flag")
            .unwrap();
        assert_eq!(exit, ReaderExit::Stopped);
    }
}
