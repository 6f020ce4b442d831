/// Session controller: opens a UART, bridges it onto the network session
/// that issued the command and tears the bridge down again
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::app_state::DeviceTable;
use crate::config::BridgeServerConfig;
use crate::protocol::{NetSession, ReceiveVerdict, classify_receive};
use crate::service::error::{CommandError, CommandOutcome, messages};
use crate::service::open_request::{OpenLimits, OpenRequest};
use crate::service::reader_task::{ReaderExit, ReaderTask};
use crate::uart::{LineSettings, UartBackend, UartPort};

/// Why a bridge ended. None of these is reported to the host: it just sees
/// the session close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeEnd {
    /// The session's disconnect flag was set (Close, shutdown, reader exit)
    DisconnectRequested,
    /// Receive error or immediate zero-byte receive
    TransportDead,
    /// Writing network bytes to the device failed
    DeviceWriteFailed,
}

/// UART operations over the shared device table
#[derive(Clone)]
pub struct UartBridge {
    devices: Arc<DeviceTable>,
    backend: Arc<dyn UartBackend>,
    config: Arc<BridgeServerConfig>,
}

impl UartBridge {
    pub fn new(
        devices: Arc<DeviceTable>,
        backend: Arc<dyn UartBackend>,
        config: Arc<BridgeServerConfig>,
    ) -> Self {
        Self {
            devices,
            backend,
            config,
        }
    }

    pub fn devices(&self) -> &Arc<DeviceTable> {
        &self.devices
    }

    pub fn backend(&self) -> &Arc<dyn UartBackend> {
        &self.backend
    }

    fn limits(&self) -> OpenLimits {
        OpenLimits {
            device_count: self.devices.device_count(),
            max_baud: self.config.uart.max_baud,
        }
    }

    /// Open a UART and bridge it onto `session` until either side ends.
    ///
    /// Validation, claim and configure failures return an error before any
    /// bridging starts, with the slot left (or made) free. Once bridging
    /// starts the call only returns after teardown, and the session has its
    /// disconnect flag set.
    pub async fn open(&self, session: &mut NetSession, args: &[&str]) -> CommandOutcome<BridgeEnd> {
        let request = OpenRequest::parse(args, self.limits())?;
        let device = request.device;
        let port = self
            .backend
            .port(device)
            .ok_or_else(|| CommandError::operational(messages::NO_DEVICE))?;

        if !self.devices.try_claim(device, session.handle()).await {
            error!("UART {} already open", device);
            return Err(CommandError::operational(messages::ALREADY_OPEN));
        }

        if let Err(e) = self.prepare(device, port.as_ref(), &request.settings).await {
            self.devices.release(device, &session.id).await;
            return Err(e);
        }

        info!(
            "Opening UART {} at {} for session {}",
            device, request.settings, session.id
        );
        Ok(self.bridge(device, port, session).await)
    }

    /// Configure and flush the device, then make sure no earlier reader is
    /// still attached to it
    async fn prepare(
        &self,
        device: usize,
        port: &dyn UartPort,
        settings: &LineSettings,
    ) -> CommandOutcome<()> {
        port.configure(settings).await.map_err(|e| {
            error!("UART {} configure failed: {}", device, e);
            CommandError::operational(messages::CONFIGURE_FAILED)
        })?;
        port.flush().await.map_err(|e| {
            error!("UART {} flush failed: {}", device, e);
            CommandError::operational(messages::FLUSH_FAILED)
        })?;
        self.await_prior_closure(device).await
    }

    async fn await_prior_closure(&self, device: usize) -> CommandOutcome<()> {
        if self.devices.is_reader_idle(device) {
            return Ok(());
        }
        let Some(status) = self.devices.reader_status(device) else {
            return Ok(());
        };
        let wait = self.config.bridge.prior_closure_wait();
        info!("Waiting up to {:?} for previous reader on UART {}", wait, device);
        if status.wait_idle(wait).await {
            Ok(())
        } else {
            warn!("Previous reader on UART {} not closed", device);
            Err(CommandError::operational(messages::PREVIOUS_NOT_CLOSED))
        }
    }

    async fn bridge(
        &self,
        device: usize,
        port: Arc<dyn UartPort>,
        session: &mut NetSession,
    ) -> BridgeEnd {
        let stop = self.devices.stop_flag(device).await.unwrap_or_default();
        let reader = ReaderTask {
            device,
            port: port.clone(),
            sender: session.sender.clone(),
            disconnect: session.disconnect.clone(),
            stop,
            config: self.config.bridge.clone(),
        };
        let reader = match self.devices.reader_status(device) {
            Some(status) => tokio::spawn(reader.run(status.start())),
            None => {
                self.devices.release(device, &session.id).await;
                return BridgeEnd::DisconnectRequested;
            }
        };
        self.devices.attach_reader(device, reader.abort_handle()).await;

        let end = self.pump_network(device, port.as_ref(), session).await;
        info!("UART {} bridge for session {} ending: {:?}", device, session.id, end);

        self.teardown(device, session, reader).await;
        end
    }

    /// Network to device direction, on the command's own task
    async fn pump_network(
        &self,
        device: usize,
        port: &dyn UartPort,
        session: &mut NetSession,
    ) -> BridgeEnd {
        let bridge = &self.config.bridge;
        let threshold = bridge.dead_transport_threshold();

        // Bytes that arrived together with the Open command line
        if !session.inbound.is_empty() {
            let leftover = session.inbound.split();
            if let Err(e) = port.write_bytes(&leftover).await {
                error!("UART {} write failed: {}", device, e);
                return BridgeEnd::DeviceWriteFailed;
            }
        }

        let mut buffer = vec![0u8; bridge.inbound_capacity];
        let disconnect = session.disconnect.clone();
        loop {
            let received = tokio::select! {
                received = session.receiver.receive(&mut buffer, bridge.receive_timeout()) => Some(received),
                _ = disconnect.requested() => None,
            };
            let Some(received) = received else {
                return BridgeEnd::DisconnectRequested;
            };

            let verdict = classify_receive(&received, threshold);
            if let ReceiveVerdict::Data(count) = verdict {
                // Forwarded even when a disconnect is already pending
                debug!("UART {}: {} bytes from network", device, count);
                if let Err(e) = port.write_bytes(&buffer[..count]).await {
                    error!("UART {} write failed: {}", device, e);
                    return BridgeEnd::DeviceWriteFailed;
                }
            }

            if disconnect.is_requested() {
                return BridgeEnd::DisconnectRequested;
            }
            if verdict == ReceiveVerdict::Dead {
                info!(
                    "UART {}: network reception problem or socket closing ({:?} after {:?})",
                    device, received.result, received.elapsed
                );
                return BridgeEnd::TransportDead;
            }
        }
    }

    /// Stop the reader, end the session and free the slot
    async fn teardown(
        &self,
        device: usize,
        session: &NetSession,
        mut reader: JoinHandle<ReaderExit>,
    ) {
        self.devices.request_stop(device).await;
        session.disconnect.request();

        let wait = self.config.bridge.teardown_wait();
        match tokio::time::timeout(wait, &mut reader).await {
            Ok(Ok(exit)) => debug!("UART {} reader finished: {:?}", device, exit),
            Ok(Err(e)) => error!("UART {} reader task failed: {}", device, e),
            Err(_) => {
                warn!(
                    "UART {} reader did not finish within {:?}, aborting it",
                    device, wait
                );
                reader.abort();
                // The reader guard is dropped with the aborted future
                if tokio::time::timeout(wait, reader).await.is_err() {
                    error!("UART {} reader still not gone after abort", device);
                }
            }
        }

        self.devices.release(device, &session.id).await;
        info!("UART {} closed for session {}", device, session.id);
    }

    /// Ask the session bridged onto `device` to end. Returns whether the
    /// device was open. Reader shutdown follows from the controller seeing
    /// the flag.
    pub async fn close(&self, device: usize) -> bool {
        match self.devices.owner(device).await {
            Some(owner) => {
                info!("Close requested for UART {} (session {})", device, owner.id);
                owner.disconnect.request();
                true
            }
            None => {
                debug!("Close requested for UART {} which is not open", device);
                false
            }
        }
    }

    /// Switch the B45/B67 line multiplexer
    pub async fn set_mux(&self, on: bool) -> CommandOutcome<()> {
        self.backend.set_mux(on).await.map_err(|e| {
            error!("UART mux switch failed: {}", e);
            CommandError::operational(messages::MUX_FAILED)
        })
    }

    /// Receive-callback counter, reset on read
    pub fn take_callback_count(&self) -> u32 {
        self.backend.take_callback_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    use async_trait::async_trait;

    use crate::protocol::{StreamReceiver, StreamSender};
    use crate::service::test_bridge_config;
    use crate::uart::{MemoryBackend, UartError};

    /// Port whose receive side reports data but never hands a byte over
    struct HangingUart;

    #[async_trait]
    impl UartPort for HangingUart {
        async fn configure(&self, _settings: &LineSettings) -> Result<(), UartError> {
            Ok(())
        }

        async fn flush(&self) -> Result<(), UartError> {
            Ok(())
        }

        async fn byte_available(&self, _timeout: Duration) -> bool {
            true
        }

        async fn read_byte(&self) -> Result<u8, UartError> {
            std::future::pending().await
        }

        async fn write_bytes(&self, _data: &[u8]) -> Result<(), UartError> {
            Ok(())
        }
    }

    struct HangingBackend(Arc<HangingUart>);

    #[async_trait]
    impl UartBackend for HangingBackend {
        fn device_count(&self) -> usize {
            1
        }

        fn port(&self, device: usize) -> Option<Arc<dyn UartPort>> {
            (device == 0).then(|| self.0.clone() as Arc<dyn UartPort>)
        }

        async fn set_mux(&self, _on: bool) -> Result<(), UartError> {
            Ok(())
        }

        fn take_callback_count(&self) -> u32 {
            0
        }
    }

    fn bridge_with(backend: Arc<MemoryBackend>) -> UartBridge {
        let config = BridgeServerConfig {
            bridge: test_bridge_config(),
            ..Default::default()
        };
        let devices = Arc::new(DeviceTable::new(backend.device_count()));
        UartBridge::new(devices, backend, Arc::new(config))
    }

    fn session(id: &str) -> (NetSession, DuplexStream) {
        let (host, local) = tokio::io::duplex(4096);
        let (read, write) = tokio::io::split(local);
        let session = NetSession::with_id(
            id,
            Box::new(StreamReceiver::new(read)),
            Box::new(StreamSender::new(write)),
        );
        (session, host)
    }

    const OPEN_ARGS: [&str; 5] = ["0", "9600", "8", "none", "1"];

    #[tokio::test]
    async fn stale_reader_fails_the_open_and_frees_the_slot() {
        let backend = Arc::new(MemoryBackend::new(1));
        let bridge = bridge_with(backend.clone());
        let status = bridge.devices().reader_status(0).unwrap();
        let _stale = status.start();

        let (mut session, _host) = session("s1");
        let err = bridge.open(&mut session, &OPEN_ARGS).await.unwrap_err();
        assert_eq!(err, CommandError::operational(messages::PREVIOUS_NOT_CLOSED));
        assert!(bridge.devices().owner(0).await.is_none());
        assert!(!session.disconnect.is_requested());
    }

    #[tokio::test]
    async fn stale_reader_that_finishes_in_time_lets_the_open_proceed() {
        let backend = Arc::new(MemoryBackend::new(1));
        let bridge = bridge_with(backend.clone());
        let status = bridge.devices().reader_status(0).unwrap();
        let stale = status.start();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            drop(stale);
        });

        let (mut session, mut host) = session("s1");
        let flag = session.disconnect.clone();
        let open = tokio::spawn(async move { bridge.open(&mut session, &OPEN_ARGS).await });

        let mut marker = [0u8; 1];
        host.read_exact(&mut marker).await.unwrap();
        assert_eq!(marker[0], b'+');

        flag.request();
        let end = open.await.unwrap().unwrap();
        assert_eq!(end, BridgeEnd::DisconnectRequested);
    }

    #[tokio::test]
    async fn device_write_failure_ends_the_bridge() {
        let backend = Arc::new(MemoryBackend::new(1));
        let bridge = bridge_with(backend.clone());
        let uart = backend.uart(0).unwrap();

        let (mut session, mut host) = session("s1");
        let devices = bridge.devices().clone();
        let open = tokio::spawn(async move { bridge.open(&mut session, &OPEN_ARGS).await });

        let mut marker = [0u8; 1];
        host.read_exact(&mut marker).await.unwrap();
        uart.fail_write(true);
        host.write_all(b"data").await.unwrap();

        let end = open.await.unwrap().unwrap();
        assert_eq!(end, BridgeEnd::DeviceWriteFailed);
        assert!(devices.owner(0).await.is_none());
        assert!(devices.is_reader_idle(0));
    }

    #[tokio::test]
    async fn reader_stuck_in_a_device_read_is_aborted_at_teardown() {
        let mut config = BridgeServerConfig {
            bridge: test_bridge_config(),
            ..Default::default()
        };
        config.bridge.teardown_wait_ms = 100;
        config.uart.device_count = 1;
        let backend = Arc::new(HangingBackend(Arc::new(HangingUart)));
        let devices = Arc::new(DeviceTable::new(1));
        let bridge = UartBridge::new(devices.clone(), backend, Arc::new(config));

        for round in 0..2 {
            let (mut session, mut host) = session(&format!("s{}", round));
            let flag = session.disconnect.clone();
            let opener = bridge.clone();
            let open = tokio::spawn(async move { opener.open(&mut session, &OPEN_ARGS).await });

            let mut marker = [0u8; 1];
            host.read_exact(&mut marker).await.unwrap();
            assert_eq!(marker[0], b'+');
            // Let the reader reach the read that never completes
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(!devices.is_reader_idle(0));

            flag.request();
            let end = tokio::time::timeout(Duration::from_secs(2), open)
                .await
                .expect("teardown hung on the reader")
                .unwrap()
                .unwrap();
            assert_eq!(end, BridgeEnd::DisconnectRequested);
            assert!(devices.is_reader_idle(0));
            assert!(devices.owner(0).await.is_none());
        }
    }
}
