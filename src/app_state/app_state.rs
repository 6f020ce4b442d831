/// Application state implementation for the UART bridge
use std::sync::Arc;

use crate::app_state::DeviceTable;
use crate::config::BridgeServerConfig;
use crate::service::UartBridge;
use crate::uart::UartBackend;

/// Application state containing shared data across handlers
#[derive(Clone)]
pub struct AppState {
    /// Bridge operations over the device table and backend
    pub bridge: UartBridge,
    /// Application configuration
    pub config: Arc<BridgeServerConfig>,
}

impl AppState {
    /// Create a new instance of AppState with configuration and a device backend
    pub fn new(config: BridgeServerConfig, backend: Arc<dyn UartBackend>) -> Self {
        let config = Arc::new(config);
        let device_count = config.uart.device_count.min(backend.device_count());
        let devices = Arc::new(DeviceTable::new(device_count));
        let bridge = UartBridge::new(devices, backend, config.clone());
        Self { bridge, config }
    }

    /// Device session table
    pub fn devices(&self) -> &Arc<DeviceTable> {
        self.bridge.devices()
    }
}
