/// UART-over-network bridge: command API, device session table and the
/// reader/bridge tasks that shuttle bytes between a UART and a TCP session
pub mod api;
pub mod app_state;
pub mod config;
pub mod handlers;
pub mod protocol;
pub mod server;
pub mod service;
pub mod uart;

pub use app_state::AppState;
pub use config::{BridgeServerConfig, ConfigLoader};
pub use service::UartBridge;
