/// Service layer for the UART bridge
/// Open/bridge/teardown orchestration, the reader task and the small
/// stateless UART operations
mod bridge_controller;
mod error;
mod open_request;
mod reader_task;

// Re-export public types and functions
pub use bridge_controller::{BridgeEnd, UartBridge};
pub use error::{CommandError, CommandOutcome, messages};
pub use open_request::{OpenLimits, OpenRequest, parse_uint};
pub use reader_task::{ReaderExit, ReaderTask};

/// Bridge timings short enough for tests
#[cfg(test)]
pub(crate) fn test_bridge_config() -> crate::config::BridgeConfig {
    crate::config::BridgeConfig {
        poll_interval_ms: 50,
        settle_delay_ms: 5,
        send_backoff_ms: 5,
        receive_timeout_ms: 20,
        dead_transport_threshold_ms: 1,
        prior_closure_polls: 4,
        teardown_wait_ms: 2000,
        ..Default::default()
    }
}
