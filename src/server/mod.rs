/// Server management for the UART bridge
mod server;

pub use server::{
    build_router, run_command_listener, run_http_server, run_with_graceful_shutdown,
    shutdown_bridges, shutdown_signal,
};
