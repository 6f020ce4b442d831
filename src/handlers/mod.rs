/// Network and HTTP handlers
pub mod command;
pub mod rest;

pub use command::{MAX_COMMAND_LINE, handle_connection};
