/// Error types for the service layer
use thiserror::Error;

/// Failure of a UART command, reported back to the caller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Malformed or out-of-range command argument. Never retried.
    #[error("argument {position} error: invalid {name} '{value}'")]
    Argument {
        /// 1-based position on the command line
        position: usize,
        /// Parameter name
        name: &'static str,
        /// Offending text
        value: String,
    },

    /// Wrong number of arguments for a command
    #[error("argument count error, usage: {command} {usage}")]
    ArgumentCount {
        command: &'static str,
        usage: &'static str,
    },

    /// Unknown folder or command name
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// Busy device, hardware failure or stale session
    #[error("{0}")]
    Operational(String),
}

impl CommandError {
    pub fn argument(position: usize, name: &'static str, value: impl Into<String>) -> Self {
        CommandError::Argument {
            position,
            name,
            value: value.into(),
        }
    }

    pub fn operational(message: impl Into<String>) -> Self {
        CommandError::Operational(message.into())
    }

    pub fn is_argument(&self) -> bool {
        matches!(
            self,
            CommandError::Argument { .. } | CommandError::ArgumentCount { .. }
        )
    }
}

/// Service result type
pub type CommandOutcome<T> = Result<T, CommandError>;

/// Operational failure messages
pub mod messages {
    pub const ALREADY_OPEN: &str = "UART already open";
    pub const CONFIGURE_FAILED: &str = "Failed to open UART";
    pub const FLUSH_FAILED: &str = "Failed to flush UART";
    pub const PREVIOUS_NOT_CLOSED: &str = "Previous Session not closed";
    pub const NO_DEVICE: &str = "UART device not available";
    pub const MUX_FAILED: &str = "Failed to switch UART mux";
}
