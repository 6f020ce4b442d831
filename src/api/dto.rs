/// Data Transfer Objects for command replies and REST endpoints
use serde::{Deserialize, Serialize};

use crate::service::{BridgeEnd, CommandError};

/// Outcome of one dispatched command, before it is turned into a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// The connection became a bridge that has since ended. No reply.
    Bridged(BridgeEnd),
    /// Success flag
    NoError(bool),
    /// Integer value
    Int(u32),
    /// Command failed
    Exception(CommandError),
}

impl CommandResult {
    /// Reply line for this result, if any is sent
    pub fn reply(&self) -> Option<Reply> {
        match self {
            CommandResult::Bridged(_) => None,
            CommandResult::NoError(flag) => Some(Reply::Ok {
                value: Some(ReplyValue::Bool(*flag)),
            }),
            CommandResult::Int(value) => Some(Reply::Ok {
                value: Some(ReplyValue::Int(*value)),
            }),
            CommandResult::Exception(error) => Some(Reply::exception(error)),
        }
    }
}

impl From<CommandError> for CommandResult {
    fn from(error: CommandError) -> Self {
        CommandResult::Exception(error)
    }
}

/// Exception category reported to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExceptionKind {
    Argument,
    Error,
}

/// Value carried by a successful reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReplyValue {
    Bool(bool),
    Int(u32),
}

/// One JSON reply line on the command connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Reply {
    Ok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<ReplyValue>,
    },
    Exception {
        kind: ExceptionKind,
        message: String,
    },
}

impl Reply {
    pub fn exception(error: &CommandError) -> Self {
        let kind = if error.is_argument() {
            ExceptionKind::Argument
        } else {
            ExceptionKind::Error
        };
        Reply::Exception {
            kind,
            message: error.to_string(),
        }
    }

    /// Serialize as a newline-terminated line
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Request DTO for switching the line multiplexer
#[derive(Debug, Deserialize, Serialize)]
pub struct MuxRequest {
    pub on: bool,
}

/// Response DTO for a Close request
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseResponse {
    pub device: usize,
    /// Whether a bridge was running and has been asked to end
    pub was_open: bool,
}

/// Response DTO for the receive-callback counter
#[derive(Debug, Serialize, Deserialize)]
pub struct CallbackCountResponse {
    pub count: u32,
}

/// Generic success response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessResponse {
    /// Success flag
    pub success: bool,

    /// Response message
    pub message: String,
}

/// Generic error response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Error flag
    pub error: bool,

    /// Error message
    pub message: String,

    /// Optional error code
    pub code: Option<u16>,
}
