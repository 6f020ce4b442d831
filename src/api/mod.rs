/// Command API of the UART bridge: command table and reply DTOs
mod command_table;
pub mod dto;

pub use command_table::{
    COMMANDS, CommandKind, CommandSpec, FOLDER, MUX_ON, ParsedCommand, dispatch, find_command,
    parse_line,
};
pub use dto::{CommandResult, Reply, ReplyValue};
