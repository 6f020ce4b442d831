/// The `/UART` command folder: command table, line parsing and dispatch
use tracing::{debug, info, warn};

use crate::api::dto::CommandResult;
use crate::protocol::NetSession;
use crate::service::{CommandError, UartBridge, parse_uint};

/// Folder all UART commands live in
pub const FOLDER: &str = "UART";

/// Value of the Mux45 argument that switches the mux on
pub const MUX_ON: &str = "on";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Open,
    Close,
    Mux45,
    Cb,
}

/// One entry of the command table
#[derive(Debug)]
pub struct CommandSpec {
    pub kind: CommandKind,
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
    pub usage: &'static str,
    pub help: &'static str,
}

pub static COMMANDS: [CommandSpec; 4] = [
    CommandSpec {
        kind: CommandKind::Open,
        name: "Open",
        min_args: 5,
        max_args: 5,
        usage: "<n> <baud> <bits> <par> <stop>",
        help: "Open UART",
    },
    CommandSpec {
        kind: CommandKind::Close,
        name: "Close",
        min_args: 1,
        max_args: 1,
        usage: "<n>",
        help: "Force a uart close",
    },
    CommandSpec {
        kind: CommandKind::Mux45,
        name: "Mux45",
        min_args: 1,
        max_args: 1,
        usage: "<on>",
        help: "MUX B45 - B67",
    },
    CommandSpec {
        kind: CommandKind::Cb,
        name: "Cb",
        min_args: 0,
        max_args: 0,
        usage: "",
        help: "Read and reset the receive callback counter",
    },
];

/// A command line resolved against the table
#[derive(Debug)]
pub struct ParsedCommand<'a> {
    pub spec: &'static CommandSpec,
    pub args: Vec<&'a str>,
}

/// Look a command up by name, ignoring case
pub fn find_command(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS
        .iter()
        .find(|spec| spec.name.eq_ignore_ascii_case(name))
}

/// Parse `/UART/<Name> args...`. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Option<Result<ParsedCommand<'_>, CommandError>> {
    let mut tokens = line.split_whitespace();
    let path = tokens.next()?;
    Some(resolve(path, tokens.collect()))
}

fn resolve<'a>(path: &str, args: Vec<&'a str>) -> Result<ParsedCommand<'a>, CommandError> {
    let path = path.strip_prefix('/').unwrap_or(path);
    let spec = path
        .split_once('/')
        .filter(|(folder, _)| folder.eq_ignore_ascii_case(FOLDER))
        .and_then(|(_, name)| find_command(name))
        .ok_or_else(|| CommandError::UnknownCommand(path.to_string()))?;

    if args.len() < spec.min_args || args.len() > spec.max_args {
        return Err(CommandError::ArgumentCount {
            command: spec.name,
            usage: spec.usage,
        });
    }
    Ok(ParsedCommand { spec, args })
}

/// Run a parsed command on behalf of `session`.
///
/// Open takes the session over for the whole bridge and only returns once
/// the bridge has been torn down.
pub async fn dispatch(
    bridge: &UartBridge,
    session: &mut NetSession,
    command: &ParsedCommand<'_>,
) -> CommandResult {
    debug!(
        "Session {} command {} {:?}",
        session.id, command.spec.name, command.args
    );
    match command.spec.kind {
        CommandKind::Open => match bridge.open(session, &command.args).await {
            Ok(end) => CommandResult::Bridged(end),
            Err(e) => {
                info!("Session {} Open failed: {}", session.id, e);
                CommandResult::Exception(e)
            }
        },
        CommandKind::Close => {
            let device = parse_uint(command.args[0])
                .and_then(|device| usize::try_from(device).ok())
                .filter(|device| *device < bridge.devices().device_count());
            match device {
                Some(device) => {
                    bridge.close(device).await;
                }
                None => warn!("Close ignored for invalid device '{}'", command.args[0]),
            }
            CommandResult::NoError(true)
        }
        CommandKind::Mux45 => {
            let on = command.args[0].eq_ignore_ascii_case(MUX_ON);
            match bridge.set_mux(on).await {
                Ok(()) => CommandResult::NoError(true),
                Err(e) => CommandResult::Exception(e),
            }
        }
        CommandKind::Cb => CommandResult::Int(bridge.take_callback_count()),
    }
}
