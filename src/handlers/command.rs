/// Command connection handler: reads `/UART/...` command lines from a network
/// session, replies with JSON lines and hands the session to the bridge on Open
use std::time::Duration;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};
use tracing::{debug, error, info, warn};

use crate::api::{CommandResult, Reply, dispatch, parse_line};
use crate::app_state::AppState;
use crate::protocol::{ConnectionResult, NetSession, ReceiveVerdict, classify_receive, send_all};
use crate::service::CommandError;

/// Longest command line accepted
pub const MAX_COMMAND_LINE: usize = 1024;

/// Serve one network session until it closes, a bridge on it ends or a
/// disconnect is requested. The sending side is shut down on return.
pub async fn handle_connection(state: AppState, mut session: NetSession) {
    info!("Command session {} connected", session.id);
    if let Err(e) = serve(&state, &mut session).await {
        warn!("Command session {} failed: {}", session.id, e);
    }
    let sender = session.sender.clone();
    let shutdown = async move { sender.lock().await.shutdown().await };
    match tokio::time::timeout(state.config.bridge.teardown_wait(), shutdown).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Session {} shutdown: {}", session.id, e),
        Err(_) => warn!("Session {} sender shutdown timed out", session.id),
    }
    info!("Command session {} closed", session.id);
}

async fn serve(state: &AppState, session: &mut NetSession) -> ConnectionResult<()> {
    let config = &state.config.bridge;
    let threshold = config.dead_transport_threshold();
    let mut codec = LinesCodec::new_with_max_length(MAX_COMMAND_LINE);
    let mut buffer = vec![0u8; config.inbound_capacity];
    let disconnect = session.disconnect.clone();

    loop {
        match next_line(&mut codec, &mut session.inbound) {
            Ok(Some(line)) => {
                let result = match parse_line(&line) {
                    Some(Ok(command)) => dispatch(&state.bridge, session, &command).await,
                    Some(Err(e)) => CommandResult::Exception(e),
                    None => continue,
                };
                if let CommandResult::Bridged(end) = result {
                    debug!("Session {} bridge ended: {:?}", session.id, end);
                    return Ok(());
                }
                if let Some(reply) = result.reply() {
                    send_reply(session, &reply, config.send_backoff()).await?;
                }
                continue;
            }
            Ok(None) => {}
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                warn!("Session {} sent an over-long command line", session.id);
                let reply = Reply::exception(&CommandError::operational("command line too long"));
                send_reply(session, &reply, config.send_backoff()).await?;
                continue;
            }
            Err(e) => return Err(e.into()),
        }

        if disconnect.is_requested() {
            info!("Session {} disconnect requested", session.id);
            return Ok(());
        }

        let received = tokio::select! {
            received = session.receiver.receive(&mut buffer, config.receive_timeout()) => received,
            _ = disconnect.requested() => continue,
        };
        match classify_receive(&received, threshold) {
            ReceiveVerdict::Data(count) => session.inbound.extend_from_slice(&buffer[..count]),
            ReceiveVerdict::Timeout => {}
            ReceiveVerdict::Dead => {
                debug!(
                    "Session {} transport closed ({:?} after {:?})",
                    session.id, received.result, received.elapsed
                );
                return Ok(());
            }
        }
    }
}

fn next_line(
    codec: &mut LinesCodec,
    inbound: &mut BytesMut,
) -> Result<Option<String>, LinesCodecError> {
    codec.decode(inbound)
}

async fn send_reply(session: &NetSession, reply: &Reply, backoff: Duration) -> ConnectionResult<()> {
    let line = reply.to_line()?;
    send_all(&session.sender, line.as_bytes(), backoff)
        .await
        .map_err(|e| {
            error!("Session {} reply failed: {}", session.id, e);
            e.into()
        })
}
