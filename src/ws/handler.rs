//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::http::middleware::{verify_jwt, AuthenticatedUser};
use crate::matchmaking::DuelError;
use crate::util::rate_limit::ParticipantRateLimiter;
use crate::util::time::unix_millis;
use crate::world::{BlockPos, Location, Messenger, World};
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// JWT token for authentication
    pub token: String,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    // Verify JWT token before upgrading
    match verify_jwt(&query.token, &state.config.jwt_secret) {
        Ok(claims) => {
            let user = AuthenticatedUser::from(claims);
            info!(participant = %user.participant_id, "WebSocket upgrade for authenticated participant");
            ws.on_upgrade(move |socket| handle_socket(socket, user, state))
        }
        Err(e) => {
            warn!(error = %e, "WebSocket auth failed");
            e.into_response()
        }
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, user: AuthenticatedUser, state: AppState) {
    let participant = user.participant_id;
    info!(participant = %participant, name = %user.display_name, "New WebSocket connection");

    let (ws_sink, mut ws_stream) = socket.split();

    state.world.connect(participant, &user.display_name);
    let (session, outbox) = state.hub.register(participant);
    let writer = tokio::spawn(run_writer(participant, ws_sink, outbox));

    state.hub.send(
        participant,
        ServerMsg::Welcome {
            participant_id: participant,
            server_time: unix_millis(),
        },
    );

    let rate_limiter = ParticipantRateLimiter::new();

    // Reader loop: WebSocket -> coordinator
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let msg = match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(participant = %participant, error = %e, "Failed to parse client message");
                        state.hub.send(participant, error_msg("bad_message", e.to_string()));
                        continue;
                    }
                };

                if is_report(&msg) {
                    if !rate_limiter.check_report() {
                        debug!(participant = %participant, "Rate limited report");
                        continue;
                    }
                } else if !rate_limiter.check_command() {
                    warn!(participant = %participant, "Rate limited command");
                    state.hub.send(participant, error_msg("rate_limited", "Slow down".to_string()));
                    continue;
                }

                match dispatch(&state, participant, msg).await {
                    Ok(Some(reply)) => state.hub.send(participant, reply),
                    Ok(None) => {}
                    Err(e) => {
                        debug!(participant = %participant, error = %e, "Command rejected");
                        state.hub.send(participant, error_msg(e.code(), e.to_string()));
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(participant = %participant, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(participant = %participant, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(participant = %participant, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // A newer connection for the same participant keeps the duel alive
    if state.hub.unregister(participant, session) {
        state.coordinator.handle_disconnect(participant).await;
        state.world.disconnect(participant);
    }
    writer.abort();

    info!(participant = %participant, "WebSocket connection closed");
}

/// Drain the session outbox into the socket
async fn run_writer(
    participant: Uuid,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut outbox: mpsc::Receiver<ServerMsg>,
) {
    while let Some(msg) = outbox.recv().await {
        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
            debug!(participant = %participant, error = %e, "WebSocket send failed");
            break;
        }
    }
}

/// World reports are frequent and cheap; everything else is a command
fn is_report(msg: &ClientMsg) -> bool {
    matches!(
        msg,
        ClientMsg::Move { .. } | ClientMsg::PlaceBlock { .. } | ClientMsg::Died { .. } | ClientMsg::Ping { .. }
    )
}

fn error_msg(code: &str, message: String) -> ServerMsg {
    ServerMsg::Error {
        code: code.to_string(),
        message,
    }
}

/// Apply one client message. The returned message, if any, goes back to
/// the sender.
pub(crate) async fn dispatch(
    state: &AppState,
    participant: Uuid,
    msg: ClientMsg,
) -> Result<Option<ServerMsg>, DuelError> {
    let coordinator = &state.coordinator;
    match msg {
        ClientMsg::Challenge { target } => coordinator.send_request(participant, &target)?,
        ClientMsg::Accept { challenger } => coordinator.accept_request(participant, &challenger)?,
        ClientMsg::Deny { challenger } => coordinator.deny_request(participant, &challenger)?,
        ClientMsg::Cancel => coordinator.cancel_request(participant)?,
        ClientMsg::JoinQueue => {
            coordinator.join_queue(participant).await?;
        }
        ClientMsg::LeaveQueue => coordinator.leave_queue(participant).await?,
        ClientMsg::ReturnNow => coordinator.return_now(participant)?,
        ClientMsg::Move { world, x, y, z } => {
            state.world.move_to(participant, Location::new(world, x, y, z));
        }
        ClientMsg::PlaceBlock { x, y, z, block } => {
            let Some(at) = state.world.location(participant) else {
                return Ok(None);
            };
            let pos = BlockPos::new(x, y, z);
            match state.world.set_block(&at.world, pos, &block) {
                Ok(()) => {
                    coordinator.track_placed_block(participant, pos);
                }
                Err(e) => warn!(participant = %participant, error = %e, "Block report rejected"),
            }
        }
        ClientMsg::Died { killer, drops } => {
            coordinator.handle_death(participant, killer, &drops);
        }
        ClientMsg::Ping { t } => return Ok(Some(ServerMsg::Pong { t })),
    }
    Ok(None)
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}
