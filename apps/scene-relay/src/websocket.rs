use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use scene_proto::{Command, ErrorCode, InitAck, InitBody, Message, MessageKind};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::session::{Outbound, SessionHandle, SessionState};
use crate::state::AppState;

/// WebSocket upgrade handler
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    let session = state
        .sessions
        .register(tx, state.config.session_require_init);
    let session_id = session.id().to_string();

    let writer_session_id = session_id.clone();
    tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Message(msg) => {
                    if sender.send(WsMessage::Text(msg.to_json())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = sender.send(WsMessage::Close(None)).await;
                    break;
                }
            }
        }
        debug!(session_id = %writer_session_id, "writer task ended");
    });

    info!(session_id = %session_id, "session connected");
    let idle_timeout = state.config.session_idle_timeout;

    loop {
        let deadline = session.idle_deadline(idle_timeout);
        tokio::select! {
            frame = receiver.next() => {
                let Some(frame) = frame else { break };
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "websocket error");
                        break;
                    }
                };
                match frame {
                    WsMessage::Text(text) => handle_text(&state, &session, &text),
                    // Binary frames carrying UTF-8 JSON are accepted for older clients.
                    WsMessage::Binary(data) => match String::from_utf8(data) {
                        Ok(text) => handle_text(&state, &session, &text),
                        Err(_) => {
                            session.touch();
                            session.send_error("", ErrorCode::InvalidJson, "binary frame is not UTF-8");
                        }
                    },
                    WsMessage::Ping(_) | WsMessage::Pong(_) => session.touch(),
                    WsMessage::Close(_) => {
                        debug!(session_id = %session_id, "client closed");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                info!(session_id = %session_id, idle_secs = idle_timeout.as_secs(), "closing idle session");
                session.terminate(ErrorCode::SessionClosed, "idle timeout expired");
                break;
            }
        }
    }

    state.sessions.remove(&session_id);
    info!(session_id = %session_id, "session closed");
}

/// Process one inbound text frame. Never blocks: commands are handed to
/// their own task once their lock slot is reserved.
fn handle_text(state: &AppState, session: &Arc<SessionHandle>, text: &str) {
    session.touch();

    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            session.send_error("", ErrorCode::InvalidJson, format!("invalid JSON: {e}"));
            return;
        }
    };
    let correlation = value
        .get("id")
        .and_then(|id| match id {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_default();
    let message: Message = match serde_json::from_value(value) {
        Ok(m) => m,
        Err(e) => {
            session.send_error(&correlation, ErrorCode::InvalidEnvelope, format!("invalid envelope: {e}"));
            return;
        }
    };

    match message.kind.clone() {
        MessageKind::Ping => {
            session.send(Message::pong(message.id.clone()));
        }
        MessageKind::Pong => {}
        MessageKind::Init => handle_init(session, &message),
        MessageKind::Command => handle_command(state, session, message),
        MessageKind::Response | MessageKind::Error => {
            debug!(session_id = %session.id(), kind = %message.kind, "ignoring server-bound kind from client");
        }
        MessageKind::Unknown(kind) => {
            session.send_error(
                &message.id,
                ErrorCode::UnknownMessageType,
                format!("unknown message type: {kind}"),
            );
        }
    }
}

fn handle_init(session: &Arc<SessionHandle>, message: &Message) {
    let body = match message.payload_as::<Option<InitBody>>() {
        Ok(body) => body.unwrap_or_default(),
        Err(e) => {
            session.send_error(&message.id, ErrorCode::InvalidEnvelope, format!("invalid init payload: {e}"));
            return;
        }
    };
    session.activate(body.client_type);
    let ack = InitAck {
        session_id: session.id().to_string(),
        client_type: session.client_type().unwrap_or_else(|| "unknown".to_string()),
    };
    debug!(session_id = %session.id(), client_type = %ack.client_type, "session initialised");
    session.send(Message::init_ack(message.id.clone(), &ack));
}

fn handle_command(state: &AppState, session: &Arc<SessionHandle>, message: Message) {
    if session.state() == SessionState::Connecting {
        session.send_error(&message.id, ErrorCode::NotInitialized, "send init before commands");
        return;
    }

    let payload = message.payload.unwrap_or(Value::Null);
    let command = match Command::from_value_with_id(payload, Some(&message.id)) {
        Ok(command) => command,
        Err(e) => {
            session.send_error(&message.id, ErrorCode::InvalidEnvelope, e.to_string());
            return;
        }
    };

    // Replies echo the envelope id; envelopes without one fall back to the
    // command id.
    let reply_id = if message.id.is_empty() {
        command.id.clone()
    } else {
        message.id.clone()
    };

    if !session.begin_command(&command.id) {
        session.send_error(
            &reply_id,
            ErrorCode::DuplicateCommandId,
            format!("command {} is already in flight", command.id),
        );
        return;
    }

    debug!(
        session_id = %session.id(),
        command_id = %command.id,
        action = %command.action,
        target = command.target.as_deref().unwrap_or("-"),
        "command accepted"
    );

    // Reserve the lock slot before spawning so arrival order is lock order.
    let pending = state.engine.submit(command);
    let session = session.clone();
    tokio::spawn(async move {
        pending
            .run_with(|outcome| {
                session.finish_command(&outcome.command_id);
                session.send(Message::response(reply_id, outcome));
            })
            .await;
    });
}
