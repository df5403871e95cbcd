// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Per-connection session handler (C8): welcome-on-connect, a line reader
//! loop that dispatches on message `type`, and a writer task that drains
//! the session's outbound queue onto the socket.
//!
//! `ACCEPTED -> READY -> CLOSED`, with no path back: once the reader or
//! writer half observes an I/O error, the other half is torn down too and
//! the session is removed from the registry. Nothing here waits for a
//! `hello` before writing `welcome` — see the server specification's
//! entry state.

use std::sync::Arc;

use greenhouse_api::{ClientMessage, Decoded, ServerMessage};
use greenhouse_core::node_manager::ComponentKind;
use greenhouse_core::GreenhouseError;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::state::AppState;

const SERVER_NAME: &str = "GreenhouseServer";
const SERVER_VERSION: &str = "1.0";

/// Drives one accepted connection until either half closes. Removes the
/// session from the registry on the way out, whatever the cause.
pub async fn handle_connection(socket: TcpStream, state: AppState) {
    let peer = socket.peer_addr().map(|addr| addr.to_string()).unwrap_or_else(|_| "unknown".to_string());
    let (read_half, mut write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half).lines();

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let session = state.client_registry.add_session(tx).await;
    tracing::info!(session_id = %session.id, peer = %peer, "session accepted");

    session.send(&ServerMessage::Welcome {
        server: SERVER_NAME.to_string(),
        version: SERVER_VERSION.to_string(),
    });

    let writer_task = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if write_half.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    loop {
        match reader.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                dispatch_line(&line, &session, &state).await;
            },
            Ok(None) => break, // peer closed cleanly
            Err(err) => {
                tracing::debug!(session_id = %session.id, error = %err, "connection read error");
                break;
            },
        }
    }

    state.client_registry.remove_session(session.id).await;
    writer_task.abort();
    tracing::info!(session_id = %session.id, peer = %peer, "session closed");
}

async fn dispatch_line(line: &str, session: &Arc<crate::client_registry::Session>, state: &AppState) {
    match greenhouse_api::decode(line) {
        Ok(Decoded::Known(message)) => dispatch_message(*message, session, state).await,
        Ok(Decoded::Unknown { message_type, id: _ }) => {
            tracing::debug!(session_id = %session.id, message_type = %message_type, "ignoring unrecognised message type");
        },
        Err(err) => {
            tracing::debug!(session_id = %session.id, error = %err, "malformed protocol line");
            let id = err.id().map(ToString::to_string);
            session.send(&ServerMessage::error(id, "INVALID_ARG", err.to_string()));
        },
    }
}

fn error_for(id: Option<String>, err: &GreenhouseError) -> ServerMessage {
    ServerMessage::error(id, err.code(), err.to_string())
}

#[allow(clippy::too_many_lines)]
async fn dispatch_message(message: ClientMessage, session: &Arc<crate::client_registry::Session>, state: &AppState) {
    match message {
        ClientMessage::Hello { id, client_id } => {
            if let Some(client_id) = client_id {
                session.set_client_id(client_id).await;
            }
            session.send(&ServerMessage::ack(id));
        },

        ClientMessage::Ping { id } => {
            session.send(&ServerMessage::Pong { id });
        },

        ClientMessage::GetTopology { id } => {
            let nodes = state.node_manager.get_all_nodes().await;
            session.send(&ServerMessage::Topology { id, nodes });
        },

        ClientMessage::CreateNode { id, node } => {
            let node_id = state.node_manager.add_node(node).await;
            session.send(&ServerMessage::ack_with_node(id, node_id));
        },

        ClientMessage::UpdateNode { id, node_id, patch } => {
            match state.node_manager.update_node(&node_id, patch).await {
                Ok(()) => session.send(&ServerMessage::ack_with_node(id, node_id)),
                Err(err) => session.send(&error_for(id, &err)),
            }
        },

        ClientMessage::DeleteNode { id, node_id } => {
            match state.node_manager.delete_node(&node_id).await {
                Ok(()) => {
                    state.sensor_engine.cancel_node(&node_id).await;
                    session.send(&ServerMessage::ack_with_node(id, node_id));
                },
                Err(err) => session.send(&error_for(id, &err)),
            }
        },

        ClientMessage::AddComponent { id, node_id, kind, name } => {
            let kind: ComponentKind = kind.into();
            match state.node_manager.add_component(&node_id, kind, &name).await {
                Ok(()) => session.send(&ServerMessage::ack_with_node(id, node_id)),
                Err(err) => session.send(&error_for(id, &err)),
            }
        },

        ClientMessage::RemoveComponent { id, node_id, kind, name } => {
            let kind: ComponentKind = kind.into();
            match state.node_manager.remove_component(&node_id, kind, &name).await {
                Ok(()) => session.send(&ServerMessage::ack_with_node(id, node_id)),
                Err(err) => session.send(&error_for(id, &err)),
            }
        },

        ClientMessage::SetSampling { id, node_id, interval_ms } => {
            match state.node_manager.set_sampling(&node_id, interval_ms).await {
                Ok(()) => {
                    state.sensor_engine.reschedule_node(&node_id).await;
                    session.send(&ServerMessage::ack_with_node(id, node_id));
                },
                Err(err) => session.send(&error_for(id, &err)),
            }
        },

        ClientMessage::Subscribe { id, events, nodes } => {
            session.subscribe(&events, &nodes).await;
            session.send(&ServerMessage::ack(id));
        },

        ClientMessage::Unsubscribe { id, events, nodes } => {
            session.unsubscribe(&events, &nodes).await;
            session.send(&ServerMessage::ack(id));
        },

        ClientMessage::Command { id, node_id, target, action: _, params } => {
            match state.node_manager.execute_command(&node_id, &target, &params).await {
                Ok(()) => {
                    session.send(&ServerMessage::ack_with_node(id, node_id.clone()));
                    if let Err(err) = state.node_manager.publish_snapshot(&node_id).await {
                        tracing::warn!(node_id = %node_id, error = %err, "failed to publish post-command snapshot");
                    }
                },
                Err(err) => session.send(&error_for(id, &err)),
            }
        },

        ClientMessage::Auth { id, username, password } => {
            let success = state.user_store.validate(&username, &password).await;
            if success {
                let user_id = state.user_store.get_user_id(&username).await;
                let role = state.user_store.get_user_role(&username).await;
                if let Some(role) = role.clone() {
                    session.set_role(role).await;
                }
                session.send(&ServerMessage::AuthResponse { id, success, user_id, role, message: None });
            } else {
                session.send(&ServerMessage::AuthResponse {
                    id,
                    success: false,
                    user_id: None,
                    role: None,
                    message: Some("invalid username or password".to_string()),
                });
            }
        },

        ClientMessage::Register { id, username, password, role } => {
            // Open question #3 (DESIGN.md): a null role registers as "Admin".
            let role = role.unwrap_or_else(|| "Admin".to_string());
            match state.user_store.register(&username, &password, &role).await {
                Ok(user_id) => session.send(&ServerMessage::RegisterResponse {
                    id,
                    success: true,
                    user_id: Some(user_id),
                    message: None,
                }),
                Err(err) => session.send(&ServerMessage::RegisterResponse {
                    id,
                    success: false,
                    user_id: None,
                    message: Some(err.to_string()),
                }),
            }
        },

        ClientMessage::GetUsers { id } => {
            let users = state.user_store.get_all().await;
            session.send(&ServerMessage::UsersList { id, success: true, users });
        },

        ClientMessage::UpdateUser { id, user_id, username, role } => {
            let actor_role = session.role().await.unwrap_or_default();
            match state.user_store.update(user_id, &username, &role, &actor_role).await {
                Ok(()) => session.send(&ServerMessage::ack(id)),
                Err(err) => session.send(&error_for(id, &err)),
            }
        },

        ClientMessage::DeleteUser { id, user_id } => {
            let actor_role = session.role().await.unwrap_or_default();
            match state.user_store.delete(user_id, &actor_role).await {
                Ok(()) => session.send(&ServerMessage::ack(id)),
                Err(err) => session.send(&error_for(id, &err)),
            }
        },
    }
}
