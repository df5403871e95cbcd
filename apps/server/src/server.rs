// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Server listener (C9): owns the shared domain components, seeds the demo
//! node, accepts connections, and coordinates graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use greenhouse_core::events::DomainEvent;
use greenhouse_core::node::NodeDraft;
use greenhouse_core::{NodeManager, SensorEngine, UserStore};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::client_registry::ClientRegistry;
use crate::config::Config;
use crate::state::AppState;

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

fn demo_node_draft() -> NodeDraft {
    NodeDraft {
        name: "Demo Greenhouse".to_string(),
        location: "Central".to_string(),
        ip: "127.0.0.1".to_string(),
        sensors: Some(vec![
            "temperature".to_string(),
            "humidity".to_string(),
            "light".to_string(),
            "ph".to_string(),
        ]),
        actuators: Some(vec![
            "fan".to_string(),
            "water_pump".to_string(),
            "co2".to_string(),
            "window".to_string(),
        ]),
    }
}

/// Forwards domain events published by the Node Manager / Sensor Engine
/// onto the Client Registry's subscription-filtered fan-out. This is the
/// one place the two otherwise-independent halves of the server meet;
/// neither holds a reference to the other (see DESIGN.md, cyclic
/// ownership note).
fn spawn_event_bridge(mut events_rx: broadcast::Receiver<DomainEvent>, client_registry: Arc<ClientRegistry>) {
    tokio::spawn(async move {
        loop {
            match events_rx.recv().await {
                Ok(DomainEvent::SensorUpdate(update)) => {
                    client_registry
                        .broadcast_sensor_update(&update.node_id, update.timestamp_ms, update.data)
                        .await;
                },
                Ok(DomainEvent::NodeChange(change)) => {
                    client_registry.broadcast_node_change(change.op.as_str(), &change.node_id, change.node).await;
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event bridge lagged behind domain events");
                },
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Binds the configured listening socket and runs the server until a
/// shutdown signal is received.
///
/// # Errors
///
/// Returns an error if the user store cannot be opened or the listening
/// socket cannot be bound — both are treated as fatal per the server
/// specification's error-handling design.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let listener = TcpListener::bind((config.server.bind.as_str(), config.server.port)).await?;
    tracing::info!(bind = %config.server.bind, port = config.server.port, "listening for connections");
    serve(listener, config).await
}

/// Runs the server over an already-bound listener. Split out from [`run`]
/// so integration tests can bind to port 0 and connect to the listener's
/// resolved local address instead of racing a fixed port.
///
/// # Errors
///
/// Returns an error if the user store cannot be opened.
pub async fn serve(listener: TcpListener, config: Config) -> anyhow::Result<()> {
    let (events_tx, events_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    let user_store = Arc::new(UserStore::open(&config.users.file_path).await?);
    let node_manager = NodeManager::with_noise_seed(events_tx.clone(), config.sim.test_seed);
    let sensor_engine =
        SensorEngine::spawn_with_tick_dt(node_manager.clone(), events_tx.clone(), config.sim.tick_seconds);
    let client_registry = ClientRegistry::new();

    spawn_event_bridge(events_rx, client_registry.clone());

    let demo_node_id = node_manager.add_node(demo_node_draft()).await;
    tracing::info!(node_id = %demo_node_id, "seeded demo node");

    let state =
        AppState { node_manager, user_store, client_registry, sensor_engine: sensor_engine.clone() };

    let mut session_tasks = tokio::task::JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to accept connection");
                        continue;
                    },
                };
                tracing::debug!(peer = %peer, "accepted connection");
                let session_state = state.clone();
                session_tasks.spawn(crate::session::handle_connection(socket, session_state));
            },
            () = shutdown_signal() => {
                tracing::info!("shutdown signal received, closing listener");
                break;
            },
        }
    }

    drop(listener);

    if tokio::time::timeout(SESSION_DRAIN_TIMEOUT, async {
        while session_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        tracing::warn!("session drain timed out, aborting remaining connections");
        session_tasks.abort_all();
    }

    sensor_engine.close().await;
    tracing::info!("server shutdown complete");
    Ok(())
}

/// Waits for either Ctrl+C or SIGTERM.
///
/// # Panics
///
/// Panics if the SIGTERM handler cannot be registered. This only happens if
/// the process has already exhausted its signal handling slots or is
/// otherwise in a broken state it can't run in anyway, so there is nothing
/// useful to do but fail fast at startup.
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    #[allow(clippy::expect_used)]
    let mut terminate = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = terminate.recv() => {},
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
