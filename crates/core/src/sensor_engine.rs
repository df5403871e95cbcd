// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Scheduler that ticks each node's environment at its configured sampling
//! interval and publishes a `SensorUpdate` domain event per tick.
//!
//! Tasks are keyed by nodeId; rescheduling is always cancel-then-spawn,
//! never an in-place update of a running task's timer, so a node can
//! never end up with two tick loops racing each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::events::{now_millis, DomainEvent, NodeChangeOp, SensorUpdateEvent};
use crate::node_manager::NodeManager;

const DEFAULT_TICK_DT_SECS: f64 = 1.0;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct SensorEngine {
    node_manager: Arc<NodeManager>,
    events_tx: broadcast::Sender<DomainEvent>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    tick_dt_secs: f64,
}

impl SensorEngine {
    /// Builds the engine and spawns its background binder task, which
    /// reacts to `node_change` events from the manager by scheduling or
    /// cancelling tick loops. This is how the cyclic manager/engine
    /// reference is avoided: the manager never holds a handle to the
    /// engine, it only ever publishes events the engine (optionally)
    /// listens to.
    #[must_use]
    pub fn spawn(node_manager: Arc<NodeManager>, events_tx: broadcast::Sender<DomainEvent>) -> Arc<Self> {
        Self::spawn_with_tick_dt(node_manager, events_tx, DEFAULT_TICK_DT_SECS)
    }

    /// Same as [`Self::spawn`], but advances each tick by `tick_dt_secs`
    /// simulated seconds instead of the default 1.0 (see `sim.tick_seconds`
    /// in the server config).
    #[must_use]
    pub fn spawn_with_tick_dt(
        node_manager: Arc<NodeManager>,
        events_tx: broadcast::Sender<DomainEvent>,
        tick_dt_secs: f64,
    ) -> Arc<Self> {
        let engine = Arc::new(Self { node_manager, events_tx, tasks: Mutex::new(HashMap::new()), tick_dt_secs });

        let binder_engine = engine.clone();
        let mut rx = binder_engine.node_manager.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(DomainEvent::NodeChange(change)) => match change.op {
                        NodeChangeOp::Added => binder_engine.schedule_node(&change.node_id).await,
                        NodeChangeOp::Removed => binder_engine.cancel_node(&change.node_id).await,
                        NodeChangeOp::Updated => {},
                    },
                    Ok(DomainEvent::SensorUpdate(_)) => {},
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        engine
    }

    /// Cancels any existing task for `node_id`, then starts a fresh one at
    /// the node's currently configured interval with no initial delay.
    pub async fn schedule_node(&self, node_id: &str) {
        self.cancel_node(node_id).await;

        let Some(interval_ms) = self.node_manager.interval_ms(node_id).await else {
            return;
        };

        let node_manager = self.node_manager.clone();
        let events_tx = self.events_tx.clone();
        let node_id_owned = node_id.to_string();
        let tick_dt_secs = self.tick_dt_secs;
        let handle = tokio::spawn(async move {
            let period = Duration::from_millis(interval_ms);
            loop {
                let Some(data) = node_manager.tick_node(&node_id_owned, tick_dt_secs).await else {
                    break; // node was deleted out from under this tick loop
                };
                let event = SensorUpdateEvent {
                    node_id: node_id_owned.clone(),
                    timestamp_ms: now_millis(),
                    data,
                };
                let _ = events_tx.send(DomainEvent::SensorUpdate(event));
                tokio::time::sleep(period).await;
            }
        });

        self.tasks.lock().await.insert(node_id.to_string(), handle);
    }

    /// Cancels the tick task for `node_id` without interrupting other
    /// nodes' loops. A no-op if no task is scheduled.
    pub async fn cancel_node(&self, node_id: &str) {
        if let Some(handle) = self.tasks.lock().await.remove(node_id) {
            handle.abort();
        }
    }

    pub async fn reschedule_node(&self, node_id: &str) {
        self.schedule_node(node_id).await;
    }

    /// Stops accepting new ticks and waits briefly for in-flight tasks to
    /// wind down before force-terminating whatever is left.
    pub async fn close(&self) {
        let handles: Vec<_> = self.tasks.lock().await.drain().map(|(_, handle)| handle).collect();
        let abort_handles: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();

        if tokio::time::timeout(SHUTDOWN_GRACE, futures::future::join_all(handles)).await.is_err() {
            for abort_handle in abort_handles {
                abort_handle.abort();
            }
        }
    }
}
