// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Authoritative registry of nodes and their runtimes.
//!
//! All mutations serialise behind one manager-wide lock; `get_all_nodes`
//! and `snapshot` take a consistent snapshot under that same lock and
//! return owned data, so callers never hold it across an await point.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};

use crate::environment::{SeededNoise, ThreadNoise, WindowState};
use crate::error::{GreenhouseError, Result};
use crate::events::{now_millis, DomainEvent, NodeChangeEvent, NodeChangeOp, SensorUpdateEvent};
use crate::node::{NodeConfig, NodeDraft, NodePatch, NodeRuntime};

/// Which declarative component list a legacy `add_component`/`remove_component`
/// request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Sensor,
    Actuator,
}

struct Inner {
    nodes: IndexMap<String, (NodeConfig, NodeRuntime)>,
    next_id: u64,
}

/// Registry of nodes and their runtimes, shared across the session
/// handlers and the sensor engine.
pub struct NodeManager {
    inner: Mutex<Inner>,
    events_tx: broadcast::Sender<DomainEvent>,
    /// When set, every tick reseeds its noise source from this value
    /// instead of drawing from the thread-local RNG, so integration tests
    /// can assert exact trends (see `sim.test_seed` in the server config).
    noise_seed: Option<u64>,
}

impl NodeManager {
    #[must_use]
    pub fn new(events_tx: broadcast::Sender<DomainEvent>) -> Arc<Self> {
        Self::with_noise_seed(events_tx, None)
    }

    #[must_use]
    pub fn with_noise_seed(events_tx: broadcast::Sender<DomainEvent>, noise_seed: Option<u64>) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner { nodes: IndexMap::new(), next_id: 1 }),
            events_tx,
            noise_seed,
        })
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.events_tx.subscribe()
    }

    fn emit(&self, event: NodeChangeEvent) {
        // No subscribers is a normal state (e.g. no clients connected yet).
        let _ = self.events_tx.send(DomainEvent::NodeChange(event));
    }

    pub async fn add_node(&self, draft: NodeDraft) -> String {
        let mut inner = self.inner.lock().await;
        let id = format!("node-{}", inner.next_id);
        inner.next_id += 1;

        let config = NodeConfig {
            id: id.clone(),
            name: draft.name,
            location: draft.location,
            ip: draft.ip,
            sensors: draft.sensors.unwrap_or_default(),
            actuators: draft.actuators.unwrap_or_default(),
        };
        inner.nodes.insert(id.clone(), (config.clone(), NodeRuntime::default()));
        drop(inner);

        self.emit(NodeChangeEvent { op: NodeChangeOp::Added, node_id: id.clone(), node: Some(config) });
        id
    }

    pub async fn get_all_nodes(&self) -> Vec<NodeConfig> {
        let inner = self.inner.lock().await;
        inner.nodes.values().map(|(config, _)| config.clone()).collect()
    }

    pub async fn update_node(&self, node_id: &str, patch: NodePatch) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Some((config, _)) = inner.nodes.get_mut(node_id) else {
            return Err(GreenhouseError::NotFound(format!("node {node_id} not found")));
        };
        if let Some(name) = patch.name {
            config.name = name;
        }
        if let Some(location) = patch.location {
            config.location = location;
        }
        if let Some(ip) = patch.ip {
            config.ip = ip;
        }
        if let Some(sensors) = patch.sensors {
            config.sensors = sensors;
        }
        if let Some(actuators) = patch.actuators {
            config.actuators = actuators;
        }
        let updated = config.clone();
        drop(inner);

        self.emit(NodeChangeEvent {
            op: NodeChangeOp::Updated,
            node_id: node_id.to_string(),
            node: Some(updated),
        });
        Ok(())
    }

    pub async fn delete_node(&self, node_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.nodes.shift_remove(node_id).is_none() {
            return Err(GreenhouseError::NotFound(format!("node {node_id} not found")));
        }
        drop(inner);

        self.emit(NodeChangeEvent { op: NodeChangeOp::Removed, node_id: node_id.to_string(), node: None });
        Ok(())
    }

    pub async fn set_sampling(&self, node_id: &str, interval_ms: u64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Some((_, runtime)) = inner.nodes.get_mut(node_id) else {
            return Err(GreenhouseError::NotFound(format!("node {node_id} not found")));
        };
        runtime.set_interval_ms(interval_ms);
        Ok(())
    }

    /// `target` is one of `fan`, `water_pump`, `co2`, `window`; unknown
    /// targets are silently dropped per the spec, not surfaced as errors —
    /// the caller still replies with a plain ack.
    pub async fn execute_command(&self, node_id: &str, target: &str, params: &Value) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Some((_, runtime)) = inner.nodes.get_mut(node_id) else {
            return Err(GreenhouseError::NotFound(format!("node {node_id} not found")));
        };

        match target {
            "fan" => runtime.fan_on = params_on(params),
            "water_pump" => runtime.pump_on = params_on(params),
            "co2" => runtime.co2_on = params_on(params),
            "window" => {
                if let Some(level) = params.get("level").and_then(Value::as_str) {
                    if let Some(window) = WindowState::parse(level) {
                        runtime.window = window;
                    }
                    // Invalid level: silently dropped, ack anyway (spec §8 boundary).
                }
            },
            _ => {
                // Unknown actuator name: silently dropped, ack anyway.
            },
        }
        Ok(())
    }

    /// Legacy helper: appends `name` to the node's sensor or actuator list.
    /// Duplicates are not permitted (per the node invariant) and are
    /// silently ignored rather than erroring. Emits `node_change{updated}`.
    pub async fn add_component(&self, node_id: &str, kind: ComponentKind, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Some((config, _)) = inner.nodes.get_mut(node_id) else {
            return Err(GreenhouseError::NotFound(format!("node {node_id} not found")));
        };
        let list = match kind {
            ComponentKind::Sensor => &mut config.sensors,
            ComponentKind::Actuator => &mut config.actuators,
        };
        if !list.iter().any(|existing| existing == name) {
            list.push(name.to_string());
        }
        let updated = config.clone();
        drop(inner);

        self.emit(NodeChangeEvent {
            op: NodeChangeOp::Updated,
            node_id: node_id.to_string(),
            node: Some(updated),
        });
        Ok(())
    }

    /// Legacy helper: removes `name` from the node's sensor or actuator
    /// list, if present. A no-op (not an error) when `name` is absent.
    /// Emits `node_change{updated}`.
    pub async fn remove_component(&self, node_id: &str, kind: ComponentKind, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Some((config, _)) = inner.nodes.get_mut(node_id) else {
            return Err(GreenhouseError::NotFound(format!("node {node_id} not found")));
        };
        let list = match kind {
            ComponentKind::Sensor => &mut config.sensors,
            ComponentKind::Actuator => &mut config.actuators,
        };
        list.retain(|existing| existing != name);
        let updated = config.clone();
        drop(inner);

        self.emit(NodeChangeEvent {
            op: NodeChangeOp::Updated,
            node_id: node_id.to_string(),
            node: Some(updated),
        });
        Ok(())
    }

    /// Takes an out-of-band snapshot of `node_id` and publishes it as a
    /// `SensorUpdate` domain event immediately, without waiting for the
    /// node's next scheduled tick. Used after `command` so subscribers see
    /// an actuator change reflected right away (spec §9).
    pub async fn publish_snapshot(&self, node_id: &str) -> Result<()> {
        let data = self.snapshot(node_id).await?;
        let _ = self.events_tx.send(DomainEvent::SensorUpdate(SensorUpdateEvent {
            node_id: node_id.to_string(),
            timestamp_ms: now_millis(),
            data,
        }));
        Ok(())
    }

    pub async fn snapshot(&self, node_id: &str) -> Result<IndexMap<String, Value>> {
        let inner = self.inner.lock().await;
        inner
            .nodes
            .get(node_id)
            .map(|(_, runtime)| runtime.snapshot())
            .ok_or_else(|| GreenhouseError::NotFound(format!("node {node_id} not found")))
    }

    /// Advances one node's environment by `dt_secs` and returns its fresh
    /// snapshot, or `None` if the node no longer exists (it may have been
    /// deleted between scheduling and this tick firing).
    pub async fn tick_node(&self, node_id: &str, dt_secs: f64) -> Option<IndexMap<String, Value>> {
        let mut inner = self.inner.lock().await;
        let (_, runtime) = inner.nodes.get_mut(node_id)?;
        match self.noise_seed {
            Some(seed) => runtime.tick(dt_secs, &mut SeededNoise::new(seed)),
            None => runtime.tick(dt_secs, &mut ThreadNoise),
        }
        Some(runtime.snapshot())
    }

    pub async fn node_exists(&self, node_id: &str) -> bool {
        self.inner.lock().await.nodes.contains_key(node_id)
    }

    /// Current sampling interval for `node_id`, or `None` if it does not exist.
    pub async fn interval_ms(&self, node_id: &str) -> Option<u64> {
        self.inner.lock().await.nodes.get(node_id).map(|(_, runtime)| runtime.interval_ms)
    }
}

fn params_on(params: &Value) -> bool {
    match params.get("on") {
        Some(Value::Bool(on)) => *on,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(name: &str) -> NodeDraft {
        NodeDraft { name: name.to_string(), location: "S".to_string(), ip: "10.0.0.1".to_string(), sensors: None, actuators: None }
    }

    #[tokio::test]
    async fn add_node_assigns_monotonic_ids() {
        let (tx, _rx) = broadcast::channel(16);
        let manager = NodeManager::new(tx);
        let a = manager.add_node(draft("A")).await;
        let b = manager.add_node(draft("B")).await;
        assert_eq!(a, "node-1");
        assert_eq!(b, "node-2");
    }

    #[tokio::test]
    async fn null_component_lists_normalise_to_empty() {
        let (tx, _rx) = broadcast::channel(16);
        let manager = NodeManager::new(tx);
        let id = manager.add_node(draft("A")).await;
        let nodes = manager.get_all_nodes().await;
        let node = nodes.iter().find(|n| n.id == id).unwrap();
        assert!(node.sensors.is_empty());
        assert!(node.actuators.is_empty());
    }

    #[tokio::test]
    async fn delete_twice_returns_not_found_second_time() {
        let (tx, _rx) = broadcast::channel(16);
        let manager = NodeManager::new(tx);
        let id = manager.add_node(draft("A")).await;
        assert!(manager.delete_node(&id).await.is_ok());
        let err = manager.delete_node(&id).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn update_unknown_node_is_not_found() {
        let (tx, _rx) = broadcast::channel(16);
        let manager = NodeManager::new(tx);
        let err = manager.update_node("node-99", NodePatch::default()).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn set_sampling_clamps_to_floor() {
        let (tx, _rx) = broadcast::channel(16);
        let manager = NodeManager::new(tx);
        let id = manager.add_node(draft("A")).await;
        manager.set_sampling(&id, 0).await.unwrap();
        let snap = manager.snapshot(&id).await.unwrap();
        assert!(snap.contains_key("temperature"));
    }

    #[tokio::test]
    async fn command_with_invalid_window_level_is_silently_dropped() {
        let (tx, _rx) = broadcast::channel(16);
        let manager = NodeManager::new(tx);
        let id = manager.add_node(draft("A")).await;
        manager.execute_command(&id, "window", &serde_json::json!({"level": "SIDEWAYS"})).await.unwrap();
        let snap = manager.snapshot(&id).await.unwrap();
        assert_eq!(snap["window"], "CLOSED");
    }

    #[tokio::test]
    async fn command_sets_fan_on_from_bool_or_string() {
        let (tx, _rx) = broadcast::channel(16);
        let manager = NodeManager::new(tx);
        let id = manager.add_node(draft("A")).await;
        manager.execute_command(&id, "fan", &serde_json::json!({"on": true})).await.unwrap();
        assert_eq!(manager.snapshot(&id).await.unwrap()["fan"], "ON");
        manager.execute_command(&id, "fan", &serde_json::json!({"on": "false"})).await.unwrap();
        assert_eq!(manager.snapshot(&id).await.unwrap()["fan"], "OFF");
    }

    #[tokio::test]
    async fn unknown_actuator_target_is_silently_dropped() {
        let (tx, _rx) = broadcast::channel(16);
        let manager = NodeManager::new(tx);
        let id = manager.add_node(draft("A")).await;
        assert!(manager.execute_command(&id, "heater", &serde_json::json!({"on": true})).await.is_ok());
    }

    #[tokio::test]
    async fn add_component_is_idempotent_against_duplicates() {
        let (tx, _rx) = broadcast::channel(16);
        let manager = NodeManager::new(tx);
        let id = manager.add_node(draft("A")).await;
        manager.add_component(&id, ComponentKind::Sensor, "co2").await.unwrap();
        manager.add_component(&id, ComponentKind::Sensor, "co2").await.unwrap();
        let nodes = manager.get_all_nodes().await;
        let node = nodes.iter().find(|n| n.id == id).unwrap();
        assert_eq!(node.sensors, vec!["co2".to_string()]);
    }

    #[tokio::test]
    async fn remove_component_absent_name_is_a_no_op() {
        let (tx, _rx) = broadcast::channel(16);
        let manager = NodeManager::new(tx);
        let id = manager.add_node(draft("A")).await;
        assert!(manager.remove_component(&id, ComponentKind::Actuator, "fan").await.is_ok());
    }

    #[tokio::test]
    async fn publish_snapshot_emits_a_sensor_update_without_ticking() {
        let (tx, _rx) = broadcast::channel(16);
        let manager = NodeManager::new(tx);
        let id = manager.add_node(draft("A")).await;
        let mut rx = manager.subscribe();
        manager.publish_snapshot(&id).await.unwrap();
        let DomainEvent::SensorUpdate(update) = rx.recv().await.unwrap() else {
            panic!("expected a sensor update event");
        };
        assert_eq!(update.node_id, id);
    }

    #[tokio::test]
    async fn a_noise_seed_makes_a_single_tick_reproducible_across_managers() {
        let (tx_a, _rx_a) = broadcast::channel(16);
        let manager_a = NodeManager::with_noise_seed(tx_a, Some(7));
        let id_a = manager_a.add_node(draft("A")).await;

        let (tx_b, _rx_b) = broadcast::channel(16);
        let manager_b = NodeManager::with_noise_seed(tx_b, Some(7));
        let id_b = manager_b.add_node(draft("A")).await;

        let snap_a = manager_a.tick_node(&id_a, 1.0).await.unwrap();
        let snap_b = manager_b.tick_node(&id_b, 1.0).await.unwrap();
        assert_eq!(snap_a["temperature"], snap_b["temperature"]);
        assert_eq!(snap_a["humidity"], snap_b["humidity"]);
    }

    #[tokio::test]
    async fn add_node_emits_node_change_added() {
        let (tx, _rx) = broadcast::channel(16);
        let manager = NodeManager::new(tx);
        let mut rx = manager.subscribe();
        manager.add_node(draft("A")).await;
        let DomainEvent::NodeChange(event) = rx.recv().await.unwrap() else {
            panic!("expected a node change event");
        };
        assert_eq!(event.op, NodeChangeOp::Added);
    }
}
