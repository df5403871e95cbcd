// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Node configuration and the per-node runtime (environment + actuators +
//! sampling interval) it owns.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::environment::{EnvironmentState, NoiseSource, WindowState};

pub const MIN_INTERVAL_MS: u64 = 200;
pub const DEFAULT_INTERVAL_MS: u64 = 1000;

/// The declarative, persisted-in-spirit configuration of a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    pub name: String,
    pub location: String,
    pub ip: String,
    pub sensors: Vec<String>,
    pub actuators: Vec<String>,
}

/// Input to `NodeManager::add_node`; `id` is assigned by the manager.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeDraft {
    pub name: String,
    pub location: String,
    pub ip: String,
    #[serde(default)]
    pub sensors: Option<Vec<String>>,
    #[serde(default)]
    pub actuators: Option<Vec<String>>,
}

/// A subset of `NodeConfig`'s fields a client may patch via `update_node`.
/// Unknown keys are ignored by the caller before this ever gets built;
/// absent fields here mean "leave unchanged".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub sensors: Option<Vec<String>>,
    #[serde(default)]
    pub actuators: Option<Vec<String>>,
}

/// The mutable per-node record: one environment plus actuator scalars and
/// the sampling interval. Owned exclusively by the `NodeManager` entry for
/// this node; no suspension point anywhere in here.
pub struct NodeRuntime {
    pub environment: EnvironmentState,
    pub fan_on: bool,
    pub pump_on: bool,
    pub co2_on: bool,
    pub window: WindowState,
    pub interval_ms: u64,
}

impl Default for NodeRuntime {
    fn default() -> Self {
        Self {
            environment: EnvironmentState::default(),
            fan_on: false,
            pump_on: false,
            co2_on: false,
            window: WindowState::Closed,
            interval_ms: DEFAULT_INTERVAL_MS,
        }
    }
}

impl NodeRuntime {
    /// Clamps to the floor; smaller requested values are silently raised.
    pub fn set_interval_ms(&mut self, requested_ms: u64) {
        self.interval_ms = requested_ms.max(MIN_INTERVAL_MS);
    }

    pub fn tick(&mut self, dt_secs: f64, noise: &mut dyn NoiseSource) {
        self.environment.step(dt_secs, self.fan_on, self.pump_on, self.co2_on, self.window, noise);
    }

    /// An insertion-ordered sensor+actuator snapshot matching the wire
    /// `sensor_update.data` / topology shape.
    #[must_use]
    pub fn snapshot(&self) -> IndexMap<String, Value> {
        let mut map = IndexMap::new();
        map.insert("temperature".to_string(), serde_json::json!(round2(self.environment.temperature_c)));
        map.insert("humidity".to_string(), serde_json::json!(round2(self.environment.humidity_pct)));
        map.insert("light".to_string(), serde_json::json!(self.environment.light_lux));
        map.insert("ph".to_string(), serde_json::json!(round2(self.environment.ph)));
        map.insert("fan".to_string(), serde_json::json!(on_off(self.fan_on)));
        map.insert("water_pump".to_string(), serde_json::json!(on_off(self.pump_on)));
        map.insert("co2".to_string(), serde_json::json!(on_off(self.co2_on)));
        map.insert("window".to_string(), serde_json::json!(self.window.as_str()));
        map
    }
}

fn on_off(state: bool) -> &'static str {
    if state {
        "ON"
    } else {
        "OFF"
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::NoNoise;

    #[test]
    fn interval_clamps_to_floor() {
        let mut runtime = NodeRuntime::default();
        runtime.set_interval_ms(0);
        assert_eq!(runtime.interval_ms, MIN_INTERVAL_MS);
        runtime.set_interval_ms(50);
        assert_eq!(runtime.interval_ms, MIN_INTERVAL_MS);
        runtime.set_interval_ms(5000);
        assert_eq!(runtime.interval_ms, 5000);
    }

    #[test]
    fn snapshot_has_all_eight_keys_in_order() {
        let runtime = NodeRuntime::default();
        let snapshot = runtime.snapshot();
        let keys: Vec<_> = snapshot.keys().cloned().collect();
        assert_eq!(
            keys,
            vec!["temperature", "humidity", "light", "ph", "fan", "water_pump", "co2", "window"]
        );
    }

    #[test]
    fn actuator_snapshot_uses_on_off_strings() {
        let mut runtime = NodeRuntime { fan_on: true, ..NodeRuntime::default() };
        let snapshot = runtime.snapshot();
        assert_eq!(snapshot["fan"], "ON");
        assert_eq!(snapshot["water_pump"], "OFF");
        runtime.tick(1.0, &mut NoNoise);
    }
}
