// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Domain-level change notifications, decoupled from the wire format.
//!
//! The `NodeManager` and `SensorEngine` publish these on a shared
//! broadcast channel; it is the server's job (not this crate's) to turn
//! them into `node_change`/`sensor_update` wire events and fan them out to
//! sessions through the client registry's subscription filter.

use indexmap::IndexMap;
use serde_json::Value;

use crate::node::NodeConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeChangeOp {
    Added,
    Updated,
    Removed,
}

impl NodeChangeOp {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Updated => "updated",
            Self::Removed => "removed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeChangeEvent {
    pub op: NodeChangeOp,
    pub node_id: String,
    /// Present for `added`/`updated`; absent for `removed`.
    pub node: Option<NodeConfig>,
}

#[derive(Debug, Clone)]
pub struct SensorUpdateEvent {
    pub node_id: String,
    pub timestamp_ms: i64,
    pub data: IndexMap<String, Value>,
}

#[derive(Debug, Clone)]
pub enum DomainEvent {
    NodeChange(NodeChangeEvent),
    SensorUpdate(SensorUpdateEvent),
}

/// Current time as epoch milliseconds, for `sensor_update.timestamp`.
#[must_use]
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_millis() as i64)
}
