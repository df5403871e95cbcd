// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Wire message types for the greenhouse server protocol (C1/C10).
//!
//! Every message is one JSON object terminated by `\n`. Client requests
//! carry an optional `id` that replies echo; unsolicited server events
//! (`sensor_update`, `node_change`) do not. Field names are camelCase on
//! the wire except for `type` and `id` themselves; the protocol-level
//! enum tags (`type`) are snake_case, matching §6 of the server
//! specification this crate implements.
//!
//! This crate only defines the shapes. Parsing a line into a
//! [`ClientMessage`] and deciding what to do about an unknown `type` is
//! the [`codec`] module's job; no I/O happens here.

pub mod codec;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use greenhouse_core::node::{NodeConfig, NodeDraft, NodePatch};
use greenhouse_core::user_store::PublicUser;

pub use codec::{decode, encode, CodecError, Decoded};

/// One client-to-server request. Unknown `type` values never construct
/// this enum — see [`Decoded::Unknown`].
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Hello {
        id: Option<String>,
        #[serde(rename = "clientId", default)]
        client_id: Option<String>,
    },
    Ping {
        id: Option<String>,
    },
    GetTopology {
        id: Option<String>,
    },
    CreateNode {
        id: Option<String>,
        node: NodeDraft,
    },
    UpdateNode {
        id: Option<String>,
        #[serde(rename = "nodeId")]
        node_id: String,
        patch: NodePatch,
    },
    DeleteNode {
        id: Option<String>,
        #[serde(rename = "nodeId")]
        node_id: String,
    },
    AddComponent {
        id: Option<String>,
        #[serde(rename = "nodeId")]
        node_id: String,
        kind: ComponentKindWire,
        name: String,
    },
    RemoveComponent {
        id: Option<String>,
        #[serde(rename = "nodeId")]
        node_id: String,
        kind: ComponentKindWire,
        name: String,
    },
    SetSampling {
        id: Option<String>,
        #[serde(rename = "nodeId")]
        node_id: String,
        #[serde(rename = "intervalMs")]
        interval_ms: u64,
    },
    Subscribe {
        id: Option<String>,
        #[serde(default)]
        events: Vec<String>,
        #[serde(default)]
        nodes: Vec<String>,
    },
    Unsubscribe {
        id: Option<String>,
        #[serde(default)]
        events: Vec<String>,
        #[serde(default)]
        nodes: Vec<String>,
    },
    Command {
        id: Option<String>,
        #[serde(rename = "nodeId")]
        node_id: String,
        target: String,
        #[serde(default)]
        action: Option<String>,
        #[serde(default)]
        params: Value,
    },
    Auth {
        id: Option<String>,
        username: String,
        password: String,
    },
    Register {
        id: Option<String>,
        username: String,
        password: String,
        #[serde(default)]
        role: Option<String>,
    },
    GetUsers {
        id: Option<String>,
    },
    UpdateUser {
        id: Option<String>,
        #[serde(rename = "userId")]
        user_id: u64,
        username: String,
        role: String,
    },
    DeleteUser {
        id: Option<String>,
        #[serde(rename = "userId")]
        user_id: u64,
    },
}

impl ClientMessage {
    /// The correlation id carried by this request, if any. Every variant
    /// has one field named `id`, so this is a flat match rather than a
    /// derive, but keeping it here means callers never have to repeat the
    /// seventeen-arm match themselves.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Hello { id, .. }
            | Self::Ping { id, .. }
            | Self::GetTopology { id, .. }
            | Self::CreateNode { id, .. }
            | Self::UpdateNode { id, .. }
            | Self::DeleteNode { id, .. }
            | Self::AddComponent { id, .. }
            | Self::RemoveComponent { id, .. }
            | Self::SetSampling { id, .. }
            | Self::Subscribe { id, .. }
            | Self::Unsubscribe { id, .. }
            | Self::Command { id, .. }
            | Self::Auth { id, .. }
            | Self::Register { id, .. }
            | Self::GetUsers { id, .. }
            | Self::UpdateUser { id, .. }
            | Self::DeleteUser { id, .. } => id.as_deref(),
        }
    }
}

/// Which declarative component list `add_component`/`remove_component`
/// targets, as spelled on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKindWire {
    Sensor,
    Actuator,
}

impl From<ComponentKindWire> for greenhouse_core::ComponentKind {
    fn from(kind: ComponentKindWire) -> Self {
        match kind {
            ComponentKindWire::Sensor => Self::Sensor,
            ComponentKindWire::Actuator => Self::Actuator,
        }
    }
}

/// One server-to-client message: a reply, or an unsolicited event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        server: String,
        version: String,
    },
    Pong {
        id: Option<String>,
    },
    Ack {
        id: Option<String>,
        status: &'static str,
        #[serde(rename = "nodeId", skip_serializing_if = "Option::is_none")]
        node_id: Option<String>,
    },
    Error {
        id: Option<String>,
        code: String,
        message: String,
    },
    Topology {
        id: Option<String>,
        nodes: Vec<NodeConfig>,
    },
    SensorUpdate {
        #[serde(rename = "nodeId")]
        node_id: String,
        timestamp: i64,
        data: indexmap::IndexMap<String, Value>,
    },
    NodeChange {
        op: &'static str,
        #[serde(rename = "nodeId")]
        node_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        node: Option<NodeConfig>,
    },
    AuthResponse {
        id: Option<String>,
        success: bool,
        #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
        user_id: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        role: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    RegisterResponse {
        id: Option<String>,
        success: bool,
        #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
        user_id: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    UsersList {
        id: Option<String>,
        success: bool,
        users: Vec<PublicUser>,
    },
}

impl ServerMessage {
    #[must_use]
    pub const fn ack(id: Option<String>) -> Self {
        Self::Ack { id, status: "ok", node_id: None }
    }

    #[must_use]
    pub const fn ack_with_node(id: Option<String>, node_id: String) -> Self {
        Self::Ack { id, status: "ok", node_id: Some(node_id) }
    }

    #[must_use]
    pub fn error(id: Option<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error { id, code: code.into(), message: message.into() }
    }
}
