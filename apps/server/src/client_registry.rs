// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Per-connection sessions and subscription-filtered fan-out (C7).
//!
//! A session's outbound queue is an unbounded mpsc channel; the writer
//! task owned by the session handler drains it onto the socket. Holding
//! the registry lock only long enough to collect the `Arc<Session>`s a
//! broadcast targets — never across the send itself — keeps one slow
//! reader from stalling delivery to everyone else.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use greenhouse_api::ServerMessage;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

const WILDCARD: &str = "*";

/// One live connection's identity, authentication state, and interest set.
pub struct Session {
    pub id: Uuid,
    client_id: Mutex<Option<String>>,
    /// Role last established by a successful `auth`; gates `update_user`/`delete_user`.
    role: Mutex<Option<String>>,
    sender: mpsc::UnboundedSender<String>,
    subs: Mutex<HashMap<String, HashSet<String>>>,
}

impl Session {
    fn new(sender: mpsc::UnboundedSender<String>) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            client_id: Mutex::new(None),
            role: Mutex::new(None),
            sender,
            subs: Mutex::new(HashMap::new()),
        })
    }

    pub async fn set_client_id(&self, client_id: String) {
        *self.client_id.lock().await = Some(client_id);
    }

    pub async fn set_role(&self, role: String) {
        *self.role.lock().await = Some(role);
    }

    pub async fn role(&self) -> Option<String> {
        self.role.lock().await.clone()
    }

    pub async fn subscribe(&self, events: &[String], nodes: &[String]) {
        let mut subs = self.subs.lock().await;
        for event in events {
            let set = subs.entry(event.clone()).or_default();
            for node in nodes {
                set.insert(node.clone());
            }
        }
    }

    pub async fn unsubscribe(&self, events: &[String], nodes: &[String]) {
        let mut subs = self.subs.lock().await;
        for event in events {
            if let Some(set) = subs.get_mut(event) {
                for node in nodes {
                    set.remove(node);
                }
            }
        }
    }

    async fn is_subscribed(&self, event: &str, node_id: &str) -> bool {
        let subs = self.subs.lock().await;
        subs.get(event).is_some_and(|set| set.contains(node_id) || set.contains(WILDCARD))
    }

    /// Like [`Self::is_subscribed`], but ignores the node id entirely —
    /// `node_change` routes on event name plus wildcard only (§4.7), never
    /// on a specific node id, unlike `sensor_update`.
    async fn is_subscribed_to_wildcard(&self, event: &str) -> bool {
        let subs = self.subs.lock().await;
        subs.get(event).is_some_and(|set| set.contains(WILDCARD))
    }

    /// Sends one line directly to this session, bypassing the subscription
    /// filter — used for point-to-point replies (`welcome`, `ack`, ...).
    /// A closed receiver means the connection is already tearing down;
    /// dropping the send is not an error.
    pub fn send(&self, message: &ServerMessage) {
        match greenhouse_api::encode(message) {
            Ok(line) => {
                let _ = self.sender.send(line);
            },
            Err(err) => tracing::error!(error = %err, "failed to encode outgoing message"),
        }
    }
}

/// Registry of all live sessions, keyed by session id.
pub struct ClientRegistry {
    sessions: Mutex<HashMap<Uuid, Arc<Session>>>,
}

impl ClientRegistry {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self { sessions: Mutex::new(HashMap::new()) })
    }

    /// Registers a fresh session wired to `sender` and returns it.
    pub async fn add_session(&self, sender: mpsc::UnboundedSender<String>) -> Arc<Session> {
        let session = Session::new(sender);
        self.sessions.lock().await.insert(session.id, session.clone());
        session
    }

    /// Idempotent: removing an id twice, or one never added, is a no-op.
    pub async fn remove_session(&self, session_id: Uuid) {
        self.sessions.lock().await.remove(&session_id);
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    async fn matching_sessions(&self, event: &str, node_id: &str) -> Vec<Arc<Session>> {
        let sessions: Vec<_> = self.sessions.lock().await.values().cloned().collect();
        let mut matched = Vec::new();
        for session in sessions {
            if session.is_subscribed(event, node_id).await {
                matched.push(session);
            }
        }
        matched
    }

    async fn wildcard_subscribed_sessions(&self, event: &str) -> Vec<Arc<Session>> {
        let sessions: Vec<_> = self.sessions.lock().await.values().cloned().collect();
        let mut matched = Vec::new();
        for session in sessions {
            if session.is_subscribed_to_wildcard(event).await {
                matched.push(session);
            }
        }
        matched
    }

    pub async fn broadcast_sensor_update(
        &self,
        node_id: &str,
        timestamp: i64,
        data: indexmap::IndexMap<String, serde_json::Value>,
    ) {
        let message = ServerMessage::SensorUpdate { node_id: node_id.to_string(), timestamp, data };
        for session in self.matching_sessions("sensor_update", node_id).await {
            session.send(&message);
        }
    }

    pub async fn broadcast_node_change(
        &self,
        op: &'static str,
        node_id: &str,
        node: Option<greenhouse_core::node::NodeConfig>,
    ) {
        let message = ServerMessage::NodeChange { op, node_id: node_id.to_string(), node };
        for session in self.wildcard_subscribed_sessions("node_change").await {
            session.send(&message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn a_session_with_no_subscriptions_receives_nothing() {
        let registry = ClientRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.add_session(tx).await;
        registry
            .broadcast_sensor_update("node-1", 0, indexmap::IndexMap::new())
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn wildcard_node_subscription_matches_any_node() {
        let registry = ClientRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = registry.add_session(tx).await;
        session.subscribe(&events(&["sensor_update"]), &events(&["*"])).await;
        registry
            .broadcast_sensor_update("node-7", 0, indexmap::IndexMap::new())
            .await;
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn unsubscribe_removes_interest() {
        let registry = ClientRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = registry.add_session(tx).await;
        session.subscribe(&events(&["sensor_update"]), &events(&["node-1"])).await;
        session.unsubscribe(&events(&["sensor_update"]), &events(&["node-1"])).await;
        registry
            .broadcast_sensor_update("node-1", 0, indexmap::IndexMap::new())
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn removed_session_is_not_broadcast_to() {
        let registry = ClientRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = registry.add_session(tx).await;
        session.subscribe(&events(&["sensor_update"]), &events(&["*"])).await;
        registry.remove_session(session.id).await;
        registry
            .broadcast_sensor_update("node-1", 0, indexmap::IndexMap::new())
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn node_change_filters_on_wildcard_only() {
        let registry = ClientRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = registry.add_session(tx).await;
        session.subscribe(&events(&["node_change"]), &events(&["*"])).await;
        registry.broadcast_node_change("added", "node-2", None).await;
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn node_change_ignores_a_specific_node_id_subscription() {
        let registry = ClientRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = registry.add_session(tx).await;
        session.subscribe(&events(&["node_change"]), &events(&["node-2"])).await;
        registry.broadcast_node_change("added", "node-2", None).await;
        assert!(rx.try_recv().is_err());
    }
}
