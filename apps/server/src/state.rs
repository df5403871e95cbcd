// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

use std::sync::Arc;

use greenhouse_core::{NodeManager, SensorEngine, UserStore};

use crate::client_registry::ClientRegistry;

/// Everything a session handler needs to dispatch a request: the shared
/// domain components (Node Manager, User Store, Sensor Engine) and the
/// Client Registry for subscription-filtered fan-out. No component here
/// holds a back-reference to the listener itself (see DESIGN.md, §9
/// cyclic ownership note).
#[derive(Clone)]
pub struct AppState {
    pub node_manager: Arc<NodeManager>,
    pub user_store: Arc<UserStore>,
    pub client_registry: Arc<ClientRegistry>,
    pub sensor_engine: Arc<SensorEngine>,
}
