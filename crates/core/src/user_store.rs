// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! File-backed user store: credential validation and role-gated CRUD over
//! a single JSON array persisted at a fixed path.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{GreenhouseError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: u64,
    pub username: String,
    pub password: String,
    pub role: String,
}

/// A user as returned by `get_all` — passwords are never exposed here.
#[derive(Debug, Clone, Serialize)]
pub struct PublicUser {
    pub id: u64,
    pub username: String,
    pub role: String,
}

impl From<&UserRecord> for PublicUser {
    fn from(record: &UserRecord) -> Self {
        Self { id: record.id, username: record.username.clone(), role: record.role.clone() }
    }
}

fn is_admin(role: &str) -> bool {
    role.eq_ignore_ascii_case("admin")
}

fn seed_users() -> Vec<UserRecord> {
    vec![
        UserRecord { id: 1, username: "admin".to_string(), password: "admin123".to_string(), role: "Admin".to_string() },
        UserRecord { id: 2, username: "user".to_string(), password: "user123".to_string(), role: "Viewer".to_string() },
    ]
}

/// Persistent mapping userId -> {username, password, role}.
///
/// `get_all`/`update`/`delete` take the write lock as a store-wide mutual
/// exclusion. `register`/`validate` also use this lock, but only for the
/// minimal span of their own operation — neither checks uniqueness against
/// an in-progress registration elsewhere, so the documented race (two
/// concurrent `register` calls for the same username both succeeding) is
/// preserved even though Rust requires *some* lock for memory safety.
pub struct UserStore {
    path: PathBuf,
    users: RwLock<Vec<UserRecord>>,
}

impl UserStore {
    /// Loads the store from `path`, seeding it with defaults if the file
    /// does not exist. A present-but-malformed file starts the store
    /// empty with a warning rather than failing construction.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let users = if path.exists() {
            match tokio::fs::read_to_string(&path).await {
                Ok(contents) => match serde_json::from_str::<Vec<UserRecord>>(&contents) {
                    Ok(users) => users,
                    Err(err) => {
                        tracing::warn!(path = %path.display(), error = %err, "user store file is malformed; starting empty");
                        Vec::new()
                    },
                },
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "failed to read user store file; starting empty");
                    Vec::new()
                },
            }
        } else {
            let defaults = seed_users();
            let store = Self { path: path.clone(), users: RwLock::new(defaults) };
            store.persist_locked(&store.users.read().await).await?;
            return Ok(store);
        };

        Ok(Self { path, users: RwLock::new(users) })
    }

    async fn persist_locked(&self, users: &[UserRecord]) -> Result<()> {
        let json = serde_json::to_string_pretty(users).map_err(|err| GreenhouseError::Internal(err.to_string()))?;
        if let Err(err) = tokio::fs::write(&self.path, json).await {
            tracing::error!(path = %self.path.display(), error = %err, "failed to persist user store");
        }
        Ok(())
    }

    pub async fn validate(&self, username: &str, password: &str) -> bool {
        let users = self.users.read().await;
        users.iter().any(|user| user.username == username && user.password == password)
    }

    pub async fn get_user_id(&self, username: &str) -> Option<u64> {
        self.users.read().await.iter().find(|user| user.username == username).map(|user| user.id)
    }

    pub async fn get_user_role(&self, username: &str) -> Option<String> {
        self.users.read().await.iter().find(|user| user.username == username).map(|user| user.role.clone())
    }

    /// Not idempotent: duplicate usernames are not detected here, matching
    /// the existing behaviour this store preserves (see DESIGN.md).
    pub async fn register(&self, username: &str, password: &str, role: &str) -> Result<u64> {
        let mut users = self.users.write().await;
        let next_id = users.iter().map(|user| user.id).max().unwrap_or(0) + 1;
        users.push(UserRecord {
            id: next_id,
            username: username.to_string(),
            password: password.to_string(),
            role: role.to_string(),
        });
        self.persist_locked(&users).await?;
        Ok(next_id)
    }

    pub async fn get_all(&self) -> Vec<PublicUser> {
        self.users.read().await.iter().map(PublicUser::from).collect()
    }

    pub async fn update(&self, user_id: u64, new_username: &str, new_role: &str, actor_role: &str) -> Result<()> {
        if !is_admin(actor_role) {
            return Err(GreenhouseError::Forbidden("only Admin may update users".to_string()));
        }
        let mut users = self.users.write().await;
        let Some(user) = users.iter_mut().find(|user| user.id == user_id) else {
            return Err(GreenhouseError::NotFound(format!("user {user_id} not found")));
        };
        user.username = new_username.to_string();
        user.role = new_role.to_string();
        self.persist_locked(&users).await
    }

    pub async fn delete(&self, user_id: u64, actor_role: &str) -> Result<()> {
        if !is_admin(actor_role) {
            return Err(GreenhouseError::Forbidden("only Admin may delete users".to_string()));
        }
        let mut users = self.users.write().await;
        let before = users.len();
        users.retain(|user| user.id != user_id);
        if users.len() == before {
            return Err(GreenhouseError::NotFound(format!("user {user_id} not found")));
        }
        self.persist_locked(&users).await
    }
}
