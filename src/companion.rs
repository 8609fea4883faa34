// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Companion-app portal user management.
//!
//! The portal keeps its own user table on a designated endpoint, separate
//! from the failover chain: user admin must hit that one instance whether
//! or not the engine is in local mode, so none of this goes through the
//! resolver. Password hashing happens upstream; this store persists hashes
//! as opaque strings.

use tracing::info;

use crate::config::{CompanionConfig, SshConfig};
use crate::endpoint::DbConnection;
use crate::error::{EngineError, Result};
use crate::tunnel::TunnelProxy;
use crate::value::Value;

const CREATE_PORTAL_USERS: &str = "CREATE TABLE IF NOT EXISTS portal_users (\
     id INTEGER PRIMARY KEY AUTOINCREMENT, \
     username TEXT NOT NULL UNIQUE, \
     password_hash TEXT NOT NULL, \
     role TEXT NOT NULL DEFAULT 'viewer', \
     active INTEGER NOT NULL DEFAULT 1, \
     created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP)";

const CREATE_PORTAL_USERS_MYSQL: &str = "CREATE TABLE IF NOT EXISTS portal_users (\
     id INT AUTO_INCREMENT PRIMARY KEY, \
     username VARCHAR(100) NOT NULL UNIQUE, \
     password_hash VARCHAR(255) NOT NULL, \
     role VARCHAR(50) NOT NULL DEFAULT 'viewer', \
     active TINYINT(1) NOT NULL DEFAULT 1, \
     created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP) ENGINE=InnoDB";

/// One portal account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalUser {
    pub id: i64,
    pub username: String,
    pub role: String,
    pub active: bool,
}

/// Manages the portal user table on its designated endpoint.
pub struct CompanionUserStore {
    config: CompanionConfig,
    ssh: Option<SshConfig>,
    tunnel: std::sync::Arc<TunnelProxy>,
}

impl CompanionUserStore {
    pub fn new(
        config: CompanionConfig,
        ssh: Option<SshConfig>,
        tunnel: std::sync::Arc<TunnelProxy>,
    ) -> Self {
        Self {
            config,
            ssh,
            tunnel,
        }
    }

    /// All accounts, ordered by username. Password hashes are not returned.
    pub async fn list_users(&self) -> Result<Vec<PortalUser>> {
        let mut conn = self.connect().await?;
        let rows = conn
            .fetch_all(
                "SELECT id, username, role, active FROM portal_users ORDER BY username",
                &[],
            )
            .await;
        let _ = conn.close().await;

        rows?.iter()
            .map(|row| {
                Ok(PortalUser {
                    id: field_i64(row.get("id"))?,
                    username: field_text(row.get("username"))?,
                    role: field_text(row.get("role"))?,
                    active: field_i64(row.get("active"))? != 0,
                })
            })
            .collect()
    }

    /// Create an account. `password_hash` is stored as given.
    pub async fn add_user(&self, username: &str, password_hash: &str, role: &str) -> Result<i64> {
        let mut conn = self.connect().await?;
        let result = conn
            .execute(
                "INSERT INTO portal_users (username, password_hash, role, active) \
                 VALUES (?, ?, ?, 1)",
                &[
                    Value::from(username),
                    Value::from(password_hash),
                    Value::from(role),
                ],
            )
            .await;
        let _ = conn.close().await;
        let out = result?;
        info!(username = %username, role = %role, "portal user created");
        out.last_insert_id
            .ok_or_else(|| EngineError::Internal("user insert returned no key".to_string()))
    }

    /// Remove an account. Returns whether it existed.
    pub async fn delete_user(&self, username: &str) -> Result<bool> {
        let out = self
            .run_one(
                "DELETE FROM portal_users WHERE username = ?",
                &[Value::from(username)],
            )
            .await?;
        if out > 0 {
            info!(username = %username, "portal user deleted");
        }
        Ok(out > 0)
    }

    /// Enable or disable an account without deleting it.
    pub async fn set_active(&self, username: &str, active: bool) -> Result<bool> {
        let out = self
            .run_one(
                "UPDATE portal_users SET active = ? WHERE username = ?",
                &[Value::Int(active as i64), Value::from(username)],
            )
            .await?;
        Ok(out > 0)
    }

    /// Replace an account's password hash.
    pub async fn update_password(&self, username: &str, new_hash: &str) -> Result<bool> {
        let out = self
            .run_one(
                "UPDATE portal_users SET password_hash = ? WHERE username = ?",
                &[Value::from(new_hash), Value::from(username)],
            )
            .await?;
        Ok(out > 0)
    }

    async fn run_one(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut conn = self.connect().await?;
        let result = conn.execute(sql, params).await;
        let _ = conn.close().await;
        Ok(result?.rows_affected)
    }

    /// Open the designated endpoint and make sure the table exists.
    async fn connect(&self) -> Result<DbConnection> {
        let mut conn =
            DbConnection::connect(&self.config.endpoint, self.ssh.as_ref(), &self.tunnel).await?;
        let ddl = match conn.dialect() {
            crate::dialect::Dialect::MySql => CREATE_PORTAL_USERS_MYSQL,
            crate::dialect::Dialect::Sqlite => CREATE_PORTAL_USERS,
        };
        conn.execute(ddl, &[]).await?;
        Ok(conn)
    }
}

fn field_text(value: Option<&Value>) -> Result<String> {
    match value {
        Some(Value::Text(s)) => Ok(s.clone()),
        other => Err(EngineError::Internal(format!(
            "expected text column, got {other:?}"
        ))),
    }
}

fn field_i64(value: Option<&Value>) -> Result<i64> {
    value
        .and_then(Value::as_i64)
        .ok_or_else(|| EngineError::Internal("expected integer column".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EndpointConfig, SqliteEndpoint};
    use std::sync::Arc;

    fn store(dir: &std::path::Path) -> CompanionUserStore {
        CompanionUserStore::new(
            CompanionConfig {
                endpoint: EndpointConfig::Sqlite(SqliteEndpoint {
                    path: dir.join("companion.db"),
                }),
            },
            None,
            Arc::new(TunnelProxy::new()),
        )
    }

    #[tokio::test]
    async fn test_add_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        assert!(store.list_users().await.unwrap().is_empty());
        store.add_user("alice", "$argon2$hash-a", "admin").await.unwrap();
        store.add_user("bob", "$argon2$hash-b", "viewer").await.unwrap();

        let users = store.list_users().await.unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].username, "alice");
        assert_eq!(users[0].role, "admin");
        assert!(users[0].active);
        assert_eq!(users[1].username, "bob");

        assert!(store.delete_user("alice").await.unwrap());
        assert!(!store.delete_user("alice").await.unwrap());
        assert_eq!(store.list_users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.add_user("carol", "h1", "viewer").await.unwrap();
        let err = store.add_user("carol", "h2", "viewer").await.unwrap_err();
        assert!(!err.is_connectivity());
    }

    #[tokio::test]
    async fn test_set_active_and_update_password() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.add_user("dave", "old-hash", "viewer").await.unwrap();

        assert!(store.set_active("dave", false).await.unwrap());
        let users = store.list_users().await.unwrap();
        assert!(!users[0].active);

        assert!(store.update_password("dave", "new-hash").await.unwrap());
        assert!(!store.update_password("nobody", "x").await.unwrap());
    }
}
