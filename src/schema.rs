// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The synchronized schema: entity registry and DDL for both backends.
//!
//! The local SQLite schema is a column superset of the remote one, so a row
//! pulled from any remote instance can always be upserted locally using the
//! remote's column list. `tickets` additionally carries `remote_synced`,
//! which exists only in the cache and drives the push phase.

use crate::dialect::Dialect;
use crate::endpoint::DbConnection;
use crate::error::Result;

/// One table participating in pull synchronization.
pub struct SyncableEntity {
    pub name: &'static str,
    /// Conflict key the local upsert resolves on.
    pub key: &'static [&'static str],
}

/// Pull order. Parents before children so a freshly created cache can take
/// a snapshot with foreign keys satisfied.
pub const SYNC_ENTITIES: &[SyncableEntity] = &[
    SyncableEntity { name: "assets", key: &["id"] },
    SyncableEntity { name: "tickets", key: &["id"] },
    SyncableEntity { name: "ticket_attachments", key: &["id"] },
    SyncableEntity { name: "iso_controls", key: &["id"] },
    SyncableEntity { name: "nist_controls", key: &["id"] },
    SyncableEntity { name: "policies", key: &["id"] },
    SyncableEntity { name: "asset_controls", key: &["asset_id", "control_id"] },
    SyncableEntity { name: "asset_nist_controls", key: &["asset_id", "control_id"] },
    SyncableEntity { name: "policy_nist_mappings", key: &["policy_id", "nist_control_id"] },
];

/// Columns copied to the remote when pushing an offline-created ticket.
/// `id` is deliberately absent: the remote assigns its own key.
pub const TICKET_PUSH_COLUMNS: &[&str] = &[
    "asset_id",
    "ticket_type",
    "title",
    "description",
    "priority",
    "status",
    "logged_by",
    "related_type",
    "due_date",
    "problem_id",
    "created_at",
    "updated_at",
];

/// Composite key used to decide whether a local ticket already exists
/// remotely. Timestamps drift between the two engines, so they are not part
/// of the key.
pub const TICKET_RECONCILIATION_KEY: &[&str] = &["title", "logged_by", "asset_id"];

/// Table whose `ticket_id` must follow a pushed ticket's key remap.
pub const ATTACHMENTS_TABLE: &str = "ticket_attachments";

/// Local cache DDL (SQLite).
const SQLITE_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS assets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_id INTEGER,
        name TEXT,
        type TEXT,
        description TEXT,
        created_at TIMESTAMP,
        updated_at TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS tickets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        asset_id INTEGER,
        ticket_type TEXT,
        title TEXT,
        description TEXT,
        status TEXT DEFAULT 'Open',
        priority TEXT,
        logged_by TEXT,
        related_type TEXT DEFAULT 'asset',
        due_date DATETIME,
        problem_id INTEGER,
        created_at TIMESTAMP,
        updated_at TIMESTAMP,
        remote_synced INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS ticket_attachments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ticket_id INTEGER,
        file_name TEXT,
        file_path TEXT,
        uploaded_at TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS iso_controls (
        id TEXT PRIMARY KEY,
        theme TEXT,
        category TEXT,
        description TEXT,
        created_at TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS nist_controls (
        id TEXT PRIMARY KEY,
        function TEXT,
        category TEXT,
        subcategory TEXT,
        description TEXT,
        created_at TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS policies (
        id INTEGER PRIMARY KEY,
        name TEXT,
        category TEXT,
        summary TEXT,
        content TEXT,
        created_at TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS asset_controls (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        asset_id INTEGER NOT NULL,
        related_type TEXT DEFAULT 'asset',
        control_id TEXT NOT NULL,
        status TEXT,
        notes TEXT,
        linked_at TIMESTAMP,
        UNIQUE (asset_id, control_id)
    )",
    "CREATE TABLE IF NOT EXISTS asset_nist_controls (
        asset_id INTEGER NOT NULL,
        control_id TEXT NOT NULL,
        status TEXT,
        notes TEXT,
        linked_at TIMESTAMP,
        PRIMARY KEY (asset_id, control_id)
    )",
    "CREATE TABLE IF NOT EXISTS policy_nist_mappings (
        policy_id INTEGER NOT NULL,
        nist_control_id TEXT NOT NULL,
        PRIMARY KEY (policy_id, nist_control_id)
    )",
];

/// Remote instance DDL (MySQL), used when repairing an empty DR instance
/// before replicating into it.
const MYSQL_SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS assets (
        id INT AUTO_INCREMENT PRIMARY KEY,
        parent_id INT,
        name VARCHAR(255) NOT NULL,
        type VARCHAR(50),
        description TEXT,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP
    ) ENGINE=InnoDB",
    "CREATE TABLE IF NOT EXISTS tickets (
        id INT AUTO_INCREMENT PRIMARY KEY,
        asset_id INT NOT NULL,
        ticket_type VARCHAR(50),
        title VARCHAR(255),
        description TEXT,
        status VARCHAR(50) DEFAULT 'Open',
        priority VARCHAR(50),
        logged_by VARCHAR(100),
        related_type VARCHAR(50) DEFAULT 'asset',
        due_date DATETIME,
        problem_id INT,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
        INDEX idx_asset_id (asset_id)
    ) ENGINE=InnoDB",
    "CREATE TABLE IF NOT EXISTS ticket_attachments (
        id INT AUTO_INCREMENT PRIMARY KEY,
        ticket_id INT NOT NULL,
        file_name VARCHAR(255),
        file_path VARCHAR(512),
        uploaded_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        INDEX idx_ticket_id (ticket_id)
    ) ENGINE=InnoDB",
    "CREATE TABLE IF NOT EXISTS iso_controls (
        id VARCHAR(10) PRIMARY KEY,
        theme VARCHAR(50),
        category VARCHAR(100),
        description TEXT,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    ) ENGINE=InnoDB",
    "CREATE TABLE IF NOT EXISTS nist_controls (
        id VARCHAR(10) PRIMARY KEY,
        function VARCHAR(50),
        category VARCHAR(100),
        subcategory VARCHAR(100),
        description TEXT,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    ) ENGINE=InnoDB",
    "CREATE TABLE IF NOT EXISTS policies (
        id INT AUTO_INCREMENT PRIMARY KEY,
        name VARCHAR(255),
        category VARCHAR(100),
        summary TEXT,
        content TEXT,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    ) ENGINE=InnoDB",
    "CREATE TABLE IF NOT EXISTS asset_controls (
        id INT AUTO_INCREMENT PRIMARY KEY,
        asset_id INT NOT NULL,
        related_type VARCHAR(50) DEFAULT 'asset',
        control_id VARCHAR(10) NOT NULL,
        status VARCHAR(50),
        notes TEXT,
        linked_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        UNIQUE KEY uq_asset_control (asset_id, control_id)
    ) ENGINE=InnoDB",
    "CREATE TABLE IF NOT EXISTS asset_nist_controls (
        asset_id INT NOT NULL,
        control_id VARCHAR(10) NOT NULL,
        status VARCHAR(50),
        notes TEXT,
        linked_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY (asset_id, control_id)
    ) ENGINE=InnoDB",
    "CREATE TABLE IF NOT EXISTS policy_nist_mappings (
        policy_id INT NOT NULL,
        nist_control_id VARCHAR(10) NOT NULL,
        PRIMARY KEY (policy_id, nist_control_id)
    ) ENGINE=InnoDB",
    "CREATE TABLE IF NOT EXISTS sla_policies (
        id INT AUTO_INCREMENT PRIMARY KEY,
        priority VARCHAR(50) UNIQUE,
        response_time_minutes INT,
        resolution_time_minutes INT,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    ) ENGINE=InnoDB",
    "CREATE TABLE IF NOT EXISTS problems (
        id INT AUTO_INCREMENT PRIMARY KEY,
        title VARCHAR(255) NOT NULL,
        description TEXT,
        root_cause_analysis TEXT,
        status VARCHAR(50) DEFAULT 'Open',
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    ) ENGINE=InnoDB",
];

/// DDL for the given dialect.
pub fn statements(dialect: Dialect) -> &'static [&'static str] {
    match dialect {
        Dialect::MySql => MYSQL_SCHEMA,
        Dialect::Sqlite => SQLITE_SCHEMA,
    }
}

/// Create any missing tables on the given connection. Idempotent.
pub async fn ensure(conn: &mut DbConnection) -> Result<()> {
    for ddl in statements(conn.dialect()) {
        conn.execute(ddl, &[]).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_order_parents_first() {
        let names: Vec<&str> = SYNC_ENTITIES.iter().map(|e| e.name).collect();
        let pos = |n: &str| names.iter().position(|x| *x == n).unwrap();
        assert!(pos("assets") < pos("tickets"));
        assert!(pos("tickets") < pos("ticket_attachments"));
        assert!(pos("policies") < pos("policy_nist_mappings"));
    }

    #[test]
    fn test_every_entity_has_ddl() {
        for entity in SYNC_ENTITIES {
            let needle = format!("EXISTS {} ", entity.name);
            assert!(
                SQLITE_SCHEMA.iter().any(|s| s.contains(&needle)),
                "no SQLite DDL for {}",
                entity.name
            );
            assert!(
                MYSQL_SCHEMA.iter().any(|s| s.contains(&needle)),
                "no MySQL DDL for {}",
                entity.name
            );
        }
    }

    #[tokio::test]
    async fn test_ensure_sqlite_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = DbConnection::connect_sqlite(&dir.path().join("cache.db"))
            .await
            .unwrap();
        ensure(&mut conn).await.unwrap();
        ensure(&mut conn).await.unwrap();

        let tables = conn.list_tables().await.unwrap();
        for entity in SYNC_ENTITIES {
            assert!(tables.contains(&entity.name.to_string()), "missing {}", entity.name);
        }
    }

    #[tokio::test]
    async fn test_tickets_have_sync_flag() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = DbConnection::connect_sqlite(&dir.path().join("cache.db"))
            .await
            .unwrap();
        ensure(&mut conn).await.unwrap();
        // Default is unsynced.
        conn.execute(
            "INSERT INTO tickets (asset_id, title, logged_by) VALUES (1, 'x', 'y')",
            &[],
        )
        .await
        .unwrap();
        let rows = conn
            .fetch_all("SELECT remote_synced FROM tickets", &[])
            .await
            .unwrap();
        assert_eq!(rows[0].get("remote_synced").and_then(|v| v.as_i64()), Some(0));
    }
}
