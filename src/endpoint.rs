//! Endpoint identities and the sealed database connection type.
//!
//! Every database the engine touches is one of a small closed set: the
//! remote primary, the remote secondary, or the local cache. Connections are
//! wrapped in [`DbConnection`] so the rest of the engine is written against
//! one fetch/execute surface; the enum (not a string tag) decides dialect
//! rendering and driver behavior.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode};
use sqlx::{ConnectOptions, Connection};

use crate::config::{EndpointConfig, SshConfig};
use crate::dialect::{rewrite_for, Dialect};
use crate::error::{EngineError, Result};
use crate::tunnel::TunnelProxy;
use crate::value::{
    bind_mysql, bind_sqlite, decode_mysql_row, decode_sqlite_row, Row, Value,
};

/// Which slot in the probe chain an endpoint occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    RemotePrimary,
    RemoteSecondary,
    LocalCache,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointKind::RemotePrimary => write!(f, "primary"),
            EndpointKind::RemoteSecondary => write!(f, "secondary"),
            EndpointKind::LocalCache => write!(f, "local"),
        }
    }
}

/// Selector for one of the two remote instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteSource {
    Primary,
    Secondary,
}

impl RemoteSource {
    pub fn kind(self) -> EndpointKind {
        match self {
            RemoteSource::Primary => EndpointKind::RemotePrimary,
            RemoteSource::Secondary => EndpointKind::RemoteSecondary,
        }
    }
}

impl fmt::Display for RemoteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteSource::Primary => write!(f, "primary"),
            RemoteSource::Secondary => write!(f, "secondary"),
        }
    }
}

/// The mode the resolver is currently serving queries in.
///
/// Exactly one mode is active at any time. LOCAL is sticky: once entered it
/// is only left by an explicit `reconnect()` or a successful sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveMode {
    Cloud(RemoteSource),
    Local,
}

impl fmt::Display for ActiveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActiveMode::Cloud(src) => write!(f, "cloud ({src})"),
            ActiveMode::Local => write!(f, "local cache"),
        }
    }
}

/// Last observed probe outcome for an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reachability {
    Untested,
    Reachable,
    Unreachable(String),
}

/// Result of a non-SELECT statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOutcome {
    pub rows_affected: u64,
    /// Auto-increment key of the inserted row, when the statement was an
    /// INSERT into a table with one.
    pub last_insert_id: Option<i64>,
}

/// An open connection to one endpoint.
///
/// Statements are written in MySQL dialect; the SQLite arm renders them
/// through the rewrite-rule table before execution.
#[derive(Debug)]
pub enum DbConnection {
    MySql(MySqlConnection),
    Sqlite(SqliteConnection),
}

impl DbConnection {
    /// Connect to a configured endpoint, routing through the SSH tunnel
    /// when the endpoint's host is the bastion itself.
    pub async fn connect(
        endpoint: &EndpointConfig,
        ssh: Option<&SshConfig>,
        tunnel: &TunnelProxy,
    ) -> Result<Self> {
        match endpoint {
            EndpointConfig::MySql(m) => {
                let (host, port) = if endpoint.requires_tunnel(ssh) {
                    // requires_tunnel is only true when ssh is Some.
                    let ssh = ssh.ok_or_else(|| {
                        EngineError::Internal("tunnel required without ssh config".to_string())
                    })?;
                    let local_port = tunnel.start(ssh).await?;
                    ("127.0.0.1".to_string(), local_port)
                } else {
                    (m.host.clone(), m.port)
                };
                let opts = MySqlConnectOptions::new()
                    .host(&host)
                    .port(port)
                    .username(&m.user)
                    .password(&m.password)
                    .database(&m.database);
                let conn = opts
                    .connect()
                    .await
                    .map_err(|e| EngineError::db("connect", e))?;
                Ok(DbConnection::MySql(conn))
            }
            EndpointConfig::Sqlite(s) => Self::connect_sqlite(&s.path).await,
        }
    }

    /// Open (creating if missing) a SQLite database file.
    pub async fn connect_sqlite(path: &Path) -> Result<Self> {
        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));
        let conn = opts
            .connect()
            .await
            .map_err(|e| EngineError::db("connect", e))?;
        Ok(DbConnection::Sqlite(conn))
    }

    pub fn dialect(&self) -> Dialect {
        match self {
            DbConnection::MySql(_) => Dialect::MySql,
            DbConnection::Sqlite(_) => Dialect::Sqlite,
        }
    }

    /// Liveness check: a round trip the server must answer.
    pub async fn ping(&mut self) -> Result<()> {
        self.fetch_all("SELECT 1", &[]).await?;
        Ok(())
    }

    /// Run a row-returning statement.
    pub async fn fetch_all(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let rendered = rewrite_for(self.dialect(), sql);
        match self {
            DbConnection::MySql(conn) => {
                let q = bind_mysql(sqlx::query(&rendered), params);
                let rows = q
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(|e| EngineError::db(sql_op(sql), e))?;
                rows.iter().map(decode_mysql_row).collect()
            }
            DbConnection::Sqlite(conn) => {
                let q = bind_sqlite(sqlx::query(&rendered), params);
                let rows = q
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(|e| EngineError::db(sql_op(sql), e))?;
                rows.iter().map(decode_sqlite_row).collect()
            }
        }
    }

    /// Run a non-SELECT statement.
    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<ExecOutcome> {
        let rendered = rewrite_for(self.dialect(), sql);
        match self {
            DbConnection::MySql(conn) => {
                let q = bind_mysql(sqlx::query(&rendered), params);
                let res = q
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| EngineError::db(sql_op(sql), e))?;
                let id = res.last_insert_id();
                Ok(ExecOutcome {
                    rows_affected: res.rows_affected(),
                    last_insert_id: (id != 0).then_some(id as i64),
                })
            }
            DbConnection::Sqlite(conn) => {
                let q = bind_sqlite(sqlx::query(&rendered), params);
                let res = q
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| EngineError::db(sql_op(sql), e))?;
                let id = res.last_insert_rowid();
                Ok(ExecOutcome {
                    rows_affected: res.rows_affected(),
                    last_insert_id: (id != 0).then_some(id),
                })
            }
        }
    }

    /// Begin an explicit transaction on this connection.
    pub async fn begin(&mut self) -> Result<()> {
        let sql = match self {
            DbConnection::MySql(_) => "START TRANSACTION",
            DbConnection::Sqlite(_) => "BEGIN IMMEDIATE",
        };
        self.execute(sql, &[]).await?;
        Ok(())
    }

    pub async fn commit(&mut self) -> Result<()> {
        self.execute("COMMIT", &[]).await?;
        Ok(())
    }

    pub async fn rollback(&mut self) -> Result<()> {
        self.execute("ROLLBACK", &[]).await?;
        Ok(())
    }

    /// Enable or disable foreign-key enforcement on this connection.
    ///
    /// Used by the replicator so bulk insert order doesn't matter; scoped to
    /// this connection on both backends (MySQL's flag is session-local).
    pub async fn set_fk_checks(&mut self, enabled: bool) -> Result<()> {
        let sql = match (self.dialect(), enabled) {
            (Dialect::MySql, true) => "SET FOREIGN_KEY_CHECKS = 1",
            (Dialect::MySql, false) => "SET FOREIGN_KEY_CHECKS = 0",
            (Dialect::Sqlite, true) => "PRAGMA foreign_keys = ON",
            (Dialect::Sqlite, false) => "PRAGMA foreign_keys = OFF",
        };
        self.execute(sql, &[]).await?;
        Ok(())
    }

    /// List user tables on this instance, sorted by name.
    pub async fn list_tables(&mut self) -> Result<Vec<String>> {
        let sql = match self.dialect() {
            Dialect::MySql => "SHOW TABLES".to_string(),
            Dialect::Sqlite => {
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name"
                    .to_string()
            }
        };
        let rows = self.fetch_all(&sql, &[]).await?;
        let mut tables: Vec<String> = rows
            .iter()
            .filter_map(|r| r.values().next())
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        tables.sort();
        Ok(tables)
    }

    /// Gracefully close the connection.
    pub async fn close(self) -> Result<()> {
        match self {
            DbConnection::MySql(conn) => conn.close().await,
            DbConnection::Sqlite(conn) => conn.close().await,
        }
        .map_err(|e| EngineError::db("close", e))
    }
}

/// First keyword of a statement, used to tag database errors.
fn sql_op(sql: &str) -> String {
    sql.split_whitespace()
        .next()
        .unwrap_or("statement")
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_sqlite() -> (tempfile::TempDir, DbConnection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = DbConnection::connect_sqlite(&dir.path().join("test.db"))
            .await
            .unwrap();
        (dir, conn)
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(ActiveMode::Cloud(RemoteSource::Primary).to_string(), "cloud (primary)");
        assert_eq!(
            ActiveMode::Cloud(RemoteSource::Secondary).to_string(),
            "cloud (secondary)"
        );
        assert_eq!(ActiveMode::Local.to_string(), "local cache");
    }

    #[test]
    fn test_remote_source_kind() {
        assert_eq!(RemoteSource::Primary.kind(), EndpointKind::RemotePrimary);
        assert_eq!(RemoteSource::Secondary.kind(), EndpointKind::RemoteSecondary);
    }

    #[test]
    fn test_sql_op() {
        assert_eq!(sql_op("select * from t"), "SELECT");
        assert_eq!(sql_op("  INSERT INTO t VALUES (?)"), "INSERT");
        assert_eq!(sql_op(""), "STATEMENT");
    }

    #[tokio::test]
    async fn test_sqlite_ping() {
        let (_dir, mut conn) = temp_sqlite().await;
        conn.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_execute_and_fetch_roundtrip() {
        let (_dir, mut conn) = temp_sqlite().await;
        conn.execute(
            "CREATE TABLE t (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, score REAL)",
            &[],
        )
        .await
        .unwrap();

        let out = conn
            .execute(
                "INSERT INTO t (name, score) VALUES (?, ?)",
                &[Value::from("alpha"), Value::Real(1.5)],
            )
            .await
            .unwrap();
        assert_eq!(out.rows_affected, 1);
        assert_eq!(out.last_insert_id, Some(1));

        let rows = conn
            .fetch_all("SELECT id, name, score FROM t", &[])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("id"), Some(&Value::Int(1)));
        assert_eq!(rows[0].get("name"), Some(&Value::Text("alpha".to_string())));
        assert_eq!(rows[0].get("score"), Some(&Value::Real(1.5)));
    }

    #[tokio::test]
    async fn test_null_roundtrip() {
        let (_dir, mut conn) = temp_sqlite().await;
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, note TEXT)", &[])
            .await
            .unwrap();
        conn.execute(
            "INSERT INTO t (id, note) VALUES (?, ?)",
            &[Value::Int(1), Value::Null],
        )
        .await
        .unwrap();
        let rows = conn.fetch_all("SELECT note FROM t", &[]).await.unwrap();
        assert_eq!(rows[0].get("note"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_dialect_rewrite_applies() {
        let (_dir, mut conn) = temp_sqlite().await;
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, at TEXT)", &[])
            .await
            .unwrap();
        // NOW() is MySQL; the SQLite arm must render it as datetime('now').
        conn.execute("INSERT INTO t (id, at) VALUES (?, NOW())", &[Value::Int(1)])
            .await
            .unwrap();
        let rows = conn.fetch_all("SELECT at FROM t", &[]).await.unwrap();
        let at = rows[0].get("at").and_then(|v| v.as_str()).unwrap();
        assert!(at.starts_with("20"), "expected a timestamp, got {at}");
    }

    #[tokio::test]
    async fn test_transaction_rollback() {
        let (_dir, mut conn) = temp_sqlite().await;
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY)", &[])
            .await
            .unwrap();
        conn.begin().await.unwrap();
        conn.execute("INSERT INTO t (id) VALUES (1)", &[]).await.unwrap();
        conn.rollback().await.unwrap();
        let rows = conn.fetch_all("SELECT id FROM t", &[]).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_list_tables() {
        let (_dir, mut conn) = temp_sqlite().await;
        conn.execute("CREATE TABLE beta (id INTEGER)", &[]).await.unwrap();
        conn.execute("CREATE TABLE alpha (id INTEGER)", &[]).await.unwrap();
        let tables = conn.list_tables().await.unwrap();
        assert_eq!(tables, vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[tokio::test]
    async fn test_fk_toggle() {
        let (_dir, mut conn) = temp_sqlite().await;
        conn.execute("CREATE TABLE parent (id INTEGER PRIMARY KEY)", &[])
            .await
            .unwrap();
        conn.execute(
            "CREATE TABLE child (id INTEGER PRIMARY KEY, parent_id INTEGER REFERENCES parent(id))",
            &[],
        )
        .await
        .unwrap();
        conn.set_fk_checks(false).await.unwrap();
        // Orphan insert goes through with enforcement off.
        conn.execute("INSERT INTO child (id, parent_id) VALUES (1, 999)", &[])
            .await
            .unwrap();
        conn.set_fk_checks(true).await.unwrap();
    }
}
