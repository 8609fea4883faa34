// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cross-instance replication between the two remote instances.
//!
//! Copies rows from one remote to the other with insert-if-absent semantics:
//! existing target rows are never modified, so replaying a replication run
//! is harmless. Both directions run the same algorithm with the roles
//! swapped. Used to seed or top up a DR instance from the live one, or to
//! recover the live instance from DR.
//!
//! Foreign-key enforcement on the target is disabled for the duration of a
//! run and re-enabled afterwards, including on error paths, so table copy
//! order doesn't matter. Tables missing on the target are reported as
//! per-table errors; no schema is created implicitly (see
//! [`CrossInstanceReplicator::ensure_schema`] for explicit repair).

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::endpoint::{DbConnection, RemoteSource};
use crate::error::{EngineError, Result};
use crate::metrics;
use crate::resolver::ConnectionResolver;
use crate::schema;
use crate::value::Value;

/// Which way rows flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    PrimaryToSecondary,
    SecondaryToPrimary,
}

impl Direction {
    pub fn source(self) -> RemoteSource {
        match self {
            Direction::PrimaryToSecondary => RemoteSource::Primary,
            Direction::SecondaryToPrimary => RemoteSource::Secondary,
        }
    }

    pub fn target(self) -> RemoteSource {
        match self {
            Direction::PrimaryToSecondary => RemoteSource::Secondary,
            Direction::SecondaryToPrimary => RemoteSource::Primary,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::PrimaryToSecondary => write!(f, "primary_to_secondary"),
            Direction::SecondaryToPrimary => write!(f, "secondary_to_primary"),
        }
    }
}

/// Outcome of one replication run.
#[derive(Debug, Clone, Default)]
pub struct ReplicationReport {
    pub succeeded: Vec<String>,
    /// `(table, error)` pairs for tables that were skipped.
    pub errors: Vec<(String, String)>,
    /// Rows actually inserted (absent on the target before the run).
    pub rows_copied: u64,
}

/// Copies rows between the two remote instances.
pub struct CrossInstanceReplicator {
    resolver: Arc<ConnectionResolver>,
    guard: Mutex<()>,
}

impl CrossInstanceReplicator {
    pub fn new(resolver: Arc<ConnectionResolver>) -> Self {
        Self {
            resolver,
            guard: Mutex::new(()),
        }
    }

    /// Replicate `tables` (or every source table when omitted) in the given
    /// direction. Table failures are isolated; the run continues.
    pub async fn replicate(
        &self,
        direction: Direction,
        tables: Option<Vec<String>>,
    ) -> Result<ReplicationReport> {
        let _guard = self
            .guard
            .try_lock()
            .map_err(|_| EngineError::SyncInProgress)?;
        let started = Instant::now();

        let mut source = self.resolver.connect_remote(direction.source()).await?;
        let mut target = self.resolver.connect_remote(direction.target()).await?;

        let tables = match tables {
            Some(t) if !t.is_empty() => t,
            _ => source.list_tables().await?,
        };
        info!(direction = %direction, tables = tables.len(), "replication run started");

        target.set_fk_checks(false).await?;

        let mut report = ReplicationReport::default();
        for table in &tables {
            match copy_table(&mut source, &mut target, table).await {
                Ok(inserted) => {
                    metrics::record_replicated_rows(table, inserted);
                    report.rows_copied += inserted;
                    report.succeeded.push(table.clone());
                }
                Err(e) => {
                    warn!(table = %table, error = %e, "table replication failed, skipping");
                    metrics::record_error("replicate", "table_copy");
                    report.errors.push((table.clone(), e.to_string()));
                }
            }
        }

        // Re-enable enforcement no matter how the copies went.
        if let Err(e) = target.set_fk_checks(true).await {
            warn!(error = %e, "failed to re-enable foreign key checks");
        }

        let _ = source.close().await;
        let _ = target.close().await;

        metrics::record_replication_run(
            &direction.to_string(),
            report.succeeded.len(),
            report.errors.len(),
            started.elapsed(),
        );
        info!(
            direction = %direction,
            succeeded = report.succeeded.len(),
            errors = report.errors.len(),
            rows_copied = report.rows_copied,
            "replication run finished"
        );
        Ok(report)
    }

    /// List user tables on one remote instance.
    pub async fn list_tables(&self, source: RemoteSource) -> Result<Vec<String>> {
        let mut conn = self.resolver.connect_remote(source).await?;
        let tables = conn.list_tables().await;
        let _ = conn.close().await;
        tables
    }

    /// Create any missing core tables on a remote instance, typically an
    /// empty DR target before its first replication.
    pub async fn ensure_schema(&self, source: RemoteSource) -> Result<()> {
        let mut conn = self.resolver.connect_remote(source).await?;
        let res = schema::ensure(&mut conn).await;
        let _ = conn.close().await;
        res
    }
}

/// Copy one table with insert-if-absent semantics. Returns rows inserted.
async fn copy_table(
    source: &mut DbConnection,
    target: &mut DbConnection,
    table: &str,
) -> Result<u64> {
    // Table names come from introspection or the caller's fixed list.
    let rows = source
        .fetch_all(&format!("SELECT * FROM {table}"), &[])
        .await?;
    let Some(first) = rows.first() else {
        return Ok(0);
    };

    let columns: Vec<String> = first.columns().map(str::to_string).collect();
    let sql = format!(
        "INSERT IGNORE INTO {table} ({}) VALUES ({})",
        columns.join(", "),
        vec!["?"; columns.len()].join(", ")
    );

    target.begin().await?;
    let mut inserted = 0u64;
    for row in &rows {
        let params: Vec<Value> = columns
            .iter()
            .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
            .collect();
        match target.execute(&sql, &params).await {
            // Ignored duplicates report zero rows affected.
            Ok(out) => inserted += out.rows_affected,
            Err(e) => {
                let _ = target.rollback().await;
                return Err(e);
            }
        }
    }
    target.commit().await?;
    Ok(inserted)
}
