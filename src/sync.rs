// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bidirectional synchronization between the local cache and a remote.
//!
//! Each invocation runs one cycle through a fixed sequence:
//!
//! ```text
//!   PushPending ──push──► Pushed ──► Pulling ──► Done
//!        │                              │
//!        └── per-ticket errors          └── per-table errors
//!            (recorded, cycle continues)    (recorded, cycle continues)
//! ```
//!
//! Push first: tickets created offline (`remote_synced = 0`) are reconciled
//! against the remote by `(title, logged_by, asset_id)`. A match just marks
//! the local row synced. No match inserts remotely, then one local
//! transaction remaps the ticket's key to the remote-assigned one, repoints
//! its attachment rows, and sets the synced flag — readers see the old or
//! new state, never a mix.
//!
//! Pull second: a full snapshot of every registered table, upserted locally
//! with remote-wins semantics. Pulled tickets are stored as synced. A table
//! that fails is skipped and reported; the rest of the cycle continues.
//!
//! The reconciliation key is ambiguous by construction: two identical
//! offline tickets for the same asset by the same user collapse into one
//! remote ticket. Strengthening the key would change the on-disk schema on
//! both sides, so the ambiguity is accepted.
//!
//! Cycles never overlap: a second `run()` while one is in flight returns
//! [`EngineError::SyncInProgress`] immediately.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::endpoint::{ActiveMode, DbConnection};
use crate::error::{EngineError, Result};
use crate::metrics;
use crate::resolver::ConnectionResolver;
use crate::schema::{ATTACHMENTS_TABLE, SYNC_ENTITIES, TICKET_PUSH_COLUMNS};
use crate::value::{Row, Value};

/// Where a sync cycle got to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    PushPending,
    Pushed,
    Pulling,
    Done,
}

/// Outcome of one sync cycle.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// True when every phase completed with no per-item errors.
    pub success: bool,
    pub message: String,
    pub phase: SyncPhase,
    /// Tickets inserted remotely and remapped locally.
    pub pushed: usize,
    /// Tickets that already existed remotely and were just flagged.
    pub matched: usize,
    /// Tickets that failed to push (logged individually).
    pub push_errors: usize,
    /// Tables whose pull failed and was skipped.
    pub failed_tables: Vec<String>,
}

impl SyncReport {
    fn unreachable() -> Self {
        Self {
            success: false,
            message: "cannot sync: no remote reachable".to_string(),
            phase: SyncPhase::PushPending,
            pushed: 0,
            matched: 0,
            push_errors: 0,
            failed_tables: Vec::new(),
        }
    }
}

/// Runs push-then-pull cycles against the active (or re-probed) remote.
pub struct SyncEngine {
    resolver: Arc<ConnectionResolver>,
    extra_tables: Vec<String>,
    guard: Mutex<()>,
}

impl SyncEngine {
    pub fn new(resolver: Arc<ConnectionResolver>, extra_tables: Vec<String>) -> Self {
        Self {
            resolver,
            extra_tables,
            guard: Mutex::new(()),
        }
    }

    /// Run one sync cycle.
    ///
    /// In local mode the remotes are re-probed first; if none answers, the
    /// report says so and nothing is touched. A cycle already in flight
    /// yields [`EngineError::SyncInProgress`].
    pub async fn run(&self) -> Result<SyncReport> {
        let _guard = self
            .guard
            .try_lock()
            .map_err(|_| EngineError::SyncInProgress)?;
        let started = Instant::now();

        let source = match self.resolver.active_mode() {
            Some(ActiveMode::Cloud(src)) => src,
            _ => match self.resolver.reconnect().await? {
                ActiveMode::Cloud(src) => src,
                ActiveMode::Local => return Ok(SyncReport::unreachable()),
            },
        };
        info!(source = %source, "sync cycle started");

        let mut remote = self.resolver.connect_remote(source).await?;
        let mut local = self.resolver.connect_local().await?;

        let mut report = SyncReport {
            success: false,
            message: String::new(),
            phase: SyncPhase::PushPending,
            pushed: 0,
            matched: 0,
            push_errors: 0,
            failed_tables: Vec::new(),
        };

        self.push_tickets(&mut remote, &mut local, &mut report).await?;
        report.phase = SyncPhase::Pushed;

        report.phase = SyncPhase::Pulling;
        self.pull_snapshot(&mut remote, &mut local, &mut report).await;
        report.phase = SyncPhase::Done;

        let _ = remote.close().await;
        let _ = local.close().await;

        report.success = report.push_errors == 0 && report.failed_tables.is_empty();
        report.message = if report.success {
            format!(
                "sync complete: {} pushed, {} matched",
                report.pushed, report.matched
            )
        } else {
            format!(
                "sync partial: {} pushed, {} matched, {} push errors, failed tables: [{}]",
                report.pushed,
                report.matched,
                report.push_errors,
                report.failed_tables.join(", ")
            )
        };

        metrics::record_sync_cycle(
            report.pushed,
            report.matched,
            report.failed_tables.len(),
            started.elapsed(),
        );
        info!(
            pushed = report.pushed,
            matched = report.matched,
            push_errors = report.push_errors,
            failed_tables = report.failed_tables.len(),
            "sync cycle finished"
        );
        Ok(report)
    }

    /// Push offline-created tickets to the remote. Per-ticket errors are
    /// counted and logged; the loop keeps going.
    async fn push_tickets(
        &self,
        remote: &mut DbConnection,
        local: &mut DbConnection,
        report: &mut SyncReport,
    ) -> Result<()> {
        let unsynced = local
            .fetch_all("SELECT * FROM tickets WHERE remote_synced = 0", &[])
            .await?;
        if unsynced.is_empty() {
            return Ok(());
        }
        debug!(count = unsynced.len(), "pushing offline tickets");

        for ticket in &unsynced {
            match push_one(remote, local, ticket).await {
                Ok(true) => report.pushed += 1,
                Ok(false) => report.matched += 1,
                Err(e) => {
                    warn!(
                        title = ticket.get("title").and_then(crate::value::Value::as_str).unwrap_or(""),
                        error = %e,
                        "ticket push failed"
                    );
                    metrics::record_error("sync", "ticket_push");
                    report.push_errors += 1;
                }
            }
        }
        Ok(())
    }

    /// Snapshot-pull every registered table, remote wins.
    async fn pull_snapshot(
        &self,
        remote: &mut DbConnection,
        local: &mut DbConnection,
        report: &mut SyncReport,
    ) {
        let tables: Vec<String> = SYNC_ENTITIES
            .iter()
            .map(|e| e.name.to_string())
            .chain(self.extra_tables.iter().cloned())
            .collect();

        for table in tables {
            match pull_table(remote, local, &table).await {
                Ok(rows) => {
                    metrics::record_pull_table(&table, rows, true);
                    debug!(table = %table, rows, "table pulled");
                }
                Err(e) => {
                    metrics::record_pull_table(&table, 0, false);
                    warn!(table = %table, error = %e, "table pull failed, skipping");
                    report.failed_tables.push(table);
                }
            }
        }
    }
}

/// Push a single ticket. Returns true when inserted remotely, false when it
/// already existed there.
async fn push_one(
    remote: &mut DbConnection,
    local: &mut DbConnection,
    ticket: &Row,
) -> Result<bool> {
    let local_id = ticket
        .get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| EngineError::Internal("local ticket without id".to_string()))?;

    let key: Vec<Value> = ["title", "logged_by", "asset_id"]
        .iter()
        .map(|&c| ticket.get(c).cloned().unwrap_or(Value::Null))
        .collect();
    let existing = remote
        .fetch_all(
            "SELECT id FROM tickets WHERE title = ? AND logged_by = ? AND asset_id = ?",
            &key,
        )
        .await?;

    if !existing.is_empty() {
        local
            .execute(
                "UPDATE tickets SET remote_synced = 1 WHERE id = ?",
                &[Value::Int(local_id)],
            )
            .await?;
        return Ok(false);
    }

    let columns = TICKET_PUSH_COLUMNS.join(", ");
    let placeholders = vec!["?"; TICKET_PUSH_COLUMNS.len()].join(", ");
    let params: Vec<Value> = TICKET_PUSH_COLUMNS
        .iter()
        .map(|&c| ticket.get(c).cloned().unwrap_or(Value::Null))
        .collect();
    let out = remote
        .execute(
            &format!("INSERT INTO tickets ({columns}) VALUES ({placeholders})"),
            &params,
        )
        .await?;
    let remote_id = out
        .last_insert_id
        .ok_or_else(|| EngineError::Internal("remote ticket insert returned no key".to_string()))?;

    // Key remap is atomic: ticket id, attachment references, and the synced
    // flag move together or not at all.
    local.begin().await?;
    if let Err(e) = remap_ticket(local, local_id, remote_id).await {
        let _ = local.rollback().await;
        return Err(e);
    }
    local.commit().await?;

    debug!(old_id = local_id, new_id = remote_id, "ticket pushed and remapped");
    Ok(true)
}

async fn remap_ticket(local: &mut DbConnection, old_id: i64, new_id: i64) -> Result<()> {
    local
        .execute(
            "UPDATE tickets SET id = ?, remote_synced = 1 WHERE id = ?",
            &[Value::Int(new_id), Value::Int(old_id)],
        )
        .await?;
    local
        .execute(
            &format!("UPDATE {ATTACHMENTS_TABLE} SET ticket_id = ? WHERE ticket_id = ?"),
            &[Value::Int(new_id), Value::Int(old_id)],
        )
        .await?;
    Ok(())
}

/// Pull one table: full remote snapshot upserted locally inside one
/// transaction. The local side is always SQLite, so the upsert is written
/// in its native form.
async fn pull_table(
    remote: &mut DbConnection,
    local: &mut DbConnection,
    table: &str,
) -> Result<usize> {
    // Table names come from the fixed registry and config, not user input.
    let rows = remote
        .fetch_all(&format!("SELECT * FROM {table}"), &[])
        .await?;
    let Some(first) = rows.first() else {
        return Ok(0);
    };

    let is_tickets = table == "tickets";
    let mut columns: Vec<String> = first
        .columns()
        .filter(|c| !(is_tickets && *c == "remote_synced"))
        .map(str::to_string)
        .collect();
    let mut placeholders = vec!["?"; columns.len()];
    if is_tickets {
        // Pulled tickets are remote-confirmed by definition.
        columns.push("remote_synced".to_string());
        placeholders.push("?");
    }
    let sql = format!(
        "INSERT OR REPLACE INTO {table} ({}) VALUES ({})",
        columns.join(", "),
        placeholders.join(", ")
    );

    // The appended flag column (tickets only) is always last.
    let data_cols = if is_tickets {
        &columns[..columns.len() - 1]
    } else {
        &columns[..]
    };

    local.begin().await?;
    for row in &rows {
        let mut params: Vec<Value> = data_cols
            .iter()
            .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
            .collect();
        if is_tickets {
            params.push(Value::Int(1));
        }
        if let Err(e) = local.execute(&sql, &params).await {
            let _ = local.rollback().await;
            return Err(e);
        }
    }
    local.commit().await?;
    Ok(rows.len())
}
