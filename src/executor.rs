// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Query execution against whichever endpoint is active.
//!
//! Callers hand over a logical statement (MySQL dialect, `?` placeholders)
//! and whether they want rows back; the executor resolves an endpoint, runs
//! the statement (rendered for that endpoint's dialect), and returns a
//! backend-neutral outcome.
//!
//! A connectivity fault against a remote drops the resolver into local mode
//! and re-issues the statement once against the cache. Dialect errors and
//! constraint violations are never retried; they surface verbatim.

use std::sync::Arc;

use tracing::warn;

use crate::endpoint::{ActiveMode, DbConnection};
use crate::error::Result;
use crate::metrics;
use crate::resolver::ConnectionResolver;
use crate::value::{Row, Value};

/// What a statement produced.
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    Rows(Vec<Row>),
    Done {
        rows_affected: u64,
        last_insert_id: Option<i64>,
    },
}

impl QueryOutcome {
    /// Result rows, empty for non-SELECT outcomes.
    pub fn rows(&self) -> &[Row] {
        match self {
            QueryOutcome::Rows(rows) => rows,
            QueryOutcome::Done { .. } => &[],
        }
    }

    pub fn last_insert_id(&self) -> Option<i64> {
        match self {
            QueryOutcome::Rows(_) => None,
            QueryOutcome::Done { last_insert_id, .. } => *last_insert_id,
        }
    }

    pub fn rows_affected(&self) -> u64 {
        match self {
            QueryOutcome::Rows(_) => 0,
            QueryOutcome::Done { rows_affected, .. } => *rows_affected,
        }
    }
}

/// Executes logical statements with automatic failover.
pub struct QueryExecutor {
    resolver: Arc<ConnectionResolver>,
}

impl QueryExecutor {
    pub fn new(resolver: Arc<ConnectionResolver>) -> Self {
        Self { resolver }
    }

    /// Run one statement in the active mode.
    ///
    /// `wants_rows` selects fetch vs. execute; a SELECT run with
    /// `wants_rows = false` still executes but reports only counters.
    ///
    /// A non-idempotent write may apply twice across the failover boundary:
    /// once remotely before the fault, once locally on the re-issue. Callers
    /// that cannot tolerate this must use idempotent statements.
    pub async fn execute(
        &self,
        query: &str,
        params: &[Value],
        wants_rows: bool,
    ) -> Result<QueryOutcome> {
        let (mut conn, mode) = self.resolver.acquire().await?;
        let result = run_statement(&mut conn, query, params, wants_rows).await;
        let _ = conn.close().await;

        match result {
            Ok(outcome) => {
                metrics::record_query(&mode.to_string(), true);
                Ok(outcome)
            }
            Err(e) if matches!(mode, ActiveMode::Cloud(_)) && e.is_connectivity() => {
                warn!(mode = %mode, error = %e, "remote query lost connectivity, re-issuing on local cache");
                metrics::record_query(&mode.to_string(), false);
                self.resolver.mark_local("query connectivity fault").await?;

                let mut local = self.resolver.connect_local().await?;
                let retried = run_statement(&mut local, query, params, wants_rows).await;
                let _ = local.close().await;
                metrics::record_query(&ActiveMode::Local.to_string(), retried.is_ok());
                retried
            }
            Err(e) => {
                metrics::record_query(&mode.to_string(), false);
                Err(e)
            }
        }
    }
}

async fn run_statement(
    conn: &mut DbConnection,
    query: &str,
    params: &[Value],
    wants_rows: bool,
) -> Result<QueryOutcome> {
    if wants_rows {
        let rows = conn.fetch_all(query, params).await?;
        Ok(QueryOutcome::Rows(rows))
    } else {
        let out = conn.execute(query, params).await?;
        Ok(QueryOutcome::Done {
            rows_affected: out.rows_affected,
            last_insert_id: out.last_insert_id,
        })
    }
}
