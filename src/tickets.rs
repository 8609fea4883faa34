//! Ticket creation with SLA-derived due dates, plus attachment records.
//!
//! Due dates come from a fixed priority lookup; there are no business rules
//! beyond it. Attachment handling here is the database row only — file
//! bodies live in the attachment directories managed by the file replicator.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::executor::QueryExecutor;
use crate::value::Value;

/// Priority → resolution window, in minutes.
pub const SLA_MINUTES: &[(&str, i64)] = &[
    ("Critical", 240),
    ("High", 480),
    ("Medium", 1440),
    ("Low", 4320),
];

/// Resolution window for a priority. Unknown priorities get no due date.
pub fn sla_minutes(priority: &str) -> Option<i64> {
    SLA_MINUTES
        .iter()
        .find(|(p, _)| *p == priority)
        .map(|(_, m)| *m)
}

/// Fields for a new ticket.
pub struct NewTicket<'a> {
    pub asset_id: i64,
    pub ticket_type: &'a str,
    pub title: &'a str,
    pub description: &'a str,
    pub priority: &'a str,
    pub logged_by: &'a str,
    /// Polymorphic link kind; defaults to "asset".
    pub related_type: Option<&'a str>,
    /// Defaults to "Open".
    pub status: Option<&'a str>,
}

/// Creates tickets and attachment records in whatever mode is active.
pub struct TicketService {
    executor: Arc<QueryExecutor>,
}

impl TicketService {
    pub fn new(executor: Arc<QueryExecutor>) -> Self {
        Self { executor }
    }

    /// Insert a ticket, stamping `due_date` from the SLA table, and return
    /// its key on the instance that took the write.
    pub async fn create(&self, ticket: NewTicket<'_>) -> Result<i64> {
        let due_date = match sla_minutes(ticket.priority) {
            Some(minutes) => Value::Text(
                (Utc::now() + Duration::minutes(minutes))
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string(),
            ),
            None => Value::Null,
        };

        let sql = "INSERT INTO tickets \
                   (asset_id, ticket_type, title, description, priority, status, \
                    logged_by, related_type, due_date, created_at, updated_at) \
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NOW(), NOW())";
        let params = [
            Value::Int(ticket.asset_id),
            Value::from(ticket.ticket_type),
            Value::from(ticket.title),
            Value::from(ticket.description),
            Value::from(ticket.priority),
            Value::from(ticket.status.unwrap_or("Open")),
            Value::from(ticket.logged_by),
            Value::from(ticket.related_type.unwrap_or("asset")),
            due_date,
        ];

        let out = self.executor.execute(sql, &params, false).await?;
        let id = out
            .last_insert_id()
            .ok_or_else(|| EngineError::Internal("ticket insert returned no key".to_string()))?;
        debug!(ticket_id = id, priority = %ticket.priority, "ticket created");
        Ok(id)
    }

    /// Register an attachment row for a ticket.
    pub async fn record_attachment(
        &self,
        ticket_id: i64,
        file_name: &str,
        file_path: &str,
    ) -> Result<i64> {
        let out = self
            .executor
            .execute(
                "INSERT INTO ticket_attachments (ticket_id, file_name, file_path, uploaded_at) \
                 VALUES (?, ?, ?, NOW())",
                &[
                    Value::Int(ticket_id),
                    Value::from(file_name),
                    Value::from(file_path),
                ],
                false,
            )
            .await?;
        out.last_insert_id()
            .ok_or_else(|| EngineError::Internal("attachment insert returned no key".to_string()))
    }
}
