// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the hybrid sync engine.
//!
//! This module defines the error types used throughout the engine. Errors are
//! categorized by their source (database, tunnel, config, etc.) and include
//! context to help with debugging.
//!
//! # Error Categories
//!
//! | Error Type | Connectivity | Description |
//! |------------|--------------|-------------|
//! | `Database` (io/tls/timeout) | Yes | Transport failures against a remote |
//! | `Tunnel` | Yes | SSH transport or forwarding failure |
//! | `ProbeTimeout` | Yes | Endpoint probe exceeded the probe budget |
//! | `Database` (other) | No | Constraint, syntax, decode errors |
//! | `Config` | No | Configuration invalid |
//! | `SyncInProgress` | No | A sync/replication cycle is already running |
//! | `Storage` | No | Attachment directory I/O failure |
//! | `Internal` | No | Unexpected internal error |
//!
//! # Failover Behavior
//!
//! Use [`EngineError::is_connectivity()`] to determine if a query failure
//! should trigger failover to the local cache. Connectivity errors indicate
//! the endpoint is unreachable; everything else (bad SQL, constraint
//! violations, corrupt config) must surface to the caller verbatim.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur in the sync engine.
///
/// Each variant includes context about where the error occurred.
/// Use [`is_connectivity()`](Self::is_connectivity) to check if the failure
/// warrants falling back to the local cache.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Database driver error (MySQL or SQLite).
    ///
    /// Covers both transport failures (connection refused, reset, TLS) and
    /// statement failures (syntax, constraints). The classifier inspects the
    /// inner kind to tell them apart.
    #[error("Database error ({operation}): {source}")]
    Database {
        operation: String,
        #[source]
        source: sqlx::Error,
    },

    /// SSH tunnel establishment or forwarding failure.
    ///
    /// Occurs when the SSH transport cannot be opened or a forwarded channel
    /// fails. Treated as a connectivity fault for the endpoint behind it.
    #[error("Tunnel error ({host}): {message}")]
    Tunnel { host: String, message: String },

    /// An endpoint probe did not answer within the probe budget.
    ///
    /// Recorded during `acquire()`; the resolver moves on to the next
    /// endpoint in the chain rather than propagating this.
    #[error("Probe timed out after {timeout:?} ({endpoint})")]
    ProbeTimeout {
        endpoint: String,
        timeout: std::time::Duration,
    },

    /// Invalid or missing configuration.
    ///
    /// Occurs during engine construction or config-file parsing.
    /// Fix the configuration and reconstruct.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A synchronization or replication cycle is already running.
    ///
    /// Returned by `SyncEngine::run` / `CrossInstanceReplicator::replicate`
    /// when invoked re-entrantly. The in-flight cycle is unaffected.
    #[error("Sync already in progress")]
    SyncInProgress,

    /// No remote endpoint could be reached for an operation that needs one.
    #[error("Remote unreachable: {0}")]
    RemoteUnreachable(String),

    /// Attachment storage I/O failure.
    #[error("Storage error ({path}): {source}")]
    Storage {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Unexpected internal error.
    ///
    /// Catch-all for errors that shouldn't happen.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Create a database error tagged with the operation being attempted.
    pub fn db(operation: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Database {
            operation: operation.into(),
            source,
        }
    }

    /// Create a tunnel error for the given SSH host.
    pub fn tunnel(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tunnel {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Create a storage error tagged with the path involved.
    pub fn storage(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Check if this error indicates the endpoint is unreachable.
    ///
    /// Connectivity faults trigger failover to the local cache; all other
    /// errors surface to the caller.
    pub fn is_connectivity(&self) -> bool {
        match self {
            Self::Database { source, .. } => matches!(
                source,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::Protocol(_)
            ),
            Self::Tunnel { .. } => true,
            Self::ProbeTimeout { .. } => true,
            Self::RemoteUnreachable(_) => true,
            Self::Config(_) => false,
            Self::SyncInProgress => false,
            Self::Storage { .. } => false,
            Self::Internal(_) => false,
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        Self::db("unknown", e)
    }
}
