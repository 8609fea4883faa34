// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The assembled engine: one object wiring the resolver, executor, sync
//! engine, replicator, ticket service, file replicator, and (optionally)
//! the companion user store behind a single handle.
//!
//! Construction is cheap and offline; nothing connects until the first
//! operation runs. Applications hold one [`HybridEngine`] for their
//! lifetime and call [`HybridEngine::shutdown`] on exit to tear down any
//! SSH tunnels.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::companion::CompanionUserStore;
use crate::config::{EngineConfig, StorageConfig};
use crate::endpoint::ActiveMode;
use crate::error::{EngineError, Result};
use crate::executor::{QueryExecutor, QueryOutcome};
use crate::files::{FileReplicator, FileSyncReport};
use crate::replicate::{CrossInstanceReplicator, Direction, ReplicationReport};
use crate::resolver::ConnectionResolver;
use crate::sync::{SyncEngine, SyncReport};
use crate::tickets::{NewTicket, TicketService};
use crate::tunnel::TunnelProxy;
use crate::value::Value;

/// Owns every moving part of the data layer.
pub struct HybridEngine {
    config: EngineConfig,
    tunnel: Arc<TunnelProxy>,
    resolver: Arc<ConnectionResolver>,
    executor: Arc<QueryExecutor>,
    tickets: TicketService,
    sync: SyncEngine,
    replicator: CrossInstanceReplicator,
    files: FileReplicator,
    companion: Option<CompanionUserStore>,
}

impl HybridEngine {
    /// Validate the configuration and wire the components. Does not connect.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let tunnel = Arc::new(TunnelProxy::new());
        let resolver = Arc::new(ConnectionResolver::new(config.clone(), Arc::clone(&tunnel)));
        let executor = Arc::new(QueryExecutor::new(Arc::clone(&resolver)));
        let companion = config.companion.clone().map(|c| {
            CompanionUserStore::new(c, config.ssh.clone(), Arc::clone(&tunnel))
        });

        info!(primary = %config.primary.describe(), "engine assembled");
        Ok(Self {
            tickets: TicketService::new(Arc::clone(&executor)),
            sync: SyncEngine::new(Arc::clone(&resolver), config.sync.extra_tables.clone()),
            replicator: CrossInstanceReplicator::new(Arc::clone(&resolver)),
            files: FileReplicator::new(),
            companion,
            executor,
            resolver,
            tunnel,
            config,
        })
    }

    // ═══════════════════════════════════════════════════════════════════
    // Queries and tickets
    // ═══════════════════════════════════════════════════════════════════

    /// Run one logical statement in the active mode.
    pub async fn execute(
        &self,
        query: &str,
        params: &[Value],
        wants_rows: bool,
    ) -> Result<QueryOutcome> {
        self.executor.execute(query, params, wants_rows).await
    }

    /// Create a ticket with an SLA-derived due date.
    pub async fn create_ticket(&self, ticket: NewTicket<'_>) -> Result<i64> {
        self.tickets.create(ticket).await
    }

    /// Register an attachment row for a ticket.
    pub async fn record_attachment(
        &self,
        ticket_id: i64,
        file_name: &str,
        file_path: &str,
    ) -> Result<i64> {
        self.tickets
            .record_attachment(ticket_id, file_name, file_path)
            .await
    }

    // ═══════════════════════════════════════════════════════════════════
    // Synchronization and replication
    // ═══════════════════════════════════════════════════════════════════

    /// Push unsynced local tickets and pull a fresh remote snapshot.
    pub async fn sync(&self) -> Result<SyncReport> {
        self.sync.run().await
    }

    /// Copy rows between the two remote instances (insert-if-absent).
    pub async fn replicate(
        &self,
        direction: Direction,
        tables: Option<Vec<String>>,
    ) -> Result<ReplicationReport> {
        self.replicator.replicate(direction, tables).await
    }

    /// List user tables on a remote instance.
    pub async fn list_tables(
        &self,
        source: crate::endpoint::RemoteSource,
    ) -> Result<Vec<String>> {
        self.replicator.list_tables(source).await
    }

    /// Create any missing core tables on a remote instance.
    pub async fn ensure_remote_schema(
        &self,
        source: crate::endpoint::RemoteSource,
    ) -> Result<()> {
        self.replicator.ensure_schema(source).await
    }

    /// Mirror attachment files between local and network directories.
    pub async fn sync_files(&self) -> Result<FileSyncReport> {
        let storage = self.load_storage_config()?;
        self.files.sync_files(&storage).await
    }

    // ═══════════════════════════════════════════════════════════════════
    // Storage config and companion users
    // ═══════════════════════════════════════════════════════════════════

    /// Load the attachment storage settings, migrating legacy files in place.
    pub fn load_storage_config(&self) -> Result<StorageConfig> {
        StorageConfig::load(Path::new(&self.config.storage_file))
    }

    /// Persist attachment storage settings.
    pub fn save_storage_config(&self, storage: &StorageConfig) -> Result<()> {
        storage.save(Path::new(&self.config.storage_file))
    }

    /// Portal user admin, when a companion endpoint is configured.
    pub fn companion_users(&self) -> Result<&CompanionUserStore> {
        self.companion
            .as_ref()
            .ok_or_else(|| EngineError::Config("no companion endpoint configured".to_string()))
    }

    // ═══════════════════════════════════════════════════════════════════
    // Mode and lifecycle
    // ═══════════════════════════════════════════════════════════════════

    /// The mode currently serving queries, if resolution has run.
    pub fn active_mode(&self) -> Option<ActiveMode> {
        self.resolver.active_mode()
    }

    /// User-facing connection status line.
    pub async fn status_message(&self) -> String {
        self.resolver.status_message().await
    }

    /// Re-run the probe chain, leaving sticky local mode if a remote is back.
    pub async fn reconnect(&self) -> Result<ActiveMode> {
        self.resolver.reconnect().await
    }

    /// Tear down SSH tunnels. Connections are per-operation, so nothing
    /// else holds state worth closing.
    pub async fn shutdown(&self) {
        self.tunnel.stop_all().await;
        info!("engine shut down");
    }
}
