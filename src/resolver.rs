// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Connection resolution and failover.
//!
//! The resolver owns the engine's notion of "where queries go right now":
//!
//! ```text
//!                  ┌─────────────┐ probe ok  ┌──────────────────┐
//!   acquire() ───► │ primary     ├──────────►│ Cloud(Primary)   │
//!                  └──────┬──────┘           └──────────────────┘
//!                         │ refused/timeout
//!                  ┌──────▼──────┐ probe ok  ┌──────────────────┐
//!                  │ secondary   ├──────────►│ Cloud(Secondary) │
//!                  └──────┬──────┘           └──────────────────┘
//!                         │ refused/timeout
//!                  ┌──────▼──────┐           ┌──────────────────┐
//!                  │ local cache ├──────────►│ Local (sticky)   │
//!                  └─────────────┘           └──────────────────┘
//! ```
//!
//! Probes run in fixed order, each bounded by the configured probe timeout;
//! a probe is an open connection answering `SELECT 1`. Probe failures are
//! recorded, never propagated. Local mode is sticky: once entered, only
//! [`ConnectionResolver::reconnect`] (or a successful sync, which calls it)
//! re-runs the chain. Entering local mode ensures the cache schema so a
//! first-ever offline session starts against real tables.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{watch, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::{EndpointConfig, EngineConfig};
use crate::endpoint::{ActiveMode, DbConnection, EndpointKind, Reachability, RemoteSource};
use crate::error::{EngineError, Result};
use crate::metrics;
use crate::schema;
use crate::tunnel::TunnelProxy;

/// Decides which endpoint serves queries and tracks why.
pub struct ConnectionResolver {
    config: EngineConfig,
    tunnel: Arc<TunnelProxy>,
    /// `None` until the first probe chain has run.
    mode_tx: watch::Sender<Option<ActiveMode>>,
    status: RwLock<String>,
    reachability: RwLock<HashMap<EndpointKind, Reachability>>,
}

impl ConnectionResolver {
    pub fn new(config: EngineConfig, tunnel: Arc<TunnelProxy>) -> Self {
        let (mode_tx, _) = watch::channel(None);
        Self {
            config,
            tunnel,
            mode_tx,
            status: RwLock::new("not connected".to_string()),
            reachability: RwLock::new(HashMap::new()),
        }
    }

    /// The mode currently in force, if the chain has run at least once.
    pub fn active_mode(&self) -> Option<ActiveMode> {
        *self.mode_tx.borrow()
    }

    /// Watch mode changes (used by long-lived observers).
    pub fn mode_watch(&self) -> watch::Receiver<Option<ActiveMode>> {
        self.mode_tx.subscribe()
    }

    /// User-facing connection status line.
    pub async fn status_message(&self) -> String {
        self.status.read().await.clone()
    }

    /// Last probe outcome for an endpoint.
    pub async fn reachability(&self, kind: EndpointKind) -> Reachability {
        self.reachability
            .read()
            .await
            .get(&kind)
            .cloned()
            .unwrap_or(Reachability::Untested)
    }

    /// Open a connection in the current mode, resolving it first if needed.
    ///
    /// In cloud mode a connectivity fault re-runs the probe chain instead of
    /// surfacing; in sticky local mode no remote is touched at all.
    pub async fn acquire(&self) -> Result<(DbConnection, ActiveMode)> {
        match self.active_mode() {
            Some(ActiveMode::Local) => {
                Ok((self.connect_local().await?, ActiveMode::Local))
            }
            Some(ActiveMode::Cloud(src)) => match self.connect_remote(src).await {
                Ok(conn) => Ok((conn, ActiveMode::Cloud(src))),
                Err(e) if e.is_connectivity() => {
                    warn!(source = %src, error = %e, "active remote lost, re-resolving");
                    self.resolve().await
                }
                Err(e) => Err(e),
            },
            None => self.resolve().await,
        }
    }

    /// Discard the current mode and re-run the full probe chain.
    pub async fn reconnect(&self) -> Result<ActiveMode> {
        let (conn, mode) = self.resolve().await?;
        let _ = conn.close().await;
        Ok(mode)
    }

    /// Drop to local mode because a query hit a connectivity fault.
    pub(crate) async fn mark_local(&self, reason: &str) -> Result<()> {
        let mut conn = self.connect_local().await?;
        schema::ensure(&mut conn).await?;
        let _ = conn.close().await;
        metrics::record_failover(reason);
        self.set_mode(ActiveMode::Local, "offline mode (local cache)")
            .await;
        Ok(())
    }

    /// Open the local cache, creating the schema when the file is new.
    pub async fn connect_local(&self) -> Result<DbConnection> {
        let mut conn = DbConnection::connect_sqlite(&self.config.local.path).await?;
        schema::ensure(&mut conn).await?;
        Ok(conn)
    }

    /// Open a bounded, verified connection to a specific remote instance.
    ///
    /// Used directly by sync, replication, and schema repair, which need a
    /// particular instance regardless of the active mode.
    pub async fn connect_remote(&self, src: RemoteSource) -> Result<DbConnection> {
        let endpoint = self.remote_endpoint(src)?;
        let budget = self.config.probe_timeout_duration();
        let attempt = async {
            let mut conn =
                DbConnection::connect(endpoint, self.config.ssh.as_ref(), &self.tunnel).await?;
            conn.ping().await?;
            Ok(conn)
        };
        match timeout(budget, attempt).await {
            Ok(res) => res,
            Err(_) => Err(EngineError::ProbeTimeout {
                endpoint: src.to_string(),
                timeout: budget,
            }),
        }
    }

    /// Run the probe chain: primary, then secondary, then local.
    async fn resolve(&self) -> Result<(DbConnection, ActiveMode)> {
        let mut chain = vec![RemoteSource::Primary];
        if self.config.secondary.is_some() {
            chain.push(RemoteSource::Secondary);
        }

        for src in chain {
            let started = Instant::now();
            match self.connect_remote(src).await {
                Ok(conn) => {
                    metrics::record_probe(&src.to_string(), true);
                    metrics::record_probe_latency(&src.to_string(), started.elapsed());
                    self.record_reachability(src.kind(), Reachability::Reachable)
                        .await;
                    let mode = ActiveMode::Cloud(src);
                    self.set_mode(mode, &format!("cloud connected ({src})")).await;
                    return Ok((conn, mode));
                }
                Err(e) => {
                    metrics::record_probe(&src.to_string(), false);
                    debug!(source = %src, error = %e, "probe failed");
                    self.record_reachability(src.kind(), Reachability::Unreachable(e.to_string()))
                        .await;
                }
            }
        }

        let conn = self.connect_local().await?;
        self.record_reachability(EndpointKind::LocalCache, Reachability::Reachable)
            .await;
        metrics::record_failover("probe chain exhausted");
        self.set_mode(ActiveMode::Local, "offline mode (local cache)")
            .await;
        Ok((conn, ActiveMode::Local))
    }

    fn remote_endpoint(&self, src: RemoteSource) -> Result<&EndpointConfig> {
        match src {
            RemoteSource::Primary => Ok(&self.config.primary),
            RemoteSource::Secondary => self.config.secondary.as_ref().ok_or_else(|| {
                EngineError::Config("no secondary endpoint configured".to_string())
            }),
        }
    }

    async fn set_mode(&self, mode: ActiveMode, status: &str) {
        let changed = self.active_mode() != Some(mode);
        self.mode_tx.send_replace(Some(mode));
        *self.status.write().await = status.to_string();
        metrics::set_active_mode(&mode.to_string());
        if changed {
            info!(mode = %mode, "active mode changed");
        }
    }

    async fn record_reachability(&self, kind: EndpointKind, state: Reachability) {
        self.reachability.write().await.insert(kind, state);
    }
}
