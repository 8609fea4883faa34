//! # Hybrid Sync Engine
//!
//! Data layer for an asset/ticket inventory that must keep working when its
//! cloud database goes away: queries fail over from the managed cloud
//! instance to a DR replica to an embedded local cache, and a sync engine
//! reconciles the cache with the cloud when connectivity returns.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          hybrid-sync-engine                          │
//! │                                                                      │
//! │  ┌───────────────┐   ┌────────────────────┐   ┌───────────────────┐  │
//! │  │ QueryExecutor │──►│ ConnectionResolver │──►│ primary (MySQL)   │  │
//! │  │ (dialect-     │   │ (probe chain,      │   │ secondary (MySQL) │  │
//! │  │  neutral SQL) │   │  sticky local)     │   │ local (SQLite)    │  │
//! │  └───────────────┘   └─────────┬──────────┘   └───────────────────┘  │
//! │                                │ optional                            │
//! │  ┌───────────────┐   ┌─────────▼──────────┐   ┌───────────────────┐  │
//! │  │ SyncEngine    │   │ TunnelProxy        │   │ CrossInstance-    │  │
//! │  │ (push tickets,│   │ (SSH local         │   │ Replicator        │  │
//! │  │  pull tables) │   │  forwarding)       │   │ (primary ⇄ DR)    │  │
//! │  └───────────────┘   └────────────────────┘   └───────────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failover and sync
//!
//! 1. **Probe chain**: primary, then secondary, then the local cache, each
//!    probe bounded by a timeout. Local mode is sticky until an explicit
//!    reconnect.
//! 2. **Sync cycle**: unsynced local tickets are pushed to the cloud (with
//!    key remapping), then a full snapshot of the cloud tables is pulled
//!    into the cache, remote wins.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use hybrid_sync_engine::{EngineConfig, HybridEngine, NewTicket};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config: EngineConfig = toml::from_str(&std::fs::read_to_string("engine.toml")?)?;
//!     let engine = HybridEngine::new(config)?;
//!
//!     let id = engine
//!         .create_ticket(NewTicket {
//!             asset_id: 12,
//!             ticket_type: "Incident",
//!             title: "Switch port flapping",
//!             description: "Rack B2, port 14",
//!             priority: "High",
//!             logged_by: "noc",
//!             related_type: None,
//!             status: None,
//!         })
//!         .await?;
//!     println!("ticket {id} created ({})", engine.status_message().await);
//!
//!     let report = engine.sync().await?;
//!     println!("{}", report.message);
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod companion;
pub mod config;
pub mod dialect;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod executor;
pub mod files;
pub mod metrics;
pub mod replicate;
pub mod resolver;
pub mod schema;
pub mod sync;
pub mod tickets;
pub mod tunnel;
pub mod value;

pub use companion::{CompanionUserStore, PortalUser};
pub use config::{
    CompanionConfig, EndpointConfig, EngineConfig, LocalCacheConfig, MySqlEndpoint, SqliteEndpoint,
    SshConfig, StorageConfig, SyncConfig,
};
pub use endpoint::{ActiveMode, DbConnection, EndpointKind, Reachability, RemoteSource};
pub use engine::HybridEngine;
pub use error::{EngineError, Result};
pub use executor::{QueryExecutor, QueryOutcome};
pub use files::{FileReplicator, FileSyncReport};
pub use replicate::{CrossInstanceReplicator, Direction, ReplicationReport};
pub use resolver::ConnectionResolver;
pub use sync::{SyncEngine, SyncPhase, SyncReport};
pub use tickets::{sla_minutes, NewTicket, TicketService};
pub use tunnel::TunnelProxy;
pub use value::{Row, Value};
