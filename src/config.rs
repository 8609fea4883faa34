//! Configuration types for the hybrid sync engine.
//!
//! All durations are human-readable strings (e.g. "3s", "500ms") parsed with
//! humantime. Every struct derives serde traits so configs can load from
//! JSON/TOML files or be built in code; `for_testing()` constructors give
//! tests sensible fixtures.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

// ═══════════════════════════════════════════════════════════════════════════
// Engine configuration
// ═══════════════════════════════════════════════════════════════════════════

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// The managed cloud instance, first in the probe chain.
    pub primary: EndpointConfig,

    /// Optional second cloud instance (DR replica), probed after primary.
    #[serde(default)]
    pub secondary: Option<EndpointConfig>,

    /// Local embedded cache, the fallback of last resort.
    #[serde(default)]
    pub local: LocalCacheConfig,

    /// SSH bastion for endpoints that only expose their database on
    /// loopback. Endpoints whose host equals `ssh.host` are routed through
    /// the tunnel proxy.
    #[serde(default)]
    pub ssh: Option<SshConfig>,

    /// Per-endpoint probe budget (connect + `SELECT 1`).
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout: String,

    /// Path of the storage-paths config file (attachment directories).
    #[serde(default = "default_storage_file")]
    pub storage_file: String,

    /// Synchronization knobs.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Endpoint holding the companion-app user table, if any.
    #[serde(default)]
    pub companion: Option<CompanionConfig>,
}

impl EngineConfig {
    /// Parsed probe timeout, falling back to 3s if the string is invalid.
    ///
    /// `validate()` rejects invalid strings up front; the fallback only
    /// matters for configs constructed in code without validation.
    pub fn probe_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.probe_timeout).unwrap_or(Duration::from_secs(3))
    }

    /// Validate the configuration, returning the first problem found.
    pub fn validate(&self) -> Result<()> {
        humantime::parse_duration(&self.probe_timeout).map_err(|e| {
            EngineError::Config(format!("invalid probe_timeout '{}': {}", self.probe_timeout, e))
        })?;
        if self.local.path.as_os_str().is_empty() {
            return Err(EngineError::Config("local cache path is empty".to_string()));
        }
        self.primary.validate("primary")?;
        if let Some(secondary) = &self.secondary {
            secondary.validate("secondary")?;
        }
        if let Some(companion) = &self.companion {
            companion.endpoint.validate("companion")?;
        }
        Ok(())
    }

    /// A minimal config for tests: one endpoint, a local cache file, no SSH.
    pub fn for_testing(primary: EndpointConfig, local_path: impl Into<PathBuf>) -> Self {
        Self {
            primary,
            secondary: None,
            local: LocalCacheConfig {
                path: local_path.into(),
            },
            ssh: None,
            probe_timeout: "3s".to_string(),
            storage_file: "storage.toml".to_string(),
            sync: SyncConfig::default(),
            companion: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Endpoints
// ═══════════════════════════════════════════════════════════════════════════

/// Where and how to reach one database instance.
///
/// Remote instances are MySQL in production; the SQLite variant lets tests
/// stand up "remote" endpoints on temp files without a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "driver", rename_all = "lowercase")]
pub enum EndpointConfig {
    MySql(MySqlEndpoint),
    Sqlite(SqliteEndpoint),
}

impl EndpointConfig {
    fn validate(&self, label: &str) -> Result<()> {
        match self {
            EndpointConfig::MySql(m) => {
                if m.host.is_empty() {
                    return Err(EngineError::Config(format!("{label}: host is empty")));
                }
                if m.database.is_empty() {
                    return Err(EngineError::Config(format!("{label}: database is empty")));
                }
                Ok(())
            }
            EndpointConfig::Sqlite(s) => {
                if s.path.as_os_str().is_empty() {
                    return Err(EngineError::Config(format!("{label}: path is empty")));
                }
                Ok(())
            }
        }
    }

    /// Human-readable endpoint description for logs and status messages.
    pub fn describe(&self) -> String {
        match self {
            EndpointConfig::MySql(m) => format!("mysql://{}:{}/{}", m.host, m.port, m.database),
            EndpointConfig::Sqlite(s) => format!("sqlite://{}", s.path.display()),
        }
    }

    /// True when this endpoint must be reached through the SSH tunnel.
    ///
    /// Matches the operational convention: a database that only listens on
    /// its host's loopback is configured with the same hostname as the SSH
    /// bastion.
    pub fn requires_tunnel(&self, ssh: Option<&SshConfig>) -> bool {
        match (self, ssh) {
            (EndpointConfig::MySql(m), Some(ssh)) => m.host == ssh.host,
            _ => false,
        }
    }
}

/// A MySQL server endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MySqlEndpoint {
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

/// A SQLite file endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteEndpoint {
    pub path: PathBuf,
}

/// The local embedded cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalCacheConfig {
    #[serde(default = "default_local_path")]
    pub path: PathBuf,
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            path: default_local_path(),
        }
    }
}

/// SSH bastion credentials for tunneled endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Port the database listens on at the far end of the tunnel.
    #[serde(default = "default_mysql_port")]
    pub remote_db_port: u16,
}

/// Companion-app user store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanionConfig {
    pub endpoint: EndpointConfig,
}

// ═══════════════════════════════════════════════════════════════════════════
// Synchronization
// ═══════════════════════════════════════════════════════════════════════════

/// Synchronization knobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Tables pulled in addition to the built-in entity registry.
    /// Pulled last, full-snapshot, remote wins.
    #[serde(default)]
    pub extra_tables: Vec<String>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Attachment storage paths
// ═══════════════════════════════════════════════════════════════════════════

/// Attachment storage locations, persisted in a small TOML file.
///
/// Older deployments stored just the bare local path as the whole file;
/// [`StorageConfig::load`] accepts that form and migrates it to TOML on the
/// spot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_attachment_dir")]
    pub local_path: String,
    #[serde(default)]
    pub network_path: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            local_path: default_attachment_dir(),
            network_path: None,
        }
    }
}

impl StorageConfig {
    /// Load from `path`. A missing file yields the defaults; a legacy file
    /// holding a bare path string is migrated to TOML and re-saved.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(EngineError::Storage {
                    path: path.display().to_string(),
                    source: e,
                })
            }
        };
        if let Ok(cfg) = toml::from_str::<StorageConfig>(&raw) {
            return Ok(cfg);
        }
        let legacy = raw.trim();
        if legacy.is_empty() {
            return Ok(Self::default());
        }
        tracing::info!(path = %path.display(), "migrating legacy storage config");
        let cfg = Self {
            local_path: legacy.to_string(),
            network_path: None,
        };
        cfg.save(path)?;
        Ok(cfg)
    }

    /// Persist as TOML.
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        let body = toml::to_string_pretty(self)
            .map_err(|e| EngineError::Internal(format!("storage config serialize: {e}")))?;
        std::fs::write(path, body).map_err(|e| EngineError::Storage {
            path: path.display().to_string(),
            source: e,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Serde defaults
// ═══════════════════════════════════════════════════════════════════════════

fn default_probe_timeout() -> String {
    "3s".to_string()
}

fn default_storage_file() -> String {
    "storage.toml".to_string()
}

fn default_local_path() -> PathBuf {
    PathBuf::from("local_cache.db")
}

fn default_attachment_dir() -> String {
    "attachments".to_string()
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_ssh_port() -> u16 {
    22
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mysql_endpoint() -> EndpointConfig {
        EndpointConfig::MySql(MySqlEndpoint {
            host: "db.example.com".to_string(),
            port: 3306,
            user: "inventory".to_string(),
            password: "secret".to_string(),
            database: "inventory".to_string(),
        })
    }

    #[test]
    fn test_for_testing_validates() {
        let cfg = EngineConfig::for_testing(mysql_endpoint(), "/tmp/cache.db");
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.probe_timeout_duration(), Duration::from_secs(3));
    }

    #[test]
    fn test_invalid_probe_timeout_rejected() {
        let mut cfg = EngineConfig::for_testing(mysql_endpoint(), "/tmp/cache.db");
        cfg.probe_timeout = "three seconds-ish".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_empty_host_rejected() {
        let cfg = EngineConfig::for_testing(
            EndpointConfig::MySql(MySqlEndpoint {
                host: String::new(),
                port: 3306,
                user: "u".to_string(),
                password: "p".to_string(),
                database: "d".to_string(),
            }),
            "/tmp/cache.db",
        );
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("primary"));
    }

    #[test]
    fn test_requires_tunnel_on_host_match() {
        let ssh = SshConfig {
            host: "db.example.com".to_string(),
            port: 22,
            user: "ops".to_string(),
            password: "pw".to_string(),
            remote_db_port: 3306,
        };
        assert!(mysql_endpoint().requires_tunnel(Some(&ssh)));

        let other = SshConfig {
            host: "bastion.example.com".to_string(),
            ..ssh
        };
        assert!(!mysql_endpoint().requires_tunnel(Some(&other)));
        assert!(!mysql_endpoint().requires_tunnel(None));
    }

    #[test]
    fn test_json_roundtrip() {
        let cfg = EngineConfig::for_testing(mysql_endpoint(), "/tmp/cache.db");
        let json = serde_json::to_string(&cfg).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.primary.describe(), cfg.primary.describe());
        assert_eq!(back.probe_timeout, cfg.probe_timeout);
    }

    #[test]
    fn test_endpoint_deserialize_defaults_port() {
        let json = r#"{"driver":"mysql","host":"h","user":"u","password":"p","database":"d"}"#;
        let ep: EndpointConfig = serde_json::from_str(json).unwrap();
        match ep {
            EndpointConfig::MySql(m) => assert_eq!(m.port, 3306),
            _ => panic!("expected mysql endpoint"),
        }
    }

    #[test]
    fn test_storage_missing_file_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = StorageConfig::load(&dir.path().join("storage.toml")).unwrap();
        assert_eq!(cfg, StorageConfig::default());
    }

    #[test]
    fn test_storage_toml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.toml");
        let cfg = StorageConfig {
            local_path: "attachments".to_string(),
            network_path: Some("/mnt/share/attachments".to_string()),
        };
        cfg.save(&path).unwrap();
        assert_eq!(StorageConfig::load(&path).unwrap(), cfg);
    }

    #[test]
    fn test_storage_legacy_bare_path_migrates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.toml");
        std::fs::write(&path, "/srv/old-attachments\n").unwrap();

        let cfg = StorageConfig::load(&path).unwrap();
        assert_eq!(cfg.local_path, "/srv/old-attachments");
        assert_eq!(cfg.network_path, None);

        // The file on disk is now TOML.
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("local_path"));
        assert_eq!(StorageConfig::load(&path).unwrap(), cfg);
    }
}
