//! Two-way attachment file replication between the local attachment
//! directory and a network share.
//!
//! Presence-only: a file that exists on one side and not the other is
//! copied over; a name present on both sides is never touched, even when
//! the contents differ (counted as a conflict and reported). Subdirectories
//! are ignored. With no network path configured, or one that resolves to
//! the local directory itself, the pass is a no-op.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::error::{EngineError, Result};
use crate::metrics;

/// Outcome of one file synchronization pass.
#[derive(Debug, Clone, Default)]
pub struct FileSyncReport {
    pub copied_to_local: usize,
    pub copied_to_network: usize,
    /// Names present on both sides, left untouched.
    pub skipped_conflicts: usize,
    pub message: String,
}

impl FileSyncReport {
    fn noop(message: &str) -> Self {
        Self {
            message: message.to_string(),
            ..Self::default()
        }
    }
}

/// Mirrors attachment files between the configured directories.
pub struct FileReplicator;

impl FileReplicator {
    pub fn new() -> Self {
        Self
    }

    /// Run one presence-only synchronization pass.
    pub async fn sync_files(&self, storage: &StorageConfig) -> Result<FileSyncReport> {
        let local = Path::new(&storage.local_path);
        if !local.exists() {
            fs::create_dir_all(local)
                .map_err(|e| EngineError::storage(&storage.local_path, e))?;
        }

        let Some(network_path) = &storage.network_path else {
            return Ok(FileSyncReport::noop("no network path configured"));
        };
        let network = Path::new(network_path);
        if !network.is_dir() {
            warn!(path = %network_path, "network attachment path unreachable, skipping file sync");
            return Ok(FileSyncReport::noop("network path unreachable"));
        }
        if same_directory(local, network) {
            return Ok(FileSyncReport::noop(
                "network path is the local directory, nothing to sync",
            ));
        }

        let local_names = plain_files(local, &storage.local_path)?;
        let network_names = plain_files(network, network_path)?;

        let mut report = FileSyncReport::default();
        for name in local_names.union(&network_names) {
            let in_local = local_names.contains(name);
            let in_network = network_names.contains(name);
            match (in_local, in_network) {
                (true, true) => {
                    debug!(file = %name, "present on both sides, skipping");
                    report.skipped_conflicts += 1;
                }
                (true, false) => {
                    copy_one(&local.join(name), &network.join(name), network_path)?;
                    report.copied_to_network += 1;
                }
                (false, true) => {
                    copy_one(&network.join(name), &local.join(name), &storage.local_path)?;
                    report.copied_to_local += 1;
                }
                (false, false) => unreachable!("name came from the union"),
            }
        }

        report.message = format!(
            "file sync complete: {} to local, {} to network, {} skipped",
            report.copied_to_local, report.copied_to_network, report.skipped_conflicts
        );
        metrics::record_file_sync(
            report.copied_to_local,
            report.copied_to_network,
            report.skipped_conflicts,
        );
        info!(
            to_local = report.copied_to_local,
            to_network = report.copied_to_network,
            skipped = report.skipped_conflicts,
            "file sync pass finished"
        );
        Ok(report)
    }
}

impl Default for FileReplicator {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether both paths name the same directory once resolved.
fn same_directory(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Names of plain files directly inside `dir`.
fn plain_files(dir: &Path, label: &str) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    let entries = fs::read_dir(dir).map_err(|e| EngineError::storage(label, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| EngineError::storage(label, e))?;
        let is_file = entry
            .file_type()
            .map_err(|e| EngineError::storage(label, e))?
            .is_file();
        if is_file {
            if let Some(name) = entry.file_name().to_str() {
                names.insert(name.to_string());
            }
        }
    }
    Ok(names)
}

fn copy_one(from: &Path, to: &Path, label: &str) -> Result<()> {
    debug!(from = %from.display(), to = %to.display(), "copying attachment");
    fs::copy(from, to).map_err(|e| EngineError::storage(label, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(local: &Path, network: Option<&Path>) -> StorageConfig {
        StorageConfig {
            local_path: local.to_string_lossy().into_owned(),
            network_path: network.map(|p| p.to_string_lossy().into_owned()),
        }
    }

    #[tokio::test]
    async fn test_two_way_convergence() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("local");
        let network = dir.path().join("network");
        fs::create_dir_all(&local).unwrap();
        fs::create_dir_all(&network).unwrap();
        fs::write(local.join("a.png"), b"a").unwrap();
        fs::write(network.join("b.pdf"), b"b").unwrap();

        let report = FileReplicator::new()
            .sync_files(&storage(&local, Some(&network)))
            .await
            .unwrap();
        assert_eq!(report.copied_to_network, 1);
        assert_eq!(report.copied_to_local, 1);
        assert_eq!(report.skipped_conflicts, 0);
        assert!(network.join("a.png").exists());
        assert!(local.join("b.pdf").exists());

        // A second pass sees both names on both sides.
        let report = FileReplicator::new()
            .sync_files(&storage(&local, Some(&network)))
            .await
            .unwrap();
        assert_eq!(report.copied_to_network, 0);
        assert_eq!(report.copied_to_local, 0);
        assert_eq!(report.skipped_conflicts, 2);
    }

    #[tokio::test]
    async fn test_conflicting_contents_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("local");
        let network = dir.path().join("network");
        fs::create_dir_all(&local).unwrap();
        fs::create_dir_all(&network).unwrap();
        fs::write(local.join("report.txt"), b"local version").unwrap();
        fs::write(network.join("report.txt"), b"network version").unwrap();

        let report = FileReplicator::new()
            .sync_files(&storage(&local, Some(&network)))
            .await
            .unwrap();
        assert_eq!(report.skipped_conflicts, 1);
        assert_eq!(fs::read(local.join("report.txt")).unwrap(), b"local version");
        assert_eq!(
            fs::read(network.join("report.txt")).unwrap(),
            b"network version"
        );
    }

    #[tokio::test]
    async fn test_no_network_path_is_noop_but_creates_local() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("local");

        let report = FileReplicator::new()
            .sync_files(&storage(&local, None))
            .await
            .unwrap();
        assert!(local.is_dir());
        assert_eq!(report.message, "no network path configured");
    }

    #[tokio::test]
    async fn test_unreachable_network_path_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("local");
        let gone = dir.path().join("unmounted-share");

        let report = FileReplicator::new()
            .sync_files(&storage(&local, Some(&gone)))
            .await
            .unwrap();
        assert_eq!(report.message, "network path unreachable");
        assert_eq!(report.copied_to_local + report.copied_to_network, 0);
    }

    #[tokio::test]
    async fn test_same_directory_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("shared");
        fs::create_dir_all(&local).unwrap();
        fs::write(local.join("x.txt"), b"x").unwrap();

        let report = FileReplicator::new()
            .sync_files(&storage(&local, Some(&local)))
            .await
            .unwrap();
        assert_eq!(report.skipped_conflicts, 0);
        assert_eq!(report.copied_to_local + report.copied_to_network, 0);
    }

    #[tokio::test]
    async fn test_subdirectories_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("local");
        let network = dir.path().join("network");
        fs::create_dir_all(local.join("nested")).unwrap();
        fs::create_dir_all(&network).unwrap();
        fs::write(local.join("nested").join("deep.txt"), b"d").unwrap();

        let report = FileReplicator::new()
            .sync_files(&storage(&local, Some(&network)))
            .await
            .unwrap();
        assert_eq!(report.copied_to_network, 0);
        assert!(!network.join("nested").exists());
    }
}
