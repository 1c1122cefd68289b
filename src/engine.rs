//! Top-level facade: push, pull, restore, status, gc.
//!
//! Each mutating operation acquires the exclusion lock for its entire
//! duration; `status` does not and tolerates a torn catalog read.

use std::path::Path;
use std::sync::Arc;

use crate::catalog::{Catalog, DEFAULT_BRANCH};
use crate::config::Config;
use crate::diff::{self, Conflict, Diff, ManifestEntry, Resolution, TransferProgress};
use crate::error::SyncError;
use crate::lock;
use crate::logging::*;
use crate::scanner::{self, ScanProgress};
use crate::store::ObjectStore;

// ObjectStore roots itself at `nas_path` and lays out `objects/` and `temp/`
// beneath that.
fn store_at(config: &Config) -> ObjectStore {
	ObjectStore::new(config.nas_path.clone())
}

/// Outcome of `push`.
#[derive(Debug, Clone, Default)]
pub struct PushResult {
	pub success: bool,
	pub files_added: u64,
	pub files_modified: u64,
	pub files_deleted: u64,
	pub bytes_transferred: u64,
	pub snapshot_id: Option<String>,
}

/// Outcome of `pull`.
#[derive(Debug, Clone, Default)]
pub struct PullResult {
	pub success: bool,
	pub files_downloaded: u64,
	pub files_deleted: u64,
	pub bytes_transferred: u64,
	pub conflicts: Vec<Conflict>,
}

/// Outcome of `restore`.
#[derive(Debug, Clone, Default)]
pub struct RestoreResult {
	pub success: bool,
	pub files_downloaded: u64,
	pub files_deleted: u64,
	pub bytes_transferred: u64,
}

/// Outcome of `status` — a pure read, no mutation.
#[derive(Debug, Clone, Default)]
pub struct StatusResult {
	pub added: Vec<ManifestEntry>,
	pub modified: Vec<ManifestEntry>,
	pub deleted: Vec<ManifestEntry>,
	pub unchanged_count: u64,
}

/// Outcome of `gc`.
#[derive(Debug, Clone, Default)]
pub struct GcResult {
	pub success: bool,
	pub blobs_removed: u64,
	pub bytes_freed: u64,
}

fn local_manifest(entries: &[crate::scanner::ScanEntry]) -> Vec<ManifestEntry> {
	entries.iter().map(ManifestEntry::from).collect()
}

fn remote_manifest(catalog: &Catalog, snapshot_id: &str) -> Result<Vec<ManifestEntry>, SyncError> {
	Ok(catalog.entries_of(snapshot_id)?.iter().map(ManifestEntry::from).collect())
}

/// Scan, diff against the latest snapshot on `branch`, upload changed blobs,
/// and record a new snapshot. Returns a no-op result with no new snapshot if
/// nothing changed and a snapshot already exists.
pub async fn push(
	config: &Config,
	project_id: &str,
	message: &str,
	branch: Option<&str>,
	scan_progress: Option<Arc<dyn ScanProgress>>,
	transfer_progress: Option<Arc<dyn TransferProgress>>,
) -> Result<PushResult, SyncError> {
	let branch = branch.unwrap_or(DEFAULT_BRANCH);
	let local_path = config.project_path(project_id)?.to_path_buf();
	let _guard = lock::acquire(&config.nas_path, &config.machine_name, "push")?;

	let mut catalog = Catalog::load(&config.nas_path)?;
	let store = store_at(config);

	let scan_result = scanner::scan(&local_path, None, scan_progress).await?;
	let local = local_manifest(&scan_result.entries);

	let remote = match catalog.latest_snapshot(project_id, branch) {
		Some(snapshot) => remote_manifest(&catalog, &snapshot.id)?,
		None => Vec::new(),
	};

	let d = diff::diff(&local, &remote);
	info!(
		"engine: push diff for {}/{}: +{} ~{} -{}",
		project_id,
		branch,
		d.added.len(),
		d.modified.len(),
		d.deleted.len()
	);

	let to_upload: Vec<ManifestEntry> = d.added.iter().chain(d.modified.iter()).cloned().collect();
	let bytes_transferred = if to_upload.is_empty() {
		0
	} else {
		diff::upload(Arc::new(store), &local_path, &to_upload, None, transfer_progress).await?
	};

	if d.added.is_empty() && d.modified.is_empty() && d.deleted.is_empty() {
		return Ok(PushResult { success: true, ..Default::default() });
	}

	let manifest_hash = crate::hash::manifest_digest(local.iter().map(|e| (e.path.as_str(), e.hash.as_str())));
	let entries = local
		.iter()
		.map(|e| crate::catalog::FileEntry { path: e.path.clone(), hash: e.hash.clone(), size: e.size, modified_at: e.mtime })
		.collect();

	let snapshot = catalog.create_snapshot(project_id, branch, message, &config.machine_name, manifest_hash, entries)?;
	catalog.update_project_synced(project_id)?;

	Ok(PushResult {
		success: true,
		files_added: d.added.len() as u64,
		files_modified: d.modified.len() as u64,
		files_deleted: d.deleted.len() as u64,
		bytes_transferred,
		snapshot_id: Some(snapshot.id),
	})
}

/// Scan, diff against the latest snapshot, detect conflicts, and — if none
/// are pending or all have resolutions — download/delete to match remote.
pub async fn pull(
	config: &Config,
	project_id: &str,
	branch: Option<&str>,
	resolutions: &std::collections::HashMap<String, Resolution>,
	include_patterns: &[String],
	scan_progress: Option<Arc<dyn ScanProgress>>,
	transfer_progress: Option<Arc<dyn TransferProgress>>,
) -> Result<PullResult, SyncError> {
	let branch = branch.unwrap_or(DEFAULT_BRANCH);
	let local_path = config.project_path(project_id)?.to_path_buf();
	let _guard = lock::acquire(&config.nas_path, &config.machine_name, "pull")?;

	let catalog = Catalog::load(&config.nas_path)?;
	let store = store_at(config);

	let snapshot = catalog
		.latest_snapshot(project_id, branch)
		.ok_or_else(|| SyncError::NotFound { kind: "snapshot", id: format!("{}/{}", project_id, branch) })?;
	let remote = remote_manifest(&catalog, &snapshot.id)?;

	let scan_result = scanner::scan(&local_path, None, scan_progress).await?;
	let local = local_manifest(&scan_result.entries);

	let conflicts = diff::detect_conflicts(&local, &remote);
	let unresolved: Vec<Conflict> = conflicts.into_iter().filter(|c| !resolutions.contains_key(&c.path)).collect();
	if !unresolved.is_empty() {
		warn!("engine: pull found {} unresolved conflict(s)", unresolved.len());
		return Ok(PullResult { success: false, conflicts: unresolved, ..Default::default() });
	}

	for (path, resolution) in resolutions {
		if *resolution == Resolution::KeepLocal {
			continue;
		}
		if *resolution == Resolution::KeepBoth {
			diff::rename_as_local_copy(&local_path, path)?;
		}
	}

	let d = diff::diff(&local, &remote);
	let d = diff::apply_selective_filter(&d, include_patterns, &local_path)?;

	let to_download: Vec<ManifestEntry> = d
		.deleted
		.iter()
		.chain(d.modified.iter())
		.filter(|e| resolutions.get(&e.path).map(|r| *r != Resolution::KeepLocal).unwrap_or(true))
		.cloned()
		.collect();

	let bytes_transferred = if to_download.is_empty() {
		0
	} else {
		diff::download(Arc::new(store), &local_path, &to_download, None, transfer_progress).await?
	};

	let to_delete: Vec<ManifestEntry> = d.added.clone();
	let files_deleted = diff::delete_local(&local_path, &to_delete)?;

	Ok(PullResult {
		success: true,
		files_downloaded: to_download.len() as u64,
		files_deleted,
		bytes_transferred,
		conflicts: Vec::new(),
	})
}

/// Overwrite the local tree to exactly match `snapshot_id`, no conflict
/// check — the caller has opted into overwrite.
pub async fn restore(
	config: &Config,
	project_id: &str,
	snapshot_id: &str,
	include_patterns: &[String],
	scan_progress: Option<Arc<dyn ScanProgress>>,
	transfer_progress: Option<Arc<dyn TransferProgress>>,
) -> Result<RestoreResult, SyncError> {
	let local_path = config.project_path(project_id)?.to_path_buf();
	let _guard = lock::acquire(&config.nas_path, &config.machine_name, "restore")?;

	let catalog = Catalog::load(&config.nas_path)?;
	let store = store_at(config);
	catalog.snapshot(snapshot_id)?;
	let remote = remote_manifest(&catalog, snapshot_id)?;

	let scan_result = scanner::scan(&local_path, None, scan_progress).await?;
	let local = local_manifest(&scan_result.entries);

	let d = diff::diff(&local, &remote);
	let d = diff::apply_selective_filter(&d, include_patterns, &local_path)?;

	let to_download: Vec<ManifestEntry> = d.deleted.iter().chain(d.modified.iter()).cloned().collect();
	let bytes_transferred = if to_download.is_empty() {
		0
	} else {
		diff::download(Arc::new(store), &local_path, &to_download, None, transfer_progress).await?
	};

	let files_deleted = diff::delete_local(&local_path, &d.added)?;

	Ok(RestoreResult { success: true, files_downloaded: to_download.len() as u64, files_deleted, bytes_transferred })
}

/// Pure read: scan and diff against the latest snapshot without holding the
/// exclusion lock. Tolerates a torn catalog read.
pub async fn status(config: &Config, project_id: &str, branch: Option<&str>) -> Result<StatusResult, SyncError> {
	let branch = branch.unwrap_or(DEFAULT_BRANCH);
	let local_path = config.project_path(project_id)?.to_path_buf();

	let catalog = Catalog::load_tolerant(&config.nas_path)?;
	let remote = match catalog.latest_snapshot(project_id, branch) {
		Some(snapshot) => remote_manifest(&catalog, &snapshot.id)?,
		None => Vec::new(),
	};

	let scan_result = scanner::scan(&local_path, None, None).await?;
	let local = local_manifest(&scan_result.entries);
	let d: Diff = diff::diff(&local, &remote);

	Ok(StatusResult {
		added: d.added,
		modified: d.modified,
		deleted: d.deleted,
		unchanged_count: d.unchanged.len() as u64,
	})
}

/// Remove every blob not referenced by any current catalog row.
pub async fn gc(config: &Config) -> Result<GcResult, SyncError> {
	let _guard = lock::acquire(&config.nas_path, &config.machine_name, "gc")?;

	let catalog = Catalog::load(&config.nas_path)?;
	let store = store_at(config);
	let live = catalog.live_hashes();

	let prune_result = tokio::task::spawn_blocking(move || store.prune(&live))
		.await
		.map_err(|e| SyncError::Other { message: format!("gc task panicked: {}", e) })??;

	Ok(GcResult { success: true, blobs_removed: prune_result.removed_count, bytes_freed: prune_result.freed_bytes })
}

/// Read-only convenience wrapping the catalog's snapshot query surface.
pub fn log(config: &Config, project_id: &str, branch: Option<&str>, limit: Option<usize>) -> Result<Vec<crate::catalog::Snapshot>, SyncError> {
	let catalog = Catalog::load_tolerant(&config.nas_path)?;
	Ok(catalog.snapshots_for(project_id, branch, limit).into_iter().cloned().collect())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::BTreeMap;
	use tempfile::TempDir;

	fn test_config(nas: &Path, local: &Path, machine: &str, project_id: &str) -> Config {
		let mut projects = BTreeMap::new();
		projects.insert(project_id.to_string(), crate::config::ProjectConfig { local_path: local.to_path_buf() });
		Config { nas_path: nas.to_path_buf(), machine_name: machine.to_string(), projects }
	}

	#[tokio::test]
	async fn push_then_pull_produces_matching_manifests() {
		let nas = TempDir::new().unwrap();
		let a_local = TempDir::new().unwrap();
		let b_local = TempDir::new().unwrap();

		std::fs::write(a_local.path().join("a.txt"), b"hello").unwrap();
		std::fs::create_dir(a_local.path().join("dir")).unwrap();
		std::fs::write(a_local.path().join("dir/b.bin"), vec![7u8; 1024]).unwrap();

		let mut catalog = Catalog::load(nas.path()).unwrap();
		let project = catalog.create_project("demo").unwrap();
		drop(catalog);

		let config_a = test_config(nas.path(), a_local.path(), "peer-a", &project.id);
		let push_result = push(&config_a, &project.id, "init", None, None, None).await.unwrap();
		assert!(push_result.success);
		assert_eq!(push_result.files_added, 2);

		let config_b = test_config(nas.path(), b_local.path(), "peer-b", &project.id);
		let pull_result =
			pull(&config_b, &project.id, None, &std::collections::HashMap::new(), &[], None, None).await.unwrap();
		assert!(pull_result.success);
		assert_eq!(pull_result.files_downloaded, 2);
		assert_eq!(std::fs::read(b_local.path().join("a.txt")).unwrap(), b"hello");
	}

	#[tokio::test]
	async fn pull_with_unresolved_conflict_does_no_io() {
		let nas = TempDir::new().unwrap();
		let a_local = TempDir::new().unwrap();
		let b_local = TempDir::new().unwrap();

		std::fs::write(a_local.path().join("a.txt"), b"from A").unwrap();

		let mut catalog = Catalog::load(nas.path()).unwrap();
		let project = catalog.create_project("demo").unwrap();
		drop(catalog);

		let config_a = test_config(nas.path(), a_local.path(), "peer-a", &project.id);
		push(&config_a, &project.id, "init", None, None, None).await.unwrap();

		std::fs::write(b_local.path().join("a.txt"), b"from B").unwrap();
		filetime::set_file_mtime(b_local.path().join("a.txt"), filetime::FileTime::from_unix_time(i64::MAX / 2, 0))
			.unwrap();

		let config_b = test_config(nas.path(), b_local.path(), "peer-b", &project.id);
		let result = pull(&config_b, &project.id, None, &std::collections::HashMap::new(), &[], None, None).await.unwrap();
		assert!(!result.success);
		assert_eq!(result.conflicts.len(), 1);
		assert_eq!(std::fs::read(b_local.path().join("a.txt")).unwrap(), b"from B");
	}

	#[tokio::test]
	async fn status_does_not_require_lock_held_by_another() {
		let nas = TempDir::new().unwrap();
		let local = TempDir::new().unwrap();
		std::fs::write(local.path().join("a.txt"), b"hello").unwrap();

		let mut catalog = Catalog::load(nas.path()).unwrap();
		let project = catalog.create_project("demo").unwrap();
		drop(catalog);

		let config = test_config(nas.path(), local.path(), "peer-a", &project.id);
		let result = status(&config, &project.id, None).await.unwrap();
		assert_eq!(result.added.len(), 1);
	}

	#[tokio::test]
	async fn gc_removes_blobs_only_for_deleted_snapshot() {
		let nas = TempDir::new().unwrap();
		let local = TempDir::new().unwrap();
		std::fs::write(local.path().join("keep.txt"), b"keep").unwrap();
		std::fs::write(local.path().join("drop.txt"), b"drop").unwrap();

		let mut catalog = Catalog::load(nas.path()).unwrap();
		let project = catalog.create_project("demo").unwrap();
		drop(catalog);

		let config = test_config(nas.path(), local.path(), "peer-a", &project.id);
		let first = push(&config, &project.id, "first", None, None, None).await.unwrap();

		std::fs::remove_file(local.path().join("drop.txt")).unwrap();
		push(&config, &project.id, "second", None, None, None).await.unwrap();

		let mut catalog = Catalog::load(nas.path()).unwrap();
		catalog.delete_snapshot(&first.snapshot_id.unwrap()).unwrap();
		drop(catalog);

		let result = gc(&config).await.unwrap();
		assert_eq!(result.blobs_removed, 1);
	}
}

// vim: ts=4
