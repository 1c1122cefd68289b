//! Manifest comparison, conflict detection, and parallel transfer.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::catalog::FileEntry;
use crate::error::SyncError;
use crate::ignore::IgnoreSet;
use crate::logging::*;
use crate::scanner::ScanEntry;
use crate::store::ObjectStore;
use crate::validation::path as path_validation;

const DEFAULT_TRANSFER_CONCURRENCY: usize = 20;

/// Join `rel_path` onto `root`, rejecting anything that could escape it.
/// Manifest entries come from the shared catalog, which another peer could
/// have written with a path containing `..` or an absolute prefix.
fn safe_join(root: &Path, rel_path: &str) -> Result<std::path::PathBuf, SyncError> {
	let rel = Path::new(rel_path);
	path_validation::validate_path_relative(rel).map_err(|e| SyncError::Other { message: e.to_string() })?;
	path_validation::validate_path_safe(rel).map_err(|e| SyncError::Other { message: e.to_string() })?;
	Ok(root.join(rel))
}

/// One manifest entry, independent of whether it came from a scan or a
/// catalog snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
	pub path: String,
	pub hash: String,
	pub size: u64,
	pub mtime: i64,
}

impl From<&ScanEntry> for ManifestEntry {
	fn from(e: &ScanEntry) -> Self {
		ManifestEntry { path: e.path.clone(), hash: e.hash.clone(), size: e.size, mtime: e.mtime }
	}
}

impl From<&FileEntry> for ManifestEntry {
	fn from(e: &FileEntry) -> Self {
		ManifestEntry { path: e.path.clone(), hash: e.hash.clone(), size: e.size, mtime: e.modified_at }
	}
}

/// Result of comparing a local manifest `L` against a remote manifest `R`.
#[derive(Debug, Clone, Default)]
pub struct Diff {
	pub added: Vec<ManifestEntry>,
	pub modified: Vec<ManifestEntry>,
	pub deleted: Vec<ManifestEntry>,
	pub unchanged: Vec<ManifestEntry>,
}

/// Compute added/modified/deleted/unchanged between local and remote manifests.
pub fn diff(local: &[ManifestEntry], remote: &[ManifestEntry]) -> Diff {
	let remote_by_path: HashMap<&str, &ManifestEntry> = remote.iter().map(|e| (e.path.as_str(), e)).collect();
	let local_by_path: HashMap<&str, &ManifestEntry> = local.iter().map(|e| (e.path.as_str(), e)).collect();

	let mut result = Diff::default();

	for entry in local {
		match remote_by_path.get(entry.path.as_str()) {
			None => result.added.push(entry.clone()),
			Some(remote_entry) if remote_entry.hash != entry.hash => result.modified.push(entry.clone()),
			Some(_) => result.unchanged.push(entry.clone()),
		}
	}

	for entry in remote {
		if !local_by_path.contains_key(entry.path.as_str()) {
			result.deleted.push(entry.clone());
		}
	}

	result
}

/// A path where local content diverges from remote and the local mtime is
/// strictly newer — surfaced as a batch, never auto-resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
	pub path: String,
	pub local_hash: String,
	pub remote_hash: String,
}

/// Caller-supplied resolution for one conflicting path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
	KeepLocal,
	KeepRemote,
	KeepBoth,
}

/// Detect conflicts during pull: local mtime strictly greater than remote
/// mtime means a conflict; ties and local-older cases resolve to "remote
/// wins" silently (SPEC_FULL §9, Open Question 2 — preserved, not reconciled).
pub fn detect_conflicts(local: &[ManifestEntry], remote: &[ManifestEntry]) -> Vec<Conflict> {
	let remote_by_path: HashMap<&str, &ManifestEntry> = remote.iter().map(|e| (e.path.as_str(), e)).collect();

	local
		.iter()
		.filter_map(|entry| {
			let remote_entry = remote_by_path.get(entry.path.as_str())?;
			if remote_entry.hash == entry.hash {
				return None;
			}
			if entry.mtime > remote_entry.mtime {
				Some(Conflict { path: entry.path.clone(), local_hash: entry.hash.clone(), remote_hash: remote_entry.hash.clone() })
			} else {
				None
			}
		})
		.collect()
}

/// Restrict a diff to paths matching at least one selective-sync
/// include-pattern. Non-matching paths are skipped entirely: they are
/// neither downloaded nor considered for deletion.
pub fn apply_selective_filter(diff: &Diff, include_patterns: &[String], root: &Path) -> Result<Diff, SyncError> {
	if include_patterns.is_empty() {
		return Ok(diff.clone());
	}
	// `include_patterns` is gitignore syntax describing what to KEEP, so a
	// path "matched" by the built set is one to include, not exclude.
	let include_set = IgnoreSet::from_patterns(root, include_patterns)?;
	let matches = |path: &str| include_set.ignores(Path::new(path));

	Ok(Diff {
		added: diff.added.iter().filter(|e| matches(&e.path)).cloned().collect(),
		modified: diff.modified.iter().filter(|e| matches(&e.path)).cloned().collect(),
		deleted: diff.deleted.iter().filter(|e| matches(&e.path)).cloned().collect(),
		unchanged: diff.unchanged.iter().filter(|e| matches(&e.path)).cloned().collect(),
	})
}

/// Aggregate transfer progress. Per-file granularity inside workers is
/// suppressed; only completion updates the total (SPEC_FULL §4.7).
pub trait TransferProgress: Send + Sync {
	fn on_bytes(&self, total_bytes: u64);
}

/// Upload `entries` from `root` into `store`, deduping against existing
/// blobs, bounded by `concurrency`. The first failure aborts further task
/// spawning; in-flight tasks complete.
pub async fn upload(
	store: Arc<ObjectStore>,
	root: &Path,
	entries: &[ManifestEntry],
	concurrency: Option<usize>,
	progress: Option<Arc<dyn TransferProgress>>,
) -> Result<u64, SyncError> {
	let semaphore = Arc::new(Semaphore::new(concurrency.unwrap_or(DEFAULT_TRANSFER_CONCURRENCY)));
	let bytes_done = Arc::new(AtomicU64::new(0));

	let tasks = entries.iter().map(|entry| {
		let store = store.clone();
		let semaphore = semaphore.clone();
		let bytes_done = bytes_done.clone();
		let progress = progress.clone();
		let abs_path = safe_join(root, &entry.path);
		let size = entry.size;
		async move {
			let abs_path = abs_path?;
			let _permit = semaphore
				.acquire_owned()
				.await
				.map_err(|e| SyncError::Other { message: format!("upload: semaphore closed: {}", e) })?;
			tokio::task::spawn_blocking(move || store.put(&abs_path))
				.await
				.map_err(|e| SyncError::Other { message: format!("upload task panicked: {}", e) })??;
			let total = bytes_done.fetch_add(size, Ordering::Relaxed) + size;
			if let Some(p) = &progress {
				p.on_bytes(total);
			}
			Ok::<(), SyncError>(())
		}
	});

	try_join_all(tasks).await?;
	Ok(bytes_done.load(Ordering::Relaxed))
}

/// Download `entries` from `store` into `root`, bounded by `concurrency`.
pub async fn download(
	store: Arc<ObjectStore>,
	root: &Path,
	entries: &[ManifestEntry],
	concurrency: Option<usize>,
	progress: Option<Arc<dyn TransferProgress>>,
) -> Result<u64, SyncError> {
	let semaphore = Arc::new(Semaphore::new(concurrency.unwrap_or(DEFAULT_TRANSFER_CONCURRENCY)));
	let bytes_done = Arc::new(AtomicU64::new(0));

	let tasks = entries.iter().map(|entry| {
		let store = store.clone();
		let semaphore = semaphore.clone();
		let bytes_done = bytes_done.clone();
		let progress = progress.clone();
		let dest = safe_join(root, &entry.path);
		let hash = entry.hash.clone();
		let size = entry.size;
		async move {
			let dest = dest?;
			let _permit = semaphore
				.acquire_owned()
				.await
				.map_err(|e| SyncError::Other { message: format!("download: semaphore closed: {}", e) })?;
			tokio::task::spawn_blocking(move || store.get(&hash, &dest))
				.await
				.map_err(|e| SyncError::Other { message: format!("download task panicked: {}", e) })??;
			let total = bytes_done.fetch_add(size, Ordering::Relaxed) + size;
			if let Some(p) = &progress {
				p.on_bytes(total);
			}
			Ok::<(), SyncError>(())
		}
	});

	try_join_all(tasks).await?;
	debug!("diff: downloaded {} entries", entries.len());
	Ok(bytes_done.load(Ordering::Relaxed))
}

/// Delete local files absent from the target manifest.
pub fn delete_local(root: &Path, entries: &[ManifestEntry]) -> Result<u64, SyncError> {
	let mut count = 0;
	for entry in entries {
		let path = safe_join(root, &entry.path)?;
		match std::fs::remove_file(&path) {
			Ok(()) => count += 1,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
			Err(e) => return Err(SyncError::IoFailure(e)),
		}
	}
	Ok(count)
}

/// Rename `<root>/<stem>.<ext>` to `<root>/<stem>.local.<ext>`, used by the
/// `keep_both` conflict resolution before fetching the remote version.
pub fn rename_as_local_copy(root: &Path, rel_path: &str) -> Result<String, SyncError> {
	let path = Path::new(rel_path);
	let stem = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
	let ext = path.extension().map(|e| e.to_string_lossy().to_string());
	let parent = path.parent().unwrap_or(Path::new(""));

	let new_name = match ext {
		Some(ext) => format!("{}.local.{}", stem, ext),
		None => format!("{}.local", stem),
	};
	let new_rel = parent.join(&new_name).to_string_lossy().replace('\\', "/");

	let src = safe_join(root, rel_path)?;
	let dest = safe_join(root, &new_rel)?;
	std::fs::rename(src, dest).map_err(SyncError::IoFailure)?;
	Ok(new_rel)
}


// vim: ts=4
