//! Tree walk, ignore-aware hashing with a persistent mtime/size cache.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::error::SyncError;
use crate::hash;
use crate::ignore::IgnoreSet;
use crate::logging::*;

const DEFAULT_CONCURRENCY: usize = 10;

/// One file observed by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
	pub path: String,
	pub hash: String,
	pub size: u64,
	pub mtime: i64,
}

/// Aggregate result of a scan.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
	pub entries: Vec<ScanEntry>,
	pub total_size: u64,
	pub file_count: u64,
	pub dir_count: u64,
	pub scanned_at: String,
}

/// Advisory progress callback. Failures are swallowed by the caller.
pub trait ScanProgress: Send + Sync {
	fn on_file(&self, count: u64, path: &str);
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct CacheEntry {
	mtime: i64,
	size: u64,
	hash: String,
}

type Cache = BTreeMap<String, CacheEntry>;

fn cache_path(root: &Path) -> PathBuf {
	root.join(".sync").join("cache.json")
}

fn load_cache(root: &Path) -> Cache {
	let path = cache_path(root);
	match std::fs::read_to_string(&path) {
		Ok(contents) => serde_json::from_str(&contents).unwrap_or_default(),
		Err(_) => Cache::new(),
	}
}

fn save_cache(root: &Path, cache: &Cache) {
	let dir = root.join(".sync");
	if let Err(e) = std::fs::create_dir_all(&dir) {
		warn!("scanner: failed to create {}: {}", dir.display(), e);
		return;
	}
	let path = cache_path(root);
	let tmp = path.with_extension("json.tmp");
	let contents = match serde_json::to_string(cache) {
		Ok(c) => c,
		Err(e) => {
			warn!("scanner: failed to serialize cache: {}", e);
			return;
		}
	};
	if let Err(e) = std::fs::write(&tmp, contents) {
		warn!("scanner: failed to write {}: {}", tmp.display(), e);
		return;
	}
	if let Err(e) = std::fs::rename(&tmp, &path) {
		warn!("scanner: failed to rename cache into place: {}", e);
		let _ = std::fs::remove_file(&tmp);
	}
}

fn to_relative(path: &Path, root: &Path) -> String {
	path.strip_prefix(root).unwrap_or(path).to_string_lossy().replace('\\', "/")
}

/// Walk `root`, hashing every non-ignored regular file with bounded
/// concurrency, reusing cached hashes when mtime and size are unchanged.
pub async fn scan(
	root: &Path,
	concurrency: Option<usize>,
	progress: Option<Arc<dyn ScanProgress>>,
) -> Result<ScanResult, SyncError> {
	let ignore_set = IgnoreSet::for_project(root)?;
	let old_cache = load_cache(root);

	let mut candidates: Vec<(PathBuf, String)> = Vec::new();
	let mut dir_count: u64 = 0;
	walk(root, root, &ignore_set, &mut candidates, &mut dir_count)?;

	let semaphore = Arc::new(Semaphore::new(concurrency.unwrap_or(DEFAULT_CONCURRENCY)));
	let counter = Arc::new(AtomicU64::new(0));
	let old_cache = Arc::new(old_cache);

	let mut tasks = Vec::with_capacity(candidates.len());
	for (abs_path, rel_path) in candidates {
		let semaphore = semaphore.clone();
		let counter = counter.clone();
		let old_cache = old_cache.clone();
		let progress = progress.clone();
		tasks.push(tokio::spawn(async move {
			let _permit = semaphore
				.acquire_owned()
				.await
				.map_err(|e| SyncError::Other { message: format!("scanner: semaphore closed: {}", e) })?;
			hash_one(&abs_path, &rel_path, &old_cache)
				.map(|entry| {
					let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
					if let Some(p) = &progress {
						p.on_file(n, &rel_path);
					}
					entry
				})
		}));
	}

	let mut entries = Vec::new();
	let mut new_cache = Cache::new();
	for task in tasks {
		let result = task.await.map_err(|e| SyncError::Other { message: format!("scan task panicked: {}", e) })?;
		if let Some(entry) = result? {
			new_cache.insert(
				entry.path.clone(),
				CacheEntry { mtime: entry.mtime, size: entry.size, hash: entry.hash.clone() },
			);
			entries.push(entry);
		}
	}

	save_cache(root, &new_cache);

	let total_size = entries.iter().map(|e| e.size).sum();
	let file_count = entries.len() as u64;
	Ok(ScanResult {
		entries,
		total_size,
		file_count,
		dir_count,
		scanned_at: chrono::Utc::now().to_rfc3339(),
	})
}

fn walk(
	root: &Path,
	dir: &Path,
	ignore_set: &IgnoreSet,
	out: &mut Vec<(PathBuf, String)>,
	dir_count: &mut u64,
) -> Result<(), SyncError> {
	let read = match std::fs::read_dir(dir) {
		Ok(r) => r,
		Err(e) => return Err(SyncError::IoFailure(e)),
	};
	for entry in read {
		let entry = entry.map_err(SyncError::IoFailure)?;
		let path = entry.path();
		let rel = to_relative(&path, root);
		let file_type = entry.file_type().map_err(SyncError::IoFailure)?;

		if file_type.is_dir() {
			if ignore_set.ignores_dir(Path::new(&rel)) {
				continue;
			}
			*dir_count += 1;
			walk(root, &path, ignore_set, out, dir_count)?;
		} else if file_type.is_file() {
			if ignore_set.ignores(Path::new(&rel)) {
				continue;
			}
			out.push((path, rel));
		}
	}
	Ok(())
}

fn hash_one(abs_path: &Path, rel_path: &str, old_cache: &Cache) -> Result<Option<ScanEntry>, SyncError> {
	let metadata = match std::fs::metadata(abs_path) {
		Ok(m) => m,
		Err(_) => return Ok(None), // removed between walk and hash; skip
	};
	let size = metadata.len();
	let mtime = mtime_secs(&metadata);

	if let Some(cached) = old_cache.get(rel_path) {
		if cached.mtime == mtime && cached.size == size {
			return Ok(Some(ScanEntry { path: rel_path.to_string(), hash: cached.hash.clone(), size, mtime }));
		}
	}

	let file = std::fs::File::open(abs_path).map_err(SyncError::IoFailure)?;
	let content_hash = hash::content_hash_reader(std::io::BufReader::new(file)).map_err(SyncError::IoFailure)?;
	Ok(Some(ScanEntry { path: rel_path.to_string(), hash: content_hash, size, mtime }))
}

fn mtime_secs(metadata: &std::fs::Metadata) -> i64 {
	metadata
		.modified()
		.ok()
		.and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
		.map(|d| d.as_secs() as i64)
		.unwrap_or(0)
}


// vim: ts=4
