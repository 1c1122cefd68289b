//! Durable registry of projects, branches, snapshots, file entries, and
//! advisory file locks, persisted as one JSON file on the shared mount.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SyncError;
use crate::logging::*;

pub const DEFAULT_BRANCH: &str = "main";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
	pub id: String,
	pub name: String,
	pub created_at: String,
	pub last_sync_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
	pub project_id: String,
	pub name: String,
	pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
	pub id: String,
	pub project_id: String,
	pub branch: String,
	pub message: String,
	pub created_at: String,
	pub created_by: String,
	pub manifest_hash: String,
	pub file_count: u64,
	pub total_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileEntry {
	pub path: String,
	pub hash: String,
	pub size: u64,
	pub modified_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileLock {
	pub project_id: String,
	pub path: String,
	pub machine_name: String,
	pub locked_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct CatalogData {
	projects: BTreeMap<String, Project>,
	branches: BTreeMap<(String, String), Branch>,
	snapshots: BTreeMap<String, Snapshot>,
	file_entries: BTreeMap<String, Vec<FileEntry>>,
	file_locks: BTreeMap<(String, String), FileLock>,
}

// BTreeMap with tuple keys doesn't serialize cleanly via serde_json (object
// keys must be strings), so the on-disk shape flattens tuple-keyed maps into
// vectors and the in-memory shape keeps them keyed for O(log n) lookups.
#[derive(Serialize, Deserialize, Default)]
struct CatalogWire {
	projects: Vec<Project>,
	branches: Vec<Branch>,
	snapshots: Vec<Snapshot>,
	file_entries: Vec<(String, Vec<FileEntry>)>,
	file_locks: Vec<FileLock>,
}

impl From<&CatalogData> for CatalogWire {
	fn from(data: &CatalogData) -> Self {
		CatalogWire {
			projects: data.projects.values().cloned().collect(),
			branches: data.branches.values().cloned().collect(),
			snapshots: data.snapshots.values().cloned().collect(),
			file_entries: data.file_entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
			file_locks: data.file_locks.values().cloned().collect(),
		}
	}
}

impl From<CatalogWire> for CatalogData {
	fn from(wire: CatalogWire) -> Self {
		let mut data = CatalogData::default();
		for p in wire.projects {
			data.projects.insert(p.id.clone(), p);
		}
		for b in wire.branches {
			data.branches.insert((b.project_id.clone(), b.name.clone()), b);
		}
		for s in wire.snapshots {
			data.snapshots.insert(s.id.clone(), s);
		}
		for (snapshot_id, entries) in wire.file_entries {
			data.file_entries.insert(snapshot_id, entries);
		}
		for l in wire.file_locks {
			data.file_locks.insert((l.project_id.clone(), l.path.clone()), l);
		}
		data
	}
}

/// The catalog: an in-memory image loaded at startup, rewritten whole-file
/// on every logical write operation while the exclusion lock is held.
pub struct Catalog {
	path: PathBuf,
	data: CatalogData,
}

impl Catalog {
	/// Load the catalog from `<mount_root>/sync.db`, or start empty if it
	/// does not yet exist.
	pub fn load(mount_root: &Path) -> Result<Self, SyncError> {
		let path = mount_root.join("sync.db");
		let data = match std::fs::read_to_string(&path) {
			Ok(contents) => {
				let wire: CatalogWire = serde_json::from_str(&contents)?;
				CatalogData::from(wire)
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => CatalogData::default(),
			Err(e) => return Err(SyncError::IoFailure(e)),
		};
		Ok(Self { path, data })
	}

	/// Read-only load tolerant of a torn write: retries once on
	/// deserialization failure (used by `status`, which does not hold the
	/// exclusion lock).
	pub fn load_tolerant(mount_root: &Path) -> Result<Self, SyncError> {
		match Self::load(mount_root) {
			Ok(catalog) => Ok(catalog),
			Err(SyncError::Serialization(_)) => Self::load(mount_root),
			Err(e) => Err(e),
		}
	}

	fn save(&self) -> Result<(), SyncError> {
		use std::io::Write as _;

		let wire = CatalogWire::from(&self.data);
		let contents = serde_json::to_string_pretty(&wire)?;
		let tmp = self.path.with_extension("db.tmp");

		let result = (|| -> Result<(), SyncError> {
			let mut tmp_file = std::fs::File::create(&tmp).map_err(SyncError::IoFailure)?;
			tmp_file.write_all(contents.as_bytes()).map_err(SyncError::IoFailure)?;
			tmp_file.sync_all().map_err(SyncError::IoFailure)?;
			Ok(())
		})();
		if let Err(e) = result {
			let _ = std::fs::remove_file(&tmp);
			return Err(e);
		}

		std::fs::rename(&tmp, &self.path).map_err(|e| {
			let _ = std::fs::remove_file(&tmp);
			SyncError::IoFailure(e)
		})?;
		Ok(())
	}

	pub fn create_project(&mut self, name: &str) -> Result<Project, SyncError> {
		let project = Project {
			id: Uuid::new_v4().to_string(),
			name: name.to_string(),
			created_at: Utc::now().to_rfc3339(),
			last_sync_at: None,
		};
		self.data.projects.insert(project.id.clone(), project.clone());
		self.save()?;
		info!("catalog: created project {} ({})", project.id, project.name);
		Ok(project)
	}

	pub fn delete_project(&mut self, project_id: &str) -> Result<(), SyncError> {
		if self.data.projects.remove(project_id).is_none() {
			return Err(SyncError::NotFound { kind: "project", id: project_id.to_string() });
		}
		self.data.branches.retain(|(pid, _), _| pid != project_id);
		let dead_snapshots: Vec<String> = self
			.data
			.snapshots
			.values()
			.filter(|s| s.project_id == project_id)
			.map(|s| s.id.clone())
			.collect();
		for snapshot_id in &dead_snapshots {
			self.data.snapshots.remove(snapshot_id);
			self.data.file_entries.remove(snapshot_id);
		}
		self.data.file_locks.retain(|(pid, _), _| pid != project_id);
		self.save()?;
		Ok(())
	}

	pub fn update_project_synced(&mut self, project_id: &str) -> Result<(), SyncError> {
		let project = self
			.data
			.projects
			.get_mut(project_id)
			.ok_or_else(|| SyncError::NotFound { kind: "project", id: project_id.to_string() })?;
		project.last_sync_at = Some(Utc::now().to_rfc3339());
		self.save()
	}

	pub fn create_branch(&mut self, project_id: &str, name: &str) -> Result<(), SyncError> {
		let key = (project_id.to_string(), name.to_string());
		self.data.branches.entry(key).or_insert_with(|| Branch {
			project_id: project_id.to_string(),
			name: name.to_string(),
			created_at: Utc::now().to_rfc3339(),
		});
		self.save()
	}

	/// Create a snapshot and its file entries as one atomic logical write.
	pub fn create_snapshot(
		&mut self,
		project_id: &str,
		branch: &str,
		message: &str,
		created_by: &str,
		manifest_hash: String,
		entries: Vec<FileEntry>,
	) -> Result<Snapshot, SyncError> {
		if !self.data.projects.contains_key(project_id) {
			return Err(SyncError::NotFound { kind: "project", id: project_id.to_string() });
		}
		self.create_branch(project_id, branch)?;

		let total_size = entries.iter().map(|e| e.size).sum();
		let snapshot = Snapshot {
			id: Uuid::new_v4().to_string(),
			project_id: project_id.to_string(),
			branch: branch.to_string(),
			message: message.to_string(),
			created_at: Utc::now().to_rfc3339(),
			created_by: created_by.to_string(),
			manifest_hash,
			file_count: entries.len() as u64,
			total_size,
		};

		self.data.file_entries.insert(snapshot.id.clone(), entries);
		self.data.snapshots.insert(snapshot.id.clone(), snapshot.clone());
		self.save()?;
		info!(
			"catalog: created snapshot {} on {}/{} ({} files)",
			snapshot.id, project_id, branch, snapshot.file_count
		);
		Ok(snapshot)
	}

	pub fn delete_snapshot(&mut self, snapshot_id: &str) -> Result<(), SyncError> {
		if self.data.snapshots.remove(snapshot_id).is_none() {
			return Err(SyncError::NotFound { kind: "snapshot", id: snapshot_id.to_string() });
		}
		self.data.file_entries.remove(snapshot_id);
		self.save()
	}

	/// Latest snapshot for (project, branch), newest-first by creation time.
	pub fn latest_snapshot(&self, project_id: &str, branch: &str) -> Option<&Snapshot> {
		self
			.data
			.snapshots
			.values()
			.filter(|s| s.project_id == project_id && s.branch == branch)
			.max_by_key(|s| s.created_at.clone())
	}

	pub fn snapshots_for(
		&self,
		project_id: &str,
		branch: Option<&str>,
		limit: Option<usize>,
	) -> Vec<&Snapshot> {
		let mut snapshots: Vec<&Snapshot> = self
			.data
			.snapshots
			.values()
			.filter(|s| s.project_id == project_id)
			.filter(|s| branch.map(|b| s.branch == b).unwrap_or(true))
			.collect();
		snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
		if let Some(limit) = limit {
			snapshots.truncate(limit);
		}
		snapshots
	}

	pub fn entries_of(&self, snapshot_id: &str) -> Result<&[FileEntry], SyncError> {
		self
			.data
			.file_entries
			.get(snapshot_id)
			.map(|v| v.as_slice())
			.ok_or_else(|| SyncError::NotFound { kind: "snapshot", id: snapshot_id.to_string() })
	}

	pub fn snapshot(&self, snapshot_id: &str) -> Result<&Snapshot, SyncError> {
		self
			.data
			.snapshots
			.get(snapshot_id)
			.ok_or_else(|| SyncError::NotFound { kind: "snapshot", id: snapshot_id.to_string() })
	}

	/// All content hashes referenced by any file entry in any snapshot.
	pub fn live_hashes(&self) -> HashSet<String> {
		self.data.file_entries.values().flatten().map(|e| e.hash.clone()).collect()
	}

	/// Succeeds iff no row exists for (project, path).
	pub fn acquire_file_lock(&mut self, project_id: &str, path: &str, machine: &str) -> Result<bool, SyncError> {
		let key = (project_id.to_string(), path.to_string());
		if self.data.file_locks.contains_key(&key) {
			return Ok(false);
		}
		self.data.file_locks.insert(
			key,
			FileLock {
				project_id: project_id.to_string(),
				path: path.to_string(),
				machine_name: machine.to_string(),
				locked_at: Utc::now().to_rfc3339(),
			},
		);
		self.save()?;
		Ok(true)
	}

	/// Succeeds iff no row exists, or the row's machine equals `machine`.
	pub fn release_file_lock(&mut self, project_id: &str, path: &str, machine: &str) -> Result<bool, SyncError> {
		let key = (project_id.to_string(), path.to_string());
		match self.data.file_locks.get(&key) {
			None => Ok(true),
			Some(lock) if lock.machine_name == machine => {
				self.data.file_locks.remove(&key);
				self.save()?;
				Ok(true)
			}
			Some(_) => Ok(false),
		}
	}

	pub fn file_locks_for(&self, project_id: &str) -> Vec<&FileLock> {
		self.data.file_locks.values().filter(|l| l.project_id == project_id).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn loads_empty_when_missing() {
		let dir = TempDir::new().unwrap();
		let catalog = Catalog::load(dir.path()).unwrap();
		assert!(catalog.latest_snapshot("anything", DEFAULT_BRANCH).is_none());
	}

	#[test]
	fn project_and_snapshot_round_trip_through_disk() {
		let dir = TempDir::new().unwrap();
		let project_id = {
			let mut catalog = Catalog::load(dir.path()).unwrap();
			let project = catalog.create_project("demo").unwrap();
			catalog
				.create_snapshot(
					&project.id,
					DEFAULT_BRANCH,
					"init",
					"workstation-a",
					"deadbeef".to_string(),
					vec![FileEntry { path: "a.txt".to_string(), hash: "h1".to_string(), size: 5, modified_at: 1 }],
				)
				.unwrap();
			project.id
		};

		let catalog = Catalog::load(dir.path()).unwrap();
		let snapshot = catalog.latest_snapshot(&project_id, DEFAULT_BRANCH).unwrap();
		assert_eq!(snapshot.file_count, 1);
		assert_eq!(catalog.entries_of(&snapshot.id).unwrap().len(), 1);
	}

	#[test]
	fn delete_project_cascades() {
		let dir = TempDir::new().unwrap();
		let mut catalog = Catalog::load(dir.path()).unwrap();
		let project = catalog.create_project("demo").unwrap();
		let snapshot = catalog
			.create_snapshot(&project.id, DEFAULT_BRANCH, "init", "a", "h".to_string(), vec![])
			.unwrap();

		catalog.delete_project(&project.id).unwrap();
		assert!(catalog.snapshot(&snapshot.id).is_err());
		assert!(catalog.entries_of(&snapshot.id).is_err());
	}

	#[test]
	fn file_lock_acquire_release_semantics() {
		let dir = TempDir::new().unwrap();
		let mut catalog = Catalog::load(dir.path()).unwrap();
		let project = catalog.create_project("demo").unwrap();

		assert!(catalog.acquire_file_lock(&project.id, "a.txt", "machine-a").unwrap());
		assert!(!catalog.acquire_file_lock(&project.id, "a.txt", "machine-b").unwrap());

		// machine-b cannot release machine-a's lock.
		assert!(!catalog.release_file_lock(&project.id, "a.txt", "machine-b").unwrap());
		assert!(catalog.release_file_lock(&project.id, "a.txt", "machine-a").unwrap());
		assert!(catalog.acquire_file_lock(&project.id, "a.txt", "machine-b").unwrap());
	}

	#[test]
	fn live_hashes_spans_all_snapshots() {
		let dir = TempDir::new().unwrap();
		let mut catalog = Catalog::load(dir.path()).unwrap();
		let project = catalog.create_project("demo").unwrap();
		catalog
			.create_snapshot(
				&project.id,
				DEFAULT_BRANCH,
				"a",
				"m",
				"h".to_string(),
				vec![FileEntry { path: "a.txt".to_string(), hash: "h1".to_string(), size: 1, modified_at: 1 }],
			)
			.unwrap();
		catalog
			.create_snapshot(
				&project.id,
				DEFAULT_BRANCH,
				"b",
				"m",
				"h2".to_string(),
				vec![FileEntry { path: "b.txt".to_string(), hash: "h2".to_string(), size: 1, modified_at: 2 }],
			)
			.unwrap();

		let live = catalog.live_hashes();
		assert!(live.contains("h1"));
		assert!(live.contains("h2"));
	}
}

// vim: ts=4
