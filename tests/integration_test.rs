//! End-to-end scenarios against a real temporary shared-mount directory and
//! two simulated per-peer local paths.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use tempfile::TempDir;

use syncr::catalog::Catalog;
use syncr::config::{Config, ProjectConfig};
use syncr::diff::Resolution;
use syncr::engine;

fn peer_config(nas: &Path, local: &Path, machine: &str, project_id: &str) -> Config {
	let mut projects = BTreeMap::new();
	projects.insert(project_id.to_string(), ProjectConfig { local_path: local.to_path_buf() });
	Config { nas_path: nas.to_path_buf(), machine_name: machine.to_string(), projects }
}

#[tokio::test]
async fn initial_push_creates_one_snapshot_with_two_blobs() {
	let nas = TempDir::new().unwrap();
	let a_local = TempDir::new().unwrap();

	std::fs::write(a_local.path().join("a.txt"), b"hello").unwrap();
	std::fs::create_dir(a_local.path().join("dir")).unwrap();
	let big: Vec<u8> = (0..1024u32).map(|n| (n % 251) as u8).collect();
	std::fs::write(a_local.path().join("dir/b.bin"), &big).unwrap();

	let mut catalog = Catalog::load(nas.path()).unwrap();
	let project = catalog.create_project("demo").unwrap();
	drop(catalog);

	let config = peer_config(nas.path(), a_local.path(), "peer-a", &project.id);
	let result = engine::push(&config, &project.id, "init", None, None, None).await.unwrap();

	assert!(result.success);
	assert_eq!(result.files_added, 2);
	assert_eq!(result.files_modified, 0);
	assert_eq!(result.files_deleted, 0);

	let catalog = Catalog::load(nas.path()).unwrap();
	let snapshot = catalog.latest_snapshot(&project.id, "main").unwrap();
	assert_eq!(snapshot.file_count, 2);
}

#[tokio::test]
async fn pull_after_push_matches_remote_manifest_exactly() {
	let nas = TempDir::new().unwrap();
	let a_local = TempDir::new().unwrap();
	let b_local = TempDir::new().unwrap();

	std::fs::write(a_local.path().join("a.txt"), b"hello").unwrap();
	std::fs::create_dir(a_local.path().join("dir")).unwrap();
	std::fs::write(a_local.path().join("dir/b.bin"), vec![9u8; 4096]).unwrap();

	let mut catalog = Catalog::load(nas.path()).unwrap();
	let project = catalog.create_project("demo").unwrap();
	drop(catalog);

	let config_a = peer_config(nas.path(), a_local.path(), "peer-a", &project.id);
	engine::push(&config_a, &project.id, "init", None, None, None).await.unwrap();

	let config_b = peer_config(nas.path(), b_local.path(), "peer-b", &project.id);
	let pull_result = engine::pull(&config_b, &project.id, None, &HashMap::new(), &[], None, None).await.unwrap();
	assert!(pull_result.success);
	assert_eq!(pull_result.files_downloaded, 2);

	let status_a = engine::status(&config_a, &project.id, None).await.unwrap();
	let status_b = engine::status(&config_b, &project.id, None).await.unwrap();
	assert_eq!(status_a.added.len(), 0);
	assert_eq!(status_b.added.len(), 0);
	assert_eq!(std::fs::read(b_local.path().join("dir/b.bin")).unwrap().len(), 4096);
}

#[tokio::test]
async fn conflicting_edit_surfaces_as_batch_then_keep_both_resolves() {
	let nas = TempDir::new().unwrap();
	let a_local = TempDir::new().unwrap();
	let b_local = TempDir::new().unwrap();

	std::fs::write(a_local.path().join("a.txt"), b"original").unwrap();

	let mut catalog = Catalog::load(nas.path()).unwrap();
	let project = catalog.create_project("demo").unwrap();
	drop(catalog);

	let config_a = peer_config(nas.path(), a_local.path(), "peer-a", &project.id);
	engine::push(&config_a, &project.id, "init", None, None, None).await.unwrap();

	std::fs::write(b_local.path().join("a.txt"), b"from B").unwrap();
	filetime::set_file_mtime(b_local.path().join("a.txt"), filetime::FileTime::from_unix_time(i64::MAX / 2, 0)).unwrap();

	std::fs::write(a_local.path().join("a.txt"), b"from A").unwrap();
	engine::push(&config_a, &project.id, "a edits", None, None, None).await.unwrap();

	let config_b = peer_config(nas.path(), b_local.path(), "peer-b", &project.id);
	let first_attempt = engine::pull(&config_b, &project.id, None, &HashMap::new(), &[], None, None).await.unwrap();
	assert!(!first_attempt.success);
	assert_eq!(first_attempt.conflicts.len(), 1);
	assert_eq!(first_attempt.conflicts[0].path, "a.txt");
	assert_eq!(std::fs::read(b_local.path().join("a.txt")).unwrap(), b"from B");

	let mut resolutions = HashMap::new();
	resolutions.insert("a.txt".to_string(), Resolution::KeepBoth);
	let second_attempt = engine::pull(&config_b, &project.id, None, &resolutions, &[], None, None).await.unwrap();
	assert!(second_attempt.success);
	assert_eq!(std::fs::read(b_local.path().join("a.local.txt")).unwrap(), b"from B");
	assert_eq!(std::fs::read(b_local.path().join("a.txt")).unwrap(), b"from A");
}

#[tokio::test]
async fn selective_pull_downloads_only_matching_paths() {
	let nas = TempDir::new().unwrap();
	let a_local = TempDir::new().unwrap();
	let b_local = TempDir::new().unwrap();

	std::fs::create_dir_all(a_local.path().join("Content")).unwrap();
	std::fs::create_dir_all(a_local.path().join("Source")).unwrap();
	std::fs::create_dir_all(a_local.path().join("Saved")).unwrap();
	std::fs::write(a_local.path().join("Content/x.uasset"), b"asset").unwrap();
	std::fs::write(a_local.path().join("Source/y.cpp"), b"code").unwrap();
	std::fs::write(a_local.path().join("Saved/z.log"), b"log").unwrap();

	let mut catalog = Catalog::load(nas.path()).unwrap();
	let project = catalog.create_project("unreal-demo").unwrap();
	drop(catalog);

	let config_a = peer_config(nas.path(), a_local.path(), "peer-a", &project.id);
	engine::push(&config_a, &project.id, "init", None, None, None).await.unwrap();

	std::fs::create_dir_all(b_local.path().join("Other")).unwrap();
	std::fs::write(b_local.path().join("Other/k.txt"), b"untouched").unwrap();

	let config_b = peer_config(nas.path(), b_local.path(), "peer-b", &project.id);
	let include = vec!["Content/**".to_string()];
	let result = engine::pull(&config_b, &project.id, None, &HashMap::new(), &include, None, None).await.unwrap();

	assert!(result.success);
	assert!(b_local.path().join("Content/x.uasset").exists());
	assert!(!b_local.path().join("Source/y.cpp").exists());
	assert!(!b_local.path().join("Saved/z.log").exists());
	assert!(b_local.path().join("Other/k.txt").exists());
}

#[tokio::test]
async fn gc_reclaims_blobs_only_from_deleted_snapshots() {
	let nas = TempDir::new().unwrap();
	let local = TempDir::new().unwrap();

	std::fs::write(local.path().join("keep.txt"), b"keep").unwrap();
	std::fs::write(local.path().join("drop.bin"), vec![3u8; 2048]).unwrap();

	let mut catalog = Catalog::load(nas.path()).unwrap();
	let project = catalog.create_project("demo").unwrap();
	drop(catalog);

	let config = peer_config(nas.path(), local.path(), "peer-a", &project.id);
	let first = engine::push(&config, &project.id, "first", None, None, None).await.unwrap();

	std::fs::remove_file(local.path().join("drop.bin")).unwrap();
	engine::push(&config, &project.id, "second", None, None, None).await.unwrap();

	let mut catalog = Catalog::load(nas.path()).unwrap();
	catalog.delete_snapshot(&first.snapshot_id.unwrap()).unwrap();
	drop(catalog);

	let gc_result = engine::gc(&config).await.unwrap();
	assert_eq!(gc_result.blobs_removed, 1);

	let status = engine::status(&config, &project.id, None).await.unwrap();
	assert_eq!(status.added.len(), 0);
}

#[tokio::test]
async fn crash_recovery_reclaims_stale_lock_after_six_minutes() {
	let nas = TempDir::new().unwrap();
	let local = TempDir::new().unwrap();
	std::fs::write(local.path().join("a.txt"), b"hello").unwrap();

	let mut catalog = Catalog::load(nas.path()).unwrap();
	let project = catalog.create_project("demo").unwrap();
	drop(catalog);

	let config = peer_config(nas.path(), local.path(), "peer-a", &project.id);

	// A real crash releases the advisory flock at the OS level when the
	// holder's process exits; only the sentinel and a stale info file are
	// left behind, exactly as the spec's own simulation describes.
	std::fs::write(config.nas_path.join("sync.lock"), b"").unwrap();
	let info_path = config.nas_path.join("sync.lock.info");
	let stale_info = syncr::lock::LockInfo {
		machine_name: "peer-a".to_string(),
		locked_at: (chrono::Utc::now() - chrono::Duration::minutes(6)).to_rfc3339(),
		operation: "push".to_string(),
	};
	std::fs::write(&info_path, serde_json::to_string(&stale_info).unwrap()).unwrap();

	let result = engine::push(&config, &project.id, "recovered", None, None, None).await.unwrap();
	assert!(result.success);
}
