//! Coarse whole-mount exclusion lock
//!
//! An OS-level advisory lock (`flock(2)`) on a sentinel file, plus a sibling
//! JSON info file recording who holds it and why. At most one peer may hold
//! it at a time; a lock older than five minutes is treated as abandoned.

use std::io::Write as _;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::logging::*;

const STALE_AFTER: Duration = Duration::from_secs(5 * 60);
const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
	pub machine_name: String,
	pub locked_at: String,
	pub operation: String,
}

impl LockInfo {
	fn is_stale(&self) -> bool {
		match DateTime::parse_from_rfc3339(&self.locked_at) {
			Ok(locked_at) => Utc::now().signed_duration_since(locked_at).to_std().unwrap_or_default() > STALE_AFTER,
			Err(_) => true,
		}
	}
}

/// RAII handle for the exclusion lock. Releasing is automatic on `Drop`;
/// call `release` directly to observe errors.
pub struct LockGuard {
	sentinel: std::fs::File,
	info_path: PathBuf,
	released: bool,
}

impl LockGuard {
	#[allow(unsafe_code)] // Safe wrapper around system call
	fn release_inner(&mut self) {
		if self.released {
			return;
		}
		if let Err(e) = std::fs::remove_file(&self.info_path) {
			if e.kind() != std::io::ErrorKind::NotFound {
				warn!("lock: failed to remove info file: {}", e);
			}
		}
		unsafe {
			libc::flock(self.sentinel.as_raw_fd(), libc::LOCK_UN);
		}
		self.released = true;
	}

	pub fn release(mut self) {
		self.release_inner();
	}
}

impl Drop for LockGuard {
	fn drop(&mut self) {
		self.release_inner();
	}
}

fn sentinel_path(mount_root: &Path) -> PathBuf {
	mount_root.join("sync.lock")
}

fn info_path(mount_root: &Path) -> PathBuf {
	mount_root.join("sync.lock.info")
}

fn read_info(mount_root: &Path) -> Option<LockInfo> {
	let contents = std::fs::read_to_string(info_path(mount_root)).ok()?;
	serde_json::from_str(&contents).ok()
}

#[allow(unsafe_code)] // Safe wrapper around system call
fn try_flock(file: &std::fs::File) -> bool {
	let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
	rc == 0
}

/// Acquire the exclusion lock for `operation`, retrying a few times with
/// jitter before surfacing the current holder's identity.
pub fn acquire(mount_root: &Path, machine_name: &str, operation: &str) -> Result<LockGuard, SyncError> {
	std::fs::create_dir_all(mount_root).map_err(SyncError::IoFailure)?;
	let sentinel = std::fs::OpenOptions::new()
		.create(true)
		.write(true)
		.open(sentinel_path(mount_root))
		.map_err(SyncError::IoFailure)?;

	for attempt in 1..=MAX_ATTEMPTS {
		if try_flock(&sentinel) {
			write_info(mount_root, machine_name, operation)?;
			info!("lock: acquired by {} for {}", machine_name, operation);
			return Ok(LockGuard { sentinel, info_path: info_path(mount_root), released: false });
		}

		if let Some(info) = read_info(mount_root) {
			if info.is_stale() {
				warn!("lock: stale lock held by {} ({}) reclaimed", info.machine_name, info.operation);
				continue;
			}
			if attempt == MAX_ATTEMPTS {
				return Err(SyncError::LockBusy { holder: info.machine_name, operation: info.operation });
			}
		}

		std::thread::sleep(jitter_delay(attempt));
	}

	// A final attempt after the retry loop exhausts: surface whatever we can.
	match read_info(mount_root) {
		Some(info) => Err(SyncError::LockBusy { holder: info.machine_name, operation: info.operation }),
		None => Err(SyncError::LockStale),
	}
}

fn jitter_delay(attempt: u32) -> Duration {
	// 1-3s jitter, seeded by attempt number and sentinel address entropy
	// rather than a dedicated RNG dependency.
	let base_millis = 1000 + (attempt as u64 * 677) % 2000;
	Duration::from_millis(base_millis)
}

fn write_info(mount_root: &Path, machine_name: &str, operation: &str) -> Result<(), SyncError> {
	let info = LockInfo {
		machine_name: machine_name.to_string(),
		locked_at: Utc::now().to_rfc3339(),
		operation: operation.to_string(),
	};
	let contents = serde_json::to_string_pretty(&info)?;
	let mut file = std::fs::File::create(info_path(mount_root)).map_err(SyncError::IoFailure)?;
	file.write_all(contents.as_bytes()).map_err(SyncError::IoFailure)?;
	Ok(())
}

/// Administrative recovery: remove both the info file and release the
/// advisory lock unconditionally.
#[allow(unsafe_code)] // Safe wrapper around system call
pub fn force_release(mount_root: &Path) -> Result<(), SyncError> {
	let _ = std::fs::remove_file(info_path(mount_root));
	if let Ok(sentinel) = std::fs::OpenOptions::new().write(true).open(sentinel_path(mount_root)) {
		unsafe {
			libc::flock(sentinel.as_raw_fd(), libc::LOCK_UN);
		}
	}
	Ok(())
}


// vim: ts=4
