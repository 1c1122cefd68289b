//! Error types for the sync engine

use std::error::Error;
use std::fmt;
use std::io;

use crate::diff::Conflict;

/// Unified error type returned by engine operations.
///
/// One variant per error kind the engine distinguishes; `ConflictsPending`
/// is not a failure so much as a non-success outcome carrying its payload.
#[derive(Debug)]
pub enum SyncError {
	/// Exclusion lock is held by another peer.
	LockBusy { holder: String, operation: String },

	/// An info file exists but the advisory subsystem reports unlocked.
	LockStale,

	/// Engine invoked before the shared mount is bound to a configuration.
	NotConfigured { message: String },

	/// A project or snapshot id has no row.
	NotFound { kind: &'static str, id: String },

	/// A blob read back did not match its requested key.
	IntegrityFailure { hash: String },

	/// Underlying filesystem error during scan/transfer/catalog save.
	IoFailure(io::Error),

	/// Pull found conflicts and was not given resolutions.
	ConflictsPending { conflicts: Vec<Conflict> },

	/// Catalog or cache JSON failed to (de)serialize.
	Serialization(serde_json::Error),

	/// Catch-all for conditions with no dedicated variant.
	Other { message: String },
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncError::LockBusy { holder, operation } => {
				write!(f, "sync lock is held by {} (operation: {})", holder, operation)
			}
			SyncError::LockStale => write!(f, "lock info is stale"),
			SyncError::NotConfigured { message } => write!(f, "not configured: {}", message),
			SyncError::NotFound { kind, id } => write!(f, "{} not found: {}", kind, id),
			SyncError::IntegrityFailure { hash } => {
				write!(f, "blob failed integrity check: {}", hash)
			}
			SyncError::IoFailure(e) => write!(f, "I/O error: {}", e),
			SyncError::ConflictsPending { conflicts } => {
				write!(f, "{} conflict(s) pending resolution", conflicts.len())
			}
			SyncError::Serialization(e) => write!(f, "serialization error: {}", e),
			SyncError::Other { message } => write!(f, "{}", message),
		}
	}
}

impl Error for SyncError {}

impl From<io::Error> for SyncError {
	fn from(e: io::Error) -> Self {
		SyncError::IoFailure(e)
	}
}

impl From<serde_json::Error> for SyncError {
	fn from(e: serde_json::Error) -> Self {
		SyncError::Serialization(e)
	}
}

impl From<String> for SyncError {
	fn from(e: String) -> Self {
		SyncError::Other { message: e }
	}
}

// vim: ts=4
