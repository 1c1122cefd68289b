//! Per-peer configuration
//!
//! Loaded from a JSON file outside the shared mount. Resolution is explicit
//! and fails closed: a missing or malformed file is reported before any
//! engine operation runs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// One managed project entry in the per-peer config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
	pub local_path: PathBuf,
}

/// Per-peer configuration: `{nas_path, machine_name, projects}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
	/// Root of the shared mount.
	pub nas_path: PathBuf,

	/// This peer's identity, surfaced in snapshots and lock info.
	#[serde(default = "Config::default_machine_name")]
	pub machine_name: String,

	/// Project id -> per-peer mapping.
	#[serde(default)]
	pub projects: BTreeMap<String, ProjectConfig>,
}

impl Config {
	fn default_machine_name() -> String {
		hostname::get()
			.ok()
			.and_then(|h| h.into_string().ok())
			.unwrap_or_else(|| "unknown-host".to_string())
	}

	/// Load configuration from a JSON file. Missing or malformed files are
	/// reported as `NotConfigured`, not silently defaulted.
	pub fn load(path: &Path) -> Result<Self, SyncError> {
		let contents = std::fs::read_to_string(path).map_err(|e| SyncError::NotConfigured {
			message: format!("cannot read config at {}: {}", path.display(), e),
		})?;
		let mut config: Config = serde_json::from_str(&contents).map_err(|e| {
			SyncError::NotConfigured { message: format!("invalid config at {}: {}", path.display(), e) }
		})?;
		if config.machine_name.trim().is_empty() {
			config.machine_name = Self::default_machine_name();
		}
		Ok(config)
	}

	/// Default config file path: `~/.syncr/config.json`.
	pub fn default_path() -> Result<PathBuf, SyncError> {
		let home = std::env::var("HOME")
			.map_err(|_| SyncError::NotConfigured { message: "HOME is not set".to_string() })?;
		Ok(PathBuf::from(home).join(".syncr").join("config.json"))
	}

	/// Resolve a project id to its per-peer local path.
	pub fn project_path(&self, project_id: &str) -> Result<&Path, SyncError> {
		self
			.projects
			.get(project_id)
			.map(|p| p.local_path.as_path())
			.ok_or_else(|| SyncError::NotFound { kind: "project", id: project_id.to_string() })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;
	use tempfile::NamedTempFile;

	#[test]
	fn load_valid_config() {
		let mut file = NamedTempFile::new().unwrap();
		write!(
			file,
			r#"{{"nas_path": "/mnt/nas", "machine_name": "workstation-a", "projects": {{"p1": {{"local_path": "/home/u/p1"}}}}}}"#
		)
		.unwrap();

		let config = Config::load(file.path()).unwrap();
		assert_eq!(config.machine_name, "workstation-a");
		assert_eq!(config.project_path("p1").unwrap(), Path::new("/home/u/p1"));
	}

	#[test]
	fn missing_machine_name_defaults_to_hostname() {
		let mut file = NamedTempFile::new().unwrap();
		write!(file, r#"{{"nas_path": "/mnt/nas"}}"#).unwrap();

		let config = Config::load(file.path()).unwrap();
		assert!(!config.machine_name.is_empty());
	}

	#[test]
	fn missing_file_is_not_configured() {
		let result = Config::load(Path::new("/nonexistent/config.json"));
		assert!(matches!(result, Err(SyncError::NotConfigured { .. })));
	}

	#[test]
	fn malformed_json_is_not_configured() {
		let mut file = NamedTempFile::new().unwrap();
		write!(file, "not json").unwrap();

		let result = Config::load(file.path());
		assert!(matches!(result, Err(SyncError::NotConfigured { .. })));
	}

	#[test]
	fn unknown_project_is_not_found() {
		let mut file = NamedTempFile::new().unwrap();
		write!(file, r#"{{"nas_path": "/mnt/nas"}}"#).unwrap();

		let config = Config::load(file.path()).unwrap();
		assert!(matches!(config.project_path("missing"), Err(SyncError::NotFound { .. })));
	}
}

// vim: ts=4
