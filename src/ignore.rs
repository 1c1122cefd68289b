//! gitignore-style path filtering
//!
//! Wraps the `ignore` crate's gitignore matcher with two built-in overlay
//! pattern sets (a minimal default, and an Unreal-Engine overlay applied
//! when the project root contains a `.uproject` file) plus optional
//! `.syncignore` patterns.

use std::path::{Path, PathBuf};

use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::error::SyncError;

const DEFAULT_PATTERNS: &[&str] = &[
	"node_modules/",
	".git/",
	".sync/",
	"**/.DS_Store",
	"**/Thumbs.db",
	"**/desktop.ini",
	"**/*.swp",
	"**/*.swo",
	"**/*~",
	"**/*.tmp",
	"**/*.log",
];

const UNREAL_PATTERNS: &[&str] = &[
	"Binaries/",
	"Intermediate/",
	"DerivedDataCache/",
	"Saved/",
	".vs/",
	".vscode/",
	"*.sln",
];

/// Detect whether `root` is an Unreal Engine project (contains a `.uproject` file).
pub fn is_unreal_project(root: &Path) -> bool {
	std::fs::read_dir(root)
		.map(|entries| {
			entries.filter_map(Result::ok).any(|e| {
				e.file_name().to_str().map(|n| n.ends_with(".uproject")).unwrap_or(false)
			})
		})
		.unwrap_or(false)
}

/// gitignore-syntax path matcher with default + optional Unreal-Engine
/// overlay + optional `.syncignore`.
pub struct IgnoreSet {
	base_path: PathBuf,
	gitignore: Gitignore,
	extra: Option<Gitignore>,
}

impl IgnoreSet {
	/// Build the matcher for a project root, auto-detecting Unreal Engine
	/// projects and picking up `.syncignore` if present.
	pub fn for_project(root: &Path) -> Result<Self, SyncError> {
		let mut patterns: Vec<String> = DEFAULT_PATTERNS.iter().map(|s| s.to_string()).collect();
		if is_unreal_project(root) {
			patterns.extend(UNREAL_PATTERNS.iter().map(|s| s.to_string()));
		}
		let mut set = Self::from_patterns(root, &patterns)?;

		let syncignore = root.join(".syncignore");
		if syncignore.exists() {
			set.add_file(&syncignore)?;
		}

		Ok(set)
	}

	/// Build a matcher from an explicit ordered pattern list (no built-ins).
	pub fn from_patterns(root: &Path, patterns: &[String]) -> Result<Self, SyncError> {
		let mut builder = GitignoreBuilder::new(root);
		for pattern in patterns {
			builder
				.add_line(None, pattern)
				.map_err(|e| SyncError::Other { message: format!("invalid pattern {}: {}", pattern, e) })?;
		}
		let gitignore = builder
			.build()
			.map_err(|e| SyncError::Other { message: format!("failed to build ignore set: {}", e) })?;
		Ok(Self { base_path: root.to_path_buf(), gitignore, extra: None })
	}

	/// Add an ordered list of patterns, layered after the defaults. Rebuilds
	/// the extra pattern set from scratch — `ignore` has no merge API.
	pub fn add(&mut self, patterns: &[String]) -> Result<(), SyncError> {
		let mut builder = GitignoreBuilder::new(&self.base_path);
		for pattern in patterns {
			let pattern = pattern.trim();
			if pattern.is_empty() || pattern.starts_with('#') {
				continue;
			}
			builder
				.add_line(None, pattern)
				.map_err(|e| SyncError::Other { message: format!("invalid pattern {}: {}", pattern, e) })?;
		}
		let extra = builder
			.build()
			.map_err(|e| SyncError::Other { message: format!("failed to build pattern set: {}", e) })?;
		self.extra = Some(extra);
		Ok(())
	}

	fn add_file(&mut self, path: &Path) -> Result<(), SyncError> {
		let contents = std::fs::read_to_string(path)
			.map_err(|e| SyncError::Other { message: format!("failed to read {}: {}", path.display(), e) })?;
		let lines: Vec<String> = contents.lines().map(|l| l.to_string()).collect();
		self.add(&lines)
	}

	/// Whether `path` (relative to the project root) is ignored.
	pub fn ignores(&self, path: &Path) -> bool {
		if self.gitignore.matched(path, false).is_ignore() {
			return true;
		}
		if let Some(extra) = &self.extra {
			if extra.matched(path, false).is_ignore() {
				return true;
			}
		}
		for ancestor in path.ancestors().skip(1) {
			if ancestor == Path::new("") || ancestor == Path::new(".") {
				break;
			}
			if self.gitignore.matched(ancestor, true).is_ignore() {
				return true;
			}
			if let Some(extra) = &self.extra {
				if extra.matched(ancestor, true).is_ignore() {
					return true;
				}
			}
		}
		false
	}

	/// Whether a directory (relative to root) should not be recursed into.
	pub fn ignores_dir(&self, path: &Path) -> bool {
		if self.gitignore.matched(path, true).is_ignore() {
			return true;
		}
		if let Some(extra) = &self.extra {
			if extra.matched(path, true).is_ignore() {
				return true;
			}
		}
		false
	}

	/// Filter a list of paths, keeping only the non-ignored ones.
	pub fn filter<'a>(&self, paths: impl IntoIterator<Item = &'a Path>) -> Vec<&'a Path> {
		paths.into_iter().filter(|p| !self.ignores(p)).collect()
	}
}


// vim: ts=4
