//! Content-addressed object store
//!
//! Layout under the store root: `objects/<aa>/<hash>` holds one gzip-framed
//! (or raw, auto-detected) blob; `temp/` is staging for in-flight puts.

use std::collections::HashSet;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::SyncError;
use crate::hash;
use crate::logging::*;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Outcome of a prune pass.
#[derive(Debug, Clone, Default)]
pub struct PruneResult {
	pub removed_count: u64,
	pub freed_bytes: u64,
}

/// A content-addressed blob repository rooted at `root`.
pub struct ObjectStore {
	root: PathBuf,
}

impl ObjectStore {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	fn objects_dir(&self) -> PathBuf {
		self.root.join("objects")
	}

	fn temp_dir(&self) -> PathBuf {
		self.root.join("temp")
	}

	fn blob_path(&self, content_hash: &str) -> PathBuf {
		let prefix = &content_hash[..2.min(content_hash.len())];
		self.objects_dir().join(prefix).join(content_hash)
	}

	/// Hash `source`, and if the blob is not already stored, gzip-stream it
	/// into place via a temp-file-then-rename. Returns the content hash.
	pub fn put(&self, source: &Path) -> Result<String, SyncError> {
		let source_size = std::fs::metadata(source).map(|m| m.len()).unwrap_or(0);

		let hash_file = std::fs::File::open(source).map_err(SyncError::IoFailure)?;
		let content_hash =
			hash::content_hash_reader(std::io::BufReader::new(hash_file)).map_err(SyncError::IoFailure)?;

		let dest = self.blob_path(&content_hash);
		if dest.exists() {
			debug!("store: blob {} already present, skipping put", content_hash);
			return Ok(content_hash);
		}

		std::fs::create_dir_all(self.temp_dir()).map_err(SyncError::IoFailure)?;
		std::fs::create_dir_all(dest.parent().expect("blob path has parent")).map_err(SyncError::IoFailure)?;

		let nonce = uuid::Uuid::new_v4();
		let tmp = self.temp_dir().join(format!("{}.{}.tmp", content_hash, nonce));

		let result = (|| -> Result<(), SyncError> {
			let source_file = std::fs::File::open(source).map_err(SyncError::IoFailure)?;
			let mut reader = std::io::BufReader::new(source_file);
			let tmp_file = std::fs::File::create(&tmp).map_err(SyncError::IoFailure)?;
			let mut encoder = GzEncoder::new(tmp_file, Compression::default());
			std::io::copy(&mut reader, &mut encoder).map_err(SyncError::IoFailure)?;
			let tmp_file = encoder.finish().map_err(SyncError::IoFailure)?;
			tmp_file.sync_all().map_err(SyncError::IoFailure)?;
			Ok(())
		})();

		match result {
			Ok(()) => match std::fs::rename(&tmp, &dest) {
				Ok(()) => {
					debug!("store: put blob {} ({} bytes logical)", content_hash, source_size);
					Ok(content_hash)
				}
				Err(e) => {
					let _ = std::fs::remove_file(&tmp);
					Err(SyncError::IoFailure(e))
				}
			},
			Err(e) => {
				let _ = std::fs::remove_file(&tmp);
				Err(e)
			}
		}
	}

	/// Fetch a blob by hash to `destination`, auto-detecting gzip framing and
	/// verifying the result rehashes to the requested key while it is
	/// written, with no second read of the destination.
	pub fn get(&self, content_hash: &str, destination: &Path) -> Result<(), SyncError> {
		let blob_path = self.blob_path(content_hash);
		let blob_file = std::fs::File::open(&blob_path).map_err(SyncError::IoFailure)?;
		let mut reader = std::io::BufReader::new(blob_file);

		let is_gzip = {
			let peeked = reader.fill_buf().map_err(SyncError::IoFailure)?;
			peeked.len() >= 2 && peeked[0..2] == GZIP_MAGIC
		};

		if let Some(parent) = destination.parent() {
			std::fs::create_dir_all(parent).map_err(SyncError::IoFailure)?;
		}
		let dest_file = std::fs::File::create(destination).map_err(SyncError::IoFailure)?;
		let writer = std::io::BufWriter::new(dest_file);

		let actual = if is_gzip {
			let decoder = GzDecoder::new(reader);
			let (hash, mut writer) = hash::content_hash_tee(decoder, writer).map_err(SyncError::IoFailure)?;
			writer.flush().map_err(SyncError::IoFailure)?;
			hash
		} else {
			let (hash, mut writer) = hash::content_hash_tee(reader, writer).map_err(SyncError::IoFailure)?;
			writer.flush().map_err(SyncError::IoFailure)?;
			hash
		};

		if actual != content_hash {
			let _ = std::fs::remove_file(destination);
			return Err(SyncError::IntegrityFailure { hash: content_hash.to_string() });
		}
		Ok(())
	}

	/// Whether a blob for `content_hash` is present.
	pub fn exists(&self, content_hash: &str) -> bool {
		self.blob_path(content_hash).exists()
	}

	/// On-disk (compressed) size of a blob, distinct from the manifest's
	/// logical size — the two are never reconciled (SPEC_FULL §9).
	pub fn size(&self, content_hash: &str) -> Option<u64> {
		std::fs::metadata(self.blob_path(content_hash)).ok().map(|m| m.len())
	}

	/// Unlink one blob. Returns false on any error rather than propagating.
	pub fn delete(&self, content_hash: &str) -> bool {
		std::fs::remove_file(self.blob_path(content_hash)).is_ok()
	}

	/// Remove every blob not in `live_hashes`, then empty now-unused prefix
	/// directories and the temp staging area.
	pub fn prune(&self, live_hashes: &HashSet<String>) -> Result<PruneResult, SyncError> {
		let mut result = PruneResult::default();
		let objects_dir = self.objects_dir();
		if !objects_dir.exists() {
			return Ok(result);
		}

		for prefix_entry in std::fs::read_dir(&objects_dir).map_err(SyncError::IoFailure)? {
			let prefix_entry = prefix_entry.map_err(SyncError::IoFailure)?;
			let prefix_path = prefix_entry.path();
			if !prefix_path.is_dir() {
				continue;
			}

			for blob_entry in std::fs::read_dir(&prefix_path).map_err(SyncError::IoFailure)? {
				let blob_entry = blob_entry.map_err(SyncError::IoFailure)?;
				let name = blob_entry.file_name().to_string_lossy().to_string();
				if live_hashes.contains(&name) {
					continue;
				}
				if let Ok(metadata) = blob_entry.metadata() {
					result.freed_bytes += metadata.len();
				}
				if std::fs::remove_file(blob_entry.path()).is_ok() {
					result.removed_count += 1;
				}
			}

			// Best-effort: remove the prefix dir if it's now empty.
			let _ = std::fs::remove_dir(&prefix_path);
		}

		if self.temp_dir().exists() {
			for entry in std::fs::read_dir(self.temp_dir()).map_err(SyncError::IoFailure)? {
				if let Ok(entry) = entry {
					let _ = std::fs::remove_file(entry.path());
				}
			}
		}

		info!("store: pruned {} blobs, freed {} bytes", result.removed_count, result.freed_bytes);
		Ok(result)
	}
}


// vim: ts=4
