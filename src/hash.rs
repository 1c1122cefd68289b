//! Content hashing and manifest digests
//!
//! Two distinct algorithms by design: the content hash is a fast
//! non-cryptographic hash used as a blob key, while the manifest digest is a
//! cryptographic hash used as the canonical identity of a whole tree.

/// Fast 64-bit content hash, emitted as 16 lowercase hex chars.
pub fn content_hash(bytes: &[u8]) -> String {
	format!("{:016x}", seahash::hash(bytes))
}

/// Streaming variant for sources too large to hold in memory at once.
pub fn content_hash_reader<R: std::io::Read>(mut reader: R) -> std::io::Result<String> {
	let mut hasher = seahash::SeaHasher::new();
	let mut buf = [0u8; 64 * 1024];
	loop {
		let n = reader.read(&mut buf)?;
		if n == 0 {
			break;
		}
		std::hash::Hasher::write(&mut hasher, &buf[..n]);
	}
	Ok(format!("{:016x}", std::hash::Hasher::finish(&hasher)))
}

/// Copies every byte from `reader` to `writer`, hashing it as it passes
/// through. Lets a caller verify content while decompressing it straight to
/// its destination, with no second read of what was just written.
pub fn content_hash_tee<R: std::io::Read, W: std::io::Write>(mut reader: R, mut writer: W) -> std::io::Result<(String, W)> {
	let mut hasher = seahash::SeaHasher::new();
	let mut buf = [0u8; 64 * 1024];
	loop {
		let n = reader.read(&mut buf)?;
		if n == 0 {
			break;
		}
		std::hash::Hasher::write(&mut hasher, &buf[..n]);
		writer.write_all(&buf[..n])?;
	}
	Ok((format!("{:016x}", std::hash::Hasher::finish(&hasher)), writer))
}

/// Cryptographic 256-bit digest over a manifest's canonical serialization.
///
/// Entries are sorted by path before hashing so permutation of the input
/// never changes the result. Each entry contributes `path\tcontent-hash\n`.
pub fn manifest_digest<'a, I, P, H>(entries: I) -> String
where
	I: IntoIterator<Item = (P, H)>,
	P: AsRef<str> + 'a,
	H: AsRef<str> + 'a,
{
	let mut rows: Vec<(String, String)> =
		entries.into_iter().map(|(p, h)| (p.as_ref().to_string(), h.as_ref().to_string())).collect();
	rows.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

	let mut hasher = blake3::Hasher::new();
	for (path, hash) in &rows {
		hasher.update(path.as_bytes());
		hasher.update(b"\t");
		hasher.update(hash.as_bytes());
		hasher.update(b"\n");
	}
	hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn content_hash_is_deterministic() {
		assert_eq!(content_hash(b"hello"), content_hash(b"hello"));
		assert_ne!(content_hash(b"hello"), content_hash(b"world"));
	}

	#[test]
	fn content_hash_empty_is_fixed() {
		assert_eq!(content_hash(b""), content_hash(b""));
		assert_eq!(content_hash(b"").len(), 16);
	}

	#[test]
	fn content_hash_reader_matches_slice() {
		let data = vec![7u8; 200_000];
		assert_eq!(content_hash(&data), content_hash_reader(&data[..]).unwrap());
	}

	#[test]
	fn content_hash_tee_matches_reader_and_copies_bytes() {
		let data = vec![3u8; 150_000];
		let mut out = Vec::new();
		let (hash, _) = content_hash_tee(&data[..], &mut out).unwrap();
		assert_eq!(hash, content_hash(&data));
		assert_eq!(out, data);
	}

	#[test]
	fn manifest_digest_is_permutation_invariant() {
		let a = vec![("b.txt", "h2"), ("a.txt", "h1"), ("c.txt", "h3")];
		let b = vec![("a.txt", "h1"), ("c.txt", "h3"), ("b.txt", "h2")];
		assert_eq!(manifest_digest(a), manifest_digest(b));
	}

	#[test]
	fn manifest_digest_changes_with_content() {
		let a = vec![("a.txt", "h1")];
		let b = vec![("a.txt", "h2")];
		assert_ne!(manifest_digest(a), manifest_digest(b));
	}

	#[test]
	fn manifest_digest_width() {
		let d = manifest_digest(vec![("a.txt", "h1")]);
		assert_eq!(d.len(), 64);
	}
}

// vim: ts=4
