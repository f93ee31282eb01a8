//! Content hashing over bytes, files, file sets and structured objects.
//!
//! Both halves of schemaforge derive identity from these digests: the
//! toolchain verifies downloaded artifacts, the result cache fingerprints
//! operation inputs. All digests are SHA-256, hex-encoded.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use crate::{Error, Result};

/// Digest recorded for an input file that does not exist (or cannot be
/// read). Keys must stay computable when inputs are missing so that a
/// lookup can still detect the miss.
pub const ABSENT_FILE_SENTINEL: &str = "absent";

/// SHA-256 of a byte slice, hex-encoded.
#[must_use]
pub fn sha256_hex(bytes: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(bytes.as_ref()))
}

/// SHA-256 of a file's content, streaming in 8 KiB chunks.
pub fn hash_file(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let mut file =
        std::fs::File::open(path).map_err(|e| Error::io(e, path, "open"))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = file
            .read(&mut buffer)
            .map_err(|e| Error::io(e, path, "read"))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Like [`hash_file`], but missing or unreadable files hash to
/// [`ABSENT_FILE_SENTINEL`] instead of erroring.
#[must_use]
pub fn hash_file_or_sentinel(path: impl AsRef<Path>) -> String {
    hash_file(path).unwrap_or_else(|_| ABSENT_FILE_SENTINEL.to_string())
}

/// Hash a set of input files into an ordered path → digest map.
///
/// BTreeMap ordering makes the result canonical regardless of input order.
pub fn hash_file_set<I, P>(paths: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    paths
        .into_iter()
        .map(|p| {
            let p = p.as_ref();
            (
                p.to_string_lossy().into_owned(),
                hash_file_or_sentinel(p),
            )
        })
        .collect()
}

/// Hash a serializable value through its canonical JSON form.
///
/// `serde_json` maps are BTreeMap-backed, so object keys serialize sorted
/// and two structurally equal values always produce the same digest.
pub fn hash_canonical_json<T: serde::Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_value(value)
        .map_err(|e| Error::serialization(format!("Failed to encode value: {e}")))?;
    let bytes = serde_json::to_vec(&json)
        .map_err(|e| Error::serialization(format!("Failed to serialize value: {e}")))?;
    Ok(hex::encode(Sha256::digest(bytes)))
}
