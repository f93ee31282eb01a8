//! Small filesystem helpers shared by the toolchain and the result cache.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::{Error, Result};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique sibling temp path for `path`, usable for write-then-rename.
///
/// Uniqueness combines the process id with a process-local counter so
/// concurrent writers (threads or independent processes) never collide.
#[must_use]
pub fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map_or_else(|| "file".into(), |n| n.to_string_lossy().into_owned());
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    path.with_file_name(format!(".{name}.tmp.{}.{n}", std::process::id()))
}

/// Write `bytes` to `path` atomically: stage to a unique sibling temp file,
/// then rename into place. Readers never observe a partial file.
pub fn write_atomic(path: impl AsRef<Path>, bytes: impl AsRef<[u8]>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::io(e, parent, "create_dir_all"))?;
    }

    let tmp = temp_sibling(path);
    std::fs::write(&tmp, bytes.as_ref()).map_err(|e| Error::io(e, &tmp, "write"))?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        Error::io(e, path, "rename")
    })
}

/// Total size of a file or directory tree in bytes.
pub fn dir_size(path: impl AsRef<Path>) -> Result<u64> {
    let path = path.as_ref();

    if path.is_file() {
        return Ok(std::fs::metadata(path)
            .map_err(|e| Error::io(e, path, "metadata"))?
            .len());
    }

    let mut total = 0u64;
    for entry in std::fs::read_dir(path).map_err(|e| Error::io(e, path, "read_dir"))? {
        let entry = entry.map_err(|e| Error::io(e, path, "read_dir_entry"))?;
        total += dir_size(entry.path())?;
    }
    Ok(total)
}

/// Strip every character outside `[A-Za-z0-9.-]` from a version string.
///
/// Versions become path components; a crafted version like `../../etc` must
/// never escape the cache root.
#[must_use]
pub fn sanitize_version(version: &str) -> String {
    version
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '.' || *c == '-')
        .collect()
}
