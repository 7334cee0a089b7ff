use std::path::Path;
use std::time::SystemTime;

use crate::errors::{DepotError, DepotResult};

/// Ensure a directory exists, creating it and any parents if needed.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Copy `src` to `dst`, creating parent directories and carrying over the
/// source's last-modified time.
///
/// Cache consumers compare (length, mtime) to decide whether a copy is stale,
/// so the copy must be indistinguishable from its source on those two axes.
pub fn copy_preserving_mtime(src: &Path, dst: &Path) -> DepotResult<()> {
    if let Some(parent) = dst.parent() {
        ensure_dir(parent).map_err(DepotError::io)?;
    }
    std::fs::copy(src, dst).map_err(DepotError::io)?;
    if let Some(mtime) = mtime(src) {
        let file = std::fs::OpenOptions::new()
            .write(true)
            .open(dst)
            .map_err(DepotError::io)?;
        file.set_modified(mtime).map_err(DepotError::io)?;
    }
    Ok(())
}

/// Last-modified time of a file, or `None` when unavailable.
pub fn mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// File length in bytes, or `None` when the file is absent.
pub fn file_len(path: &Path) -> Option<u64> {
    std::fs::metadata(path).map(|m| m.len()).ok()
}

/// Whether two files agree on (length, mtime).
///
/// Missing files never agree.
pub fn same_len_and_mtime(a: &Path, b: &Path) -> bool {
    match (file_len(a), file_len(b), mtime(a), mtime(b)) {
        (Some(la), Some(lb), Some(ta), Some(tb)) => la == lb && ta == tb,
        _ => false,
    }
}
