//! Store file I/O.
//!
//! A commit serializes the whole staged store into a temp file next to the
//! target, syncs it, then renames it over the target. Readers therefore see
//! either the previous commit or the new one, never a torn file.

use crate::{StoreData, StoreError, STORE_FORMAT_VERSION};
use std::io::Write;
use std::path::Path;

pub(crate) fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Read and version-check a store file.
pub(crate) fn read_store(path: &Path) -> Result<StoreData, StoreError> {
    let text = std::fs::read_to_string(path).map_err(|e| io_error(path, e))?;
    let data: StoreData = serde_json::from_str(&text)?;
    if data.format_version != STORE_FORMAT_VERSION {
        return Err(StoreError::Format {
            found: data.format_version,
            expected: STORE_FORMAT_VERSION,
        });
    }
    Ok(data)
}

/// Atomically replace `path` with `data`.
pub(crate) fn write_store(path: &Path, data: &StoreData) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| io_error(dir, e))?;
    serde_json::to_writer_pretty(&mut tmp, data)?;
    tmp.write_all(b"\n").map_err(|e| io_error(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| io_error(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| io_error(path, e.error))?;
    Ok(())
}
