//! Atomic file replacement

use std::fs::File;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::Result;

/// Replace `path` with the content produced by `fill`
///
/// The new content is written to a temporary file in the same directory,
/// takes over the permissions of the file it replaces and is renamed over
/// it. If `fill` fails the original is left untouched.
pub fn replace_file<T>(path: &Path, fill: impl FnOnce(&mut File, &Path) -> Result<T>) -> Result<T> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut tmp = NamedTempFile::new_in(dir)?;
    let tmp_path = tmp.path().to_path_buf();
    let value = fill(tmp.as_file_mut(), &tmp_path)?;
    tmp.as_file_mut().flush()?;

    if let Ok(metadata) = std::fs::metadata(path) {
        std::fs::set_permissions(&tmp_path, metadata.permissions())?;
    }

    tmp.persist(path).map_err(|e| e.error)?;
    Ok(value)
}

/// Replace `path` with `bytes`
pub fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    replace_file(path, |file, _| {
        file.write_all(bytes)?;
        Ok(())
    })
}
