use std::fs;
use std::io::Write;

use camino::Utf8Path;
use tempfile::Builder;

use crate::error::HicbandError;

pub fn ensure_dir(path: &Utf8Path) -> Result<(), HicbandError> {
    fs::create_dir_all(path.as_std_path())
        .map_err(|err| HicbandError::Filesystem(format!("create {path}: {err}")))
}

/// Writes `path` through a temporary file in the same directory that is
/// renamed into place only after `write` succeeds and the data is synced.
/// On any error the temporary file is removed and `path` is left as it was.
pub fn write_atomic<F>(path: &Utf8Path, write: F) -> Result<(), String>
where
    F: FnOnce(&mut fs::File) -> Result<(), String>,
{
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."));
    fs::create_dir_all(parent.as_std_path()).map_err(|err| format!("create {parent}: {err}"))?;

    let mut temp = Builder::new()
        .prefix(".hicband-")
        .suffix(".tmp")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| err.to_string())?;
    write(temp.as_file_mut())?;
    temp.as_file_mut().flush().map_err(|err| err.to_string())?;
    temp.as_file().sync_all().map_err(|err| err.to_string())?;
    temp.persist(path.as_std_path())
        .map_err(|err| err.error.to_string())?;
    Ok(())
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), HicbandError> {
    write_atomic(path, |file| file.write_all(content).map_err(|err| err.to_string()))
        .map_err(|reason| HicbandError::Filesystem(format!("write {path}: {reason}")))
}
