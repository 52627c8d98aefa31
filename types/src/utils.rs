//! Small helpers shared by the per-task and registry persistence modules.
//!
//! The write-temp-then-rename idiom here is the same discipline the example
//! pack's daemon lockfiles use for crash-safe state files: never leave a
//! half-written file where a reader could observe it.

use std::io;
use std::path::Path;

/// Serialize `value` to pretty JSON and write it to `path` atomically: write
/// to a sibling `.tmp` file, `fsync`, then `rename` over the target.
///
/// A process crash between the two writes leaves either the old file or the
/// new one in place, never a truncated one.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    atomic_write_bytes(path, &json)
}

/// Write `bytes` to `path` atomically via the same temp-then-rename idiom.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let tmp_path = tmp_path_for(path);
    {
        let mut file = std::fs::File::create(&tmp_path)?;
        use std::io::Write;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> std::path::PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tmp".to_string());
    path.with_file_name(format!(".{file_name}.tmp"))
}

/// Load and parse a JSON file, returning `Ok(None)` if it does not exist yet
/// (first run) rather than an error.
pub fn read_json_if_exists<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> io::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    let value = serde_json::from_str(&content)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}
