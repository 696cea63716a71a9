//! Per-process store files: layout, writer, reader.

pub mod image;
pub mod layout;
pub mod local;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{MetricsError, Result};
use crate::process::ProcessId;

pub use image::StoreImage;
pub use local::LocalMetricStore;

const TEMP_SUFFIX: &str = ".tmp";

/// Store files in `dir`, sorted by owning process.
pub fn list_stores(dir: &Path) -> Result<Vec<(ProcessId, PathBuf)>> {
    scan(dir, ProcessId::parse_file_name)
}

/// Temp siblings (`.{role}_{pid}.db.tmp`) of stores being grown, sorted by
/// owning process. One outlives its writer only if that process died
/// between writing and renaming it.
pub fn list_temp_files(dir: &Path) -> Result<Vec<(ProcessId, PathBuf)>> {
    scan(dir, |name| {
        name.strip_prefix('.')?
            .strip_suffix(TEMP_SUFFIX)
            .and_then(ProcessId::parse_file_name)
    })
}

/// Where a store is rewritten before being renamed over `path`.
pub(crate) fn temp_path(path: &Path) -> Result<PathBuf> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| MetricsError::Internal(format!("bad store path: {}", path.display())))?;
    Ok(path.with_file_name(format!(".{file_name}{TEMP_SUFFIX}")))
}

fn scan(
    dir: &Path,
    parse: impl Fn(&str) -> Option<ProcessId>,
) -> Result<Vec<(ProcessId, PathBuf)>> {
    let entries = fs::read_dir(dir).map_err(|e| {
        MetricsError::StorageUnavailable(format!("cannot list {}: {e}", dir.display()))
    })?;

    let mut out = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(process) = name.to_str().and_then(&parse) else {
            continue;
        };
        out.push((process, entry.path()));
    }
    out.sort();
    Ok(out)
}

/// Delete a store file. Returns `false` if someone else already did.
pub fn remove_store(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::process::Role;

    #[test]
    fn listing_is_sorted_and_skips_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "worker_30.db",
            "api_30.db",
            "beat_7.db",
            ".api_5.db.tmp",
            "api_x.db",
            "notes.txt",
        ] {
            fs::write(dir.path().join(name), b"").unwrap();
        }

        let listed: Vec<_> = list_stores(dir.path())
            .unwrap()
            .into_iter()
            .map(|(p, _)| p)
            .collect();
        assert_eq!(
            listed,
            vec![
                ProcessId::new(7, Role::Beat),
                ProcessId::new(30, Role::Api),
                ProcessId::new(30, Role::Worker),
            ]
        );
    }

    #[test]
    fn temp_files_are_listed_separately() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["api_5.db", ".api_5.db.tmp", ".worker_9.db.tmp", "api_5.db.tmp", ".x.tmp"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }

        let temps = list_temp_files(dir.path()).unwrap();
        assert_eq!(
            temps,
            vec![
                (ProcessId::new(5, Role::Api), dir.path().join(".api_5.db.tmp")),
                (ProcessId::new(9, Role::Worker), dir.path().join(".worker_9.db.tmp")),
            ]
        );
        assert_eq!(
            temp_path(&dir.path().join("api_5.db")).unwrap(),
            dir.path().join(".api_5.db.tmp")
        );
    }

    #[test]
    fn missing_directory_is_storage_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = list_stores(&dir.path().join("nope")).unwrap_err();
        assert_eq!(err.code().as_str(), "STORAGE_UNAVAILABLE");
    }

    #[test]
    fn double_remove_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api_1.db");
        fs::write(&path, b"").unwrap();
        assert!(remove_store(&path).unwrap());
        assert!(!remove_store(&path).unwrap());
    }
}
