use std::fs::{self, OpenOptions};
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;

use crate::error::SyncError;

/// Filesystem layout for one installation: the per-user cache root holding
/// the identifier cache, and the run-local `errors/` directory holding the
/// append-only failure logs.
#[derive(Debug, Clone)]
pub struct Workspace {
    error_root: Utf8PathBuf,
    cache_root: Utf8PathBuf,
}

impl Workspace {
    pub fn new() -> Result<Self, SyncError> {
        let cwd = std::env::current_dir().map_err(|err| SyncError::Filesystem(err.to_string()))?;
        let error_root = Utf8PathBuf::from_path_buf(cwd.join("errors"))
            .map_err(|_| SyncError::Filesystem("invalid errors path".to_string()))?;

        let cache_root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("cpx-wikidata-sync"))
                    .ok()
            })
            .ok_or_else(|| SyncError::Filesystem("unable to resolve cache directory".to_string()))?;

        Ok(Self {
            error_root,
            cache_root,
        })
    }

    pub fn new_with_paths(error_root: Utf8PathBuf, cache_root: Utf8PathBuf) -> Self {
        Self {
            error_root,
            cache_root,
        }
    }

    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    pub fn identifier_cache_path(&self) -> Utf8PathBuf {
        self.cache_root.join("identifier_cache.json")
    }

    pub fn error_log(&self, name: &str) -> ErrorLog {
        ErrorLog {
            path: self.error_root.join(name),
        }
    }
}

/// Append-only, human-diagnostic log file. One line per failed identifier or
/// record; never machine-replayed.
#[derive(Debug, Clone)]
pub struct ErrorLog {
    path: Utf8PathBuf,
}

impl ErrorLog {
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn append(&self, line: &str) -> Result<(), SyncError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path.as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .map_err(|err| SyncError::Filesystem(err.to_string()))
    }
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), SyncError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(tmp_path.as_std_path(), content)
        .map_err(|err| SyncError::Filesystem(err.to_string()))?;
    fs::rename(tmp_path.as_std_path(), path.as_std_path())
        .map_err(|err| SyncError::Filesystem(err.to_string()))?;
    Ok(())
}
