//! Backup and revert of the target file

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors while creating or restoring a backup
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("failed to back up {path}: {source}")]
    CreateFailed { path: PathBuf, source: io::Error },

    #[error("backup restore failed for {path}: {source}")]
    RestoreFailed { path: PathBuf, source: io::Error },

    #[error("backup file not found: {path}")]
    NotFound { path: PathBuf },
}

/// `<target>.bak`, next to the target
pub fn backup_path_for(target: &Path) -> PathBuf {
    let mut name: OsString = target.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

/// Copy `target` to its backup path, replacing any earlier backup
pub fn create_backup(target: &Path) -> Result<PathBuf, BackupError> {
    let backup = backup_path_for(target);
    fs::copy(target, &backup).map_err(|source| BackupError::CreateFailed {
        path: target.to_path_buf(),
        source,
    })?;
    tracing::debug!(target = %target.display(), backup = %backup.display(), "backup written");
    Ok(backup)
}

/// Copy the backup over `target`. The backup itself is kept.
pub fn restore_backup(target: &Path) -> Result<PathBuf, BackupError> {
    let backup = backup_path_for(target);
    if !backup.is_file() {
        return Err(BackupError::NotFound { path: backup });
    }

    fs::copy(&backup, target).map_err(|source| BackupError::RestoreFailed {
        path: target.to_path_buf(),
        source,
    })?;
    tracing::info!(target = %target.display(), "restored from backup");
    Ok(backup)
}
