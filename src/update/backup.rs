use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Result, UpdateError};

/// Keeps a copy of the installed executable at `<exec>.backup`.
///
/// The copy is made before anything destructive happens and is left in place
/// after a successful update so the previous version can be restored later.
/// The next update overwrites it.
pub struct BackupManager {
    original_path: PathBuf,
    backup_path: PathBuf,
}

impl BackupManager {
    pub fn new(executable_path: PathBuf) -> Self {
        let backup_path = sibling_path(&executable_path, "backup");
        Self {
            original_path: executable_path,
            backup_path,
        }
    }

    /// Copy the executable's contents and permission bits to the backup path.
    ///
    /// The executable may be the running process image, so it is copied,
    /// never moved.
    pub fn create_backup(&self) -> Result<()> {
        if self.backup_path.exists() {
            debug!("Removing old backup at {}", self.backup_path.display());
            fs::remove_file(&self.backup_path).map_err(|e| {
                UpdateError::io(format!("failed to remove old backup {}", self.backup_path.display()), e)
            })?;
        }

        info!("Creating backup at {}", self.backup_path.display());
        fs::copy(&self.original_path, &self.backup_path).map_err(|e| {
            UpdateError::io(
                format!("failed to back up {}", self.original_path.display()),
                e,
            )
        })?;

        let permissions = fs::metadata(&self.original_path)
            .map_err(|e| UpdateError::io(format!("failed to stat {}", self.original_path.display()), e))?
            .permissions();
        fs::set_permissions(&self.backup_path, permissions).map_err(|e| {
            UpdateError::io(format!("failed to set permissions on {}", self.backup_path.display()), e)
        })?;

        Ok(())
    }

    /// Put the backup back at the executable path.
    ///
    /// The backup is copied to `<exec>.new` and renamed into place, so this
    /// works whether or not the executable is still there. `<exec>.old` is
    /// left alone: after a failed swap it may hold the only other copy.
    pub fn restore_backup(&self) -> Result<()> {
        if !self.backup_exists() {
            return Err(UpdateError::BackupMissing {
                path: self.backup_path.clone(),
            });
        }

        let staged = sibling_path(&self.original_path, "new");
        info!(
            "Restoring {} from {}",
            self.original_path.display(),
            self.backup_path.display()
        );

        // fs::copy carries the permission bits over with the contents
        fs::copy(&self.backup_path, &staged).map_err(|e| {
            UpdateError::io(format!("failed to stage backup at {}", staged.display()), e)
        })?;

        if let Err(source) = fs::rename(&staged, &self.original_path) {
            warn!("Failed to restore {}: {}", self.original_path.display(), source);
            if let Err(e) = fs::remove_file(&staged) {
                debug!("Failed to remove staged backup {}: {}", staged.display(), e);
            }
            return Err(UpdateError::ReplaceFailed {
                target: self.original_path.clone(),
                source,
            });
        }

        Ok(())
    }

    pub fn backup_exists(&self) -> bool {
        self.backup_path.is_file()
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }
}

/// `<path>.<suffix>` in the same directory as `path`
pub(crate) fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}
