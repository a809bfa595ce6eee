use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, error, info, warn};

use super::backup::sibling_path;
use super::platform::Platform;
use crate::error::{Result, UpdateError};

/// Platform-specific swap sequence, chosen once from the configured platform.
///
/// Both variants stage the new binary at `<target>.new`, move the current one
/// aside to `<target>.old`, rename the staged file into place and move `.old`
/// back if that rename fails. They differ in what happens to `.old`
/// afterwards: Unix can unlink it while the old process keeps running from
/// its open inode, Windows usually keeps it locked until the process exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceStrategy {
    Unix,
    Windows,
}

impl ReplaceStrategy {
    pub fn for_platform(platform: &str) -> Self {
        match Platform::from_token(platform) {
            Some(Platform::Windows) => Self::Windows,
            _ => Self::Unix,
        }
    }
}

/// Rename primitive used for the swap
pub trait Rename: Send + Sync {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
}

pub struct FsRename;

impl Rename for FsRename {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }
}

pub struct AtomicReplacer {
    strategy: ReplaceStrategy,
    renamer: Box<dyn Rename>,
}

impl AtomicReplacer {
    pub fn new(strategy: ReplaceStrategy) -> Self {
        Self {
            strategy,
            renamer: Box::new(FsRename),
        }
    }

    pub fn with_renamer(mut self, renamer: impl Rename + 'static) -> Self {
        self.renamer = Box::new(renamer);
        self
    }

    pub fn strategy(&self) -> ReplaceStrategy {
        self.strategy
    }

    /// Install `new_binary` at `target`, restoring the previous file if the
    /// final rename fails
    pub fn replace(&self, new_binary: &Path, target: &Path) -> Result<()> {
        let staged = sibling_path(target, "new");
        let old = sibling_path(target, "old");

        self.sweep_stale(&old);

        // Staging next to the target keeps the renames on one filesystem
        fs::copy(new_binary, &staged).map_err(|e| {
            UpdateError::io(format!("failed to stage binary at {}", staged.display()), e)
        })?;

        let result = self.swap(&staged, target, &old);

        if staged.exists() {
            if let Err(e) = fs::remove_file(&staged) {
                debug!("Failed to remove staged binary {}: {}", staged.display(), e);
            }
        }

        result
    }

    fn swap(&self, staged: &Path, target: &Path, old: &Path) -> Result<()> {
        self.renamer
            .rename(target, old)
            .map_err(|source| UpdateError::ReplaceFailed {
                target: target.to_path_buf(),
                source,
            })?;

        if let Err(err) = self.renamer.rename(staged, target) {
            warn!("Failed to install new binary at {}: {}", target.display(), err);

            return match self.renamer.rename(old, target) {
                Ok(()) => {
                    info!("Restored previous binary at {}", target.display());
                    Err(UpdateError::ReplaceFailed {
                        target: target.to_path_buf(),
                        source: err,
                    })
                }
                Err(restore_error) => {
                    error!(
                        "Failed to restore previous binary from {}: {}",
                        old.display(),
                        restore_error
                    );
                    Err(UpdateError::RollbackFailed {
                        target: target.to_path_buf(),
                        old_path: old.to_path_buf(),
                        restore_error,
                        source: err,
                    })
                }
            };
        }

        self.discard_old(old);
        Ok(())
    }

    fn discard_old(&self, old: &Path) {
        let Err(e) = fs::remove_file(old) else {
            return;
        };
        match self.strategy {
            ReplaceStrategy::Unix => {
                warn!("Failed to remove old binary {}: {}", old.display(), e)
            }
            ReplaceStrategy::Windows => debug!(
                "Old binary {} is still in use ({}), it will be removed by the next update",
                old.display(),
                e
            ),
        }
    }

    /// Remove a `.old` file left behind by an earlier run
    fn sweep_stale(&self, old: &Path) {
        if old.exists() {
            debug!("Removing stale {}", old.display());
            if let Err(e) = fs::remove_file(old) {
                debug!("Failed to remove stale {}: {}", old.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::tempdir;

    /// Fails every rename whose source has one of the given extensions
    struct FailFrom(&'static [&'static str]);

    impl Rename for FailFrom {
        fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
            let ext = from.extension().and_then(|e| e.to_str()).unwrap_or("");
            if self.0.contains(&ext) {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "injected"));
            }
            fs::rename(from, to)
        }
    }

    fn setup() -> (tempfile::TempDir, std::path::PathBuf, std::path::PathBuf) {
        let dir = tempdir().unwrap();
        let target = dir.path().join("ml-notes");
        let new_binary = dir.path().join("extracted");
        fs::write(&target, b"old build").unwrap();
        fs::write(&new_binary, b"new build").unwrap();
        (dir, target, new_binary)
    }

    #[test]
    fn test_strategy_for_platform() {
        assert_eq!(ReplaceStrategy::for_platform("windows"), ReplaceStrategy::Windows);
        assert_eq!(ReplaceStrategy::for_platform("linux"), ReplaceStrategy::Unix);
        assert_eq!(ReplaceStrategy::for_platform("macos"), ReplaceStrategy::Unix);
    }

    #[test]
    fn test_replace_success_cleans_up() {
        let (_dir, target, new_binary) = setup();

        AtomicReplacer::new(ReplaceStrategy::Unix)
            .replace(&new_binary, &target)
            .unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"new build");
        assert!(!sibling_path(&target, "new").exists());
        assert!(!sibling_path(&target, "old").exists());
    }

    #[test]
    fn test_replace_sweeps_stale_old() {
        let (_dir, target, new_binary) = setup();
        fs::write(sibling_path(&target, "old"), b"leftover").unwrap();

        AtomicReplacer::new(ReplaceStrategy::Windows)
            .replace(&new_binary, &target)
            .unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"new build");
        assert!(!sibling_path(&target, "old").exists());
    }

    #[test]
    fn test_failed_install_restores_target() {
        let (_dir, target, new_binary) = setup();

        let err = AtomicReplacer::new(ReplaceStrategy::Unix)
            .with_renamer(FailFrom(&["new"]))
            .replace(&new_binary, &target)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ReplaceFailed);
        assert_eq!(fs::read(&target).unwrap(), b"old build");
        assert!(!sibling_path(&target, "new").exists());
        assert!(!sibling_path(&target, "old").exists());
    }

    #[test]
    fn test_windows_failed_install_restores_target() {
        let (_dir, target, new_binary) = setup();

        let replacer = AtomicReplacer::new(ReplaceStrategy::Windows).with_renamer(FailFrom(&["new"]));
        assert_eq!(replacer.strategy(), ReplaceStrategy::Windows);
        let err = replacer.replace(&new_binary, &target).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ReplaceFailed);
        assert_eq!(fs::read(&target).unwrap(), b"old build");
        assert!(!sibling_path(&target, "new").exists());
        assert!(!sibling_path(&target, "old").exists());
    }

    #[test]
    fn test_windows_failed_restore_reports_rollback_failure() {
        let (_dir, target, new_binary) = setup();

        let err = AtomicReplacer::new(ReplaceStrategy::Windows)
            .with_renamer(FailFrom(&["new", "old"]))
            .replace(&new_binary, &target)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RollbackFailed);
        assert!(!target.exists());
        assert_eq!(fs::read(sibling_path(&target, "old")).unwrap(), b"old build");
    }

    #[test]
    fn test_failed_restore_reports_rollback_failure() {
        let (_dir, target, new_binary) = setup();

        let err = AtomicReplacer::new(ReplaceStrategy::Unix)
            .with_renamer(FailFrom(&["new", "old"]))
            .replace(&new_binary, &target)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RollbackFailed);
        assert!(!target.exists());
        assert_eq!(fs::read(sibling_path(&target, "old")).unwrap(), b"old build");
    }

    #[test]
    fn test_failed_first_rename_leaves_target() {
        let (dir, _target, new_binary) = setup();
        let missing = dir.path().join("not-installed");

        let err = AtomicReplacer::new(ReplaceStrategy::Unix)
            .replace(&new_binary, &missing)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ReplaceFailed);
        assert!(!sibling_path(&missing, "new").exists());
    }
}
