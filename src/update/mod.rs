pub mod backup;
pub mod download;
pub mod github;
pub mod installer;
pub mod platform;
pub mod progress;
pub mod replace;
pub mod version;

use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::SyncSender;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ReleaseConfig;
use crate::error::{Result, UpdateError};
use backup::BackupManager;
use download::{download_file_name, Downloader};
use github::{RegistryClient, Release};
use installer::{extract_binary, verify_binary, ArchiveKind};
use progress::ProgressSink;
use replace::{AtomicReplacer, ReplaceStrategy};

pub use github::Asset;
pub use progress::{progress_channel, ProgressEvent, Stage, DEFAULT_CAPACITY};
pub use version::is_newer;

/// A resolved update target
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateInfo {
    pub version: String,
    pub download_url: String,
    pub asset_name: String,
    pub release_url: String,
    pub release_notes: String,
    pub published_at: Option<DateTime<Utc>>,
    pub prerelease: bool,
    pub size: u64,
    /// Never populated: releases do not publish checksums
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl UpdateInfo {
    fn from_release(release: &Release, asset: &Asset) -> Self {
        Self {
            version: release.tag_name.clone(),
            download_url: asset.browser_download_url.clone(),
            asset_name: asset.name.clone(),
            release_url: release.html_url.clone(),
            release_notes: release.body.clone().unwrap_or_default(),
            published_at: release.published_at,
            prerelease: release.prerelease,
            size: asset.size,
            checksum: None,
        }
    }
}

/// Newest release allowed by the prerelease setting
pub fn select_latest(releases: &[Release], include_prerelease: bool) -> Option<&Release> {
    releases
        .iter()
        .find(|r| include_prerelease || !r.prerelease)
}

pub struct Updater {
    config: ReleaseConfig,
    registry: RegistryClient,
    downloader: Downloader,
    replacer: AtomicReplacer,
    executable_path: Option<PathBuf>,
}

impl Updater {
    pub fn new(config: ReleaseConfig) -> Result<Self> {
        config.validate()?;

        // Per-request timeouts are set by the registry and downloader; the
        // client itself only bounds connection setup.
        let client = Client::builder()
            .connect_timeout(config.timeout)
            .timeout(None::<Duration>)
            .build()
            .map_err(|e| UpdateError::Config(format!("failed to build HTTP client: {}", e)))?;

        let registry = RegistryClient::new(client.clone(), &config);
        let downloader = Downloader::new(client, github::user_agent(&config), config.download_timeout);
        let replacer = AtomicReplacer::new(ReplaceStrategy::for_platform(&config.platform));

        Ok(Self {
            config,
            registry,
            downloader,
            replacer,
            executable_path: None,
        })
    }

    /// Install into `path` instead of the running executable
    pub fn with_executable_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable_path = Some(path.into());
        self
    }

    pub fn with_replacer(mut self, replacer: AtomicReplacer) -> Self {
        self.replacer = replacer;
        self
    }

    pub fn config(&self) -> &ReleaseConfig {
        &self.config
    }

    pub fn current_version(&self) -> &str {
        &self.config.current_version
    }

    /// Newest eligible release if it is newer than the running version
    pub fn check_for_update(&self) -> Result<Option<UpdateInfo>> {
        let releases = self.registry.fetch_releases()?;
        let release =
            select_latest(&releases, self.config.include_prerelease).ok_or(UpdateError::NoReleases)?;

        if !is_newer(&release.tag_name, &self.config.current_version) {
            info!(
                "Already on the latest version ({} >= {})",
                self.config.current_version, release.tag_name
            );
            return Ok(None);
        }

        info!(
            "Update available: {} -> {}",
            self.config.current_version, release.tag_name
        );
        self.resolve(release).map(Some)
    }

    /// Resolve an explicit version, with or without the 'v' prefix
    pub fn check_version(&self, version: &str) -> Result<UpdateInfo> {
        let tag = version::normalize_tag(version);
        let releases = self.registry.fetch_releases()?;

        let release = releases
            .iter()
            .find(|r| r.tag_name == tag)
            .ok_or(UpdateError::VersionNotFound(tag))?;
        self.resolve(release)
    }

    /// Newest eligible release without comparing versions, for forced reinstalls
    pub fn latest_release(&self) -> Result<UpdateInfo> {
        let releases = self.registry.fetch_releases()?;
        let release =
            select_latest(&releases, self.config.include_prerelease).ok_or(UpdateError::NoReleases)?;
        self.resolve(release)
    }

    fn resolve(&self, release: &Release) -> Result<UpdateInfo> {
        let asset = platform::resolve_asset(
            release,
            &self.config.app_name,
            &self.config.platform,
            &self.config.arch,
        )?;
        debug!("Resolved asset {} for {}", asset.name, release.tag_name);
        Ok(UpdateInfo::from_release(release, asset))
    }

    /// Download and install `info`.
    ///
    /// `progress` is moved in and dropped on return, closing the stream
    /// after the final event. The channel is bounded: the caller must drain
    /// it from another thread while this runs.
    pub fn perform_update(&self, info: &UpdateInfo, progress: SyncSender<ProgressEvent>) -> Result<()> {
        let mut sink = ProgressSink::new(progress);
        let exec_path = self.executable_path()?;

        let temp_dir = tempfile::Builder::new()
            .prefix(&format!("{}-update-", self.config.app_name))
            .tempdir()
            .map_err(|e| UpdateError::io("failed to create temp directory", e))?;

        let result = self.run_stages(info, &exec_path, temp_dir.path(), &mut sink);

        let temp_path = temp_dir.path().to_path_buf();
        if let Err(e) = temp_dir.close() {
            debug!("Failed to remove temp directory {}: {}", temp_path.display(), e);
        }

        match &result {
            Ok(()) => info!("Updated {} to {}", exec_path.display(), info.version),
            Err(e) => warn!("Update to {} failed: {}", info.version, e),
        }
        result
    }

    fn run_stages(
        &self,
        info: &UpdateInfo,
        exec_path: &Path,
        temp_dir: &Path,
        sink: &mut ProgressSink,
    ) -> Result<()> {
        sink.emit(ProgressEvent::stage(Stage::Download, "Starting download..."));
        let file_name = download_file_name(&info.asset_name, &info.download_url);
        let archive = self
            .downloader
            .download(&info.download_url, temp_dir, &file_name, info.size, sink)
            .map_err(|e| e.at_stage(Stage::Download))?;

        sink.emit(ProgressEvent::stage(Stage::Verify, "Verifying download..."));
        let kind = ArchiveKind::from_name(&file_name);
        let binary = extract_binary(kind, &archive, &temp_dir.join("extracted"), &self.config.app_name)
            .and_then(|path| verify_binary(&path).map(|()| path))
            .map_err(|e| e.at_stage(Stage::Verify))?;

        sink.emit(ProgressEvent::stage(Stage::Backup, "Creating backup..."));
        BackupManager::new(exec_path.to_path_buf())
            .create_backup()
            .map_err(|e| e.at_stage(Stage::Backup))?;

        sink.emit(ProgressEvent::stage(Stage::Replace, "Installing update..."));
        self.replacer
            .replace(&binary, exec_path)
            .map_err(|e| e.at_stage(Stage::Replace))?;

        sink.emit(ProgressEvent::stage(Stage::Complete, "Update complete"));
        Ok(())
    }

    /// Put `<exec>.backup` back in place of the executable.
    ///
    /// Also recovers an executable left missing by a failed swap.
    pub fn rollback(&self) -> Result<()> {
        let exec_path = self.executable_path()?;
        BackupManager::new(exec_path).restore_backup()
    }

    /// The executable updates are installed into
    pub fn executable_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.executable_path {
            return Ok(path.clone());
        }
        // Resolve symlinks so the real file is swapped, not the link
        std::env::current_exe()
            .and_then(fs::canonicalize)
            .map_err(|e| UpdateError::io("failed to get executable path", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(tag: &str, prerelease: bool) -> Release {
        Release {
            tag_name: tag.to_string(),
            name: Some(tag.to_string()),
            body: Some(format!("notes for {}", tag)),
            html_url: format!("https://example.com/{}", tag),
            published_at: None,
            prerelease,
            assets: vec![Asset {
                name: format!("ml-notes-{}-linux-amd64.tar.gz", tag),
                browser_download_url: format!("https://example.com/{}.tar.gz", tag),
                size: 42,
            }],
        }
    }

    #[test]
    fn test_select_latest_skips_prerelease() {
        let releases = vec![
            release("v1.2.0-rc1", true),
            release("v1.1.0", false),
            release("v1.0.0", false),
        ];

        assert_eq!(select_latest(&releases, false).unwrap().tag_name, "v1.1.0");
        assert_eq!(select_latest(&releases, true).unwrap().tag_name, "v1.2.0-rc1");
    }

    #[test]
    fn test_select_latest_none_eligible() {
        let releases = vec![release("v2.0.0-beta", true)];
        assert!(select_latest(&releases, false).is_none());
        assert!(select_latest(&[], true).is_none());
    }

    #[test]
    fn test_update_info_from_release() {
        let rel = release("v1.1.0", false);
        let info = UpdateInfo::from_release(&rel, &rel.assets[0]);

        assert_eq!(info.version, "v1.1.0");
        assert_eq!(info.asset_name, "ml-notes-v1.1.0-linux-amd64.tar.gz");
        assert_eq!(info.release_notes, "notes for v1.1.0");
        assert_eq!(info.size, 42);
        assert!(info.checksum.is_none());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = ReleaseConfig::new("", "ml-notes", "v1.0.0");
        assert!(matches!(Updater::new(config), Err(UpdateError::Config(_))));
    }

    #[test]
    fn test_rollback_without_backup() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("ml-notes");
        fs::write(&exe, b"current").unwrap();

        let updater = Updater::new(ReleaseConfig::new("streed", "ml-notes", "v1.0.0"))
            .unwrap()
            .with_executable_path(&exe);
        let err = updater.rollback().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::BackupMissing);
    }

    #[test]
    fn test_rollback_restores_backup() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("ml-notes");
        fs::write(&exe, b"broken new build").unwrap();
        fs::write(dir.path().join("ml-notes.backup"), b"previous build").unwrap();

        let updater = Updater::new(ReleaseConfig::new("streed", "ml-notes", "v1.1.0"))
            .unwrap()
            .with_executable_path(&exe);
        updater.rollback().unwrap();

        assert_eq!(fs::read(&exe).unwrap(), b"previous build");
        assert!(dir.path().join("ml-notes.backup").exists());
    }
}
