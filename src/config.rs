use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, UpdateError};

pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";
pub const DEFAULT_APP_NAME: &str = "ml-notes";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Immutable input to the updater.
#[derive(Debug, Clone)]
pub struct ReleaseConfig {
    pub owner: String,
    pub repo: String,
    /// Binary name; also the prefix of release asset names.
    pub app_name: String,
    pub current_version: String,
    pub include_prerelease: bool,
    pub platform: String,
    pub arch: String,
    /// Timeout for release listing requests.
    pub timeout: Duration,
    /// Total timeout for artifact downloads. `None` means the download is
    /// only bounded by the connect timeout.
    pub download_timeout: Option<Duration>,
    pub api_base_url: String,
}

impl ReleaseConfig {
    /// Config for the running host, with defaults for everything else
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, current_version: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            app_name: DEFAULT_APP_NAME.to_string(),
            current_version: current_version.into(),
            include_prerelease: false,
            platform: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            timeout: DEFAULT_TIMEOUT,
            download_timeout: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
        }
    }

    pub fn app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    pub fn include_prerelease(mut self, include: bool) -> Self {
        self.include_prerelease = include;
        self
    }

    pub fn target(mut self, platform: impl Into<String>, arch: impl Into<String>) -> Self {
        self.platform = platform.into();
        self.arch = arch.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn download_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.download_timeout = timeout;
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.owner.is_empty() || self.repo.is_empty() {
            return Err(UpdateError::Config("owner and repo must be set".into()));
        }
        if self.app_name.is_empty() {
            return Err(UpdateError::Config("app_name must be set".into()));
        }
        if self.timeout.is_zero() {
            return Err(UpdateError::Config("timeout must be greater than zero".into()));
        }
        Ok(())
    }
}

/// Updater settings file (`~/.config/ml-notes/update.toml`)
#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default = "default_owner")]
    pub owner: String,

    #[serde(default = "default_repo")]
    pub repo: String,

    #[serde(default = "default_app_name")]
    pub app_name: String,

    #[serde(default)]
    pub include_prerelease: bool,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Unset means downloads have no total timeout
    #[serde(default)]
    pub download_timeout_secs: Option<u64>,

    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

fn default_owner() -> String {
    "streed".to_string()
}

fn default_repo() -> String {
    "ml-notes".to_string()
}

fn default_app_name() -> String {
    DEFAULT_APP_NAME.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            owner: default_owner(),
            repo: default_repo(),
            app_name: default_app_name(),
            include_prerelease: false,
            timeout_secs: default_timeout_secs(),
            download_timeout_secs: None,
            api_base_url: default_api_base_url(),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| UpdateError::io(format!("failed to read {}", path.display()), e))?;
        toml::from_str(&content).map_err(|e| UpdateError::Config(e.to_string()))
    }

    pub fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("ml-notes")
            .join("update.toml")
    }

    pub fn to_release_config(&self, current_version: &str) -> ReleaseConfig {
        ReleaseConfig::new(&self.owner, &self.repo, current_version)
            .app_name(&self.app_name)
            .include_prerelease(self.include_prerelease)
            .timeout(Duration::from_secs(self.timeout_secs))
            .download_timeout(self.download_timeout_secs.map(Duration::from_secs))
            .api_base_url(&self.api_base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let settings = Settings::load_from(&dir.path().join("update.toml")).unwrap();
        assert_eq!(settings.repo, "ml-notes");
        assert_eq!(settings.timeout_secs, 30);
        assert!(settings.download_timeout_secs.is_none());
    }

    #[test]
    fn test_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("update.toml");
        fs::write(&path, "owner = \"me\"\ninclude_prerelease = true\ndownload_timeout_secs = 600\n").unwrap();

        let settings = Settings::load_from(&path).unwrap();
        let config = settings.to_release_config("v1.0.0");
        assert_eq!(config.owner, "me");
        assert_eq!(config.repo, "ml-notes");
        assert!(config.include_prerelease);
        assert_eq!(config.download_timeout, Some(Duration::from_secs(600)));
        assert_eq!(config.current_version, "v1.0.0");
    }

    #[test]
    fn test_invalid_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("update.toml");
        fs::write(&path, "timeout_secs = \"soon\"").unwrap();
        assert!(matches!(Settings::load_from(&path), Err(UpdateError::Config(_))));
    }

    #[test]
    fn test_validate() {
        assert!(ReleaseConfig::new("o", "r", "v1").validate().is_ok());
        assert!(ReleaseConfig::new("", "r", "v1").validate().is_err());
        assert!(ReleaseConfig::new("o", "r", "v1")
            .timeout(Duration::ZERO)
            .validate()
            .is_err());
    }
}
