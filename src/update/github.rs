use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::ReleaseConfig;
use crate::error::{NetworkFailure, Result, UpdateError};

const GITHUB_MEDIA_TYPE: &str = "application/vnd.github.v3+json";

#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    pub html_url: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Asset {
    pub name: String,
    pub browser_download_url: String,
    pub size: u64,
}

/// Client for the `/repos/{owner}/{repo}/releases` listing
pub struct RegistryClient {
    client: Client,
    url: String,
    user_agent: String,
    timeout: Duration,
}

impl RegistryClient {
    pub fn new(client: Client, config: &ReleaseConfig) -> Self {
        let url = format!(
            "{}/repos/{}/{}/releases",
            config.api_base_url.trim_end_matches('/'),
            config.owner,
            config.repo
        );
        Self {
            client,
            url,
            user_agent: user_agent(config),
            timeout: config.timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch all releases, newest first as returned by the registry
    pub fn fetch_releases(&self) -> Result<Vec<Release>> {
        debug!("Fetching releases from {}", self.url);

        let response = self
            .client
            .get(&self.url)
            .header(ACCEPT, GITHUB_MEDIA_TYPE)
            .header(USER_AGENT, &self.user_agent)
            .timeout(self.timeout)
            .send()
            .map_err(|e| self.unavailable(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::RegistryUnavailable {
                url: self.url.clone(),
                failure: NetworkFailure::Status(status.as_u16()),
                source: None,
            });
        }

        let releases = response.json::<Vec<Release>>().map_err(|e| {
            if e.is_decode() {
                UpdateError::RegistryResponseInvalid(e)
            } else {
                self.unavailable(e)
            }
        })?;

        debug!("Registry listed {} releases", releases.len());
        Ok(releases)
    }

    fn unavailable(&self, err: reqwest::Error) -> UpdateError {
        UpdateError::RegistryUnavailable {
            url: self.url.clone(),
            failure: NetworkFailure::classify(&err),
            source: Some(err),
        }
    }
}

pub(crate) fn user_agent(config: &ReleaseConfig) -> String {
    format!("{}/{}", config.app_name, config.current_version)
}
