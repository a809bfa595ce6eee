use reqwest::blocking::Client;
use reqwest::header::USER_AGENT;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::progress::{ProgressEvent, ProgressSink};
use crate::error::{NetworkFailure, Result, UpdateError};

const CHUNK_SIZE: usize = 32 * 1024;

/// Streams release artifacts to disk.
///
/// Shares the registry's HTTP client but not its request timeout: the
/// client only bounds connection setup, and the whole transfer is bounded by
/// `timeout` when one is configured.
pub struct Downloader {
    client: Client,
    user_agent: String,
    timeout: Option<Duration>,
}

impl Downloader {
    pub fn new(client: Client, user_agent: String, timeout: Option<Duration>) -> Self {
        Self {
            client,
            user_agent,
            timeout,
        }
    }

    /// Download `url` into `dest_dir/file_name`, reporting progress after every chunk
    pub(crate) fn download(
        &self,
        url: &str,
        dest_dir: &Path,
        file_name: &str,
        expected_size: u64,
        sink: &mut ProgressSink,
    ) -> Result<PathBuf> {
        info!("Downloading {}", url);

        let mut request = self.client.get(url).header(USER_AGENT, &self.user_agent);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let mut response = request.send().map_err(|e| UpdateError::DownloadFailed {
            url: url.to_string(),
            failure: NetworkFailure::classify(&e),
            source: Some(e),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::DownloadFailed {
                url: url.to_string(),
                failure: NetworkFailure::Status(status.as_u16()),
                source: None,
            });
        }

        let total_size = response
            .content_length()
            .filter(|len| *len > 0)
            .unwrap_or(expected_size);

        let dest = dest_dir.join(file_name);
        let mut file = File::create(&dest)
            .map_err(|e| UpdateError::io(format!("failed to create {}", dest.display()), e))?;

        let mut downloaded: u64 = 0;
        let mut buffer = vec![0u8; CHUNK_SIZE];

        loop {
            let bytes_read = response
                .read(&mut buffer)
                .map_err(|e| UpdateError::io("failed to read download stream", e))?;
            if bytes_read == 0 {
                break;
            }
            file.write_all(&buffer[..bytes_read])
                .map_err(|e| UpdateError::io(format!("failed to write {}", dest.display()), e))?;
            downloaded += bytes_read as u64;

            if total_size > 0 {
                sink.emit(ProgressEvent::download(downloaded, total_size));
            }
        }

        file.flush()
            .map_err(|e| UpdateError::io(format!("failed to flush {}", dest.display()), e))?;

        debug!("Downloaded {} bytes to {}", downloaded, dest.display());
        Ok(dest)
    }
}

/// Local file name for a download: the asset name, else the last URL segment
pub fn download_file_name(asset_name: &str, url: &str) -> String {
    if !asset_name.is_empty() {
        return asset_name.to_string();
    }
    url.split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .filter(|segment| !segment.is_empty())
        .unwrap_or("download")
        .to_string()
}
