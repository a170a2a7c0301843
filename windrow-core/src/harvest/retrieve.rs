use std::path::Path;
use std::time::Duration;

use reqwest::Client;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;

use super::error::{HarvestError, HarvestResult};
use super::models::DownloadOutcome;
use crate::config::DownloadsSection;

pub struct Retriever {
    client: Client,
}

impl Retriever {
    pub fn new(config: &DownloadsSection) -> HarvestResult<Self> {
        let client = Client::builder()
            .user_agent("Windrow-Harvester/1.0")
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .build()
            .map_err(|err| HarvestError::Network(err.to_string()))?;
        Ok(Self { client })
    }

    /// Best effort: a failed transfer yields a failed outcome, never an error.
    /// An existing file at `dest` counts as success without touching the network.
    pub async fn fetch(&self, url: &str, dest: &Path) -> DownloadOutcome {
        if let Ok(existing) = fs::metadata(dest).await {
            if existing.is_file() {
                debug!(path = %dest.display(), "payload already on disk, skipping fetch");
                return DownloadOutcome {
                    local_path: dest.to_path_buf(),
                    byte_size: existing.len(),
                    succeeded: true,
                    skipped: true,
                };
            }
        }

        match self.transfer(url, dest).await {
            Ok(byte_size) => DownloadOutcome {
                local_path: dest.to_path_buf(),
                byte_size,
                succeeded: true,
                skipped: false,
            },
            Err(err) => {
                warn!(url, error = %err, "payload retrieval failed");
                self.discard_partial(dest).await;
                DownloadOutcome {
                    local_path: dest.to_path_buf(),
                    byte_size: 0,
                    succeeded: false,
                    skipped: false,
                }
            }
        }
    }

    async fn transfer(&self, url: &str, dest: &Path) -> HarvestResult<u64> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        if let Ok(parsed) = Url::parse(url) {
            if parsed.scheme() == "file" {
                let source = parsed
                    .to_file_path()
                    .map_err(|_| HarvestError::Download("invalid file url".into()))?;
                return Ok(fs::copy(&source, dest).await?);
            }
        }
        let response = self.client.get(url).send().await?.error_for_status()?;
        let mut stream = response.bytes_stream();
        let mut file = fs::File::create(dest).await?;
        let mut written: u64 = 0;
        use futures::StreamExt;
        while let Some(chunk) = stream.next().await {
            let data = chunk?;
            file.write_all(&data).await?;
            written += data.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }

    async fn discard_partial(&self, dest: &Path) {
        match fs::remove_file(dest).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %dest.display(), error = %err, "failed to remove partial download");
            }
        }
    }
}
