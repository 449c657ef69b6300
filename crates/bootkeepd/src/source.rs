//! Manifest client and artifact downloader
//!
//! Every failure here (unreachable host, timeout, HTTP error, malformed
//! body) is a recoverable `UpdateError::Network`. Nothing in this module
//! touches local state.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bootkeep_common::{Manifest, ServerConfig, UpdateError, VersionRecord, VERSION};
use reqwest::Url;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where the engine learns about and fetches new versions
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Fetch the latest manifest, telling the endpoint what is installed.
    async fn fetch_manifest(&self, current: Option<&VersionRecord>) -> Result<Manifest, UpdateError>;

    /// Download the artifact the manifest names. Bytes are unverified.
    async fn download_artifact(&self, manifest: &Manifest) -> Result<Vec<u8>, UpdateError>;
}

/// HTTP implementation backed by reqwest
pub struct HttpUpdateSource {
    client: reqwest::Client,
    manifest_url: Url,
    device_uid: Option<String>,
    fetch_timeout: Duration,
    download_timeout: Duration,
    download_retries: u32,
    retry_delay: Duration,
    max_artifact_bytes: u64,
}

impl HttpUpdateSource {
    pub fn from_config(server: &ServerConfig) -> Result<Self> {
        let manifest_url = Url::parse(server.manifest_url.trim())
            .with_context(|| format!("Invalid manifest URL {}", server.manifest_url))?;

        let client = reqwest::Client::builder()
            .user_agent(format!("bootkeep/{}", VERSION))
            .connect_timeout(server.fetch_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            manifest_url,
            device_uid: server.device_uid().map(str::to_string),
            fetch_timeout: server.fetch_timeout(),
            download_timeout: server.download_timeout(),
            download_retries: server.download_retries.max(1),
            retry_delay: server.retry_delay(),
            max_artifact_bytes: server.max_artifact_bytes,
        })
    }

    async fn download_once(&self, url: &str) -> Result<Vec<u8>, UpdateError> {
        let mut response = self
            .client
            .get(url)
            .timeout(self.download_timeout)
            .send()
            .await
            .map_err(|e| network("artifact request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::Network(format!(
                "artifact endpoint returned {}",
                status
            )));
        }

        if let Some(len) = response.content_length() {
            if len > self.max_artifact_bytes {
                return Err(self.too_large(len));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| network("artifact download interrupted", e))?
        {
            body.extend_from_slice(&chunk);
            if body.len() as u64 > self.max_artifact_bytes {
                return Err(self.too_large(body.len() as u64));
            }
        }

        Ok(body)
    }

    fn too_large(&self, len: u64) -> UpdateError {
        UpdateError::Network(format!(
            "artifact is {} bytes, limit is {}",
            len, self.max_artifact_bytes
        ))
    }
}

#[async_trait]
impl UpdateSource for HttpUpdateSource {
    async fn fetch_manifest(&self, current: Option<&VersionRecord>) -> Result<Manifest, UpdateError> {
        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(record) = current {
            query.push(("current_version", record.version.as_str()));
        }
        if let Some(uid) = &self.device_uid {
            query.push(("device_uid", uid.as_str()));
        }

        debug!("Fetching manifest from {}", self.manifest_url);
        let response = self
            .client
            .get(self.manifest_url.clone())
            .query(&query)
            .timeout(self.fetch_timeout)
            .send()
            .await
            .map_err(|e| network("manifest request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::Network(format!(
                "manifest endpoint returned {}",
                status
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| network("manifest body unreadable", e))?;

        let mut manifest: Manifest = serde_json::from_slice(&body)
            .map_err(|e| UpdateError::Network(format!("malformed manifest: {}", e)))?;
        manifest
            .validate()
            .map_err(|e| UpdateError::Network(format!("invalid manifest: {}", e)))?;

        // Relative artifact URLs are relative to the manifest endpoint
        let artifact_url = self
            .manifest_url
            .join(manifest.artifact_url.trim())
            .map_err(|e| UpdateError::Network(format!("invalid artifact_url: {}", e)))?;
        manifest.artifact_url = artifact_url.to_string();

        info!("Manifest reports version {}", manifest.version);
        Ok(manifest)
    }

    async fn download_artifact(&self, manifest: &Manifest) -> Result<Vec<u8>, UpdateError> {
        let mut last_error = None;

        for attempt in 1..=self.download_retries {
            info!(
                "Downloading {} (attempt {}/{})",
                manifest.artifact_url, attempt, self.download_retries
            );
            match self.download_once(&manifest.artifact_url).await {
                Ok(bytes) => {
                    info!("Downloaded {} bytes", bytes.len());
                    return Ok(bytes);
                }
                Err(e) => {
                    warn!("Download failed: {}", e);
                    last_error = Some(e);
                    if attempt < self.download_retries {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| UpdateError::Network("no download attempted".to_string())))
    }
}

fn network(what: &str, e: reqwest::Error) -> UpdateError {
    if e.is_timeout() {
        UpdateError::Network(format!("{}: timed out", what))
    } else {
        UpdateError::Network(format!("{}: {}", what, e))
    }
}
