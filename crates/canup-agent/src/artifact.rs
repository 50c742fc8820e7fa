//! Remote artifact freshness check and download
//!
//! The remote artifact is compared against the staged copy by modification
//! time. A download is needed when the staged file is missing, the server
//! sends no usable `Last-Modified`, or the remote copy is strictly newer.
//! Downloads land in a sibling `.part` file that is renamed into place, and
//! the staged file's mtime is set to the remote timestamp so the next check
//! sees it as current.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use canup_core::StagedArtifact;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, CACHE_CONTROL, IF_MODIFIED_SINCE, LAST_MODIFIED};
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::ArtifactConfig;
use crate::error::ArtifactError;

/// Supplies a staged artifact when a newer one is available
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// `Ok(None)` when the staged copy is current
    async fn check(&self) -> Result<Option<StagedArtifact>, ArtifactError>;
}

/// Polls an HTTP(S) URL and stages newer artifacts on disk
#[derive(Debug, Clone)]
pub struct ArtifactWatcher {
    client: Client,
    url: Url,
    local_path: PathBuf,
}

impl ArtifactWatcher {
    pub fn new(config: &ArtifactConfig) -> Result<Self, ArtifactError> {
        let url = Url::parse(&config.url)?;

        let mut headers = HeaderMap::new();
        // Some CDNs serve stale copies unless revalidation is forced
        headers.insert(IF_MODIFIED_SINCE, HeaderValue::from_static("0"));
        headers.insert(
            CACHE_CONTROL,
            HeaderValue::from_static("no-cache,must-revalidate,max-age=0"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;

        info!(url = %url, local_path = %config.local_path.display(), "Artifact watcher created");

        Ok(Self {
            client,
            url,
            local_path: config.local_path.clone(),
        })
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    /// `Last-Modified` of the remote artifact, if the server reports a valid one
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn remote_last_modified(&self) -> Result<Option<DateTime<Utc>>, ArtifactError> {
        let response = self
            .client
            .head(self.url.clone())
            .send()
            .await?
            .error_for_status()?;

        let Some(value) = response.headers().get(LAST_MODIFIED) else {
            info!("No Last-Modified header found, downloading file anyway");
            return Ok(None);
        };

        let parsed = value
            .to_str()
            .ok()
            .and_then(|s| parse_http_date(s.trim()));
        if parsed.is_none() {
            warn!(value = ?value, "Unparseable Last-Modified header, downloading file anyway");
        }
        Ok(parsed)
    }

    /// Modification time of the staged copy, `None` when there is none
    pub async fn local_last_modified(&self) -> Result<Option<DateTime<Utc>>, ArtifactError> {
        match tokio::fs::metadata(&self.local_path).await {
            Ok(meta) => {
                let modified = meta
                    .modified()
                    .map_err(|e| ArtifactError::io(&self.local_path, e))?;
                Ok(Some(DateTime::<Utc>::from(modified)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ArtifactError::io(&self.local_path, e)),
        }
    }

    /// Fetch the artifact into place and stamp it with `last_modified`
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn download(&self, last_modified: Option<DateTime<Utc>>) -> Result<u64, ArtifactError> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await?
            .error_for_status()?;

        if let Some(parent) = self.local_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ArtifactError::io(parent, e))?;
            }
        }

        let part_path = part_path(&self.local_path);
        let mut file = tokio::fs::File::create(&part_path)
            .await
            .map_err(|e| ArtifactError::io(&part_path, e))?;

        let mut written = 0u64;
        let mut body = std::pin::pin!(response.bytes_stream());
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)
                .await
                .map_err(|e| ArtifactError::io(&part_path, e))?;
            written += chunk.len() as u64;
        }
        file.sync_all()
            .await
            .map_err(|e| ArtifactError::io(&part_path, e))?;
        let file = file.into_std().await;

        if let Some(remote) = last_modified {
            file.set_modified(SystemTime::from(remote))
                .map_err(|e| ArtifactError::io(&part_path, e))?;
        }
        drop(file);

        tokio::fs::rename(&part_path, &self.local_path)
            .await
            .map_err(|e| ArtifactError::io(&self.local_path, e))?;

        debug!(bytes = written, "Artifact written");
        Ok(written)
    }
}

#[async_trait]
impl ArtifactSource for ArtifactWatcher {
    async fn check(&self) -> Result<Option<StagedArtifact>, ArtifactError> {
        let remote = self.remote_last_modified().await?;
        let local = self.local_last_modified().await?;

        debug!(?remote, ?local, "Comparing artifact timestamps");

        if !needs_download(remote, local) {
            info!("Local file is up to date");
            return Ok(None);
        }

        info!("Downloading new version of file");
        let bytes = self.download(remote).await?;
        info!(bytes, path = %self.local_path.display(), "New artifact downloaded");

        Ok(Some(StagedArtifact {
            path: self.local_path.clone(),
            last_modified: remote,
        }))
    }
}

/// Parse an HTTP date (IMF-fixdate, e.g. `Wed, 21 Oct 2015 07:28:00 GMT`)
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn needs_download(remote: Option<DateTime<Utc>>, local: Option<DateTime<Utc>>) -> bool {
    match (remote, local) {
        (_, None) => true,
        (None, Some(_)) => true,
        (Some(remote), Some(local)) => remote > local,
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}
