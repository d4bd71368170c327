use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::{
    archive,
    config::{Retention, Version},
    error::DownloadError,
    resolver::Release,
    utils,
};

#[cfg(feature = "mc-bedrock")]
pub use http::HttpFetcher;

const STAGING_PREFIX: &str = ".staging-";
const PART_SUFFIX: &str = ".part";
const RECORD_SUFFIX: &str = ".json";

/// Downloads an artifact to a local file.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), DownloadError>;
}

/// Completion record written next to an extracted build. A build directory
/// without its record is an interrupted extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedArtifact {
    pub version: Version,
    pub url: String,
    pub downloaded_at: DateTime<Utc>,
    #[serde(skip)]
    pub path: PathBuf,
}

/// Extracted server builds keyed by version under one directory.
pub struct CacheStore {
    root: PathBuf,
    fetcher: Arc<dyn ArtifactFetcher>,
}

impl CacheStore {
    pub fn new<P: Into<PathBuf>>(root: P, fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        Self {
            root: root.into(),
            fetcher,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_dir(&self, version: &Version) -> PathBuf {
        self.root.join(version.as_str())
    }

    fn record_path(&self, version: &Version) -> PathBuf {
        self.root.join(format!("{}{}", version, RECORD_SUFFIX))
    }

    fn staging_dir(&self, version: &Version) -> PathBuf {
        self.root.join(format!("{}{}", STAGING_PREFIX, version))
    }

    fn archive_path(&self, version: &Version) -> PathBuf {
        self.root.join(format!("{}.zip", version))
    }

    fn part_path(&self, version: &Version) -> PathBuf {
        self.root.join(format!("{}.zip{}", version, PART_SUFFIX))
    }

    async fn read_record(&self, version: &Version) -> Option<CachedArtifact> {
        let data = fs::read(self.record_path(version)).await.ok()?;
        let mut record: CachedArtifact = serde_json::from_slice(&data).ok()?;
        if record.version != *version {
            return None;
        }
        record.path = self.entry_dir(version);
        Some(record)
    }

    /// True only for a complete build: record present and extraction directory intact.
    pub async fn has(&self, version: &Version) -> bool {
        match self.read_record(version).await {
            Some(record) => fs::metadata(&record.path)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false),
            None => false,
        }
    }

    /// Returns the extracted build for `release`, downloading it first if needed.
    pub async fn materialize(&self, release: &Release) -> Result<PathBuf, DownloadError> {
        let version = &release.version;
        if self.has(version).await {
            tracing::info!("Using cached build {} at {}", version, self.entry_dir(version).display());
            return Ok(self.entry_dir(version));
        }

        self.discard_partial(version).await?;
        fs::create_dir_all(&self.root).await.map_err(|source| DownloadError::Io {
            path: self.root.clone(),
            source,
        })?;

        let part = self.part_path(version);
        let archive_path = self.archive_path(version);
        tracing::info!("Downloading build {} from {}", version, release.url);
        if let Err(e) = self.fetcher.fetch(&release.url, &part).await {
            _ = fs::remove_file(&part).await;
            return Err(e);
        }
        self.rename(&part, &archive_path).await?;
        tracing::info!("Build {} downloaded to {}", version, archive_path.display());

        let staging = self.staging_dir(version);
        if let Err(e) = archive::unpack_zip_async(archive_path.clone(), staging.clone()).await {
            _ = fs::remove_dir_all(&staging).await;
            _ = fs::remove_file(&archive_path).await;
            return Err(e.into());
        }

        let dir = self.entry_dir(version);
        self.rename(&staging, &dir).await?;
        self.write_record(release).await?;
        _ = fs::remove_file(&archive_path).await;

        tracing::info!("Extracted build {} to {}", version, dir.display());
        Ok(dir)
    }

    async fn write_record(&self, release: &Release) -> Result<(), DownloadError> {
        let record = CachedArtifact {
            version: release.version.clone(),
            url: release.url.clone(),
            downloaded_at: Utc::now(),
            path: PathBuf::new(),
        };
        let path = self.record_path(&release.version);
        let io_err = |source| DownloadError::Io {
            path: path.clone(),
            source,
        };

        let json = serde_json::to_vec_pretty(&record)
            .map_err(|e| io_err(std::io::Error::other(e)))?;
        let tmp = path.with_extension(format!("json{}", PART_SUFFIX));
        fs::write(&tmp, json).await.map_err(io_err)?;
        fs::rename(&tmp, &path).await.map_err(io_err)
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<(), DownloadError> {
        fs::rename(from, to).await.map_err(|source| DownloadError::Io {
            path: to.to_path_buf(),
            source,
        })
    }

    /// Removes every trace of an incomplete entry for `version`.
    async fn discard_partial(&self, version: &Version) -> Result<(), DownloadError> {
        let dir = self.entry_dir(version);
        if fs::metadata(&dir).await.is_ok() {
            tracing::warn!("Discarding incomplete cache entry {}", dir.display());
            remove_path(&dir).await?;
        }
        for leftover in [
            self.staging_dir(version),
            self.part_path(version),
            self.archive_path(version),
            self.record_path(version),
        ] {
            if fs::symlink_metadata(&leftover).await.is_ok() {
                remove_path(&leftover).await?;
            }
        }
        Ok(())
    }

    /// Complete cache entries, oldest first (ties broken by version text).
    pub async fn list(&self) -> Result<Vec<CachedArtifact>, DownloadError> {
        let mut entries = Vec::new();
        for name in self.child_names().await? {
            let Some(token) = name.strip_suffix(RECORD_SUFFIX) else {
                continue;
            };
            let Ok(version) = token.parse::<Version>() else {
                continue;
            };
            if let Some(record) = self.read_record(&version).await {
                if self.has(&version).await {
                    entries.push(record);
                }
            }
        }

        entries.sort_by(|a, b| {
            a.downloaded_at
                .cmp(&b.downloaded_at)
                .then_with(|| a.version.as_str().cmp(b.version.as_str()))
        });
        Ok(entries)
    }

    /// Deletes leftovers of interrupted runs and the oldest builds beyond `keep`.
    /// Returns the evicted versions.
    pub async fn sweep(&self, keep: Retention) -> Result<Vec<Version>, DownloadError> {
        if fs::metadata(&self.root).await.is_err() {
            return Ok(Vec::new());
        }
        self.purge_leftovers().await?;

        let entries = self.list().await?;
        let excess = keep.excess(entries.len());
        tracing::info!(
            "{} cached builds found, keeping {}",
            entries.len(),
            keep
        );

        let mut evicted = Vec::new();
        for entry in entries.into_iter().take(excess) {
            remove_path(&self.record_path(&entry.version)).await?;
            remove_path(&entry.path).await?;
            tracing::info!("Old cached build {} has been deleted", entry.version);
            evicted.push(entry.version);
        }
        Ok(evicted)
    }

    async fn purge_leftovers(&self) -> Result<(), DownloadError> {
        for name in self.child_names().await? {
            let path = self.root.join(&name);
            let stale = if name.starts_with(STAGING_PREFIX)
                || name.ends_with(PART_SUFFIX)
                || name.ends_with(".zip")
            {
                true
            } else if let Some(token) = name.strip_suffix(RECORD_SUFFIX) {
                match token.parse::<Version>() {
                    Ok(version) => !self.has(&version).await,
                    Err(_) => false,
                }
            } else if let Ok(version) = name.parse::<Version>() {
                !self.has(&version).await
            } else {
                false
            };

            if stale {
                tracing::warn!("Removing leftover cache entry {}", path.display());
                remove_path(&path).await?;
            }
        }
        Ok(())
    }

    async fn child_names(&self) -> Result<Vec<String>, DownloadError> {
        let io_err = |source| DownloadError::Io {
            path: self.root.clone(),
            source,
        };
        let mut names = Vec::new();
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(io_err(e)),
        };
        while let Some(entry) = dir.next_entry().await.map_err(io_err)? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }
}

async fn remove_path(path: &Path) -> Result<(), DownloadError> {
    utils::remove_path(path)
        .await
        .map_err(|source| DownloadError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(feature = "mc-bedrock")]
mod http {
    use std::{path::Path, time::Duration};

    use async_trait::async_trait;
    use tokio::{fs::File, io::AsyncWriteExt};

    use super::ArtifactFetcher;
    use crate::{error::DownloadError, resolver::USER_AGENT};

    /// Streams an artifact over HTTP with a bounded overall timeout.
    #[derive(Debug, Clone)]
    pub struct HttpFetcher {
        client: reqwest::Client,
    }

    impl HttpFetcher {
        pub fn new(timeout: Duration) -> Result<Self, DownloadError> {
            let client = reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .timeout(timeout)
                .build()
                .map_err(|e| DownloadError::Network {
                    url: String::new(),
                    reason: e.to_string(),
                })?;
            Ok(Self { client })
        }
    }

    fn map_err(url: &str, e: reqwest::Error) -> DownloadError {
        if e.is_timeout() {
            DownloadError::Timeout {
                url: url.to_string(),
            }
        } else {
            DownloadError::Network {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }

    #[async_trait]
    impl ArtifactFetcher for HttpFetcher {
        async fn fetch(&self, url: &str, dest: &Path) -> Result<(), DownloadError> {
            let mut resp = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| map_err(url, e))?;

            let status = resp.status();
            if !status.is_success() {
                return Err(DownloadError::BadStatus {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }

            let io_err = |source| DownloadError::Io {
                path: dest.to_path_buf(),
                source,
            };
            let mut out = File::create(dest).await.map_err(io_err)?;
            while let Some(mut chunk) = resp.chunk().await.map_err(|e| map_err(url, e))? {
                out.write_all_buf(&mut chunk).await.map_err(io_err)?;
            }
            out.flush().await.map_err(io_err)?;
            Ok(())
        }
    }
}
