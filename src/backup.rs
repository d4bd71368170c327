use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime, Timelike};
use tokio::fs;

use crate::{
    archive,
    config::{BackupFormat, BackupMode, Retention},
    error::BackupError,
    instance::ServerInstance,
    transplant::PRESERVED_NAMES,
};

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const DEFAULT_DIR_NAME: &str = "server_backups";

/// One archived copy of an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub instance: String,
    pub created_at: NaiveDateTime,
    pub format: BackupFormat,
    pub path: PathBuf,
}

impl Snapshot {
    pub fn file_name(instance: &str, created_at: NaiveDateTime, format: BackupFormat) -> String {
        format!(
            "{}-{}.{}",
            created_at.format(TIMESTAMP_FORMAT),
            instance,
            format.extension()
        )
    }

    /// Inverse of [`Snapshot::file_name`]; `None` for foreign files.
    pub fn parse(instance: &str, path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let (stamp, rest) = name.split_once('-')?;
        let created_at = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
        let ext = rest.strip_prefix(instance)?.strip_prefix('.')?;
        let format = [BackupFormat::Zip, BackupFormat::TarGz]
            .into_iter()
            .find(|f| f.extension() == ext)?;

        Some(Self {
            instance: instance.to_string(),
            created_at,
            format,
            path: path.to_path_buf(),
        })
    }
}

/// Timestamped archives of instances, one directory per instance name.
#[derive(Debug, Clone)]
pub struct BackupStore {
    root: Option<PathBuf>,
    mode: BackupMode,
}

impl BackupStore {
    /// With `root` unset each instance backs up into a `server_backups`
    /// directory next to its own root.
    pub fn new(root: Option<PathBuf>, mode: BackupMode) -> Self {
        Self { root, mode }
    }

    pub fn instance_dir(&self, instance: &ServerInstance) -> PathBuf {
        let base = match &self.root {
            Some(root) => root.clone(),
            None => instance
                .root_dir
                .parent()
                .map(|p| p.join(DEFAULT_DIR_NAME))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DIR_NAME)),
        };
        base.join(&instance.name)
    }

    pub async fn snapshot(
        &self,
        instance: &ServerInstance,
        format: BackupFormat,
    ) -> Result<Snapshot, BackupError> {
        // File names carry whole seconds only.
        let now = Local::now().naive_local();
        let now = now.with_nanosecond(0).unwrap_or(now);
        self.snapshot_at(instance, format, now).await
    }

    pub(crate) async fn snapshot_at(
        &self,
        instance: &ServerInstance,
        format: BackupFormat,
        created_at: NaiveDateTime,
    ) -> Result<Snapshot, BackupError> {
        // The tree itself must be readable; individual missing files are tolerated.
        let _entries = fs::read_dir(&instance.root_dir)
            .await
            .map_err(|source| BackupError::UnreadableInstance {
                path: instance.root_dir.clone(),
                source,
            })?;

        let dir = self.instance_dir(instance);
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| BackupError::Io {
                path: dir.clone(),
                source,
            })?;

        let path = dir.join(Snapshot::file_name(&instance.name, created_at, format));
        if fs::metadata(&path).await.is_ok() {
            fs::remove_file(&path)
                .await
                .map_err(|source| BackupError::Io {
                    path: path.clone(),
                    source,
                })?;
            tracing::info!("Removed existing backup file {}", path.display());
        }

        let members = match self.mode {
            BackupMode::Full => None,
            BackupMode::Preserved => Some(PRESERVED_NAMES.to_vec()),
        };

        tracing::info!("Creating {:?} backup of {}", self.mode, instance);
        let files =
            archive::pack_async(instance.root_dir.clone(), path.clone(), format, members).await?;
        tracing::info!(
            "Compressed {} files of {} into {}",
            files,
            instance.name,
            path.display()
        );

        Ok(Snapshot {
            instance: instance.name.clone(),
            created_at,
            format,
            path,
        })
    }

    /// Snapshots of `instance`, oldest first (ties broken by file name).
    pub async fn list(&self, instance: &ServerInstance) -> Result<Vec<Snapshot>, BackupError> {
        let dir = self.instance_dir(instance);
        let io_err = |source| BackupError::Io {
            path: dir.clone(),
            source,
        };

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(e)),
        };

        let mut snapshots = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            if let Some(snapshot) = Snapshot::parse(&instance.name, &entry.path()) {
                snapshots.push(snapshot);
            }
        }

        snapshots.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.path.file_name().cmp(&b.path.file_name()))
        });
        Ok(snapshots)
    }

    /// Deletes the oldest snapshots of `instance` beyond `keep`. Returns the
    /// deleted paths.
    pub async fn sweep(
        &self,
        instance: &ServerInstance,
        keep: Retention,
    ) -> Result<Vec<PathBuf>, BackupError> {
        let snapshots = self.list(instance).await?;
        let excess = keep.excess(snapshots.len());
        tracing::info!(
            "{} backups of {} found, keeping {}",
            snapshots.len(),
            instance.name,
            keep
        );

        let mut removed = Vec::new();
        for snapshot in snapshots.into_iter().take(excess) {
            fs::remove_file(&snapshot.path)
                .await
                .map_err(|source| BackupError::Io {
                    path: snapshot.path.clone(),
                    source,
                })?;
            tracing::info!("Old backup {} has been deleted", snapshot.path.display());
            removed.push(snapshot.path);
        }
        Ok(removed)
    }
}
