use std::{io, path::PathBuf};

use thiserror::Error;

use crate::config::Version;

#[derive(Debug, Clone, Error)]
pub enum VersionError {
    #[error("Empty version token")]
    Empty,

    #[error("Incorrect version component: {0}")]
    IncorrectComponent(String),

    #[error("Unrecognized version format: {0}")]
    UnknownVersionFormat(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown backup format: {0}")]
    UnknownBackupFormat(String),

    #[error("Unknown backup mode: {0}")]
    UnknownBackupMode(String),

    #[error("Unknown properties policy: {0}")]
    UnknownPropertiesPolicy(String),

    #[error("Failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("Malformed settings file {path}: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    #[error("Network error while fetching {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("{url} answered with status {status}")]
    BadStatus { url: String, status: u16 },

    #[error("No download link found on {url}, page structure may have changed")]
    LinkNotFound { url: String },

    #[error("Unable to read a version from {0}")]
    InvalidVersion(String),
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Archive I/O failed on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("Corrupt zip archive {path}: {reason}")]
    Zip { path: PathBuf, reason: String },

    #[error("Walking {path} failed: {reason}")]
    Walk { path: PathBuf, reason: String },

    #[error("Archive worker panicked")]
    Join,
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Download of {url} timed out")]
    Timeout { url: String },

    #[error("Network error while downloading {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("{url} answered with status {status}")]
    BadStatus { url: String, status: u16 },

    #[error("Cache I/O failed on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("Extraction failed: {0}")]
    Extract(#[from] ArchiveError),

    #[error("Download of version {0} already failed earlier in this run")]
    PreviouslyFailed(Version),
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Instance directory {path} is unreadable: {source}")]
    UnreadableInstance { path: PathBuf, source: io::Error },

    #[error("Backup I/O failed on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("Archiving failed: {0}")]
    Archive(#[from] ArchiveError),
}

#[derive(Debug, Error)]
pub enum TransplantError {
    #[error("Copying world data from {path} failed: {source}")]
    WorldData { path: PathBuf, source: io::Error },

    #[error("Transplant I/O failed on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("No server executable at {0}")]
    MissingExecutable(PathBuf),

    #[error("Failed to spawn server in {path}: {source}")]
    SpawnFailed { path: PathBuf, source: io::Error },

    #[error("Server in {0} did not exit after a forced stop")]
    StopFailed(PathBuf),

    #[error("Failed to open server log {path}: {source}")]
    LogFile { path: PathBuf, source: io::Error },

    #[error("Scanning the process table failed: {0}")]
    Scan(String),
}

/// Failure of a single instance's update. Never aborts the run.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("Backup failed earlier in this run, update skipped")]
    BackupFailed,

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error(transparent)]
    Transplant(#[from] TransplantError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("Installing build into {path} failed: {source}")]
    Install { path: PathBuf, source: io::Error },

    #[error("Writing applied marker {path} failed: {source}")]
    Marker { path: PathBuf, source: io::Error },
}

/// Failure that ends the whole run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("No server instances configured")]
    NoInstances,

    #[error("Another run holds the lock at {0}")]
    Locked(PathBuf),

    #[error("Lock file {path} unusable: {source}")]
    LockIo { path: PathBuf, source: io::Error },

    #[error("Version resolution failed: {0}")]
    Resolve(#[from] ResolveError),
}
