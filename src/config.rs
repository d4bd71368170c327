use std::{
    cmp::Ordering,
    fmt::{self, Display},
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, VersionError};

/// Dotted numeric build token such as `1.21.44.01`.
///
/// The original text is kept so zero padding survives a round trip through
/// file names; ordering is numeric component by component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    components: Vec<u32>,
    raw: String,
}

impl Version {
    pub fn components(&self) -> &[u32] {
        &self.components
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Compares only the components both versions have, so `1.21.50`
    /// matches `1.21.50.07`. Behavior pack directories carry the short form.
    pub fn cmp_common_prefix(&self, other: &Version) -> Ordering {
        self.components
            .iter()
            .zip(&other.components)
            .map(|(a, b)| a.cmp(b))
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(VersionError::Empty);
        }

        if s.starts_with('.') || s.ends_with('.') {
            return Err(VersionError::UnknownVersionFormat(s.to_string()));
        }

        let components = s
            .split('.')
            .map(|part| {
                part.parse::<u32>()
                    .map_err(|_| VersionError::IncorrectComponent(part.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            components,
            raw: s.to_string(),
        })
    }
}

impl TryFrom<String> for Version {
    type Error = VersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.raw
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        for i in 0..len {
            let a = self.components.get(i).copied().unwrap_or(0);
            let b = other.components.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        self.raw.cmp(&other.raw)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Archive formats a snapshot can be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackupFormat {
    #[default]
    #[serde(rename = "zip")]
    Zip,
    #[serde(rename = "tar.gz", alias = "targz", alias = "tgz")]
    TarGz,
}

impl BackupFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            BackupFormat::Zip => "zip",
            BackupFormat::TarGz => "tar.gz",
        }
    }
}

impl Display for BackupFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

impl FromStr for BackupFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "zip" => Ok(BackupFormat::Zip),
            "tar.gz" | "targz" | "tgz" => Ok(BackupFormat::TarGz),
            other => Err(ConfigError::UnknownBackupFormat(other.to_string())),
        }
    }
}

/// What a snapshot contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupMode {
    /// The whole instance tree.
    #[default]
    Full,
    /// Only the preserved set (worlds and config files).
    Preserved,
}

impl FromStr for BackupMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(BackupMode::Full),
            "preserved" => Ok(BackupMode::Preserved),
            other => Err(ConfigError::UnknownBackupMode(other.to_string())),
        }
    }
}

/// How `server.properties` is carried into a new build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertiesPolicy {
    /// Keep the old file byte for byte.
    #[default]
    Preserve,
    /// Start from the new build's file and carry over old values for shared keys.
    Merge,
}

impl FromStr for PropertiesPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "preserve" => Ok(PropertiesPolicy::Preserve),
            "merge" => Ok(PropertiesPolicy::Merge),
            other => Err(ConfigError::UnknownPropertiesPolicy(other.to_string())),
        }
    }
}

/// Retention count. On the wire `-1` (any negative) means keep everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum Retention {
    KeepAll,
    Keep(usize),
}

impl Retention {
    /// Number of entries to delete out of `total`.
    pub fn excess(&self, total: usize) -> usize {
        match self {
            Retention::KeepAll => 0,
            Retention::Keep(n) => total.saturating_sub(*n),
        }
    }
}

impl From<i64> for Retention {
    fn from(value: i64) -> Self {
        if value < 0 {
            Retention::KeepAll
        } else {
            Retention::Keep(value as usize)
        }
    }
}

impl From<Retention> for i64 {
    fn from(value: Retention) -> Self {
        match value {
            Retention::KeepAll => -1,
            Retention::Keep(n) => n as i64,
        }
    }
}

impl Display for Retention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Retention::KeepAll => write!(f, "all"),
            Retention::Keep(n) => write!(f, "{}", n),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    pub download_dir: PathBuf,
    pub target_dir: Option<PathBuf>,
    pub backup_dir: Option<PathBuf>,
    pub backup_type: BackupFormat,
    pub backup_mode: BackupMode,
    pub keep_cache_num: Retention,
    pub keep_backup_num: Retention,
    pub skip_update_on_backup_failure: bool,
    pub leave_stopped: bool,
    pub properties_policy: PropertiesPolicy,
    pub resolve_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub stop_timeout_secs: u64,
    pub server_executable: String,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            target_dir: None,
            backup_dir: None,
            backup_type: BackupFormat::Zip,
            backup_mode: BackupMode::Full,
            keep_cache_num: Retention::Keep(0),
            keep_backup_num: Retention::KeepAll,
            skip_update_on_backup_failure: true,
            leave_stopped: false,
            properties_policy: PropertiesPolicy::Preserve,
            resolve_timeout_secs: 10,
            download_timeout_secs: 600,
            stop_timeout_secs: 30,
            server_executable: "bedrock_server".to_string(),
        }
    }
}

impl UpdaterConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        serde_json::from_slice(&data).map_err(|source| ConfigError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.download_dir.join("logs")
    }
}

pub fn default_download_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("bedguard"))
        .unwrap_or_else(|| PathBuf::from(".bedguard-cache"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn versions_order_numerically() {
        assert!(v("1.21.44.01") > v("1.21.43.99"));
        assert!(v("1.10.0") > v("1.9.9"));
        assert!(v("1.2") < v("1.2.1"));
        assert_eq!(v("1.21.44.01").to_string(), "1.21.44.01");
        assert_eq!(v("1.21.44.01").components(), &[1, 21, 44, 1]);
    }

    #[test]
    fn padded_versions_stay_distinct() {
        assert_ne!(v("1.2.01"), v("1.2.1"));
        assert_ne!(v("1.2.01").cmp(&v("1.2.1")), Ordering::Equal);
    }

    #[test]
    fn common_prefix_ignores_extra_components() {
        assert_eq!(v("1.21.50").cmp_common_prefix(&v("1.21.50.07")), Ordering::Equal);
        assert_eq!(v("1.21.51").cmp_common_prefix(&v("1.21.50.07")), Ordering::Greater);
        assert_eq!(v("1.21.40").cmp_common_prefix(&v("1.21.50.07")), Ordering::Less);
    }

    #[test]
    fn rejects_bad_versions() {
        assert!(matches!("".parse::<Version>(), Err(VersionError::Empty)));
        assert!(matches!(
            "1.x.3".parse::<Version>(),
            Err(VersionError::IncorrectComponent(_))
        ));
        assert!("1.2.".parse::<Version>().is_err());
    }

    #[test]
    fn retention_from_signed_counts() {
        assert_eq!(Retention::from(-1), Retention::KeepAll);
        assert_eq!(Retention::from(-7), Retention::KeepAll);
        assert_eq!(Retention::from(0), Retention::Keep(0));
        assert_eq!(Retention::Keep(2).excess(5), 3);
        assert_eq!(Retention::Keep(9).excess(5), 0);
        assert_eq!(Retention::KeepAll.excess(5), 0);
    }

    #[test]
    fn settings_file_uses_defaults_for_missing_keys() {
        let json = r#"{ "download_dir": "/tmp/dl", "backup_type": "tar.gz", "keep_backup_num": 3 }"#;
        let cfg: UpdaterConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.download_dir, PathBuf::from("/tmp/dl"));
        assert_eq!(cfg.backup_type, BackupFormat::TarGz);
        assert_eq!(cfg.keep_backup_num, Retention::Keep(3));
        assert_eq!(cfg.keep_cache_num, Retention::Keep(0));
        assert!(cfg.skip_update_on_backup_failure);
        assert_eq!(cfg.resolve_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn parses_enums_from_cli_text() {
        assert_eq!("ZIP".parse::<BackupFormat>().unwrap(), BackupFormat::Zip);
        assert_eq!("tgz".parse::<BackupFormat>().unwrap(), BackupFormat::TarGz);
        assert!("7z".parse::<BackupFormat>().is_err());
        assert_eq!(
            "merge".parse::<PropertiesPolicy>().unwrap(),
            PropertiesPolicy::Merge
        );
        assert_eq!(
            "preserved".parse::<BackupMode>().unwrap(),
            BackupMode::Preserved
        );
    }
}
