use std::{
    fmt::{self, Display},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::config::Version;

/// Directory inside every instance where bedguard keeps its own state.
pub const STATE_DIR: &str = ".bedguard";
const APPLIED_FILE: &str = "applied.json";
const BEHAVIOR_PACKS: &str = "behavior_packs";
const VANILLA_PREFIX: &str = "vanilla_";

/// A dedicated server installation, identified by its root directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerInstance {
    pub root_dir: PathBuf,
    pub name: String,
}

impl ServerInstance {
    pub fn new<P: Into<PathBuf>>(root_dir: P) -> Self {
        let root_dir = root_dir.into();
        let name = root_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root_dir.to_string_lossy().into_owned());

        Self { root_dir, name }
    }

    /// Same instance name placed under another parent directory.
    pub fn relocated(&self, parent: &Path) -> Self {
        Self {
            root_dir: parent.join(&self.name),
            name: self.name.clone(),
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root_dir.join(STATE_DIR)
    }

    pub fn applied_marker_path(&self) -> PathBuf {
        self.state_dir().join(APPLIED_FILE)
    }

    /// Reads the applied-version marker. Missing or unreadable markers count as
    /// "nothing applied".
    pub async fn applied_marker(&self) -> Option<AppliedMarker> {
        let data = fs::read(self.applied_marker_path()).await.ok()?;
        match serde_json::from_slice(&data) {
            Ok(marker) => Some(marker),
            Err(e) => {
                tracing::warn!(instance = %self.name, "ignoring corrupt applied marker: {}", e);
                None
            }
        }
    }

    /// Highest `behavior_packs/vanilla_<version>` directory, which tracks the
    /// installed server build.
    pub async fn installed_version(&self) -> Option<Version> {
        let mut entries = fs::read_dir(self.root_dir.join(BEHAVIOR_PACKS)).await.ok()?;
        let mut latest: Option<Version> = None;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(version) = name
                .to_str()
                .and_then(|n| n.strip_prefix(VANILLA_PREFIX))
                .and_then(|v| v.parse::<Version>().ok())
            else {
                continue;
            };
            if latest.as_ref().is_none_or(|l| version > *l) {
                latest = Some(version);
            }
        }
        latest
    }

    pub async fn write_applied_marker(&self, marker: &AppliedMarker) -> std::io::Result<()> {
        fs::create_dir_all(self.state_dir()).await?;
        let json = serde_json::to_vec_pretty(marker).map_err(std::io::Error::other)?;
        let tmp = self.state_dir().join(format!("{}.tmp", APPLIED_FILE));
        fs::write(&tmp, json).await?;
        fs::rename(tmp, self.applied_marker_path()).await
    }
}

impl Display for ServerInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.root_dir.display())
    }
}

/// Records which build was last installed into an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMarker {
    pub version: Version,
    pub applied_at: DateTime<Utc>,
}

impl AppliedMarker {
    pub fn now(version: Version) -> Self {
        Self {
            version,
            applied_at: Utc::now(),
        }
    }
}
