use std::{
    collections::HashMap,
    fmt::{self, Display},
    io,
    path::{Path, PathBuf},
};

use tokio::fs;

use crate::{
    config::PropertiesPolicy,
    error::TransplantError,
    instance::ServerInstance,
    utils,
};

pub const WORLDS: &str = "worlds";
pub const ALLOWLIST: &str = "allowlist.json";
pub const PERMISSIONS: &str = "permissions.json";
pub const SERVER_PROPERTIES: &str = "server.properties";

/// Top-level entries of an instance that survive a build replacement.
pub const PRESERVED_NAMES: [&str; 4] = [WORLDS, ALLOWLIST, PERMISSIONS, SERVER_PROPERTIES];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PreservedItem {
    Worlds,
    Allowlist,
    Permissions,
    ServerProperties,
}

impl PreservedItem {
    pub const ALL: [PreservedItem; 4] = [
        PreservedItem::Worlds,
        PreservedItem::Allowlist,
        PreservedItem::Permissions,
        PreservedItem::ServerProperties,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            PreservedItem::Worlds => WORLDS,
            PreservedItem::Allowlist => ALLOWLIST,
            PreservedItem::Permissions => PERMISSIONS,
            PreservedItem::ServerProperties => SERVER_PROPERTIES,
        }
    }

    /// Losing this item is data loss, so failing to copy it aborts the update.
    pub fn is_critical(&self) -> bool {
        matches!(self, PreservedItem::Worlds)
    }
}

impl Display for PreservedItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file_name())
    }
}

/// Manifest of the preserved items found in an instance, with their held copies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreservedStateSet {
    pub holding_dir: PathBuf,
    pub items: Vec<PreservedItem>,
}

impl PreservedStateSet {
    pub fn contains(&self, item: PreservedItem) -> bool {
        self.items.contains(&item)
    }

    pub fn held_path(&self, item: PreservedItem) -> PathBuf {
        self.holding_dir.join(item.file_name())
    }
}

/// Carries worlds and configuration from an old tree into an updated one.
#[derive(Debug, Clone)]
pub struct ConfigTransplanter {
    holding_root: PathBuf,
    policy: PropertiesPolicy,
}

impl ConfigTransplanter {
    pub fn new<P: Into<PathBuf>>(holding_root: P, policy: PropertiesPolicy) -> Self {
        Self {
            holding_root: holding_root.into(),
            policy,
        }
    }

    /// Copies every present preserved item of `source` into a holding directory.
    /// Missing items are logged and skipped.
    pub async fn extract(
        &self,
        source: &ServerInstance,
    ) -> Result<PreservedStateSet, TransplantError> {
        let holding_dir = self.holding_root.join(&source.name);
        utils::remove_path(&holding_dir)
            .await
            .map_err(|source| TransplantError::Io {
                path: holding_dir.clone(),
                source,
            })?;
        fs::create_dir_all(&holding_dir)
            .await
            .map_err(|source| TransplantError::Io {
                path: holding_dir.clone(),
                source,
            })?;

        let mut items = Vec::new();
        for item in PreservedItem::ALL {
            let path = source.root_dir.join(item.file_name());
            let item_err = |e| {
                if item.is_critical() {
                    TransplantError::WorldData {
                        path: path.clone(),
                        source: e,
                    }
                } else {
                    TransplantError::Io {
                        path: path.clone(),
                        source: e,
                    }
                }
            };

            match fs::symlink_metadata(&path).await {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::warn!("{} has no {}, skipping", source.name, item);
                    continue;
                }
                Err(e) => return Err(item_err(e)),
            }

            utils::copy_tree_async(&path, &holding_dir.join(item.file_name()))
                .await
                .map_err(item_err)?;
            tracing::debug!("held {} of {}", item, source.name);
            items.push(item);
        }

        Ok(PreservedStateSet { holding_dir, items })
    }

    /// Writes the held items into `target_dir`, overwriting. `build_dir` is the
    /// new build, consulted when properties are merged.
    pub async fn apply(
        &self,
        set: &PreservedStateSet,
        target_dir: &Path,
        build_dir: &Path,
    ) -> Result<(), TransplantError> {
        for item in &set.items {
            let held = set.held_path(*item);
            let target = target_dir.join(item.file_name());

            if *item == PreservedItem::ServerProperties && self.policy == PropertiesPolicy::Merge {
                let fresh = build_dir.join(SERVER_PROPERTIES);
                if fs::metadata(&fresh).await.is_ok() {
                    self.merge_properties(&held, &fresh, &target).await?;
                    continue;
                }
                tracing::warn!("new build has no {}, keeping the old file", SERVER_PROPERTIES);
            }

            utils::copy_tree_async(&held, &target).await.map_err(|e| {
                if item.is_critical() {
                    TransplantError::WorldData {
                        path: target.clone(),
                        source: e,
                    }
                } else {
                    TransplantError::Io {
                        path: target.clone(),
                        source: e,
                    }
                }
            })?;
            tracing::info!("Restored {} into {}", item, target_dir.display());
        }
        Ok(())
    }

    /// Drops the holding copy once it is no longer needed.
    pub async fn discard(&self, set: &PreservedStateSet) {
        if let Err(e) = utils::remove_path(&set.holding_dir).await {
            tracing::warn!("could not remove {}: {}", set.holding_dir.display(), e);
        }
    }

    async fn merge_properties(
        &self,
        old: &Path,
        fresh: &Path,
        target: &Path,
    ) -> Result<(), TransplantError> {
        let read = |path: &Path| {
            let path = path.to_path_buf();
            async move {
                fs::read_to_string(&path)
                    .await
                    .map_err(|source| TransplantError::Io { path, source })
            }
        };
        let merged = merge_properties(&read(old).await?, &read(fresh).await?);

        let tmp = target.with_extension("properties.tmp");
        fs::write(&tmp, merged)
            .await
            .map_err(|source| TransplantError::Io {
                path: tmp.clone(),
                source,
            })?;
        fs::rename(&tmp, target)
            .await
            .map_err(|source| TransplantError::Io {
                path: target.to_path_buf(),
                source,
            })?;
        tracing::info!("Updated {}", target.display());
        Ok(())
    }
}

fn parse_property(line: &str) -> Option<(&str, &str)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    trimmed
        .split_once('=')
        .map(|(k, v)| (k.trim(), v.trim()))
}

/// Lays the old values over the new file: shared keys take the old value,
/// new-only keys keep theirs, old-only keys are dropped. Comments and blank
/// lines of the new file are kept as they are.
pub fn merge_properties(old: &str, fresh: &str) -> String {
    let old_values: HashMap<&str, &str> = old.lines().filter_map(parse_property).collect();
    let fresh_keys: Vec<&str> = fresh
        .lines()
        .filter_map(parse_property)
        .map(|(k, _)| k)
        .collect();

    for key in old_values.keys() {
        if !fresh_keys.contains(key) {
            tracing::debug!("(server.properties) {} (dropped)", key);
        }
    }

    let mut out = String::with_capacity(fresh.len());
    for line in fresh.lines() {
        match parse_property(line) {
            Some((key, value)) => {
                let value = match old_values.get(key) {
                    Some(old) => {
                        tracing::debug!("(server.properties) {}={} (use old)", key, old);
                        *old
                    }
                    None => {
                        tracing::debug!("(server.properties) {}={} (use new)", key, value);
                        value
                    }
                };
                out.push_str(key);
                out.push('=');
                out.push_str(value);
            }
            None => out.push_str(line),
        }
        out.push('\n');
    }
    out
}
