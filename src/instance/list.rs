use std::{collections::HashSet, path::PathBuf};

use crate::error::ConfigError;

use super::ServerInstance;

/// Parses an instance list: one directory per line, `#` comments and blank
/// lines ignored, `~/` expanded, duplicates dropped.
pub fn parse_instance_list(text: &str) -> Vec<ServerInstance> {
    let mut seen = HashSet::new();
    let mut instances = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let path = expand_home(line);
        if seen.insert(path.clone()) {
            instances.push(ServerInstance::new(path));
        }
    }

    instances
}

pub async fn load_instance_list(path: &std::path::Path) -> Result<Vec<ServerInstance>, ConfigError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(parse_instance_list(&text))
}

fn expand_home(line: &str) -> PathBuf {
    if let Some(rest) = line.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_comments_blanks_and_duplicates() {
        let text = "\n# main servers\n/srv/a\n   /srv/b  \n\n#/srv/c\n/srv/a\n";
        let list = parse_instance_list(text);
        let roots: Vec<_> = list.iter().map(|i| i.root_dir.clone()).collect();
        assert_eq!(roots, vec![PathBuf::from("/srv/a"), PathBuf::from("/srv/b")]);
        assert_eq!(list[1].name, "b");
    }

    #[test]
    fn empty_list_is_empty() {
        assert!(parse_instance_list("# nothing here\n\n").is_empty());
    }

    #[tokio::test]
    async fn missing_list_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_instance_list(&dir.path().join("nope.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
