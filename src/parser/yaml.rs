use super::types::{FlowHeader, WorkspaceConfig};
use crate::error::RunnerError;
use serde::Deserialize;
use std::path::Path;

/// File names that hold workspace config rather than flows
pub const CONFIG_FILE_NAMES: [&str; 2] = ["config.yaml", "config.yml"];

pub fn is_config_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or(false, |n| CONFIG_FILE_NAMES.contains(&n))
}

pub fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map_or(false, |ext| ext == "yaml" || ext == "yml")
}

/// Parse one workspace config file
pub fn parse_workspace_config(path: &Path) -> Result<WorkspaceConfig, RunnerError> {
    let content = std::fs::read_to_string(path).map_err(|e| RunnerError::ConfigParse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let value: serde_yaml::Value =
        serde_yaml::from_str(&content).map_err(|e| RunnerError::ConfigParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    from_mapping(value).map_err(|message| RunnerError::ConfigParse {
        path: path.to_path_buf(),
        message,
    })
}

/// Deserialize only from a YAML mapping; serde would otherwise accept a
/// sequence for a struct with all-default fields
fn from_mapping<T: serde::de::DeserializeOwned>(value: serde_yaml::Value) -> Result<T, String> {
    match value {
        serde_yaml::Value::Mapping(_) => serde_yaml::from_value(value).map_err(|e| e.to_string()),
        other => Err(format!("expected a mapping, found {}", kind_of(&other))),
    }
}

fn kind_of(value: &serde_yaml::Value) -> &'static str {
    match value {
        serde_yaml::Value::Null => "nothing",
        serde_yaml::Value::Bool(_) => "a boolean",
        serde_yaml::Value::Number(_) => "a number",
        serde_yaml::Value::String(_) => "a string",
        serde_yaml::Value::Sequence(_) => "a sequence",
        serde_yaml::Value::Mapping(_) => "a mapping",
        serde_yaml::Value::Tagged(_) => "a tagged value",
    }
}

/// Load the workspace config at the root of `dir`
///
/// The first config file that exists and parses wins. Files that fail to
/// parse are logged and skipped; with none usable the defaults apply.
pub fn load_workspace_config(dir: &Path) -> WorkspaceConfig {
    for name in CONFIG_FILE_NAMES {
        let path = dir.join(name);
        if !path.is_file() {
            continue;
        }
        match parse_workspace_config(&path) {
            Ok(config) => {
                log::debug!("Using workspace config {}", path.display());
                return config;
            }
            Err(e) => log::warn!("Skipping workspace config: {}", e),
        }
    }
    WorkspaceConfig::default()
}

/// Parse the header (first YAML document) of a flow file
pub fn parse_flow_header(path: &Path) -> Result<FlowHeader, RunnerError> {
    let content = std::fs::read_to_string(path).map_err(|e| RunnerError::ConfigParse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    parse_flow_header_content(&content).map_err(|message| RunnerError::ConfigParse {
        path: path.to_path_buf(),
        message,
    })
}

fn parse_flow_header_content(content: &str) -> Result<FlowHeader, String> {
    let first = serde_yaml::Deserializer::from_str(content)
        .next()
        .ok_or_else(|| "empty file".to_string())?;
    let value = serde_yaml::Value::deserialize(first).map_err(|e| e.to_string())?;
    from_mapping(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_header_reads_only_first_document() {
        let yaml = r#"
appId: com.example.app
name: Login
tags:
  - auth
  - smoke
---
- launchApp
- tapOn: "Login"
"#;
        let header = parse_flow_header_content(yaml).unwrap();
        assert_eq!(header.name.as_deref(), Some("Login"));
        assert_eq!(header.tags.unwrap(), vec!["auth", "smoke"]);
    }

    #[test]
    fn test_header_without_tags() {
        let header = parse_flow_header_content("appId: com.example.app\n---\n- launchApp\n").unwrap();
        assert!(header.tags.is_none());
    }

    #[test]
    fn test_header_with_invalid_tags_fails() {
        assert!(parse_flow_header_content("tags: smoke\n").is_err());
        assert!(parse_flow_header_content("- launchApp\n").is_err());
    }

    #[test]
    fn test_invalid_config_yaml_falls_through_to_yml() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("config.yaml"), "flows: {not: [a list\n").unwrap();
        fs::write(dir.path().join("config.yml"), "flows: ['auth/*']\n").unwrap();

        let config = load_workspace_config(dir.path());
        assert_eq!(config.flows, vec!["auth/*".to_string()]);
    }

    #[test]
    fn test_sequence_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "- '*'\n").unwrap();
        assert!(parse_workspace_config(&path).is_err());
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        let dir = TempDir::new().unwrap();
        assert_eq!(load_workspace_config(dir.path()), WorkspaceConfig::default());
    }

    #[test]
    fn test_config_file_names() {
        assert!(is_config_file(Path::new("/w/config.yaml")));
        assert!(is_config_file(Path::new("config.yml")));
        assert!(!is_config_file(Path::new("/w/login.yaml")));
        assert!(is_yaml_file(Path::new("a.yml")));
        assert!(!is_yaml_file(Path::new("a.json")));
    }
}
