//! Flow discovery
//!
//! Turns a flow path argument into the ordered list of flow files to run.

use super::types::{FlowSpec, TagFilter, WorkspaceConfig};
use super::yaml::{is_config_file, is_yaml_file, load_workspace_config, parse_flow_header};
use crate::error::RunnerError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Resolve `flow_path` (relative to `working_directory`) to flow files
///
/// An explicit file is returned as-is, without tag filtering. A directory is
/// expanded through its workspace config and filtered by the union of CLI
/// and config tags.
pub fn discover(
    working_directory: &Path,
    flow_path: &Path,
    include_tags: &[String],
    exclude_tags: &[String],
) -> Result<Vec<PathBuf>, RunnerError> {
    let resolved: PathBuf = working_directory.join(flow_path).components().collect();

    if resolved.is_file() {
        return Ok(vec![resolved]);
    }

    if !resolved.is_dir() {
        return Err(RunnerError::Precondition(format!(
            "Flow path does not exist: {}",
            resolved.display()
        )));
    }

    let config = load_workspace_config(&resolved);
    if config.execution_order.is_some() {
        log::warn!(
            "executionOrder in the workspace config is not supported; flows run in file order"
        );
    }

    let filter = TagFilter::merged(include_tags, exclude_tags, &config);
    let candidates = collect_candidates(&resolved, &config)?;
    let flows = read_flow_specs(&candidates);

    Ok(flows
        .into_iter()
        .filter(|flow| filter.matches(&flow.tags))
        .map(|flow| flow.path)
        .collect())
}

/// Discover several flow paths, concatenated in argument order
pub fn discover_all(
    working_directory: &Path,
    flow_paths: &[PathBuf],
    include_tags: &[String],
    exclude_tags: &[String],
) -> Result<Vec<PathBuf>, RunnerError> {
    let mut all = Vec::new();
    for flow_path in flow_paths {
        all.extend(discover(
            working_directory,
            flow_path,
            include_tags,
            exclude_tags,
        )?);
    }
    Ok(all)
}

/// Glob the config patterns against `dir`, keeping YAML files that are not
/// themselves config files. Patterns are not recursive unless they say so.
fn collect_candidates(dir: &Path, config: &WorkspaceConfig) -> Result<Vec<PathBuf>, RunnerError> {
    let base = glob::Pattern::escape(&dir.to_string_lossy());
    let mut seen = HashSet::new();
    let mut files = Vec::new();

    for pattern in &config.flows {
        let full = format!("{}/{}", base.trim_end_matches('/'), pattern);
        let paths = glob::glob_with(&full, match_options()).map_err(|e| RunnerError::ConfigParse {
            path: dir.to_path_buf(),
            message: format!("invalid flow pattern '{}': {}", pattern, e),
        })?;

        for entry in paths {
            let path = match entry {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("Skipping unreadable path: {}", e);
                    continue;
                }
            };
            if !path.is_file() || !is_yaml_file(&path) || is_config_file(&path) {
                continue;
            }
            if seen.insert(path.clone()) {
                files.push(path);
            }
        }
    }

    Ok(files)
}

fn match_options() -> glob::MatchOptions {
    glob::MatchOptions {
        require_literal_leading_dot: true,
        ..Default::default()
    }
}

fn read_flow_specs(paths: &[PathBuf]) -> Vec<FlowSpec> {
    paths
        .iter()
        .filter_map(|path| match parse_flow_header(path) {
            Ok(header) => Some(FlowSpec {
                path: path.clone(),
                tags: header.tags.unwrap_or_default(),
            }),
            Err(e) => {
                log::warn!("Skipping flow: {}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn flow(dir: &Path, name: &str, tags: &[&str]) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let header = if tags.is_empty() {
            "appId: com.example\n".to_string()
        } else {
            format!("appId: com.example\ntags: [{}]\n", tags.join(", "))
        };
        fs::write(&path, format!("{}---\n- launchApp\n", header)).unwrap();
        path
    }

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_explicit_file_bypasses_tag_filters() {
        let dir = TempDir::new().unwrap();
        let path = flow(dir.path(), "smoke.yaml", &["smoke"]);

        let found = discover(dir.path(), Path::new("smoke.yaml"), &[], &strings(&["smoke"])).unwrap();
        assert_eq!(found, vec![path]);
    }

    #[test]
    fn test_directory_defaults_are_non_recursive() {
        let dir = TempDir::new().unwrap();
        flow(dir.path(), "a.yaml", &[]);
        flow(dir.path(), "b.yml", &[]);
        flow(dir.path(), "nested/c.yaml", &[]);
        fs::write(dir.path().join("notes.txt"), "appId: x\n").unwrap();
        fs::write(dir.path().join(".hidden.yaml"), "appId: x\n").unwrap();
        fs::write(dir.path().join("config.yaml"), "flows: ['*']\n").unwrap();

        let found = discover(dir.path(), Path::new("."), &[], &[]).unwrap();
        assert_eq!(names(&found), vec!["a.yaml", "b.yml"]);
    }

    #[test]
    fn test_pattern_can_target_subdirectory() {
        let dir = TempDir::new().unwrap();
        flow(dir.path(), "top.yaml", &[]);
        flow(dir.path(), "auth/login.yaml", &[]);
        flow(dir.path(), "auth/config.yml", &[]);
        fs::write(dir.path().join("config.yml"), "flows:\n  - 'auth/*'\n").unwrap();

        let found = discover(dir.path(), Path::new("."), &[], &[]).unwrap();
        assert_eq!(names(&found), vec!["login.yaml"]);
    }

    #[test]
    fn test_non_yaml_matches_are_dropped() {
        let dir = TempDir::new().unwrap();
        flow(dir.path(), "login.yaml", &[]);
        fs::write(dir.path().join("login.json"), "{}").unwrap();
        fs::write(dir.path().join("config.yaml"), "flows: ['login.*']\n").unwrap();

        let found = discover(dir.path(), Path::new("."), &[], &[]).unwrap();
        assert_eq!(names(&found), vec!["login.yaml"]);
    }

    #[test]
    fn test_broken_flow_is_skipped() {
        let dir = TempDir::new().unwrap();
        flow(dir.path(), "good.yaml", &[]);
        fs::write(dir.path().join("bad.yaml"), "tags: [unterminated\n").unwrap();

        let found = discover(dir.path(), Path::new("."), &[], &[]).unwrap();
        assert_eq!(names(&found), vec!["good.yaml"]);
    }

    #[test]
    fn test_config_and_cli_tags_combine() {
        let dir = TempDir::new().unwrap();
        flow(dir.path(), "login.yaml", &["auth"]);
        flow(dir.path(), "login_smoke.yaml", &["auth", "smoke"]);
        flow(dir.path(), "home.yaml", &["home"]);
        fs::write(dir.path().join("config.yaml"), "includeTags: [auth]\n").unwrap();

        let found = discover(dir.path(), Path::new("."), &[], &strings(&["smoke"])).unwrap();
        assert_eq!(names(&found), vec!["login.yaml"]);
    }

    #[test]
    fn test_execution_order_is_ignored() {
        let dir = TempDir::new().unwrap();
        flow(dir.path(), "a.yaml", &[]);
        flow(dir.path(), "b.yaml", &[]);
        fs::write(
            dir.path().join("config.yaml"),
            "executionOrder:\n  continueOnFailure: false\n  flowsOrder: [b, a]\n",
        )
        .unwrap();

        let found = discover(dir.path(), Path::new("."), &[], &[]).unwrap();
        assert_eq!(names(&found), vec!["a.yaml", "b.yaml"]);
    }

    #[test]
    fn test_missing_path_is_a_precondition_error() {
        let dir = TempDir::new().unwrap();
        let err = discover(dir.path(), Path::new("nope"), &[], &[]).unwrap_err();
        assert!(matches!(err, RunnerError::Precondition(_)));
    }

    #[test]
    fn test_discover_all_keeps_argument_order() {
        let dir = TempDir::new().unwrap();
        flow(dir.path(), "b.yaml", &[]);
        flow(dir.path(), "a.yaml", &[]);

        let found = discover_all(
            dir.path(),
            &[PathBuf::from("b.yaml"), PathBuf::from("a.yaml")],
            &[],
            &[],
        )
        .unwrap();
        assert_eq!(names(&found), vec!["b.yaml", "a.yaml"]);
    }
}
