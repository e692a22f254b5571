use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Directory-level flow selection config (`config.yaml` / `config.yml`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceConfig {
    #[serde(default = "default_flow_patterns")]
    pub flows: Vec<String>,
    #[serde(default)]
    pub include_tags: Vec<String>,
    #[serde(default)]
    pub exclude_tags: Vec<String>,
    /// Recognized but never applied
    #[serde(default)]
    pub execution_order: Option<serde_yaml::Mapping>,
}

fn default_flow_patterns() -> Vec<String> {
    vec!["*".to_string()]
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            flows: default_flow_patterns(),
            include_tags: Vec::new(),
            exclude_tags: Vec::new(),
            execution_order: None,
        }
    }
}

/// Header of a flow file: the first YAML document
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlowHeader {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

/// A candidate flow file with its declared tags
#[derive(Debug, Clone, PartialEq)]
pub struct FlowSpec {
    pub path: PathBuf,
    pub tags: Vec<String>,
}

/// Effective include/exclude tags for one discovery call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagFilter {
    pub include: BTreeSet<String>,
    pub exclude: BTreeSet<String>,
}

impl TagFilter {
    /// Union of CLI-supplied and config-supplied tags
    pub fn merged(
        cli_include: &[String],
        cli_exclude: &[String],
        config: &WorkspaceConfig,
    ) -> Self {
        Self {
            include: cli_include
                .iter()
                .chain(config.include_tags.iter())
                .cloned()
                .collect(),
            exclude: cli_exclude
                .iter()
                .chain(config.exclude_tags.iter())
                .cloned()
                .collect(),
        }
    }

    pub fn matches(&self, tags: &[String]) -> bool {
        let included =
            self.include.is_empty() || tags.iter().any(|t| self.include.contains(t));
        let excluded =
            !self.exclude.is_empty() && tags.iter().any(|t| self.exclude.contains(t));
        included && !excluded
    }
}
