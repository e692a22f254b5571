use super::types::ReportBatch;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;

/// Submission seam for aggregated results
#[async_trait]
pub trait ResultReporter: Send + Sync {
    async fn submit(&self, batch: &ReportBatch) -> Result<()>;
}

/// Writes the batch as pretty JSON to a file, or stdout when no path is set
pub struct JsonFileReporter {
    output: Option<PathBuf>,
}

impl JsonFileReporter {
    pub fn new(output: Option<PathBuf>) -> Self {
        Self { output }
    }
}

#[async_trait]
impl ResultReporter for JsonFileReporter {
    async fn submit(&self, batch: &ReportBatch) -> Result<()> {
        let json = serde_json::to_string_pretty(batch.results())?;

        if let Some(path) = &self.output {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, json)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            log::info!("Results saved to: {}", path.display());
        } else {
            println!("{}", json);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::types::{MaestroFlowResult, TestCaseStatus};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_writes_results_array() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("results.json");
        let batch = ReportBatch::try_new(vec![MaestroFlowResult {
            name: "home".to_string(),
            path: ".maestro/home.yml".to_string(),
            status: TestCaseStatus::Passed,
            error_message: None,
            duration: 10500,
            retry_count: 0,
            tags: vec![],
            properties: BTreeMap::new(),
        }])
        .unwrap();

        JsonFileReporter::new(Some(path.clone()))
            .submit(&batch)
            .await
            .unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written[0]["name"], "home");
        assert_eq!(written[0]["status"], "PASSED");
        assert_eq!(written[0]["duration"], 10500);
    }
}
