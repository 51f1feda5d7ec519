use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const BATCH_RESULTS_FILE: &str = "batch_results.json";

/// Result of one generation attempt, as recorded in the batch summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum GenerationOutcome {
    Success {
        filename: String,
        path: PathBuf,
        resolution: String,
        aspect_ratio: String,
        reference_images_used: usize,
    },
    Error {
        filename: String,
        error: String,
    },
}

impl GenerationOutcome {
    pub fn filename(&self) -> &str {
        match self {
            Self::Success { filename, .. } | Self::Error { filename, .. } => filename,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Ordered per-item outcomes of one batch run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub results: Vec<GenerationOutcome>,
    pub results_file: Option<PathBuf>,
}

impl BatchReport {
    pub fn empty() -> Self {
        Self {
            results: Vec::new(),
            results_file: None,
        }
    }

    pub fn attempted(&self) -> usize {
        self.results.len()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|row| row.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.attempted() - self.succeeded()
    }
}

/// Writes the outcomes as a pretty JSON array, replacing any previous run's file.
pub fn write_batch_results(path: &Path, results: &[GenerationOutcome]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(results)?)?;
    Ok(())
}

pub fn read_batch_results(path: &Path) -> anyhow::Result<Vec<GenerationOutcome>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::{json, Value};

    use super::{read_batch_results, write_batch_results, BatchReport, GenerationOutcome};

    fn sample() -> Vec<GenerationOutcome> {
        vec![
            GenerationOutcome::Success {
                filename: "a.png".to_string(),
                path: PathBuf::from("/out/a.png"),
                resolution: "2K".to_string(),
                aspect_ratio: "16:9".to_string(),
                reference_images_used: 2,
            },
            GenerationOutcome::Error {
                filename: "b.png".to_string(),
                error: "Reference image not found: /refs/missing.png".to_string(),
            },
        ]
    }

    #[test]
    fn outcomes_serialize_with_status_tag() -> anyhow::Result<()> {
        let rows = serde_json::to_value(sample())?;
        assert_eq!(rows[0]["status"], json!("success"));
        assert_eq!(rows[0]["path"], json!("/out/a.png"));
        assert_eq!(rows[0]["reference_images_used"], json!(2));
        assert_eq!(rows[1]["status"], json!("error"));
        assert_eq!(rows[1]["filename"], json!("b.png"));
        assert!(rows[1].get("path").is_none());
        Ok(())
    }

    #[test]
    fn results_file_is_overwritten_per_run() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("batch").join("batch_results.json");
        write_batch_results(&path, &sample())?;
        assert_eq!(read_batch_results(&path)?, sample());

        write_batch_results(&path, &sample()[1..])?;
        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(parsed.as_array().map(Vec::len), Some(1));
        Ok(())
    }

    #[test]
    fn report_counts() {
        let report = BatchReport {
            results: sample(),
            results_file: None,
        };
        assert_eq!(report.attempted(), 2);
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(BatchReport::empty().attempted(), 0);
    }
}
