//! Report emission: the renderer trait and the JSON artifact renderer.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use tandem_types::{CombinedReport, Result};

/// Produces the user-facing artifact from the aggregated report. Invoked at
/// most once per run, strictly after aggregation. Implementations must
/// publish atomically: a killed process must never leave a partially-written
/// artifact at the final path.
#[async_trait]
pub trait ReportRenderer: Send + Sync {
    async fn render(&self, report: &CombinedReport) -> Result<PathBuf>;
}

/// Writes the combined report as pretty-printed JSON. The file is written to
/// a dot-prefixed temporary name in the target directory and renamed into
/// place, so the final path only ever holds a complete document.
pub struct JsonReportRenderer {
    out_dir: PathBuf,
}

impl JsonReportRenderer {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    fn artifact_name(report: &CombinedReport) -> String {
        format!(
            "status-report-{}.json",
            report.generated_at.format("%Y%m%d-%H%M%S")
        )
    }
}

#[async_trait]
impl ReportRenderer for JsonReportRenderer {
    async fn render(&self, report: &CombinedReport) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.out_dir).await?;

        let name = Self::artifact_name(report);
        let final_path = self.out_dir.join(&name);
        let tmp_path = self.out_dir.join(format!(".{name}.tmp"));

        let json = serde_json::to_string_pretty(report)?;
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &final_path).await?;

        tracing::info!(path = %final_path.display(), "report artifact published");
        Ok(final_path)
    }
}
