use crate::types::TestReport;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Persist a report as pretty-printed JSON, creating parent directories as
/// needed. The grading platform consumes this file after the run exits.
pub fn write_report(report: &TestReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create results directory {}", parent.display()))?;
    }

    let payload = serde_json::to_string_pretty(report).context("failed to serialize report")?;

    fs::write(path, payload)
        .with_context(|| format!("failed to write results to {}", path.display()))
}
