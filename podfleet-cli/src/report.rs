//! Run report: a console summary and an optional TOML file

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::orchestrator::RunSummary;
use crate::settings::Command;

/// Report for one cluster run, as written with `--report`
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub meta: ReportMeta,
    pub summary: ReportSummary,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ReportFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportMeta {
    pub timestamp: String,
    pub command: String,
    pub version: String,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportFailure {
    pub cluster: String,
    pub error: String,
}

impl RunReport {
    pub fn new(command: Command, dry_run: bool, summary: &RunSummary) -> Self {
        Self {
            meta: ReportMeta {
                timestamp: chrono::Utc::now().to_rfc3339(),
                command: command.to_string(),
                version: podfleet_core::VERSION.to_string(),
                dry_run,
            },
            summary: ReportSummary {
                attempted: summary.attempted,
                succeeded: summary.succeeded(),
                failed: summary.failures.len(),
            },
            failures: summary
                .failures
                .iter()
                .map(|f| ReportFailure {
                    cluster: f.cluster.clone(),
                    error: f.error.clone(),
                })
                .collect(),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        let body = toml::to_string(self).context("Failed to serialize run report")?;
        Ok(format!("# podfleet run report\n\n{body}"))
    }

    /// Write the report, creating parent directories as needed
    pub fn write(&self, output_path: &Path) -> Result<()> {
        let content = self.to_toml()?;
        if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create parent directory: {}", parent.display()))?;
        }
        fs::write(output_path, content)
            .with_context(|| format!("Failed to write run report to {}", output_path.display()))?;
        Ok(())
    }
}

/// Print the human-readable summary to stdout
pub fn print_run_summary(command: Command, summary: &RunSummary) {
    println!();
    println!("podfleet {command}");
    println!("----------------------------------------");
    println!(
        "clusters: {} attempted, {} succeeded, {} failed",
        summary.attempted,
        summary.succeeded(),
        summary.failures.len()
    );
    for failure in &summary.failures {
        println!("  FAILED {}: {}", failure.cluster, failure.error);
    }
}
