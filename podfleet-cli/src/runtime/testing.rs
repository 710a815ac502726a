//! Offline fleet file validation for the `test` command

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::TestRunner;
use super::fleet::FleetFile;

/// Validates fleet files without contacting any cluster.
pub struct FleetTestRunner;

impl FleetTestRunner {
    /// A single file, or the `.toml` files directly inside a directory
    async fn collect(path: &Path) -> Result<Vec<PathBuf>> {
        let meta = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("Test path {} does not exist", path.display()))?;
        if meta.is_file() {
            return Ok(vec![path.to_path_buf()]);
        }

        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(path)
            .await
            .with_context(|| format!("Failed to list {}", path.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let file = entry.path();
            if file.is_file() && file.extension().is_some_and(|ext| ext == "toml") {
                files.push(file);
            }
        }
        files.sort();
        if files.is_empty() {
            bail!("No fleet files found in {}", path.display());
        }
        Ok(files)
    }

    async fn check(file: &Path) -> Vec<String> {
        match FleetFile::load(file).await {
            Ok(fleet) => fleet.problems(),
            Err(e) => vec![format!("{e:#}")],
        }
    }
}

#[async_trait]
impl TestRunner for FleetTestRunner {
    async fn run_tests(&self, path: &Path) -> Result<bool> {
        let files = Self::collect(path).await?;
        let mut failed = 0usize;

        for file in &files {
            let problems = Self::check(file).await;
            if problems.is_empty() {
                println!("PASS {}", file.display());
            } else {
                failed += 1;
                println!("FAIL {}", file.display());
                for problem in &problems {
                    println!("     {problem}");
                    warn!(file = %file.display(), %problem, "fleet file check failed");
                }
            }
        }

        info!(total = files.len(), failed, "fleet file tests finished");
        Ok(failed == 0)
    }
}
