//! Fleet orchestrator - runs one command across every discovered cluster
//!
//! The `test` command short-circuits to the test runner. Every other command
//! discovers clusters, resolves credentials for each in turn, and hands the
//! resulting client configuration to a fresh workload runtime. Setup failures
//! abort the run; a workload failure is recorded and the loop moves on.

use anyhow::{Context, Result, anyhow};
use std::fmt;
use std::future::Future;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::runtime::{ClusterVendor, RuntimeFactory};
use crate::settings::{Command, Settings};

/// Process exit status.
///
/// 0, 1 and 2 are the contract scripts rely on; the others mean the run
/// never got going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    TestsFailed,
    ClusterErrors,
    Fatal,
    Usage,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::TestsFailed => 1,
            ExitStatus::ClusterErrors => 2,
            ExitStatus::Fatal => 3,
            ExitStatus::Usage => 64,
        }
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status.code())
    }
}

/// A cluster whose workload run failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterFailure {
    pub cluster: String,
    pub error: String,
}

/// Outcome of the per-cluster loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Clusters whose workload `run` was invoked
    pub attempted: usize,
    pub failures: Vec<ClusterFailure>,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.attempted - self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// How a non-fatal run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Tests { passed: bool },
    Clusters(RunSummary),
}

impl Completion {
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            Completion::Tests { passed: true } => ExitStatus::Success,
            Completion::Tests { passed: false } => ExitStatus::TestsFailed,
            Completion::Clusters(summary) if summary.is_clean() => ExitStatus::Success,
            Completion::Clusters(_) => ExitStatus::ClusterErrors,
        }
    }
}

#[derive(Debug)]
struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("operation cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Drives a single invocation.
pub struct Orchestrator<'a> {
    settings: &'a Settings,
    factory: &'a dyn RuntimeFactory,
    cancel: CancellationToken,
}

impl<'a> Orchestrator<'a> {
    pub fn new(settings: &'a Settings, factory: &'a dyn RuntimeFactory) -> Self {
        Self {
            settings,
            factory,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the configured command.
    ///
    /// `Err` is a fatal setup failure; per-cluster workload failures are
    /// reported through [`Completion::Clusters`].
    pub async fn execute(&self) -> Result<Completion> {
        if self.settings.command == Command::Test {
            return self.run_tests().await;
        }

        let mut discovery = self
            .factory
            .discovery(self.settings)
            .context("Failed to initialize clusters runtime")?;
        self.cancellable(discovery.load())
            .await
            .context("Failed to load clusters runtime")?;
        let clusters = self
            .cancellable(discovery.clusters(&self.settings.context_params))
            .await
            .context("Failed to iterate through clusters")?;
        info!(
            command = %self.settings.command,
            clusters = clusters.len(),
            "discovered clusters"
        );

        let mut summary = RunSummary::default();
        for vendor in &clusters {
            self.run_cluster(vendor.as_ref(), &mut summary).await?;
        }
        Ok(Completion::Clusters(summary))
    }

    async fn run_tests(&self) -> Result<Completion> {
        let runner = self.factory.test_runner();
        let passed = self
            .cancellable(runner.run_tests(&self.settings.path))
            .await
            .with_context(|| format!("Failed to run tests at {}", self.settings.path.display()))?;
        Ok(Completion::Tests { passed })
    }

    async fn run_cluster(&self, vendor: &dyn ClusterVendor, summary: &mut RunSummary) -> Result<()> {
        let cluster = vendor.to_string();

        let config = self
            .cancellable(vendor.kube_config())
            .await
            .with_context(|| format!("Failed to build kube client config for cluster {cluster}"))?;
        let mut workload = self
            .cancellable(self.factory.workload(self.settings, config))
            .await
            .with_context(|| format!("Failed to initialize addons runtime for cluster {cluster}"))?;
        self.cancellable(workload.load())
            .await
            .with_context(|| format!("Failed to load addons runtime for cluster {cluster}"))?;

        let ctx = vendor.addon_context();
        summary.attempted += 1;
        match self.cancellable(workload.run(self.settings.command, &ctx)).await {
            Ok(()) => info!(%cluster, command = %self.settings.command, "cluster run succeeded"),
            Err(e) => {
                let message = format!("{e:#}");
                error!(%cluster, command = %self.settings.command, error = %message, "cluster run failed");
                summary.failures.push(ClusterFailure {
                    cluster,
                    error: message,
                });
            }
        }
        Ok(())
    }

    /// Race `fut` against cancellation; cancellation wins ties.
    async fn cancellable<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(anyhow!(Cancelled)),
            result = fut => result,
        }
    }
}
