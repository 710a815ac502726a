//! podfleet: run addon installers across a fleet of GKE clusters
//!
//! The binary parses [`Cli`], builds [`Settings`] once and hands them to the
//! [`Orchestrator`], which walks every cluster in the fleet file.

pub mod orchestrator;
pub mod report;
pub mod runtime;
pub mod settings;
pub mod store;
pub mod vault;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

pub use orchestrator::{ClusterFailure, Completion, ExitStatus, Orchestrator, RunSummary};
pub use report::{RunReport, print_run_summary};
pub use runtime::{FleetRuntimeFactory, RuntimeFactory};
pub use settings::{Command, Settings};

#[derive(Debug, Parser)]
#[clap(
    name = "podfleet",
    about = "Install, remove and list addons across a fleet of GKE clusters",
    disable_version_flag = true
)]
pub struct Cli {
    /// Command to run
    #[clap(value_enum)]
    pub command: Option<Command>,

    /// Fleet file; for `test`, a fleet file or a directory of them
    pub path: Option<PathBuf>,

    /// Vault token used to read addon secrets
    #[clap(long, env = "VAULT_TOKEN", hide_env_values = true)]
    pub vault_token: Option<String>,

    /// Vault server address
    #[clap(long, env = "VAULT_ADDR", default_value = "http://127.0.0.1:8200")]
    pub vault_addr: String,

    /// Namespace holding addon metadata
    #[clap(long, default_value = "default")]
    pub namespace: String,

    /// Only act on addons whose name matches this regex
    #[clap(long, default_value = "")]
    pub match_addons: String,

    /// Comma-separated key=value pairs selecting clusters by label
    #[clap(long, default_value = "")]
    pub context: String,

    /// Print what would run without changing anything
    #[clap(long)]
    pub dry_run: bool,

    /// Service account key file; application default credentials otherwise
    #[clap(long)]
    pub sa_key: Option<PathBuf>,

    /// Ask addon commands to show a diff against live objects
    #[clap(long)]
    pub kube_diff: bool,

    /// Working directory for addon commands (default: the fleet file's directory)
    #[clap(long)]
    pub rel_path: Option<PathBuf>,

    /// Write a TOML run report to this path
    #[clap(long)]
    pub report: Option<PathBuf>,

    /// Print version information and exit
    #[clap(long)]
    pub version: bool,
}

/// `podfleet <version>` followed by the host platform
pub fn version_string() -> String {
    format!(
        "podfleet {}\nSystem: {}/{}",
        podfleet_core::VERSION,
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Run one invocation and map the outcome to an exit status.
pub async fn run(cli: Cli, cancel: CancellationToken) -> ExitStatus {
    if cli.version {
        println!("{}", version_string());
        return ExitStatus::Success;
    }

    let settings = match Settings::from_cli(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            error!("{e:#}");
            return ExitStatus::Usage;
        }
    };

    let factory = FleetRuntimeFactory::new(&settings);
    match execute(&settings, &factory, cancel).await {
        Ok(status) => status,
        Err(e) => {
            error!("{e:#}");
            ExitStatus::Fatal
        }
    }
}

/// Drive the orchestrator, then print and optionally persist the summary.
pub async fn execute(
    settings: &Settings,
    factory: &dyn RuntimeFactory,
    cancel: CancellationToken,
) -> Result<ExitStatus> {
    let completion = Orchestrator::new(settings, factory)
        .with_cancellation(cancel)
        .execute()
        .await?;

    if let Completion::Clusters(summary) = &completion {
        print_run_summary(settings.command, summary);
        if let Some(path) = &settings.report {
            let report = RunReport::new(settings.command, settings.dry_run, summary);
            if let Err(e) = report.write(path) {
                warn!("{e:#}");
            }
        }
    }
    Ok(completion.exit_status())
}
