//! Fleet file runtime
//!
//! A fleet file is TOML with `[[clusters]]` (the GKE clusters to target)
//! and `[[addons]]` (external commands that install or remove an addon):
//!
//! ```toml
//! [[clusters]]
//! name = "prod"
//! location = "us-central1"
//! project = "acme"
//! labels = { env = "prod" }
//! context = { domain = "prod.acme.io" }
//!
//! [[addons]]
//! name = "ingress"
//! version = "4.10.0"
//! install = ["helm", "upgrade", "--install", "ingress", "./charts/ingress"]
//! remove = ["helm", "uninstall", "ingress"]
//! secrets = { TLS_KEY = "secret/data/ingress#key" }
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use podfleet_core::{ClientConfiguration, ClusterIdentity, CredentialResolver};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use super::addons::AddonRuntime;
use super::testing::FleetTestRunner;
use super::{AddonContext, ClusterVendor, DiscoveryRuntime, RuntimeFactory, TestRunner, WorkloadRuntime};
use crate::settings::Settings;
use crate::store::KubeStore;
use crate::vault::VaultClient;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FleetFile {
    #[serde(default)]
    pub clusters: Vec<ClusterEntry>,
    #[serde(default)]
    pub addons: Vec<AddonEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterEntry {
    pub name: String,
    pub location: String,
    pub project: String,
    /// Matched against `--context` parameters
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Extra addon context for this cluster
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl ClusterEntry {
    pub fn identity(&self) -> ClusterIdentity {
        ClusterIdentity::new(&self.name, &self.location, &self.project)
    }

    /// Every parameter must be present in `labels` with the same value
    pub fn matches(&self, params: &BTreeMap<String, String>) -> bool {
        params
            .iter()
            .all(|(k, v)| self.labels.get(k).is_some_and(|label| label == v))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddonEntry {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub install: Vec<String>,
    #[serde(default)]
    pub remove: Vec<String>,
    /// Environment variable name to Vault `path#field` reference
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,
}

impl FleetFile {
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read fleet file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse fleet file {}", path.display()))
    }

    pub fn cluster_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let mut seen = HashSet::new();
        for (i, cluster) in self.clusters.iter().enumerate() {
            for (field, value) in [
                ("name", &cluster.name),
                ("location", &cluster.location),
                ("project", &cluster.project),
            ] {
                if value.trim().is_empty() {
                    problems.push(format!("clusters[{i}]: empty {field}"));
                }
            }
            if !seen.insert(cluster.identity()) {
                problems.push(format!("clusters[{i}]: duplicate cluster {}", cluster.identity()));
            }
        }
        problems
    }

    pub fn addon_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let mut seen = HashSet::new();
        for (i, addon) in self.addons.iter().enumerate() {
            if addon.name.trim().is_empty() {
                problems.push(format!("addons[{i}]: empty name"));
            } else if !seen.insert(addon.name.as_str()) {
                problems.push(format!("addons[{i}]: duplicate addon `{}'", addon.name));
            }
            if addon.install.is_empty() {
                problems.push(format!("addons[{i}]: `{}' has no install command", addon.name));
            }
        }
        problems
    }

    pub fn problems(&self) -> Vec<String> {
        let mut problems = self.cluster_problems();
        problems.extend(self.addon_problems());
        problems
    }
}

/// Builds fleet-file runtimes, sharing one credential resolver.
pub struct FleetRuntimeFactory {
    resolver: Arc<CredentialResolver>,
}

impl FleetRuntimeFactory {
    pub fn new(settings: &Settings) -> Self {
        Self::with_resolver(Arc::new(CredentialResolver::new(
            settings.credential_source.clone(),
            settings.user_agent.clone(),
        )))
    }

    pub fn with_resolver(resolver: Arc<CredentialResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl RuntimeFactory for FleetRuntimeFactory {
    fn discovery(&self, settings: &Settings) -> Result<Box<dyn DiscoveryRuntime>> {
        Ok(Box::new(FleetDiscovery::new(
            settings.path.clone(),
            self.resolver.clone(),
        )))
    }

    async fn workload(
        &self,
        settings: &Settings,
        config: ClientConfiguration,
    ) -> Result<Box<dyn WorkloadRuntime>> {
        let mut runtime = AddonRuntime::new(settings, config.clone());
        if !settings.dry_run {
            if let Some(vault) = &settings.vault {
                runtime = runtime.with_secrets(Arc::new(VaultClient::new(&vault.addr, &vault.token)));
            }
            let client = config
                .kube_client(&settings.namespace)
                .await
                .context("Failed to create Kubernetes client")?;
            runtime = runtime.with_store(Arc::new(KubeStore::new(client, &settings.namespace)));
        }
        Ok(Box::new(runtime))
    }

    fn test_runner(&self) -> Box<dyn TestRunner> {
        Box::new(FleetTestRunner)
    }
}

/// Reads `[[clusters]]` from the fleet file.
pub struct FleetDiscovery {
    path: PathBuf,
    resolver: Arc<CredentialResolver>,
    clusters: Vec<ClusterEntry>,
}

impl FleetDiscovery {
    pub fn new(path: PathBuf, resolver: Arc<CredentialResolver>) -> Self {
        Self {
            path,
            resolver,
            clusters: Vec::new(),
        }
    }
}

#[async_trait]
impl DiscoveryRuntime for FleetDiscovery {
    async fn load(&mut self) -> Result<()> {
        let fleet = FleetFile::load(&self.path).await?;
        let problems = fleet.cluster_problems();
        if !problems.is_empty() {
            anyhow::bail!("{}: {}", self.path.display(), problems.join("; "));
        }
        debug!(path = %self.path.display(), clusters = fleet.clusters.len(), "loaded fleet");
        self.clusters = fleet.clusters;
        Ok(())
    }

    async fn clusters(
        &self,
        params: &BTreeMap<String, String>,
    ) -> Result<Vec<Box<dyn ClusterVendor>>> {
        Ok(self
            .clusters
            .iter()
            .filter(|entry| entry.matches(params))
            .map(|entry| {
                Box::new(GkeVendor::new(entry.clone(), self.resolver.clone())) as Box<dyn ClusterVendor>
            })
            .collect())
    }
}

/// A GKE cluster from the fleet file.
pub struct GkeVendor {
    entry: ClusterEntry,
    identity: ClusterIdentity,
    resolver: Arc<CredentialResolver>,
}

impl GkeVendor {
    pub fn new(entry: ClusterEntry, resolver: Arc<CredentialResolver>) -> Self {
        Self {
            identity: entry.identity(),
            entry,
            resolver,
        }
    }
}

impl fmt::Display for GkeVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.identity, f)
    }
}

#[async_trait]
impl ClusterVendor for GkeVendor {
    async fn kube_config(&self) -> Result<ClientConfiguration> {
        Ok(self.resolver.resolve(&self.identity).await?)
    }

    fn addon_context(&self) -> AddonContext {
        let mut ctx = AddonContext::from(self.entry.context.clone());
        ctx.insert(AddonContext::CLUSTER, &self.entry.name);
        ctx.insert("location", &self.entry.location);
        ctx.insert("project", &self.entry.project);
        ctx
    }
}
