//! Collaborator seams used by the orchestrator
//!
//! The orchestrator only knows these traits. The fleet-file runtime in
//! [`fleet`] is the production implementation; tests substitute fakes.

pub mod addons;
pub mod fleet;
pub mod testing;

use anyhow::Result;
use async_trait::async_trait;
use podfleet_core::ClientConfiguration;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::settings::{Command, Settings};

pub use fleet::FleetRuntimeFactory;

/// Builds the runtimes for one invocation.
#[async_trait]
pub trait RuntimeFactory: Send + Sync {
    /// Discovery runtime for the configured fleet
    fn discovery(&self, settings: &Settings) -> Result<Box<dyn DiscoveryRuntime>>;

    /// Workload runtime bound to one cluster's client configuration
    async fn workload(
        &self,
        settings: &Settings,
        config: ClientConfiguration,
    ) -> Result<Box<dyn WorkloadRuntime>>;

    fn test_runner(&self) -> Box<dyn TestRunner>;
}

/// Enumerates the clusters a run targets.
#[async_trait]
pub trait DiscoveryRuntime: Send {
    async fn load(&mut self) -> Result<()>;

    /// Clusters matching `params`, in discovery order
    async fn clusters(
        &self,
        params: &BTreeMap<String, String>,
    ) -> Result<Vec<Box<dyn ClusterVendor>>>;
}

/// One discovered cluster.
///
/// `Display` names the cluster in logs and failure reports.
#[async_trait]
pub trait ClusterVendor: Send + Sync + fmt::Display {
    /// Resolve credentials and build the client configuration
    async fn kube_config(&self) -> Result<ClientConfiguration>;

    fn addon_context(&self) -> AddonContext;
}

/// Runs the selected command against one cluster.
#[async_trait]
pub trait WorkloadRuntime: Send {
    async fn load(&mut self) -> Result<()>;

    async fn run(&self, command: Command, ctx: &AddonContext) -> Result<()>;
}

#[async_trait]
pub trait TestRunner: Send + Sync {
    /// `Ok(false)` means the tests ran and at least one failed
    async fn run_tests(&self, path: &Path) -> Result<bool>;
}

/// Key/value context handed to addons for one cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddonContext(BTreeMap<String, String>);

impl AddonContext {
    pub const CLUSTER: &'static str = "cluster";

    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Cluster name, or an empty string when the vendor did not set one
    pub fn cluster(&self) -> &str {
        self.get(Self::CLUSTER).unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<String, String>> for AddonContext {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}
