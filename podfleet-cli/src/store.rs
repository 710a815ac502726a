//! Per-cluster addon metadata kept in ConfigMaps
//!
//! Each installed addon gets one ConfigMap named `podfleet-addon-<name>` in
//! the configured namespace. `list` reads it back to show what is deployed.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, DeleteParams, ObjectMeta, Patch, PatchParams};
use std::collections::BTreeMap;
use tracing::debug;

const FIELD_MANAGER: &str = "podfleet";
const NAME_PREFIX: &str = "podfleet-addon-";
const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// What is recorded about an installed addon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddonRecord {
    pub addon: String,
    pub version: String,
    pub cluster: String,
    pub updated: DateTime<Utc>,
}

impl AddonRecord {
    pub fn new(addon: impl Into<String>, version: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            addon: addon.into(),
            version: version.into(),
            cluster: cluster.into(),
            updated: Utc::now(),
        }
    }

    fn to_config_map(&self, namespace: &str) -> ConfigMap {
        let data = BTreeMap::from([
            ("addon".to_string(), self.addon.clone()),
            ("version".to_string(), self.version.clone()),
            ("cluster".to_string(), self.cluster.clone()),
            ("updated".to_string(), self.updated.to_rfc3339()),
        ]);
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(config_map_name(&self.addon)),
                namespace: Some(namespace.to_string()),
                labels: Some(BTreeMap::from([(
                    MANAGED_BY_LABEL.to_string(),
                    FIELD_MANAGER.to_string(),
                )])),
                ..ObjectMeta::default()
            },
            data: Some(data),
            ..ConfigMap::default()
        }
    }

    fn from_config_map(cm: &ConfigMap) -> Option<Self> {
        let data = cm.data.as_ref()?;
        let updated = data
            .get("updated")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map_or_else(|| DateTime::<Utc>::UNIX_EPOCH, |t| t.with_timezone(&Utc));
        Some(Self {
            addon: data.get("addon")?.clone(),
            version: data.get("version").cloned().unwrap_or_default(),
            cluster: data.get("cluster").cloned().unwrap_or_default(),
            updated,
        })
    }
}

/// Remembers which addons are installed on a cluster.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn record(&self, record: &AddonRecord) -> Result<()>;

    async fn forget(&self, addon: &str) -> Result<()>;

    async fn get(&self, addon: &str) -> Result<Option<AddonRecord>>;
}

/// [`MetadataStore`] backed by ConfigMaps.
#[derive(Clone)]
pub struct KubeStore {
    api: Api<ConfigMap>,
    namespace: String,
}

impl KubeStore {
    pub fn new(client: kube::Client, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            api: Api::namespaced(client, &namespace),
            namespace,
        }
    }
}

#[async_trait]
impl MetadataStore for KubeStore {
    async fn record(&self, record: &AddonRecord) -> Result<()> {
        let name = config_map_name(&record.addon);
        let cm = record.to_config_map(&self.namespace);
        let params = PatchParams::apply(FIELD_MANAGER).force();
        self.api
            .patch(&name, &params, &Patch::Apply(&cm))
            .await
            .with_context(|| format!("Failed to record addon {} in {}/{name}", record.addon, self.namespace))?;
        debug!(addon = %record.addon, version = %record.version, "recorded addon");
        Ok(())
    }

    async fn forget(&self, addon: &str) -> Result<()> {
        let name = config_map_name(addon);
        match self.api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => {
                debug!(addon, "forgot addon");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}/{name}", self.namespace)),
        }
    }

    async fn get(&self, addon: &str) -> Result<Option<AddonRecord>> {
        let name = config_map_name(addon);
        let cm = self
            .api
            .get_opt(&name)
            .await
            .with_context(|| format!("Failed to read {}/{name}", self.namespace))?;
        Ok(cm.as_ref().and_then(AddonRecord::from_config_map))
    }
}

fn config_map_name(addon: &str) -> String {
    let sanitized: String = addon
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '-' })
        .collect();
    format!("{NAME_PREFIX}{sanitized}")
}
