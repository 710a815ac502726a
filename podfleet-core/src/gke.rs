//! GKE credential resolver
//!
//! Turns a [`ClusterIdentity`] into a [`ClientConfiguration`] by asking the
//! container API for the cluster's endpoint and CA certificate, authorized by
//! whichever [`CredentialSource`] the process was started with.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::header::USER_AGENT;
use serde::Deserialize;
use snafu::ResultExt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::client_config::ClientConfiguration;
use crate::cluster::{ClusterIdentity, CredentialSource};
use crate::error::{
    CertificateDecodeSnafu, ClusterLookupSnafu, CredentialError, CredentialFileSnafu,
    CredentialParseSnafu, LookupError, MissingEndpointSnafu, NotFoundSnafu, StatusSnafu,
    TokenSnafu, TransportSnafu,
};
use crate::google::{AdcEnvironment, credentials_from_json, default_token_source};
use crate::token::TokenSource;

/// Public container API endpoint
pub const CONTAINER_API_BASE: &str = "https://container.googleapis.com/v1";

/// The two fields of a GKE cluster this crate cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterInfo {
    pub endpoint: String,
    /// Base64 of the PEM encoded cluster CA, as returned on the wire
    pub ca_certificate: String,
}

/// The cluster-management API: look a cluster up by resource name.
#[async_trait]
pub trait ClusterManager: Send + Sync {
    async fn get_cluster(&self, resource_name: &str) -> Result<ClusterInfo, LookupError>;
}

/// Builds a [`ClusterManager`] authorized by a token source.
pub trait ClusterManagerFactory: Send + Sync {
    fn manager(&self, tokens: Arc<dyn TokenSource>, user_agent: &str) -> Box<dyn ClusterManager>;
}

/// Factory for the real container API
#[derive(Debug, Clone)]
pub struct GkeApi {
    http: reqwest::Client,
    base_url: String,
}

impl GkeApi {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: CONTAINER_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

impl ClusterManagerFactory for GkeApi {
    fn manager(&self, tokens: Arc<dyn TokenSource>, user_agent: &str) -> Box<dyn ClusterManager> {
        Box::new(GkeClusterManager {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            tokens,
            user_agent: user_agent.to_string(),
        })
    }
}

struct GkeClusterManager {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenSource>,
    user_agent: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClusterResource {
    #[serde(default)]
    endpoint: String,
    #[serde(default)]
    master_auth: MasterAuth,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MasterAuth {
    #[serde(default)]
    cluster_ca_certificate: String,
}

#[async_trait]
impl ClusterManager for GkeClusterManager {
    async fn get_cluster(&self, resource_name: &str) -> Result<ClusterInfo, LookupError> {
        let token = self.tokens.token().await.context(TokenSnafu)?;
        let url = format!("{}/{}", self.base_url, resource_name);

        let response = self
            .http
            .get(&url)
            .bearer_auth(token.secret())
            .header(USER_AGENT, &self.user_agent)
            .send()
            .await
            .context(TransportSnafu { url: url.as_str() })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return NotFoundSnafu {
                name: resource_name,
            }
            .fail();
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
            return StatusSnafu {
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        let cluster: ClusterResource = response
            .json()
            .await
            .context(TransportSnafu { url: url.as_str() })?;
        if cluster.endpoint.is_empty() {
            return MissingEndpointSnafu {
                name: resource_name,
            }
            .fail();
        }

        Ok(ClusterInfo {
            endpoint: cluster.endpoint,
            ca_certificate: cluster.master_auth.cluster_ca_certificate,
        })
    }
}

/// Resolves client configurations for GKE clusters.
///
/// The default-credential token source is created on first use and shared
/// by every later call; the service-account path re-reads the key file on
/// each call.
pub struct CredentialResolver {
    source: CredentialSource,
    user_agent: String,
    http: reqwest::Client,
    managers: Arc<dyn ClusterManagerFactory>,
    adc: AdcEnvironment,
    default_tokens: OnceCell<Arc<dyn TokenSource>>,
}

impl CredentialResolver {
    pub fn new(source: CredentialSource, user_agent: impl Into<String>) -> Self {
        let http = reqwest::Client::new();
        Self {
            source,
            user_agent: user_agent.into(),
            managers: Arc::new(GkeApi::new(http.clone())),
            http,
            adc: AdcEnvironment::from_env(),
            default_tokens: OnceCell::new(),
        }
    }

    /// Swap the cluster-management API implementation
    #[must_use]
    pub fn with_cluster_managers(mut self, managers: Arc<dyn ClusterManagerFactory>) -> Self {
        self.managers = managers;
        self
    }

    /// Override where application default credentials are looked up
    #[must_use]
    pub fn with_adc_environment(mut self, adc: AdcEnvironment) -> Self {
        self.adc = adc;
        self
    }

    /// Resolve `identity` with the configured credential source.
    pub async fn resolve(
        &self,
        identity: &ClusterIdentity,
    ) -> Result<ClientConfiguration, CredentialError> {
        tracing::debug!(
            cluster = %identity,
            strategy = self.source.strategy(),
            "resolving cluster credentials"
        );
        match &self.source {
            CredentialSource::ServiceAccountKeyFile(path) => {
                self.resolve_with_service_account_key(identity, path).await
            }
            CredentialSource::DefaultApplicationCredential => {
                self.resolve_with_default_credential(identity).await
            }
        }
    }

    async fn resolve_with_service_account_key(
        &self,
        identity: &ClusterIdentity,
        key_file: &Path,
    ) -> Result<ClientConfiguration, CredentialError> {
        let bytes = tokio::fs::read(key_file)
            .await
            .context(CredentialFileSnafu { path: key_file })?;
        let tokens = credentials_from_json(&bytes, self.http.clone())
            .context(CredentialParseSnafu { path: key_file })?;
        self.lookup(identity, tokens).await
    }

    async fn resolve_with_default_credential(
        &self,
        identity: &ClusterIdentity,
    ) -> Result<ClientConfiguration, CredentialError> {
        let tokens = self
            .default_tokens
            .get_or_try_init(|| default_token_source(&self.adc, &self.http))
            .await?
            .clone();
        self.lookup(identity, tokens).await
    }

    async fn lookup(
        &self,
        identity: &ClusterIdentity,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<ClientConfiguration, CredentialError> {
        let name = identity.resource_name();
        let manager = self.managers.manager(tokens.clone(), &self.user_agent);
        let cluster = manager
            .get_cluster(&name)
            .await
            .context(ClusterLookupSnafu { name: name.as_str() })?;

        // The CA arrives as base64 of PEM; keep the PEM
        let ca_data = STANDARD
            .decode(&cluster.ca_certificate)
            .context(CertificateDecodeSnafu { name })?;

        Ok(ClientConfiguration::new(
            format!("https://{}", cluster.endpoint),
            ca_data,
            tokens,
            self.user_agent.clone(),
        ))
    }
}
