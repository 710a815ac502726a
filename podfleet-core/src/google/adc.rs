//! Application default credentials
//!
//! Lookup order: `$GOOGLE_APPLICATION_CREDENTIALS`, the gcloud well-known
//! file, then the metadata server.

use snafu::ResultExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::metadata::{DEFAULT_METADATA_HOST, metadata_server_available};
use super::{CLOUD_PLATFORM_SCOPE, MetadataServerFetcher, credentials_from_json};
use crate::error::{CredentialError, DefaultCredentialFileSnafu, DefaultCredentialParseSnafu};
use crate::token::{CachedTokenSource, TokenSource};

const WELL_KNOWN_FILE: &str = "application_default_credentials.json";

/// Where application default credentials may come from.
#[derive(Debug, Clone, Default)]
pub struct AdcEnvironment {
    /// Explicit credentials file (`GOOGLE_APPLICATION_CREDENTIALS`)
    pub credentials_file: Option<PathBuf>,
    /// gcloud's application default credentials file
    pub well_known_file: Option<PathBuf>,
    /// Metadata server host, tried last
    pub metadata_host: String,
}

impl AdcEnvironment {
    /// Read the process environment the way gcloud and the Google SDKs do.
    pub fn from_env() -> Self {
        let credentials_file = std::env::var_os("GOOGLE_APPLICATION_CREDENTIALS")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let metadata_host = std::env::var("GCE_METADATA_HOST")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_METADATA_HOST.to_string());

        Self {
            credentials_file,
            well_known_file: gcloud_config_dir().map(|dir| dir.join(WELL_KNOWN_FILE)),
            metadata_host,
        }
    }
}

fn gcloud_config_dir() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os("CLOUDSDK_CONFIG").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(dir));
    }
    if cfg!(windows) {
        dirs::config_dir().map(|d| d.join("gcloud"))
    } else {
        dirs::home_dir().map(|d| d.join(".config").join("gcloud"))
    }
}

fn from_file(path: &Path, http: &reqwest::Client) -> Result<Arc<dyn TokenSource>, CredentialError> {
    let bytes = std::fs::read(path).context(DefaultCredentialFileSnafu { path })?;
    credentials_from_json(&bytes, http.clone()).context(DefaultCredentialParseSnafu { path })
}

/// Resolve an ambient token source scoped for the container API.
pub async fn default_token_source(
    env: &AdcEnvironment,
    http: &reqwest::Client,
) -> Result<Arc<dyn TokenSource>, CredentialError> {
    if let Some(path) = &env.credentials_file {
        tracing::debug!(path = %path.display(), "using GOOGLE_APPLICATION_CREDENTIALS");
        return from_file(path, http);
    }

    if let Some(path) = env.well_known_file.as_deref().filter(|p| p.is_file()) {
        tracing::debug!(path = %path.display(), "using gcloud application default credentials");
        return from_file(path, http);
    }

    if metadata_server_available(http, &env.metadata_host).await {
        tracing::debug!(host = %env.metadata_host, "using metadata server credentials");
        return Ok(Arc::new(CachedTokenSource::new(MetadataServerFetcher::new(
            env.metadata_host.clone(),
            CLOUD_PLATFORM_SCOPE,
            http.clone(),
        ))));
    }

    Err(CredentialError::CredentialSource {
        message: "set GOOGLE_APPLICATION_CREDENTIALS, run `gcloud auth application-default login`, or run on Google Cloud".to_string(),
    })
}
