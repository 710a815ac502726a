//! Google Cloud authorization
//!
//! Two ways in: a JSON credentials document (service account key or
//! authorized user, see [`credentials_from_json`]) or the application
//! default credential chain ([`default_token_source`]).

mod adc;
mod metadata;
mod service_account;

use serde::Deserialize;
use snafu::ResultExt;
use std::sync::Arc;

use crate::error::{JsonSnafu, KeyFileError};
use crate::token::{CachedTokenSource, TokenSource};

pub use adc::{AdcEnvironment, default_token_source};
pub use metadata::MetadataServerFetcher;
pub use service_account::{AuthorizedUserFetcher, JwtBearerFetcher};

/// Authorization scope granting access to the container API
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Default OAuth2 token endpoint
pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Credential documents produced by `gcloud` and the IAM console
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum CredentialsFile {
    ServiceAccount(service_account::ServiceAccountKey),
    AuthorizedUser(service_account::AuthorizedUser),
}

/// Parse a credentials document into a caching token source bound to
/// [`CLOUD_PLATFORM_SCOPE`].
pub fn credentials_from_json(
    bytes: &[u8],
    http: reqwest::Client,
) -> Result<Arc<dyn TokenSource>, KeyFileError> {
    let file: CredentialsFile = serde_json::from_slice(bytes).context(JsonSnafu)?;
    let source: Arc<dyn TokenSource> = match file {
        CredentialsFile::ServiceAccount(key) => Arc::new(CachedTokenSource::new(
            JwtBearerFetcher::new(key, CLOUD_PLATFORM_SCOPE, http)?,
        )),
        CredentialsFile::AuthorizedUser(user) => {
            Arc::new(CachedTokenSource::new(AuthorizedUserFetcher::new(user, http)?))
        }
    };
    Ok(source)
}

/// Body of a successful OAuth2 token response
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
}
