//! GCE / GKE metadata server credentials

use async_trait::async_trait;
use snafu::ResultExt;
use std::time::Duration;

use super::TokenResponse;
use crate::error::{TokenError, TokenRejectedSnafu, TokenRequestSnafu};
use crate::token::{AccessToken, TokenFetcher};

/// Link-local address of the metadata server
pub const DEFAULT_METADATA_HOST: &str = "169.254.169.254";

const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(2);

/// Fetches tokens for the instance's default service account.
pub struct MetadataServerFetcher {
    host: String,
    scope: String,
    http: reqwest::Client,
}

impl MetadataServerFetcher {
    pub fn new(host: impl Into<String>, scope: &str, http: reqwest::Client) -> Self {
        Self {
            host: host.into(),
            scope: scope.to_string(),
            http,
        }
    }

    fn token_url(&self) -> String {
        format!(
            "http://{}/computeMetadata/v1/instance/service-accounts/default/token?scopes={}",
            self.host, self.scope
        )
    }
}

#[async_trait]
impl TokenFetcher for MetadataServerFetcher {
    async fn fetch(&self) -> Result<AccessToken, TokenError> {
        let endpoint = self.token_url();
        let response = self
            .http
            .get(&endpoint)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .context(TokenRequestSnafu {
                endpoint: endpoint.as_str(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
            return TokenRejectedSnafu {
                endpoint,
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        let token: TokenResponse = response.json().await.context(TokenRequestSnafu {
            endpoint: endpoint.as_str(),
        })?;
        Ok(AccessToken::expiring_in(token.access_token, token.expires_in))
    }
}

/// True when a metadata server answers at `host`.
pub(crate) async fn metadata_server_available(http: &reqwest::Client, host: &str) -> bool {
    let reply = http
        .get(format!("http://{host}"))
        .header("Metadata-Flavor", "Google")
        .timeout(AVAILABILITY_TIMEOUT)
        .send()
        .await;

    match reply {
        Ok(response) => response
            .headers()
            .get("Metadata-Flavor")
            .is_some_and(|v| v.as_bytes() == b"Google"),
        Err(e) => {
            tracing::debug!(host, error = %e, "metadata server unreachable");
            false
        }
    }
}
