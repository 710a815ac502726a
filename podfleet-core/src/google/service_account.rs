//! Token fetchers for JSON credential documents
//!
//! Service account keys use the JWT bearer grant (RFC 7523); authorized user
//! documents written by `gcloud auth application-default login` use the
//! refresh token grant, driven through `oauth2`.

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use oauth2::basic::BasicClient;
use oauth2::{
    AuthType, ClientId, ClientSecret, EndpointNotSet, EndpointSet, RefreshToken,
    TokenResponse as _, TokenUrl,
};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::fmt;

use super::{GOOGLE_TOKEN_URI, TokenResponse};
use crate::error::{
    KeyFileError, PrivateKeySnafu, RefreshGrantSnafu, SignAssertionSnafu, TokenError,
    TokenRejectedSnafu, TokenRequestSnafu, TokenUriSnafu,
};
use crate::token::{AccessToken, TokenFetcher};

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

#[derive(Deserialize)]
pub(crate) struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("private_key_id", &self.private_key_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
pub(crate) struct AuthorizedUser {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl fmt::Debug for AuthorizedUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizedUser")
            .field("client_id", &self.client_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Exchanges a self-signed assertion for an access token.
pub struct JwtBearerFetcher {
    client_email: String,
    key_id: Option<String>,
    signing_key: EncodingKey,
    token_uri: String,
    scope: String,
    http: reqwest::Client,
}

impl JwtBearerFetcher {
    pub(crate) fn new(
        key: ServiceAccountKey,
        scope: &str,
        http: reqwest::Client,
    ) -> Result<Self, KeyFileError> {
        let signing_key =
            EncodingKey::from_rsa_pem(key.private_key.as_bytes()).context(PrivateKeySnafu)?;
        Ok(Self {
            client_email: key.client_email,
            key_id: key.private_key_id,
            signing_key,
            token_uri: key.token_uri,
            scope: scope.to_string(),
            http,
        })
    }

    fn assertion(&self) -> Result<String, TokenError> {
        let iat = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope: &self.scope,
            aud: &self.token_uri,
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid.clone_from(&self.key_id);
        jsonwebtoken::encode(&header, &claims, &self.signing_key).context(SignAssertionSnafu)
    }
}

#[async_trait]
impl TokenFetcher for JwtBearerFetcher {
    async fn fetch(&self) -> Result<AccessToken, TokenError> {
        let assertion = self.assertion()?;
        request_token(
            &self.http,
            &self.token_uri,
            &[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())],
        )
        .await
    }
}

/// Redeems a long-lived refresh token.
pub struct AuthorizedUserFetcher {
    oauth: BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>,
    refresh_token: RefreshToken,
    token_uri: String,
    http: reqwest::Client,
}

impl AuthorizedUserFetcher {
    pub(crate) fn new(user: AuthorizedUser, http: reqwest::Client) -> Result<Self, KeyFileError> {
        let token_url = TokenUrl::new(user.token_uri.clone()).context(TokenUriSnafu {
            uri: user.token_uri.as_str(),
        })?;
        // Google expects the client credentials in the form body
        let oauth = BasicClient::new(ClientId::new(user.client_id))
            .set_client_secret(ClientSecret::new(user.client_secret))
            .set_auth_type(AuthType::RequestBody)
            .set_token_uri(token_url);
        Ok(Self {
            oauth,
            refresh_token: RefreshToken::new(user.refresh_token),
            token_uri: user.token_uri,
            http,
        })
    }
}

#[async_trait]
impl TokenFetcher for AuthorizedUserFetcher {
    async fn fetch(&self) -> Result<AccessToken, TokenError> {
        let response = self
            .oauth
            .exchange_refresh_token(&self.refresh_token)
            .request_async(&self.http)
            .await
            .context(RefreshGrantSnafu {
                endpoint: self.token_uri.as_str(),
            })?;
        let expires_in = response
            .expires_in()
            .and_then(|d| i64::try_from(d.as_secs()).ok());
        Ok(AccessToken::expiring_in(
            response.access_token().secret().as_str(),
            expires_in,
        ))
    }
}

async fn request_token(
    http: &reqwest::Client,
    endpoint: &str,
    form: &[(&str, &str)],
) -> Result<AccessToken, TokenError> {
    let response = http
        .post(endpoint)
        .form(form)
        .send()
        .await
        .context(TokenRequestSnafu { endpoint })?;

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

    let token: TokenResponse = response
        .json()
        .await
        .context(TokenRequestSnafu { endpoint })?;
    Ok(AccessToken::expiring_in(token.access_token, token.expires_in))
}
