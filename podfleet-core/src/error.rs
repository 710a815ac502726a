//! Error taxonomy for credential resolution
//!
//! Lookup failures (the cluster could not be reached or found) are kept apart
//! from certificate decode failures (the cluster answered with data we cannot
//! use) so callers can tell an availability problem from an integrity one.

use snafu::Snafu;
use std::path::PathBuf;

/// Errors produced while resolving a cluster's client configuration.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CredentialError {
    #[snafu(display("failed to read the service account key file `{}'", path.display()))]
    CredentialFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to extract credentials from `{}'", path.display()))]
    CredentialParse { path: PathBuf, source: KeyFileError },

    #[snafu(display("no default application credentials available: {message}"))]
    CredentialSource { message: String },

    #[snafu(display("failed to read default credentials file `{}'", path.display()))]
    DefaultCredentialFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to use default credentials file `{}'", path.display()))]
    DefaultCredentialParse { path: PathBuf, source: KeyFileError },

    #[snafu(display("failed to retrieve cluster info for `{name}'"))]
    ClusterLookup { name: String, source: LookupError },

    #[snafu(display("failed to base64 decode the CA certificate of `{name}'"))]
    CertificateDecode {
        name: String,
        source: base64::DecodeError,
    },
}

/// Errors from interpreting a Google credentials JSON document.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum KeyFileError {
    #[snafu(display("not a recognised credentials document"))]
    Json { source: serde_json::Error },

    #[snafu(display("invalid private key"))]
    PrivateKey {
        source: jsonwebtoken::errors::Error,
    },

    #[snafu(display("invalid token_uri `{uri}'"))]
    TokenUri {
        uri: String,
        source: oauth2::url::ParseError,
    },
}

/// Errors from the cluster-management API.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum LookupError {
    #[snafu(display("could not obtain an access token"))]
    Token { source: TokenError },

    #[snafu(display("request to {url} failed"))]
    Transport { url: String, source: reqwest::Error },

    #[snafu(display("cluster `{name}' not found"))]
    NotFound { name: String },

    #[snafu(display("cluster API returned {status}: {body}"))]
    Status { status: u16, body: String },

    #[snafu(display("cluster `{name}' has no endpoint"))]
    MissingEndpoint { name: String },
}

/// Errors raised by token sources.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TokenError {
    #[snafu(display("failed to sign the service account assertion"))]
    SignAssertion {
        source: jsonwebtoken::errors::Error,
    },

    #[snafu(display("token request to {endpoint} failed"))]
    TokenRequest {
        endpoint: String,
        source: reqwest::Error,
    },

    #[snafu(display("token endpoint {endpoint} answered {status}: {body}"))]
    TokenRejected {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[snafu(display("refresh token grant at {endpoint} failed"))]
    RefreshGrant {
        endpoint: String,
        source: RefreshGrantError,
    },
}

/// Failure type of an `oauth2` refresh token exchange over reqwest
pub type RefreshGrantError = oauth2::RequestTokenError<
    oauth2::HttpClientError<reqwest::Error>,
    oauth2::basic::BasicErrorResponse,
>;

/// Errors raised while turning a client configuration into a usable client.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ClientError {
    #[snafu(display("failed to render kubeconfig"))]
    RenderKubeconfig { source: serde_yaml::Error },

    #[snafu(display("failed to load rendered kubeconfig"))]
    LoadKubeconfig {
        source: kube::config::KubeconfigError,
    },

    #[snafu(display("failed to build Kubernetes client"))]
    BuildClient { source: kube::Error },
}

/// Errors from parsing a `key=value,...` parameter list.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ParamsError {
    #[snafu(display("`{item}' is not in key=value form"))]
    MissingSeparator { item: String },

    #[snafu(display("`{item}' has an empty key"))]
    EmptyKey { item: String },
}
