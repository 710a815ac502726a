//! podfleet core library
//!
//! Credential resolution for GKE clusters and the client configuration
//! handed to per-cluster workloads.

pub mod client_config;
pub mod cluster;
pub mod error;
pub mod gke;
pub mod google;
pub mod params;
pub mod token;

#[cfg(test)]
mod test_http;

pub use client_config::{BearerTokenLayer, ClientConfiguration};
pub use cluster::{ClusterIdentity, CredentialSource};
pub use error::{
    ClientError, CredentialError, KeyFileError, LookupError, ParamsError, TokenError,
};
pub use gke::{ClusterInfo, ClusterManager, ClusterManagerFactory, CredentialResolver, GkeApi};
pub use params::parse_comma_separated_params;
pub use token::{AccessToken, CachedTokenSource, StaticTokenSource, TokenFetcher, TokenSource};

/// Crate version, used in the `podfleet/<version>` user agent
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// User agent attached to every Google and Kubernetes API call
pub fn user_agent() -> String {
    format!("podfleet/{VERSION}")
}
