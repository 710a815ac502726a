//! Cluster identity and credential source selection

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Uniquely addresses one GKE cluster within Google Cloud.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterIdentity {
    pub name: String,
    pub location: String,
    pub project: String,
}

impl ClusterIdentity {
    pub fn new(
        name: impl Into<String>,
        location: impl Into<String>,
        project: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            project: project.into(),
        }
    }

    /// Fully-qualified resource name understood by the container API
    pub fn resource_name(&self) -> String {
        format!(
            "projects/{}/locations/{}/clusters/{}",
            self.project, self.location, self.name
        )
    }
}

impl fmt::Display for ClusterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.project, self.location, self.name)
    }
}

/// How the process obtains Google Cloud authorization.
///
/// Chosen once at startup; every cluster in a run uses the same variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Service account (or authorized user) JSON key on disk
    ServiceAccountKeyFile(PathBuf),
    /// Application default credentials from the environment
    DefaultApplicationCredential,
}

impl CredentialSource {
    /// Select the strategy from an optional key path; empty counts as absent.
    pub fn from_key_path(path: Option<PathBuf>) -> Self {
        match path {
            Some(p) if !p.as_os_str().is_empty() => Self::ServiceAccountKeyFile(p),
            _ => Self::DefaultApplicationCredential,
        }
    }

    /// Short label used in logs
    pub fn strategy(&self) -> &'static str {
        match self {
            Self::ServiceAccountKeyFile(_) => "service-account-key",
            Self::DefaultApplicationCredential => "default-credential",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_name_template() {
        let id = ClusterIdentity::new("prod", "us-central1", "acme");
        assert_eq!(
            id.resource_name(),
            "projects/acme/locations/us-central1/clusters/prod"
        );
    }

    #[test]
    fn test_resource_name_keeps_zonal_location() {
        let id = ClusterIdentity::new("edge-1", "europe-west4-a", "my-proj-123");
        assert_eq!(
            id.resource_name(),
            "projects/my-proj-123/locations/europe-west4-a/clusters/edge-1"
        );
    }

    #[test]
    fn test_credential_source_selection() {
        assert_eq!(
            CredentialSource::from_key_path(None),
            CredentialSource::DefaultApplicationCredential
        );
        assert_eq!(
            CredentialSource::from_key_path(Some(PathBuf::new())),
            CredentialSource::DefaultApplicationCredential
        );
        assert_eq!(
            CredentialSource::from_key_path(Some(PathBuf::from("/keys/sa.json"))),
            CredentialSource::ServiceAccountKeyFile(PathBuf::from("/keys/sa.json"))
        );
    }
}
