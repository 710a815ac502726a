//! Vault secrets client
//!
//! Secrets are referenced as `path#field`, e.g. `secret/data/ingress#key`.
//! Both KV v1 (`data.<field>`) and KV v2 (`data.data.<field>`) responses are
//! understood.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use tracing::debug;

/// Reads secret values for addons.
#[async_trait]
pub trait SecretsStore: Send + Sync {
    async fn read(&self, reference: &str) -> Result<String>;
}

#[derive(Clone)]
pub struct VaultClient {
    addr: String,
    token: String,
    http: reqwest::Client,
}

impl VaultClient {
    pub fn new(addr: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            addr: addr.into().trim_end_matches('/').to_string(),
            token: token.into(),
            http: reqwest::Client::new(),
        }
    }
}

impl fmt::Debug for VaultClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultClient")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SecretsStore for VaultClient {
    async fn read(&self, reference: &str) -> Result<String> {
        let (path, field) = parse_reference(reference)?;
        let url = format!("{}/v1/{path}", self.addr);
        debug!(%path, field, "reading vault secret");

        let response = self
            .http
            .get(&url)
            .header("X-Vault-Token", &self.token)
            .send()
            .await
            .with_context(|| format!("Failed to reach Vault for {path}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("Vault returned {status} for {path}");
        }
        let body: Value = response
            .json()
            .await
            .with_context(|| format!("Vault response for {path} is not JSON"))?;

        extract_field(&body, field)
            .with_context(|| format!("Field `{field}' not found in Vault secret {path}"))
    }
}

/// Split `path#field`, trimming slashes around the path.
fn parse_reference(reference: &str) -> Result<(&str, &str)> {
    let Some((path, field)) = reference.rsplit_once('#') else {
        bail!("Secret reference `{reference}' must be of the form path#field");
    };
    let path = path.trim_matches('/');
    if path.is_empty() || field.is_empty() {
        bail!("Secret reference `{reference}' must be of the form path#field");
    }
    Ok((path, field))
}

fn extract_field(body: &Value, field: &str) -> Option<String> {
    let data = body.get("data")?;
    // KV v2 nests the payload one level deeper, next to `metadata`
    let payload = match data.get("data") {
        Some(inner) if inner.is_object() && data.get("metadata").is_some() => inner,
        _ => data,
    };
    match payload.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_reference() {
        assert_eq!(
            parse_reference("secret/data/ingress#key").unwrap(),
            ("secret/data/ingress", "key")
        );
        assert_eq!(parse_reference("/kv/app/#pw").unwrap(), ("kv/app", "pw"));
        assert!(parse_reference("secret/data/ingress").is_err());
        assert!(parse_reference("#key").is_err());
        assert!(parse_reference("secret/app#").is_err());
    }

    #[test]
    fn test_extract_kv_v1() {
        let body = json!({"data": {"password": "hunter2", "port": 5432}});
        assert_eq!(extract_field(&body, "password").as_deref(), Some("hunter2"));
        assert_eq!(extract_field(&body, "port").as_deref(), Some("5432"));
        assert_eq!(extract_field(&body, "missing"), None);
    }

    #[test]
    fn test_extract_kv_v2() {
        let body = json!({
            "data": {
                "data": {"key": "tls-private"},
                "metadata": {"version": 3}
            }
        });
        assert_eq!(extract_field(&body, "key").as_deref(), Some("tls-private"));
    }

    #[test]
    fn test_kv_v1_field_named_data() {
        let body = json!({"data": {"data": "plain"}});
        assert_eq!(extract_field(&body, "data").as_deref(), Some("plain"));
    }

    #[test]
    fn test_debug_hides_token() {
        let client = VaultClient::new("http://vault:8200/", "s.secret");
        let debug = format!("{client:?}");
        assert!(debug.contains(r#"addr: "http://vault:8200""#), "{debug}");
        assert!(!debug.contains("s.secret"));
    }

    #[tokio::test]
    async fn test_unreachable_vault_names_path() {
        let client = VaultClient::new("http://127.0.0.1:1", "s.secret");
        let err = client.read("secret/app#pw").await.unwrap_err();
        assert!(err.to_string().contains("secret/app"));
    }
}
