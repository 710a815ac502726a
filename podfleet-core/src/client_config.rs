//! Resolved per-cluster client configuration
//!
//! A [`ClientConfiguration`] carries everything needed to talk to one API
//! server: endpoint, decoded CA bundle, a token source and the user agent.
//! Nothing in it is cluster-secret except the CA, so it is cheap to drop once
//! the cluster's workload has finished.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::future::BoxFuture;
use http::header::{AUTHORIZATION, HeaderValue, USER_AGENT};
use kube::config::{KubeConfigOptions, Kubeconfig};
use serde::Serialize;
use snafu::ResultExt;
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{BoxError, Layer, Service};

use crate::error::{BuildClientSnafu, ClientError, LoadKubeconfigSnafu, RenderKubeconfigSnafu, TokenError};
use crate::token::{AccessToken, TokenSource};

const CONTEXT_NAME: &str = "podfleet";
const REQUEST_BUFFER: usize = 64;

/// Connection parameters for one cluster's API server.
#[derive(Clone)]
pub struct ClientConfiguration {
    host: String,
    ca_data: Vec<u8>,
    tokens: Arc<dyn TokenSource>,
    user_agent: String,
}

impl ClientConfiguration {
    pub fn new(
        host: impl Into<String>,
        ca_data: Vec<u8>,
        tokens: Arc<dyn TokenSource>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            ca_data,
            tokens,
            user_agent: user_agent.into(),
        }
    }

    /// API server URL, `https://<endpoint>`
    pub fn host(&self) -> &str {
        &self.host
    }

    /// PEM encoded CA bundle
    pub fn ca_data(&self) -> &[u8] {
        &self.ca_data
    }

    pub fn token_source(&self) -> &Arc<dyn TokenSource> {
        &self.tokens
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Current bearer token, refreshed by the token source as needed
    pub async fn bearer_token(&self) -> Result<AccessToken, TokenError> {
        self.tokens.token().await
    }

    /// Render a kubeconfig document for this cluster.
    ///
    /// With `token` set the document is self-contained and can be handed to
    /// external tools; it stops working once the token expires.
    pub fn render_kubeconfig(
        &self,
        token: Option<&AccessToken>,
        namespace: Option<&str>,
    ) -> Result<String, ClientError> {
        let doc = KubeconfigDoc {
            api_version: "v1",
            kind: "Config",
            clusters: vec![Named {
                name: CONTEXT_NAME,
                cluster: Some(ClusterDoc {
                    server: &self.host,
                    certificate_authority_data: STANDARD.encode(&self.ca_data),
                }),
                user: None,
                context: None,
            }],
            users: vec![Named {
                name: CONTEXT_NAME,
                cluster: None,
                user: Some(UserDoc {
                    token: token.map(AccessToken::secret),
                }),
                context: None,
            }],
            contexts: vec![Named {
                name: CONTEXT_NAME,
                cluster: None,
                user: None,
                context: Some(ContextDoc {
                    cluster: CONTEXT_NAME,
                    user: CONTEXT_NAME,
                    namespace,
                }),
            }],
            current_context: CONTEXT_NAME,
        };
        serde_yaml::to_string(&doc).context(RenderKubeconfigSnafu)
    }

    /// Build a Kubernetes client that asks the token source for a bearer
    /// token on every request.
    pub async fn kube_client(&self, namespace: &str) -> Result<kube::Client, ClientError> {
        let yaml = self.render_kubeconfig(None, Some(namespace))?;
        let kubeconfig = Kubeconfig::from_yaml(&yaml).context(LoadKubeconfigSnafu)?;
        let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .context(LoadKubeconfigSnafu)?;

        let client = kube::client::ClientBuilder::try_from(config)
            .context(BuildClientSnafu)?
            // Buffer makes the inner stack cloneable for the bearer layer
            .with_layer(&tower::buffer::BufferLayer::<
                http::Request<kube::client::Body>,
            >::new(REQUEST_BUFFER))
            .with_layer(&BearerTokenLayer::new(
                self.tokens.clone(),
                self.user_agent.clone(),
            ))
            .build();
        Ok(client)
    }
}

impl fmt::Debug for ClientConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfiguration")
            .field("host", &self.host)
            .field("ca_data_len", &self.ca_data.len())
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct KubeconfigDoc<'a> {
    #[serde(rename = "apiVersion")]
    api_version: &'a str,
    kind: &'a str,
    clusters: Vec<Named<'a>>,
    users: Vec<Named<'a>>,
    contexts: Vec<Named<'a>>,
    #[serde(rename = "current-context")]
    current_context: &'a str,
}

#[derive(Serialize)]
struct Named<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cluster: Option<ClusterDoc<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<UserDoc<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<ContextDoc<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct ClusterDoc<'a> {
    server: &'a str,
    certificate_authority_data: String,
}

#[derive(Serialize)]
struct UserDoc<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,
}

#[derive(Serialize)]
struct ContextDoc<'a> {
    cluster: &'a str,
    user: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    namespace: Option<&'a str>,
}

/// Tower layer injecting `Authorization: Bearer` and `User-Agent` headers.
#[derive(Clone)]
pub struct BearerTokenLayer {
    tokens: Arc<dyn TokenSource>,
    user_agent: String,
}

impl BearerTokenLayer {
    pub fn new(tokens: Arc<dyn TokenSource>, user_agent: impl Into<String>) -> Self {
        Self {
            tokens,
            user_agent: user_agent.into(),
        }
    }
}

impl<S> Layer<S> for BearerTokenLayer {
    type Service = BearerTokenService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BearerTokenService {
            inner,
            tokens: self.tokens.clone(),
            user_agent: self.user_agent.clone(),
        }
    }
}

#[derive(Clone)]
pub struct BearerTokenService<S> {
    inner: S,
    tokens: Arc<dyn TokenSource>,
    user_agent: String,
}

impl<S, B> Service<http::Request<B>> for BearerTokenService<S>
where
    S: Service<http::Request<B>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    S::Error: Into<BoxError>,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<S::Response, BoxError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, mut request: http::Request<B>) -> Self::Future {
        // Take the instance that was polled ready, leave a fresh clone behind
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let tokens = self.tokens.clone();
        let user_agent = self.user_agent.clone();

        Box::pin(async move {
            let token = tokens.token().await?;
            let mut bearer = HeaderValue::from_str(&format!("Bearer {}", token.secret()))?;
            bearer.set_sensitive(true);
            let headers = request.headers_mut();
            headers.insert(AUTHORIZATION, bearer);
            headers.insert(USER_AGENT, HeaderValue::from_str(&user_agent)?);
            inner.call(request).await.map_err(Into::into)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::StaticTokenSource;
    use std::convert::Infallible;
    use std::sync::Mutex;
    use tower::ServiceExt;

    const CA_PEM: &[u8] = b"-----BEGIN CERTIFICATE-----\nMIIBfake\n-----END CERTIFICATE-----\n";

    fn config() -> ClientConfiguration {
        ClientConfiguration::new(
            "https://10.0.0.1",
            CA_PEM.to_vec(),
            Arc::new(StaticTokenSource::new("ya29.test")),
            "podfleet/0.0.0",
        )
    }

    #[test]
    fn test_render_kubeconfig_with_token() {
        let token = AccessToken::new("ya29.test", None);
        let yaml = config()
            .render_kubeconfig(Some(&token), Some("addons"))
            .unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(doc["current-context"].as_str(), Some(CONTEXT_NAME));
        let cluster = &doc["clusters"][0]["cluster"];
        assert_eq!(cluster["server"].as_str(), Some("https://10.0.0.1"));
        let ca = cluster["certificate-authority-data"].as_str().unwrap();
        assert_eq!(STANDARD.decode(ca).unwrap(), CA_PEM);
        assert_eq!(doc["users"][0]["user"]["token"].as_str(), Some("ya29.test"));
        assert_eq!(
            doc["contexts"][0]["context"]["namespace"].as_str(),
            Some("addons")
        );
    }

    #[test]
    fn test_render_kubeconfig_parses_as_kubeconfig() {
        let yaml = config().render_kubeconfig(None, None).unwrap();
        assert!(!yaml.contains("token"));
        let parsed = Kubeconfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.current_context.as_deref(), Some(CONTEXT_NAME));
        assert_eq!(parsed.clusters.len(), 1);
    }

    #[tokio::test]
    async fn test_bearer_layer_sets_headers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        let inner = tower::service_fn(move |req: http::Request<()>| {
            let captured = captured.clone();
            async move {
                let headers = req.headers();
                captured.lock().unwrap().push((
                    headers[AUTHORIZATION].to_str().unwrap().to_string(),
                    headers[USER_AGENT].to_str().unwrap().to_string(),
                ));
                Ok::<_, Infallible>(())
            }
        });

        let layer = BearerTokenLayer::new(Arc::new(StaticTokenSource::new("abc")), "podfleet/1.2.3");
        let svc = layer.layer(inner);
        svc.oneshot(http::Request::new(())).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0, "Bearer abc");
        assert_eq!(seen[0].1, "podfleet/1.2.3");
    }

    #[test]
    fn test_debug_hides_ca_bytes() {
        let dbg = format!("{:?}", config());
        assert!(dbg.contains("ca_data_len"));
        assert!(!dbg.contains("MIIBfake"));
    }
}
