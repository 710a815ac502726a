//! Bearer token sources
//!
//! A [`TokenSource`] hands out a currently valid access token. Callers never
//! look at expiry themselves; [`CachedTokenSource`] keeps the last token and
//! refreshes it shortly before it lapses.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use tokio::sync::Mutex;

use crate::error::TokenError;

/// Tokens are refreshed this long before their advertised expiry.
pub const EXPIRY_LEEWAY_SECS: i64 = 10;

/// An OAuth2 access token and its expiry hint.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    secret: String,
    expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
        }
    }

    /// Build from an OAuth2 `expires_in` value (seconds from now)
    pub fn expiring_in(secret: impl Into<String>, expires_in: Option<i64>) -> Self {
        Self::new(
            secret,
            expires_in.map(|secs| Utc::now() + Duration::seconds(secs)),
        )
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// A token without expiry never goes stale.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expiry) => now + Duration::seconds(EXPIRY_LEEWAY_SECS) < expiry,
            None => true,
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Renewable provider of bearer tokens. Must be safe for concurrent use.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<AccessToken, TokenError>;
}

/// One round-trip to an authorization server.
#[async_trait]
pub trait TokenFetcher: Send + Sync {
    async fn fetch(&self) -> Result<AccessToken, TokenError>;
}

/// Caches the fetcher's last token until it is about to expire.
pub struct CachedTokenSource<F> {
    fetcher: F,
    cached: Mutex<Option<AccessToken>>,
}

impl<F: TokenFetcher> CachedTokenSource<F> {
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            cached: Mutex::new(None),
        }
    }
}

#[async_trait]
impl<F: TokenFetcher> TokenSource for CachedTokenSource<F> {
    async fn token(&self) -> Result<AccessToken, TokenError> {
        // Held across the fetch so concurrent callers share one refresh
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.is_fresh_at(Utc::now()) {
                return Ok(token.clone());
            }
        }

        tracing::debug!("refreshing access token");
        let token = self.fetcher.fetch().await?;
        *cached = Some(token.clone());
        Ok(token)
    }
}

/// Always returns the same token. Handy for tests and pre-minted tokens.
#[derive(Debug, Clone)]
pub struct StaticTokenSource(AccessToken);

impl StaticTokenSource {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(AccessToken::new(secret, None))
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn token(&self) -> Result<AccessToken, TokenError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFetcher {
        calls: AtomicUsize,
        lifetime_secs: i64,
    }

    #[async_trait]
    impl TokenFetcher for CountingFetcher {
        async fn fetch(&self) -> Result<AccessToken, TokenError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AccessToken::expiring_in(
                format!("token-{n}"),
                Some(self.lifetime_secs),
            ))
        }
    }

    #[tokio::test]
    async fn test_cached_token_reused_while_fresh() {
        let source = CachedTokenSource::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            lifetime_secs: 3600,
        });

        let first = source.token().await.unwrap();
        let second = source.token().await.unwrap();

        assert_eq!(first.secret(), "token-0");
        assert_eq!(second.secret(), "token-0");
        assert_eq!(source.fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cached_token_refreshed_near_expiry() {
        // Lifetime shorter than the leeway: stale as soon as it is minted
        let source = CachedTokenSource::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            lifetime_secs: EXPIRY_LEEWAY_SECS - 5,
        });

        let first = source.token().await.unwrap();
        let second = source.token().await.unwrap();

        assert_eq!(first.secret(), "token-0");
        assert_eq!(second.secret(), "token-1");
    }

    #[test]
    fn test_token_without_expiry_is_fresh() {
        let token = AccessToken::new("abc", None);
        assert!(token.is_fresh_at(Utc::now()));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let token = AccessToken::new("super-secret", None);
        assert!(!format!("{token:?}").contains("super-secret"));
    }
}
