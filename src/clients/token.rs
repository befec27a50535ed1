//! Bearer tokens for the verification client.
//!
//! Provides an injected [`TokenProvider`] and a [`TokenCache`] in front of it:
//! - tokens are reused until shortly before expiry
//! - one refresh at a time, other callers wait and reuse the result
//! - a still-usable token is kept if a refresh fails

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::common::error::{ClipError, ClipResult};

/// Refresh this long before the provider-reported expiry.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Lifetime assumed when the provider does not report one.
const TOKEN_DEFAULT_TTL: Duration = Duration::from_secs(50 * 60);

pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub value: String,
    pub expires_in: Option<Duration>,
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn fetch_token(&self) -> ClipResult<AccessToken>;
}

/// Fixed token, e.g. from `ACCESS_TOKEN`.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn fetch_token(&self) -> ClipResult<AccessToken> {
        Ok(AccessToken {
            value: self.token.clone(),
            expires_in: None,
        })
    }
}

/// Google application default credentials.
pub struct GcpTokenProvider {
    auth: Arc<dyn gcp_auth::TokenProvider>,
}

impl GcpTokenProvider {
    pub async fn discover() -> ClipResult<Self> {
        let auth = gcp_auth::provider()
            .await
            .map_err(|e| ClipError::Fatal(format!("no Google credentials found: {}", e)))?;
        Ok(Self { auth })
    }
}

#[async_trait]
impl TokenProvider for GcpTokenProvider {
    async fn fetch_token(&self) -> ClipResult<AccessToken> {
        let token = self
            .auth
            .token(&[CLOUD_PLATFORM_SCOPE])
            .await
            .map_err(|e| ClipError::transient(format!("token request failed: {}", e)))?;

        let expires_in = (token.expires_at() - Utc::now()).to_std().ok();
        Ok(AccessToken {
            value: token.as_str().to_string(),
            expires_in,
        })
    }
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + TOKEN_REFRESH_MARGIN < self.expires_at
    }

    fn is_usable(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

pub struct TokenCache {
    provider: Arc<dyn TokenProvider>,
    cache: RwLock<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            provider,
            cache: RwLock::new(None),
        }
    }

    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    pub async fn get_token(&self) -> ClipResult<String> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref().filter(|c| c.is_fresh()) {
                return Ok(cached.value.clone());
            }
        }

        let mut cache = self.cache.write().await;

        // Another caller may have refreshed while we waited for the lock.
        if let Some(cached) = cache.as_ref().filter(|c| c.is_fresh()) {
            return Ok(cached.value.clone());
        }

        match self.provider.fetch_token().await {
            Ok(token) => {
                let ttl = token.expires_in.unwrap_or(TOKEN_DEFAULT_TTL);
                *cache = Some(CachedToken {
                    value: token.value.clone(),
                    expires_at: Instant::now() + ttl,
                });
                debug!("Refreshed access token, valid for {:?}", ttl);
                Ok(token.value)
            }
            Err(e) => match cache.as_ref().filter(|c| c.is_usable()) {
                Some(cached) => {
                    warn!("Token refresh failed, using existing token: {}", e);
                    Ok(cached.value.clone())
                }
                None => Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
        ttl: Option<Duration>,
    }

    #[async_trait]
    impl TokenProvider for CountingProvider {
        async fn fetch_token(&self) -> ClipResult<AccessToken> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(AccessToken {
                value: format!("token-{}", n),
                expires_in: self.ttl,
            })
        }
    }

    #[tokio::test]
    async fn test_token_is_cached() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            ttl: None,
        });
        let cache = TokenCache::new(provider.clone());

        assert_eq!(cache.get_token().await.unwrap(), "token-1");
        assert_eq!(cache.get_token().await.unwrap(), "token-1");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_token_inside_margin_is_refreshed() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            ttl: Some(Duration::from_secs(30)),
        });
        let cache = TokenCache::new(provider.clone());

        assert_eq!(cache.get_token().await.unwrap(), "token-1");
        assert_eq!(cache.get_token().await.unwrap(), "token-2");
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            ttl: None,
        });
        let cache = Arc::new(TokenCache::new(provider.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_token().await.unwrap() })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap(), "token-1");
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            ttl: None,
        });
        let cache = TokenCache::new(provider);

        cache.get_token().await.unwrap();
        cache.invalidate().await;
        assert_eq!(cache.get_token().await.unwrap(), "token-2");
    }
}
