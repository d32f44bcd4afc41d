use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::GatewayError;

/// Token endpoint response (OAuth2 client credentials).
#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    pub expires_in: u64,
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Bearer token shared by all requests of one client.
///
/// Refresh happens on demand while holding the lock, so concurrent callers wait
/// for a single token request instead of racing their own.
#[derive(Debug)]
pub struct TokenCache {
    refresh_margin: Duration,
    slot: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(refresh_margin: Duration) -> Self {
        Self {
            refresh_margin,
            slot: Mutex::new(None),
        }
    }

    pub async fn get_or_refresh<F, Fut>(&self, refresh: F) -> Result<String, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AccessToken, GatewayError>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(token) = slot.as_ref() {
            if token.expires_at.saturating_duration_since(Instant::now()) > self.refresh_margin {
                return Ok(token.value.clone());
            }
        }

        let fresh = refresh().await?;
        tracing::debug!(expires_in = fresh.expires_in, "Gateway access token refreshed");
        *slot = Some(CachedToken {
            value: fresh.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(fresh.expires_in),
        });
        Ok(fresh.access_token)
    }

    /// Drop the cached token; the next call fetches a new one.
    pub async fn invalidate(&self) {
        self.slot.lock().await.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn issue(counter: &AtomicUsize, expires_in: u64) -> Result<AccessToken, GatewayError> {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(AccessToken {
            access_token: format!("token-{}", n),
            expires_in,
        })
    }

    #[tokio::test]
    async fn test_token_is_reused_while_fresh() {
        let cache = TokenCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        let first = cache.get_or_refresh(|| async { issue(&calls, 3600) }).await.unwrap();
        let second = cache.get_or_refresh(|| async { issue(&calls, 3600) }).await.unwrap();

        assert_eq!(first, "token-1");
        assert_eq!(second, "token-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_token_inside_refresh_margin_is_replaced() {
        let cache = TokenCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        cache.get_or_refresh(|| async { issue(&calls, 30) }).await.unwrap();
        let second = cache.get_or_refresh(|| async { issue(&calls, 3600) }).await.unwrap();

        assert_eq!(second, "token-2");
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let cache = TokenCache::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        cache.get_or_refresh(|| async { issue(&calls, 3600) }).await.unwrap();
        cache.invalidate().await;
        let token = cache.get_or_refresh(|| async { issue(&calls, 3600) }).await.unwrap();

        assert_eq!(token, "token-2");
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let cache = Arc::new(TokenCache::new(Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_refresh(|| async move {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        issue(&calls, 3600)
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "token-1");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_leaves_cache_empty() {
        let cache = TokenCache::new(Duration::from_secs(60));
        let result = cache
            .get_or_refresh(|| async { Err(GatewayError::Auth("invalid_client".into())) })
            .await;
        assert!(matches!(result, Err(GatewayError::Auth(_))));

        let calls = AtomicUsize::new(0);
        let token = cache.get_or_refresh(|| async { issue(&calls, 3600) }).await.unwrap();
        assert_eq!(token, "token-1");
    }
}
