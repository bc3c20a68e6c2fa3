//! Cached gateway access token with single-flight refresh.

use std::future::Future;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use super::ProviderError;

/// Subtracted from the gateway's advertised lifetime so a token is never
/// used in its last minute.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Lifetime assumed when the gateway does not advertise one.
const DEFAULT_LIFETIME: Duration = Duration::from_secs(55 * 60);

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Process-wide access token cache.
///
/// Reads take a shared lock only. When the token is missing or expired, one
/// caller fetches a new one while the others wait on the refresh lock and then
/// reuse its result.
#[derive(Debug, Default)]
pub struct TokenCache {
    current: RwLock<Option<CachedToken>>,
    refresh: Mutex<()>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long a token advertised with `expires_in` seconds may be used.
    pub fn lifetime(expires_in: Option<u64>) -> Duration {
        match expires_in {
            Some(secs) => Duration::from_secs(secs).saturating_sub(EXPIRY_MARGIN),
            None => DEFAULT_LIFETIME,
        }
    }

    async fn valid_token(&self) -> Option<String> {
        self.current
            .read()
            .await
            .as_ref()
            .filter(|token| Instant::now() < token.expires_at)
            .map(|token| token.value.clone())
    }

    /// Returns a valid token, calling `fetch` only if none is cached.
    ///
    /// `fetch` resolves to the token and how long it may be used.
    pub async fn get_or_refresh<F, Fut>(&self, fetch: F) -> Result<String, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(String, Duration), ProviderError>>,
    {
        if let Some(token) = self.valid_token().await {
            return Ok(token);
        }

        let _refresh = self.refresh.lock().await;
        // Someone else may have refreshed while we waited.
        if let Some(token) = self.valid_token().await {
            return Ok(token);
        }

        let (value, lifetime) = fetch().await?;
        *self.current.write().await = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + lifetime,
        });
        tracing::debug!(lifetime_secs = lifetime.as_secs(), "gateway access token refreshed");
        Ok(value)
    }

    /// Drops the cached token, e.g. after the gateway answered 401.
    pub async fn invalidate(&self) {
        *self.current.write().await = None;
    }
}
