//! Bearer token cache for two-step (login, then call) carriers.
//!
//! One cache per adapter instance. Tokens are reused until shortly before
//! their expiry and dropped as soon as the carrier answers 401 or 403.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Tokens are refreshed this long before the carrier says they expire.
pub const REFRESH_MARGIN: Duration = Duration::from_secs(30);

/// Token returned by a carrier login call.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken {
    pub value: String,
    /// Lifetime announced by the carrier; `None` means "until rejected".
    pub expires_in: Option<Duration>,
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BearerToken")
            .field("value", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

#[derive(Clone)]
struct CachedToken {
    value: String,
    expires_at: Option<Instant>,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        self.expires_at.is_none_or(|at| Instant::now() < at)
    }
}

#[derive(Default)]
pub struct TokenCache {
    slot: Mutex<Option<CachedToken>>,
}

impl fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCache")
            .field("cached", &self.is_cached())
            .finish()
    }
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<CachedToken>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the cached token, or run `fetch` and cache its result.
    ///
    /// The lock is held while fetching so concurrent attempts share one
    /// login instead of racing.
    pub fn get_or_fetch<E>(
        &self,
        fetch: impl FnOnce() -> Result<BearerToken, E>,
    ) -> Result<String, E> {
        let mut slot = self.lock();
        if let Some(token) = slot.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.value.clone());
        }

        let fetched = fetch()?;
        // A lifetime past the clock's range is treated as no expiry.
        let expires_at = fetched
            .expires_in
            .and_then(|ttl| Instant::now().checked_add(ttl.saturating_sub(REFRESH_MARGIN)));
        *slot = Some(CachedToken {
            value: fetched.value.clone(),
            expires_at,
        });
        Ok(fetched.value)
    }

    /// Drop the cached token, if any.
    pub fn invalidate(&self) {
        *self.lock() = None;
    }

    /// Whether a fresh token is cached.
    pub fn is_cached(&self) -> bool {
        self.lock().as_ref().is_some_and(CachedToken::is_fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::Arc;
    use std::thread;

    fn token(value: &str, ttl: Option<Duration>) -> BearerToken {
        BearerToken {
            value: value.to_string(),
            expires_in: ttl,
        }
    }

    #[test]
    fn fetches_once_while_fresh() {
        let cache = TokenCache::new();
        let calls = Cell::new(0);
        let fetch = || {
            calls.set(calls.get() + 1);
            Ok::<_, ()>(token("t1", Some(Duration::from_secs(3600))))
        };

        assert_eq!(cache.get_or_fetch(fetch).expect("first"), "t1");
        assert_eq!(cache.get_or_fetch(fetch).expect("second"), "t1");
        assert_eq!(calls.get(), 1);
        assert!(cache.is_cached());
    }

    #[test]
    fn short_lived_tokens_are_not_reused() {
        let cache = TokenCache::new();
        let calls = Cell::new(0);
        let fetch = || {
            calls.set(calls.get() + 1);
            Ok::<_, ()>(token("short", Some(Duration::from_secs(10))))
        };

        cache.get_or_fetch(fetch).expect("first");
        cache.get_or_fetch(fetch).expect("second");
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn tokens_without_expiry_live_until_invalidated() {
        let cache = TokenCache::new();
        cache
            .get_or_fetch(|| Ok::<_, ()>(token("forever", None)))
            .expect("fetch");
        assert!(cache.is_cached());

        cache.invalidate();
        assert!(!cache.is_cached());

        let value = cache
            .get_or_fetch(|| Ok::<_, ()>(token("renewed", None)))
            .expect("refetch");
        assert_eq!(value, "renewed");
    }

    #[test]
    fn unbounded_lifetime_does_not_overflow() {
        let cache = TokenCache::new();
        let value = cache
            .get_or_fetch(|| Ok::<_, ()>(token("long", Some(Duration::MAX))))
            .expect("fetch");
        assert_eq!(value, "long");
        assert!(cache.is_cached());
    }

    #[test]
    fn fetch_errors_leave_cache_empty() {
        let cache = TokenCache::new();
        let err = cache
            .get_or_fetch(|| Err::<BearerToken, _>("login refused"))
            .expect_err("error");
        assert_eq!(err, "login refused");
        assert!(!cache.is_cached());
    }

    #[test]
    fn concurrent_callers_share_one_login() {
        let cache = Arc::new(TokenCache::new());
        let calls = Arc::new(Mutex::new(0u32));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                thread::spawn(move || {
                    cache
                        .get_or_fetch(|| {
                            *calls.lock().expect("lock") += 1;
                            thread::sleep(Duration::from_millis(10));
                            Ok::<_, ()>(token("shared", Some(Duration::from_secs(3600))))
                        })
                        .expect("fetch")
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().expect("join"), "shared");
        }
        assert_eq!(*calls.lock().expect("lock"), 1);
    }

    #[test]
    fn debug_redacts_token() {
        let rendered = format!("{:?}", token("secret-value", None));
        assert!(!rendered.contains("secret-value"));
    }
}
