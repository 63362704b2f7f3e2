//! Single-flight credential refresh
//!
//! At most one call to the credential provider is outstanding at any time. The
//! first caller that needs a new credential marks a refresh in flight and spawns
//! it; every caller arriving while it runs joins the waiter queue instead of
//! calling the provider again. When the refresh settles, the credential (or the
//! error) is delivered to every waiter and the in-flight marker is cleared.
//!
//! The refresh runs on its own task so a caller that gives up (cancelled call,
//! dropped future) never aborts a refresh other callers are waiting on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use provider::{Credential, CredentialProvider, ProviderError};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::cache::CredentialCache;

type Waiter = oneshot::Sender<provider::Result<Credential>>;

/// Coordinates credential refreshes for one orchestrator instance.
///
/// Cheap to clone; clones share the cache, the provider and the in-flight state.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    provider: Arc<dyn CredentialProvider>,
    cache: CredentialCache,
    /// `Some` while a refresh is in flight; holds everyone waiting on it.
    /// Only locked for short synchronous sections, never across an `.await`.
    in_flight: Mutex<Option<Vec<Waiter>>>,
    provider_calls: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(provider: Arc<dyn CredentialProvider>) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                cache: CredentialCache::new(),
                in_flight: Mutex::new(None),
                provider_calls: AtomicU64::new(0),
            }),
        }
    }

    /// Return a credential that is fresh by its TTL, refreshing if needed.
    ///
    /// - No refresh in flight, not forced, cached credential fresh: returned as-is
    /// - No refresh in flight otherwise: a refresh is started and awaited
    /// - Refresh already in flight: joins it, forced or not (any new credential
    ///   satisfies both kinds of caller)
    pub async fn ensure_fresh(&self, force_refresh: bool) -> provider::Result<Credential> {
        let receiver = {
            let mut in_flight = self.inner.lock_in_flight();
            let (tx, rx) = oneshot::channel();
            match in_flight.as_mut() {
                Some(waiters) => {
                    waiters.push(tx);
                    debug!(
                        waiters = waiters.len(),
                        force_refresh, "refresh in flight, joining"
                    );
                }
                None => {
                    if !force_refresh
                        && let Some(credential) = self.inner.cache.read()
                        && credential.is_fresh()
                    {
                        return Ok(credential);
                    }
                    // Marked in flight before the lock is released and before any
                    // suspension point, so no second caller can start a refresh.
                    *in_flight = Some(vec![tx]);
                    self.spawn_refresh(force_refresh);
                }
            }
            rx
        };

        receiver.await.unwrap_or_else(|_| {
            Err(ProviderError::Internal(
                "credential refresh ended without a result".into(),
            ))
        })
    }

    /// Whether a refresh is currently outstanding.
    pub fn is_refreshing(&self) -> bool {
        self.inner.lock_in_flight().is_some()
    }

    /// Number of calls made to the credential provider so far.
    pub fn provider_calls(&self) -> u64 {
        self.inner.provider_calls.load(Ordering::Relaxed)
    }

    /// Last stored credential, fresh or not.
    pub fn current(&self) -> Option<Credential> {
        self.inner.cache.read()
    }

    /// Forget the cached credential so the next call must refresh.
    pub fn invalidate(&self) {
        self.inner.cache.clear();
    }

    fn spawn_refresh(&self, force_refresh: bool) {
        let guard = SettleGuard {
            inner: Arc::clone(&self.inner),
            settled: false,
        };
        tokio::spawn(async move {
            let provider = Arc::clone(&guard.inner.provider);
            guard.inner.provider_calls.fetch_add(1, Ordering::Relaxed);
            debug!(provider = provider.id(), force_refresh, "refreshing credential");

            let result = provider.fetch_token(force_refresh).await;
            guard.settle(result);
        });
    }
}

impl Inner {
    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, Option<Vec<Waiter>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a successful result, clear the in-flight marker and fan out.
    fn settle(&self, result: provider::Result<Credential>) {
        match &result {
            Ok(credential) => {
                self.cache.store(credential.clone());
                info!(
                    provider = self.provider.id(),
                    ttl_secs = credential.ttl().as_secs(),
                    "credential refreshed"
                );
            }
            Err(e) => {
                warn!(provider = self.provider.id(), error = %e, "credential refresh failed");
            }
        }

        let waiters = self.lock_in_flight().take().unwrap_or_default();
        debug!(waiters = waiters.len(), "refresh settled");
        for waiter in waiters {
            // A waiter whose caller went away simply drops the result.
            let _ = waiter.send(result.clone());
        }
    }
}

/// Ensures waiters are released even if the refresh task is aborted or panics.
struct SettleGuard {
    inner: Arc<Inner>,
    settled: bool,
}

impl SettleGuard {
    fn settle(mut self, result: provider::Result<Credential>) {
        self.settled = true;
        self.inner.settle(result);
    }
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        if !self.settled {
            self.inner.settle(Err(ProviderError::Internal(
                "credential refresh aborted".into(),
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Provider that counts calls, takes `delay` to answer and issues
    /// `tok_<n>` or fails when `fail` is set.
    struct CountingProvider {
        calls: AtomicUsize,
        forced: AtomicUsize,
        delay: Duration,
        ttl: Duration,
        fail: Option<ProviderError>,
    }

    impl CountingProvider {
        fn ok(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                forced: AtomicUsize::new(0),
                delay,
                ttl: Duration::from_secs(3300),
                fail: None,
            })
        }

        fn failing(error: ProviderError) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                forced: AtomicUsize::new(0),
                delay: Duration::from_millis(50),
                ttl: Duration::from_secs(3300),
                fail: Some(error),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl CredentialProvider for CountingProvider {
        fn id(&self) -> &str {
            "counting"
        }

        fn fetch_token(
            &self,
            force_refresh: bool,
        ) -> Pin<Box<dyn Future<Output = provider::Result<Credential>> + Send + '_>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                if force_refresh {
                    self.forced.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(self.delay).await;
                match &self.fail {
                    Some(e) => Err(e.clone()),
                    None => Ok(Credential::new(format!("tok_{n}"), self.ttl)),
                }
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_refresh() {
        let provider = CountingProvider::ok(Duration::from_millis(100));
        let coordinator = RefreshCoordinator::new(provider.clone());

        let mut handles = Vec::new();
        for _ in 0..10 {
            let coordinator = coordinator.clone();
            handles.push(tokio::spawn(
                async move { coordinator.ensure_fresh(false).await },
            ));
        }

        for handle in handles {
            let credential = handle.await.unwrap().unwrap();
            assert_eq!(credential.value().expose(), "tok_1");
        }
        assert_eq!(provider.calls(), 1);
        assert_eq!(coordinator.provider_calls(), 1);
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_cached_credential_skips_provider() {
        let provider = CountingProvider::ok(Duration::from_millis(10));
        let coordinator = RefreshCoordinator::new(provider.clone());

        let first = coordinator.ensure_fresh(false).await.unwrap();
        let second = coordinator.ensure_fresh(false).await.unwrap();

        assert!(first.same_token(&second));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_credential_triggers_refresh() {
        let provider = CountingProvider::ok(Duration::from_millis(10));
        let coordinator = RefreshCoordinator::new(provider.clone());

        coordinator.ensure_fresh(false).await.unwrap();
        tokio::time::advance(Duration::from_secs(3300)).await;

        let refreshed = coordinator.ensure_fresh(false).await.unwrap();
        assert_eq!(refreshed.value().expose(), "tok_2");
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_refresh_bypasses_fresh_cache() {
        let provider = CountingProvider::ok(Duration::from_millis(10));
        let coordinator = RefreshCoordinator::new(provider.clone());

        coordinator.ensure_fresh(false).await.unwrap();
        let forced = coordinator.ensure_fresh(true).await.unwrap();

        assert_eq!(forced.value().expose(), "tok_2");
        assert_eq!(provider.forced.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_refresh_joins_opportunistic_refresh() {
        let provider = CountingProvider::ok(Duration::from_millis(100));
        let coordinator = RefreshCoordinator::new(provider.clone());

        let opportunistic = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.ensure_fresh(false).await })
        };
        tokio::task::yield_now().await;
        assert!(coordinator.is_refreshing());

        let forced = coordinator.ensure_fresh(true).await.unwrap();
        let opportunistic = opportunistic.await.unwrap().unwrap();

        assert!(forced.same_token(&opportunistic));
        assert_eq!(provider.calls(), 1);
        assert_eq!(provider.forced.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_fans_out_to_every_waiter() {
        let provider = CountingProvider::failing(ProviderError::Auth("revoked".into()));
        let coordinator = RefreshCoordinator::new(provider.clone());

        let mut handles = Vec::new();
        for _ in 0..5 {
            let coordinator = coordinator.clone();
            handles.push(tokio::spawn(
                async move { coordinator.ensure_fresh(false).await },
            ));
        }

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert_eq!(err, ProviderError::Auth("revoked".into()));
        }
        assert_eq!(provider.calls(), 1);
        assert!(coordinator.current().is_none());
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test(start_paused = true)]
    async fn next_caller_after_failure_starts_new_refresh() {
        let provider = CountingProvider::failing(ProviderError::Unavailable("503".into()));
        let coordinator = RefreshCoordinator::new(provider.clone());

        assert!(coordinator.ensure_fresh(false).await.is_err());
        assert!(coordinator.ensure_fresh(false).await.is_err());
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_caller_does_not_abort_shared_refresh() {
        let provider = CountingProvider::ok(Duration::from_millis(100));
        let coordinator = RefreshCoordinator::new(provider.clone());

        let leader = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.ensure_fresh(false).await })
        };
        tokio::task::yield_now().await;

        let follower = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.ensure_fresh(false).await })
        };
        tokio::task::yield_now().await;

        // The caller that started the refresh goes away mid-flight.
        leader.abort();

        let credential = follower.await.unwrap().unwrap();
        assert_eq!(credential.value().expose(), "tok_1");
        assert_eq!(provider.calls(), 1);
        assert!(coordinator.current().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_forces_next_refresh() {
        let provider = CountingProvider::ok(Duration::from_millis(10));
        let coordinator = RefreshCoordinator::new(provider.clone());

        coordinator.ensure_fresh(false).await.unwrap();
        coordinator.invalidate();
        assert!(coordinator.current().is_none());

        coordinator.ensure_fresh(false).await.unwrap();
        assert_eq!(provider.calls(), 2);
    }
}
