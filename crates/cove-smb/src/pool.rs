//! The context pool
//!
//! One live [`SmbContext`] per endpoint, shared by every handle that
//! names the same (host, port, share, auth) tuple. Contexts are created
//! on first acquire, refcounted through RAII guards, kept warm for a
//! short idle TTL after the last guard drops, and then torn down on
//! their own driver thread.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::client::{default_factory, ClientFactory};
use crate::config::SmbConfig;
use crate::context::SmbContext;
use crate::endpoint::SmbEndpoint;
use crate::error::Result;

/// Pool of live contexts keyed by endpoint
#[derive(Clone)]
pub struct ContextPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: SmbConfig,
    factory: ClientFactory,
    map: Mutex<HashMap<SmbEndpoint, PoolEntry>>,
}

struct PoolEntry {
    context: Arc<SmbContext>,
    refs: usize,
    /// Set while refs == 0; cleared on reuse.
    idle_since: Option<Instant>,
    /// Bumped on every reuse so stale reapers stand down.
    epoch: u64,
}

/// RAII share of a pooled context
///
/// Dereferences to [`SmbContext`]; dropping the guard releases the
/// reference and, once the last one is gone, starts the idle clock.
pub struct ContextGuard {
    inner: Arc<PoolInner>,
    context: Arc<SmbContext>,
}

impl ContextPool {
    /// A pool with the default backend selection.
    pub fn new(config: SmbConfig) -> Self {
        Self::with_factory(config, default_factory())
    }

    /// A pool creating backends through an explicit factory.
    pub fn with_factory(config: SmbConfig, factory: ClientFactory) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                factory,
                map: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The pool's configuration.
    pub fn config(&self) -> &SmbConfig {
        &self.inner.config
    }

    /// Obtain a context for the endpoint, reusing a live one when
    /// possible.
    ///
    /// Connect runs at most once per call and failed connects are never
    /// cached; the error carries the backend's message.
    pub async fn acquire(&self, endpoint: &SmbEndpoint) -> Result<ContextGuard> {
        self.inner.reap_expired();

        if let Some(guard) = self.inner.try_reuse(endpoint) {
            return Ok(guard);
        }

        // Connect outside the pool lock; only the map mutation below
        // holds it.
        let context = SmbContext::connect(
            endpoint.clone(),
            &self.inner.config,
            self.inner.factory.clone(),
        )
        .await?;

        let mut map = self.inner.map.lock();
        if let Some(entry) = map.get_mut(endpoint) {
            // Lost the race to another acquire; keep theirs.
            entry.refs += 1;
            entry.idle_since = None;
            entry.epoch += 1;
            let existing = entry.context.clone();
            drop(map);
            context.shutdown();
            return Ok(ContextGuard {
                inner: self.inner.clone(),
                context: existing,
            });
        }
        debug!(%endpoint, "context pooled");
        map.insert(
            endpoint.clone(),
            PoolEntry {
                context: context.clone(),
                refs: 1,
                idle_since: None,
                epoch: 0,
            },
        );
        drop(map);
        Ok(ContextGuard {
            inner: self.inner.clone(),
            context,
        })
    }

    /// Number of live contexts (idle ones included).
    pub fn len(&self) -> usize {
        self.inner.map.lock().len()
    }

    /// True when no context is pooled.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PoolInner {
    fn try_reuse(self: &Arc<Self>, endpoint: &SmbEndpoint) -> Option<ContextGuard> {
        let mut map = self.map.lock();
        let entry = map.get_mut(endpoint)?;
        entry.refs += 1;
        entry.idle_since = None;
        entry.epoch += 1;
        trace!(%endpoint, refs = entry.refs, "context reused");
        Some(ContextGuard {
            inner: self.clone(),
            context: entry.context.clone(),
        })
    }

    fn release(self: &Arc<Self>, endpoint: &SmbEndpoint) {
        let mut map = self.map.lock();
        let Some(entry) = map.get_mut(endpoint) else {
            return;
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs > 0 {
            return;
        }
        entry.idle_since = Some(Instant::now());
        let epoch = entry.epoch;
        drop(map);

        // Schedule the timed teardown when a runtime is around;
        // otherwise the entry is reaped lazily on a later acquire.
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            let inner = self.clone();
            let endpoint = endpoint.clone();
            let ttl = self.config.idle_ttl;
            rt.spawn(async move {
                tokio::time::sleep(ttl).await;
                inner.reap_one(&endpoint, epoch);
            });
        }
    }

    fn reap_one(&self, endpoint: &SmbEndpoint, epoch: u64) {
        let mut map = self.map.lock();
        let Some(entry) = map.get(endpoint) else {
            return;
        };
        if entry.refs == 0 && entry.epoch == epoch {
            let entry = map.remove(endpoint).expect("entry checked above");
            debug!(%endpoint, "idle context torn down");
            entry.context.shutdown();
        }
    }

    fn reap_expired(&self) {
        let ttl = self.config.idle_ttl;
        let mut map = self.map.lock();
        map.retain(|endpoint, entry| {
            let expired = entry.refs == 0
                && entry
                    .idle_since
                    .is_some_and(|since| since.elapsed() >= ttl);
            if expired {
                debug!(%endpoint, "idle context torn down");
                entry.context.shutdown();
            }
            !expired
        });
    }
}

impl std::ops::Deref for ContextGuard {
    type Target = SmbContext;

    fn deref(&self) -> &Self::Target {
        &self.context
    }
}

impl ContextGuard {
    /// The shared context.
    pub fn context(&self) -> &Arc<SmbContext> {
        &self.context
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let endpoint = self.context.endpoint().as_ref().clone();
        self.inner.release(&endpoint);
    }
}

impl std::fmt::Debug for ContextPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextPool")
            .field("contexts", &self.len())
            .finish()
    }
}

impl std::fmt::Debug for ContextGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextGuard")
            .field("endpoint", self.context.endpoint())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockClient, MockShare};
    use std::time::Duration;

    fn mock_pool(config: SmbConfig, share: Arc<MockShare>) -> ContextPool {
        ContextPool::with_factory(
            config,
            Arc::new(move |_: &SmbEndpoint| {
                Box::new(MockClient::with_share(share.clone())) as Box<dyn crate::ShareClient>
            }),
        )
    }

    fn endpoint() -> SmbEndpoint {
        SmbEndpoint::parse_with_env("smb://mock/share", |_| None).unwrap()
    }

    #[tokio::test]
    async fn test_acquire_reuses_live_context() {
        let pool = mock_pool(SmbConfig::default(), MockShare::with_fixture());
        let a = pool.acquire(&endpoint()).await.unwrap();
        let b = pool.acquire(&endpoint()).await.unwrap();
        assert!(Arc::ptr_eq(a.context(), b.context()));
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_idle_context_stays_warm_within_ttl() {
        let pool = mock_pool(
            SmbConfig::default().idle_ttl(Duration::from_secs(60)),
            MockShare::with_fixture(),
        );
        let first = pool.acquire(&endpoint()).await.unwrap();
        let ctx = first.context().clone();
        drop(first);
        let second = pool.acquire(&endpoint()).await.unwrap();
        assert!(Arc::ptr_eq(&ctx, second.context()));
    }

    #[tokio::test]
    async fn test_expired_context_is_replaced() {
        let pool = mock_pool(
            SmbConfig::default().idle_ttl(Duration::ZERO),
            MockShare::with_fixture(),
        );
        let first = pool.acquire(&endpoint()).await.unwrap();
        let ctx = first.context().clone();
        drop(first);
        // TTL of zero: the reaper task fires immediately, and the
        // lazy sweep in acquire would catch it regardless.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = pool.acquire(&endpoint()).await.unwrap();
        assert!(!Arc::ptr_eq(&ctx, second.context()));
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_not_cached() {
        let share = MockShare::with_fixture();
        let pool = mock_pool(SmbConfig::default(), share.clone());
        share.set_offline(true);
        assert!(pool.acquire(&endpoint()).await.is_err());
        assert!(pool.is_empty());
        share.set_offline(false);
        assert!(pool.acquire(&endpoint()).await.is_ok());
        assert_eq!(pool.len(), 1);
    }
}
