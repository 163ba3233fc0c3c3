//! Per-tenant store session cache.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use lru::LruCache;
use parking_lot::Mutex;

use shale_core::Result;

use crate::config::{OperationsConfig, SessionCacheConfig};

use super::{QueryExecutor, StoreExecutor};

/// Builds a store session for a tenant on cache miss.
pub type SessionFactory =
    Box<dyn Fn(Option<&str>) -> Result<Arc<dyn StoreExecutor>> + Send + Sync>;

struct CachedSession {
    executor: QueryExecutor,
    last_used: Instant,
}

/// Bounded cache of store sessions keyed by tenant.
///
/// Each cached session is wrapped in a [`QueryExecutor`] once, so the
/// inflight bound is shared by every request on that session. Sessions idle
/// longer than the configured TTL are dropped on the next lookup and
/// rebuilt through the factory; the cache is size-bounded with LRU
/// eviction.
pub struct SessionCache {
    config: SessionCacheConfig,
    max_inflight: usize,
    queue_wait: std::time::Duration,
    factory: SessionFactory,
    sessions: Mutex<LruCache<Option<String>, CachedSession>>,
}

impl SessionCache {
    /// Cache backed by the given factory.
    #[must_use]
    pub fn new(
        config: SessionCacheConfig,
        operations: &OperationsConfig,
        factory: SessionFactory,
    ) -> Self {
        let capacity =
            NonZeroUsize::new(config.max_sessions.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            config,
            max_inflight: operations.max_inflight_statements,
            queue_wait: operations.queue_wait,
            factory,
            sessions: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// The executor for a tenant, building a session if absent or expired.
    pub fn get(&self, tenant: Option<&str>) -> Result<QueryExecutor> {
        let key = tenant.map(ToOwned::to_owned);
        {
            let mut sessions = self.sessions.lock();
            if let Some(cached) = sessions.get_mut(&key) {
                if cached.last_used.elapsed() <= self.config.idle_ttl {
                    cached.last_used = Instant::now();
                    return Ok(cached.executor.clone());
                }
                sessions.pop(&key);
            }
        }
        // Build outside the lock; concurrent misses may race and the loser's
        // session is simply dropped.
        let store = (self.factory)(tenant)?;
        let executor = QueryExecutor::new(store, self.max_inflight, self.queue_wait);
        let mut sessions = self.sessions.lock();
        sessions.put(
            key,
            CachedSession { executor: executor.clone(), last_used: Instant::now() },
        );
        Ok(executor)
    }

    /// Number of cached sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// True when no session is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::executor::{KeyspaceMetadata, QueryOptions, ResultPage, Statement};

    use super::*;

    struct NullStore;

    #[async_trait]
    impl StoreExecutor for NullStore {
        async fn execute(&self, _: Statement, _: QueryOptions) -> Result<ResultPage> {
            Ok(ResultPage::applied())
        }

        async fn execute_schema_change(&self, _: Statement) -> Result<ResultPage> {
            Ok(ResultPage::applied())
        }

        async fn keyspaces(&self) -> Result<Vec<KeyspaceMetadata>> {
            Ok(Vec::new())
        }
    }

    fn counting_factory(counter: Arc<AtomicUsize>) -> SessionFactory {
        Box::new(move |_tenant| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NullStore))
        })
    }

    fn cache(config: SessionCacheConfig, counter: Arc<AtomicUsize>) -> SessionCache {
        SessionCache::new(config, &OperationsConfig::default(), counting_factory(counter))
    }

    #[test]
    fn sessions_are_reused_per_tenant() {
        let built = Arc::new(AtomicUsize::new(0));
        let cache = cache(SessionCacheConfig::default(), Arc::clone(&built));

        cache.get(Some("a")).unwrap();
        cache.get(Some("a")).unwrap();
        cache.get(Some("b")).unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn idle_sessions_are_rebuilt() {
        let built = Arc::new(AtomicUsize::new(0));
        let config = SessionCacheConfig { idle_ttl: Duration::ZERO, max_sessions: 4 };
        let cache = cache(config, Arc::clone(&built));

        cache.get(None).unwrap();
        cache.get(None).unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cache_is_size_bounded() {
        let built = Arc::new(AtomicUsize::new(0));
        let config = SessionCacheConfig { idle_ttl: Duration::from_secs(60), max_sessions: 2 };
        let cache = cache(config, built);

        cache.get(Some("a")).unwrap();
        cache.get(Some("b")).unwrap();
        cache.get(Some("c")).unwrap();
        assert_eq!(cache.len(), 2);
    }
}
