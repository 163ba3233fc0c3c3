//! Cached per-collection schema state.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use shale_core::Result;

use crate::config::SchemaCacheConfig;
use crate::executor::QueryExecutor;

use super::{is_collection_table, CollectionSettings};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    tenant: Option<String>,
    namespace: String,
    collection: String,
}

struct CacheEntry {
    cell: Arc<OnceCell<Option<CollectionSettings>>>,
    created_at: Instant,
}

/// Cached view of whether a collection's table exists, whether it is
/// vector-enabled, and which similarity function it uses.
///
/// Entries expire a fixed time after population and the cache is
/// size-bounded with LRU eviction. Concurrent misses on one key collapse to
/// a single metadata fetch. A stale entry is harmless: reads against a
/// rebuilt collection fail at the CAS protocol, not silently.
pub struct SchemaCache {
    config: SchemaCacheConfig,
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
}

impl SchemaCache {
    /// Empty cache with the given sizing.
    #[must_use]
    pub fn new(config: SchemaCacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self { config, entries: Mutex::new(LruCache::new(capacity)) }
    }

    /// The settings of a collection, or `None` when its table does not
    /// exist or is not collection-shaped.
    ///
    /// Negative results are not cached, so a collection created moments
    /// later is seen by the next command.
    pub async fn settings(
        &self,
        executor: &QueryExecutor,
        tenant: Option<&str>,
        namespace: &str,
        collection: &str,
    ) -> Result<Option<CollectionSettings>> {
        let key = CacheKey {
            tenant: tenant.map(ToOwned::to_owned),
            namespace: namespace.to_owned(),
            collection: collection.to_owned(),
        };
        let cell = self.entry_cell(&key);
        let result = cell
            .get_or_try_init(|| fetch_settings(executor, namespace, collection))
            .await
            .map(Clone::clone);
        match &result {
            Ok(Some(_)) => {}
            // Drop unpopulated or failed entries so the next lookup retries.
            Ok(None) | Err(_) => {
                self.entries.lock().pop(&key);
            }
        }
        result
    }

    /// Forget one collection, e.g. after dropping it.
    pub fn invalidate(&self, tenant: Option<&str>, namespace: &str, collection: &str) {
        let key = CacheKey {
            tenant: tenant.map(ToOwned::to_owned),
            namespace: namespace.to_owned(),
            collection: collection.to_owned(),
        };
        self.entries.lock().pop(&key);
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry_cell(&self, key: &CacheKey) -> Arc<OnceCell<Option<CollectionSettings>>> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(key) {
            if entry.created_at.elapsed() <= self.config.ttl {
                return Arc::clone(&entry.cell);
            }
            entries.pop(key);
        }
        let cell = Arc::new(OnceCell::new());
        entries.put(
            key.clone(),
            CacheEntry { cell: Arc::clone(&cell), created_at: Instant::now() },
        );
        cell
    }
}

async fn fetch_settings(
    executor: &QueryExecutor,
    namespace: &str,
    collection: &str,
) -> Result<Option<CollectionSettings>> {
    let keyspaces = executor.keyspaces().await?;
    let table = keyspaces
        .iter()
        .find(|keyspace| keyspace.name == namespace)
        .and_then(|keyspace| keyspace.tables.iter().find(|table| table.name == collection));
    Ok(table.filter(|table| is_collection_table(table)).map(CollectionSettings::from_table))
}
