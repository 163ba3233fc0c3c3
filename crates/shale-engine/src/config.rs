//! Engine configuration.
//!
//! All configuration is typed and read-only after startup. Builders follow
//! the `with_*` convention; `Default` carries the documented defaults.

use std::time::Duration;

pub use shale_core::DocumentLimits;

/// Per-request operational settings.
#[derive(Debug, Clone)]
pub struct OperationsConfig {
    /// Namespace used when a command context does not carry one.
    pub keyspace: String,
    /// Hard cap on documents returned per read page.
    pub max_documents_per_page: usize,
    /// Upper bound on documents visited by one `updateMany`/`deleteMany`
    /// call; hitting it sets `moreData` in the response status.
    pub max_documents_per_operation: usize,
    /// Maximum documents accepted by a single `insertMany`.
    pub max_documents_per_insert: usize,
    /// Pause between consecutive DDL statements, giving the cluster time to
    /// settle between index creations.
    pub ddl_delay: Duration,
    /// CAS retry budget for optimistic writes.
    pub max_retries: usize,
    /// Upstream deadline applied to every command.
    pub request_timeout: Duration,
    /// Bound on concurrently executing store statements.
    pub max_inflight_statements: usize,
    /// How long a statement may wait for an inflight slot before the
    /// request fails with `SERVER_BUSY`.
    pub queue_wait: Duration,
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            keyspace: "default_keyspace".to_owned(),
            max_documents_per_page: 20,
            max_documents_per_operation: 20,
            max_documents_per_insert: 20,
            ddl_delay: Duration::from_millis(100),
            max_retries: 3,
            request_timeout: Duration::from_secs(30),
            max_inflight_statements: 1024,
            queue_wait: Duration::from_secs(5),
        }
    }
}

impl OperationsConfig {
    /// New configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fallback namespace.
    #[must_use]
    pub fn with_keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.keyspace = keyspace.into();
        self
    }

    /// Set the read page cap.
    #[must_use]
    pub const fn with_max_documents_per_page(mut self, max: usize) -> Self {
        self.max_documents_per_page = max;
        self
    }

    /// Set the inter-DDL-statement delay.
    #[must_use]
    pub const fn with_ddl_delay(mut self, delay: Duration) -> Self {
        self.ddl_delay = delay;
        self
    }

    /// Set the CAS retry budget.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the per-command deadline.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Database-wide capacity limits checked by `createCollection`.
#[derive(Debug, Clone)]
pub struct DatabaseLimitsConfig {
    /// Maximum number of collections across all namespaces.
    pub max_collections: usize,
    /// Indexes a new collection consumes. Kept in sync with the DDL issued
    /// by collection creation; see
    /// [`crate::schema::index_columns`].
    pub indexes_needed_per_collection: usize,
    /// Cluster-wide index budget.
    pub indexes_available_per_database: usize,
}

impl Default for DatabaseLimitsConfig {
    fn default() -> Self {
        Self {
            max_collections: 50,
            // Derived from the actual index column list, so the capacity
            // check can never drift from the DDL.
            indexes_needed_per_collection: crate::schema::index_columns(true).len(),
            indexes_available_per_database: 50,
        }
    }
}

/// Schema cache sizing.
#[derive(Debug, Clone)]
pub struct SchemaCacheConfig {
    /// Entry time-to-live, measured from population.
    pub ttl: Duration,
    /// Maximum cached collections.
    pub max_size: usize,
}

impl Default for SchemaCacheConfig {
    fn default() -> Self {
        Self { ttl: Duration::from_secs(600), max_size: 100 }
    }
}

/// Store session cache sizing.
#[derive(Debug, Clone)]
pub struct SessionCacheConfig {
    /// Idle time after which a session is evicted.
    pub idle_ttl: Duration,
    /// Maximum concurrently cached sessions.
    pub max_sessions: usize,
}

impl Default for SessionCacheConfig {
    fn default() -> Self {
        Self { idle_ttl: Duration::from_secs(300), max_sessions: 50 }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Operational settings.
    pub operations: OperationsConfig,
    /// Database capacity limits.
    pub database_limits: DatabaseLimitsConfig,
    /// Schema cache sizing.
    pub schema_cache: SchemaCacheConfig,
    /// Session cache sizing.
    pub session_cache: SessionCacheConfig,
    /// Document shredding limits.
    pub document_limits: DocumentLimits,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.operations.max_documents_per_page, 20);
        assert_eq!(config.operations.max_retries, 3);
        assert_eq!(config.schema_cache.max_size, 100);
        assert_eq!(config.schema_cache.ttl, Duration::from_secs(600));
    }

    #[test]
    fn indexes_needed_tracks_ddl() {
        let limits = DatabaseLimitsConfig::default();
        assert_eq!(limits.indexes_needed_per_collection, crate::schema::index_columns(true).len());
    }
}
