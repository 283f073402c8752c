//! Three-tier entity cache.
//!
//! Reads consult, in order:
//!
//! - **Local tier**: decoded entities held in process by memkey
//! - **Distributed tier**: encoded records shared across processes, read
//!   under a short deadline and treated as empty when it fails
//! - **Primary store**: the store of record, fetched in chunks
//!
//! Each tier is asked only for the keys every faster tier missed, and each
//! hit is copied into the faster tiers. Keys the primary store does not
//! have are cached as negative entries.
//!
//! Writes go to the primary store first. The local tier is then updated and
//! the distributed entries for the written keys are deleted, never
//! populated, so the next read refills them from the store.
//!
//! # Example
//!
//! ```ignore
//! let cache = TierCache::builder(store, distributed).build()?;
//!
//! let mut story = Story { id: 0, title: "hello".into(), ..Default::default() };
//! let key = cache.put(&mut story).await?;
//!
//! let mut fetched = Story { id: key.int_id(), ..Default::default() };
//! cache.get(&mut fetched).await?;
//! ```

pub mod batch;
pub mod local;
mod query;
pub mod transaction;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use strata_core::sync::mutex_lock;
use strata_core::{
    batch_outcome, CacheError, CacheResult, DistributedCacheError, Entity, EntityCodec, Key,
    KeyError, KeyResolver, Record, StoreError, TierCacheConfig,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

pub use batch::BatchCoordinator;
pub use local::{LocalEntry, LocalLookup, LocalTier};
pub use query::QueryIterator;
pub use transaction::{CommittedChanges, TransactionScope};

use crate::query::{Query, QueryRow};
use crate::store::{CacheItem, DistributedCache, PrimaryStore, StoreOps, TransactionOptions};

// ============================================================================
// STATS
// ============================================================================

/// Snapshot of per-tier hit accounting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierStats {
    /// Keys served by the local tier, negative entries included.
    pub local_hits: u64,
    /// Keys served by the distributed tier, negative entries included.
    pub distributed_hits: u64,
    /// Keys fetched from the primary store.
    pub primary_fetches: u64,
    /// Distributed-cache calls that hit their deadline.
    pub distributed_timeouts: u64,
    /// Distributed-cache calls that failed for any other reason.
    pub distributed_errors: u64,
}

impl TierStats {
    /// Fraction of requested keys served without the primary store.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.local_hits + self.distributed_hits;
        let total = hits + self.primary_fetches;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct TierCounters {
    local_hits: AtomicU64,
    distributed_hits: AtomicU64,
    primary_fetches: AtomicU64,
    distributed_timeouts: AtomicU64,
    distributed_errors: AtomicU64,
}

impl TierCounters {
    fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TierStats {
        TierStats {
            local_hits: self.local_hits.load(Ordering::Relaxed),
            distributed_hits: self.distributed_hits.load(Ordering::Relaxed),
            primary_fetches: self.primary_fetches.load(Ordering::Relaxed),
            distributed_timeouts: self.distributed_timeouts.load(Ordering::Relaxed),
            distributed_errors: self.distributed_errors.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// BACKEND
// ============================================================================

/// Where primary-store calls go: the shared store, or one transaction.
enum Backend {
    Store(Arc<dyn PrimaryStore>),
    Transaction(Arc<TransactionScope>),
}

#[async_trait]
impl StoreOps for Backend {
    async fn get_multi(&self, keys: &[Key]) -> CacheResult<Vec<CacheResult<Record>>> {
        match self {
            Backend::Store(store) => store.get_multi(keys).await,
            Backend::Transaction(scope) => scope.transaction()?.get_multi(keys).await,
        }
    }

    async fn put_multi(
        &self,
        keys: &[Key],
        records: &[Record],
    ) -> CacheResult<Vec<CacheResult<Key>>> {
        match self {
            Backend::Store(store) => store.put_multi(keys, records).await,
            Backend::Transaction(scope) => scope.transaction()?.put_multi(keys, records).await,
        }
    }

    async fn delete_multi(&self, keys: &[Key]) -> CacheResult<Vec<CacheResult<()>>> {
        match self {
            Backend::Store(store) => store.delete_multi(keys).await,
            Backend::Transaction(scope) => scope.transaction()?.delete_multi(keys).await,
        }
    }

    async fn run_query(
        &self,
        query: &Query,
    ) -> CacheResult<BoxStream<'static, CacheResult<QueryRow>>> {
        match self {
            Backend::Store(store) => store.run_query(query).await,
            Backend::Transaction(scope) => scope.transaction()?.run_query(query).await,
        }
    }

    async fn count(&self, query: &Query) -> CacheResult<usize> {
        match self {
            Backend::Store(store) => store.count(query).await,
            Backend::Transaction(scope) => scope.transaction()?.count(query).await,
        }
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Builder for [`TierCache`].
pub struct TierCacheBuilder {
    store: Arc<dyn PrimaryStore>,
    distributed: Arc<dyn DistributedCache>,
    config: TierCacheConfig,
    resolver: Option<KeyResolver>,
    codec: Option<Arc<EntityCodec>>,
}

impl TierCacheBuilder {
    pub fn config(mut self, config: TierCacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a specific resolver, e.g. one with a custom kind-name function
    /// or a private schema registry.
    pub fn resolver(mut self, resolver: KeyResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn codec(mut self, codec: Arc<EntityCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Validate the configuration and build. Without an explicit codec, a
    /// custom resolver gets a codec over its own schema registry and the
    /// default resolver shares the global codec.
    pub fn build(self) -> CacheResult<TierCache> {
        self.config.validate()?;
        let codec = match (self.codec, &self.resolver) {
            (Some(codec), _) => codec,
            (None, Some(resolver)) => Arc::new(EntityCodec::new(Arc::clone(resolver.registry()))),
            (None, None) => EntityCodec::global(),
        };
        let resolver = self.resolver.unwrap_or_default();
        let batch = BatchCoordinator::from_config(&self.config);
        Ok(TierCache {
            inner: Arc::new(TierCacheInner {
                config: self.config,
                backend: Backend::Store(Arc::clone(&self.store)),
                store: self.store,
                distributed: self.distributed,
                local: Arc::new(LocalTier::new()),
                codec,
                resolver,
                batch,
                background: Mutex::new(Vec::new()),
                counters: TierCounters::default(),
            }),
        })
    }
}

// ============================================================================
// TIER CACHE
// ============================================================================

struct TierCacheInner {
    config: TierCacheConfig,
    backend: Backend,
    store: Arc<dyn PrimaryStore>,
    distributed: Arc<dyn DistributedCache>,
    local: Arc<LocalTier>,
    codec: Arc<EntityCodec>,
    resolver: KeyResolver,
    batch: BatchCoordinator,
    background: Mutex<Vec<JoinHandle<()>>>,
    counters: TierCounters,
}

/// Entity cache over a primary store and a distributed cache.
///
/// Create one per unit of work. Clones share the same local tier.
#[derive(Clone)]
pub struct TierCache {
    inner: Arc<TierCacheInner>,
}

impl std::fmt::Debug for TierCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TierCache")
            .field("in_transaction", &self.is_in_transaction())
            .field("local_entries", &self.inner.local.len())
            .finish_non_exhaustive()
    }
}

impl TierCache {
    pub fn builder(
        store: Arc<dyn PrimaryStore>,
        distributed: Arc<dyn DistributedCache>,
    ) -> TierCacheBuilder {
        TierCacheBuilder {
            store,
            distributed,
            config: TierCacheConfig::default(),
            resolver: None,
            codec: None,
        }
    }

    /// Cache with the default configuration and the global schema registry.
    pub fn new(
        store: Arc<dyn PrimaryStore>,
        distributed: Arc<dyn DistributedCache>,
    ) -> CacheResult<Self> {
        Self::builder(store, distributed).build()
    }

    pub fn config(&self) -> &TierCacheConfig {
        &self.inner.config
    }

    pub fn resolver(&self) -> &KeyResolver {
        &self.inner.resolver
    }

    pub fn codec(&self) -> &Arc<EntityCodec> {
        &self.inner.codec
    }

    pub fn local_tier(&self) -> &LocalTier {
        &self.inner.local
    }

    pub fn stats(&self) -> TierStats {
        self.inner.counters.snapshot()
    }

    pub fn is_in_transaction(&self) -> bool {
        matches!(self.inner.backend, Backend::Transaction(_))
    }

    /// Memkey under which `key` is stored in the local and distributed tiers.
    pub fn memkey(&self, key: &Key) -> String {
        key.cache_key(&self.inner.config.key_prefix)
    }

    // ------------------------------------------------------------------------
    // Keys
    // ------------------------------------------------------------------------

    /// The key for `src`, or `None` if it cannot be resolved. The key may be
    /// incomplete.
    pub fn key<T: Entity>(&self, src: &T) -> Option<Key> {
        self.key_error(src).ok()
    }

    pub fn key_error<T: Entity>(&self, src: &T) -> CacheResult<Key> {
        self.inner.resolver.resolve_key(src).map(|(key, _)| key)
    }

    pub fn kind<T: Entity>(&self, src: &T) -> CacheResult<String> {
        self.inner.resolver.kind(src)
    }

    /// Empty the local tier.
    pub fn flush_local_cache(&self) {
        self.inner.local.clear();
    }

    /// Resolve complete keys for a read or delete.
    fn complete_keys<T: Entity>(&self, entities: &[T]) -> CacheResult<Vec<Key>> {
        entities
            .iter()
            .map(|entity| {
                let (key, _) = self.inner.resolver.resolve_key(entity)?;
                if key.is_incomplete() {
                    return Err(KeyError::IncompleteKey {
                        kind: key.kind().to_string(),
                    }
                    .into());
                }
                Ok(key)
            })
            .collect()
    }

    // ------------------------------------------------------------------------
    // Get
    // ------------------------------------------------------------------------

    /// Load `dst` by the key its fields describe.
    pub async fn get<T: Entity>(&self, dst: &mut T) -> CacheResult<()> {
        self.get_multi(std::slice::from_mut(dst)).await.map_err(single)
    }

    /// Load every entity in `dst` by the key its fields describe.
    ///
    /// On partial failure the error is a [`CacheError::Multi`] aligned with
    /// `dst`; entities at successful indices are loaded.
    pub async fn get_multi<T: Entity>(&self, dst: &mut [T]) -> CacheResult<()> {
        let keys = self.complete_keys(dst)?;
        if keys.is_empty() {
            return Ok(());
        }
        let mut results: Vec<CacheResult<()>> = keys.iter().map(|_| Ok(())).collect();

        let pending: Vec<usize> = if self.is_in_transaction() {
            (0..keys.len()).collect()
        } else {
            let memkeys: Vec<String> = keys.iter().map(|k| self.memkey(k)).collect();
            let pending = self.get_local(dst, &keys, &memkeys, &mut results);
            self.get_distributed(dst, &keys, &memkeys, pending, &mut results)
                .await?
        };

        if !pending.is_empty() {
            self.get_primary(dst, &keys, &pending, &mut results).await?;
        }

        batch_outcome(results).map(|_| ())
    }

    /// Serve what the local tier has; return the indices it missed.
    fn get_local<T: Entity>(
        &self,
        dst: &mut [T],
        keys: &[Key],
        memkeys: &[String],
        results: &mut [CacheResult<()>],
    ) -> Vec<usize> {
        let mut pending = Vec::new();
        for (i, memkey) in memkeys.iter().enumerate() {
            match self.inner.local.lookup::<T>(memkey) {
                LocalLookup::Hit(value) => dst[i] = value,
                LocalLookup::Absent => results[i] = Err(not_found_error(&keys[i])),
                LocalLookup::Miss => pending.push(i),
            }
        }
        let hits = keys.len() - pending.len();
        TierCounters::add(&self.inner.counters.local_hits, hits);
        debug!(operation = "get", tier = "local", hits, misses = pending.len(), "tier lookup");
        pending
    }

    /// Serve what the distributed tier has; return the indices it missed.
    /// A record that fails to decode for any reason other than a negative
    /// entry fails the whole read.
    async fn get_distributed<T: Entity>(
        &self,
        dst: &mut [T],
        keys: &[Key],
        memkeys: &[String],
        pending: Vec<usize>,
        results: &mut [CacheResult<()>],
    ) -> CacheResult<Vec<usize>> {
        if pending.is_empty() {
            return Ok(pending);
        }
        let lookup: Vec<String> = pending.iter().map(|&i| memkeys[i].clone()).collect();
        let found = self.distributed_get(&lookup).await;

        let mut missed = Vec::new();
        let mut fill = Vec::new();
        for i in pending {
            let Some(bytes) = found.get(&memkeys[i]) else {
                missed.push(i);
                continue;
            };
            match self.inner.codec.decode(bytes, &mut dst[i]) {
                Ok(()) => fill.push((memkeys[i].clone(), LocalEntry::present(dst[i].clone()))),
                Err(err) if err.is_not_found() => {
                    results[i] = Err(not_found_error(&keys[i]));
                    fill.push((memkeys[i].clone(), LocalEntry::Absent));
                }
                Err(err) => return Err(err),
            }
        }

        TierCounters::add(&self.inner.counters.distributed_hits, fill.len());
        debug!(
            operation = "get",
            tier = "distributed",
            hits = fill.len(),
            misses = missed.len(),
            "tier lookup"
        );
        self.inner.local.insert_many(fill);
        Ok(missed)
    }

    /// Fetch the remaining indices from the primary store and back-fill the
    /// faster tiers. Outside a transaction the local tier is filled before
    /// returning and the distributed tier in the background.
    async fn get_primary<T: Entity>(
        &self,
        dst: &mut [T],
        keys: &[Key],
        pending: &[usize],
        results: &mut [CacheResult<()>],
    ) -> CacheResult<()> {
        let fetch: Vec<Key> = pending.iter().map(|&i| keys[i].clone()).collect();
        let records = self.inner.batch.get(&self.inner.backend, &fetch).await;
        TierCounters::add(&self.inner.counters.primary_fetches, fetch.len());

        let fill_caches = !self.is_in_transaction();
        let mut local = Vec::new();
        let mut distributed = Vec::new();
        for (&i, record) in pending.iter().zip(records) {
            let memkey = self.memkey(&keys[i]);
            match record.and_then(|record| self.materialize::<T>(record, &keys[i])) {
                Ok(entity) => {
                    if fill_caches {
                        match self.inner.codec.encode(Some(&entity)) {
                            Ok(bytes) => distributed.push(CacheItem {
                                key: memkey.clone(),
                                value: bytes,
                            }),
                            Err(err) => self.log_error("encode", &err),
                        }
                        local.push((memkey, LocalEntry::present(entity.clone())));
                    }
                    dst[i] = entity;
                }
                Err(err) if err.is_not_found() => {
                    if fill_caches {
                        let bytes = self.inner.codec.encode::<T>(None)?;
                        distributed.push(CacheItem { key: memkey.clone(), value: bytes });
                        local.push((memkey, LocalEntry::Absent));
                    }
                    results[i] = Err(not_found_error(&keys[i]));
                }
                Err(err) => results[i] = Err(err),
            }
        }

        if fill_caches {
            self.inner.local.insert_many(local);
            self.spawn_distributed_set(distributed);
        }
        Ok(())
    }

    /// Build an entity from a stored record and write its key fields.
    fn materialize<T: Entity>(&self, record: Record, key: &Key) -> CacheResult<T> {
        let mut entity = T::from_record(record)?;
        self.inner.resolver.apply_key(&mut entity, key)?;
        Ok(entity)
    }

    // ------------------------------------------------------------------------
    // Put
    // ------------------------------------------------------------------------

    /// Store `src` and return its key. An unset integer id is assigned by
    /// the primary store and written back into `src`.
    pub async fn put<T: Entity>(&self, src: &mut T) -> CacheResult<Key> {
        let mut keys = self
            .put_multi(std::slice::from_mut(src))
            .await
            .map_err(single)?;
        keys.pop().ok_or_else(|| {
            StoreError::Backend {
                reason: "put returned no key".to_string(),
            }
            .into()
        })
    }

    /// Store every entity in `src` and return their keys in input order.
    ///
    /// On partial failure the error is a [`CacheError::Multi`] aligned with
    /// `src`. Entities at successful indices still have their key fields
    /// written back, so [`TierCache::key`] recovers their keys.
    pub async fn put_multi<T: Entity>(&self, src: &mut [T]) -> CacheResult<Vec<Key>> {
        let schema = self.inner.resolver.schema::<T>()?;
        let mut keys = Vec::with_capacity(src.len());
        let mut records = Vec::with_capacity(src.len());
        for entity in src.iter() {
            let (key, has_string_id) = self.inner.resolver.resolve_key(entity)?;
            if key.is_incomplete() && has_string_id {
                return Err(KeyError::EmptyStringId {
                    kind: key.kind().to_string(),
                }
                .into());
            }
            records.push(schema.data_record(entity.to_record()));
            keys.push(key);
        }
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut results = self
            .inner
            .batch
            .put(&self.inner.backend, &keys, &records)
            .await;

        let mut written = Vec::new();
        let mut invalidate: HashSet<String> = keys
            .iter()
            .filter(|k| !k.is_incomplete())
            .map(|k| self.memkey(k))
            .collect();
        for (i, result) in results.iter_mut().enumerate() {
            let Ok(key) = result else { continue };
            if let Err(err) = self.inner.resolver.apply_key(&mut src[i], key) {
                *result = Err(err);
                continue;
            }
            let memkey = self.memkey(key);
            invalidate.insert(memkey.clone());
            written.push((memkey, LocalEntry::present(src[i].clone())));
        }
        let invalidate: Vec<String> = invalidate.into_iter().collect();

        match &self.inner.backend {
            Backend::Transaction(scope) => {
                scope.stage_set(written)?;
                scope.stage_invalidation(invalidate)?;
            }
            Backend::Store(_) => {
                self.inner.local.insert_many(written);
                self.distributed_delete(&invalidate).await;
            }
        }

        batch_outcome(results)
    }

    // ------------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------------

    pub async fn delete(&self, key: &Key) -> CacheResult<()> {
        self.delete_multi(std::slice::from_ref(key))
            .await
            .map_err(single)
    }

    /// Delete `keys` from every tier. Deleting a missing key succeeds.
    pub async fn delete_multi(&self, keys: &[Key]) -> CacheResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        if let Some(key) = keys.iter().find(|k| k.is_incomplete()) {
            return Err(KeyError::IncompleteKey {
                kind: key.kind().to_string(),
            }
            .into());
        }
        let memkeys: Vec<String> = keys.iter().map(|k| self.memkey(k)).collect();

        let results = match &self.inner.backend {
            Backend::Transaction(scope) => {
                scope.stage_delete(&memkeys)?;
                scope.stage_invalidation(memkeys.iter().cloned())?;
                self.inner.batch.delete(&self.inner.backend, keys).await
            }
            Backend::Store(_) => {
                self.inner.local.remove_many(&memkeys);
                let results = self.inner.batch.delete(&self.inner.backend, keys).await;
                self.distributed_delete(&memkeys).await;
                results
            }
        };

        batch_outcome(results).map(|_| ())
    }

    // ------------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------------

    /// Run `body` against a transactional cache and commit if it succeeds.
    ///
    /// Inside the body every read goes to the store transaction. Local-tier
    /// changes and distributed invalidations are applied to this cache only
    /// after the commit succeeds; if the body or the commit fails, nothing
    /// outside the transaction changes.
    pub async fn run_in_transaction<F, Fut, R>(
        &self,
        options: TransactionOptions,
        body: F,
    ) -> CacheResult<R>
    where
        F: FnOnce(TierCache) -> Fut,
        Fut: Future<Output = CacheResult<R>>,
    {
        if self.is_in_transaction() {
            return Err(CacheError::NestedTransaction);
        }
        let txn = self.inner.store.begin_transaction(&options).await?;
        let scope = Arc::new(TransactionScope::new(txn, options));

        let value = match body(self.transactional(Arc::clone(&scope))).await {
            Ok(value) => value,
            Err(err) => {
                if let Err(rollback) = scope.rollback().await {
                    self.log_error("rollback", &rollback);
                }
                return Err(err);
            }
        };

        let changes = scope.commit().await.inspect_err(|err| self.log_error("commit", err))?;
        self.apply_commit(changes).await;
        Ok(value)
    }

    fn transactional(&self, scope: Arc<TransactionScope>) -> TierCache {
        let inner = &self.inner;
        TierCache {
            inner: Arc::new(TierCacheInner {
                config: inner.config.clone(),
                backend: Backend::Transaction(scope),
                store: Arc::clone(&inner.store),
                distributed: Arc::clone(&inner.distributed),
                local: Arc::new(LocalTier::new()),
                codec: Arc::clone(&inner.codec),
                resolver: inner.resolver.clone(),
                batch: inner.batch,
                background: Mutex::new(Vec::new()),
                counters: TierCounters::default(),
            }),
        }
    }

    async fn apply_commit(&self, changes: CommittedChanges) {
        self.distributed_delete(&changes.to_delete_distributed).await;
        self.inner
            .local
            .merge(changes.to_delete, changes.to_set);
    }

    // ------------------------------------------------------------------------
    // Distributed tier
    // ------------------------------------------------------------------------

    /// Fetch from the distributed tier; any failure reads as an empty result.
    async fn distributed_get(&self, keys: &[String]) -> HashMap<String, Vec<u8>> {
        let deadline = self.inner.config.get_timeout;
        let call = self.inner.distributed.get_multi(keys, deadline);
        let outcome = match tokio::time::timeout(deadline, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(DistributedCacheError::Timeout),
        };
        match outcome {
            Ok(found) => found,
            Err(err) => {
                self.record_distributed_failure("get", keys.len(), &err);
                HashMap::new()
            }
        }
    }

    /// Invalidate `keys` in the distributed tier. Back-fill writes this
    /// handle started earlier are joined first so none of them can land
    /// after the delete and restore pre-write data.
    async fn distributed_delete(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        self.wait_for_cache_writes().await;
        if let Err(err) = self.inner.distributed.delete_multi(keys).await {
            self.record_distributed_failure("delete", keys.len(), &err);
        }
    }

    /// Write `items` to the distributed tier without waiting for the result.
    fn spawn_distributed_set(&self, items: Vec<CacheItem>) {
        if items.is_empty() {
            return;
        }
        let payload: usize = items.iter().map(|item| item.value.len()).sum();
        let deadline = self.inner.config.put_timeout(payload);
        let count = items.len();
        let cache = self.clone();

        let handle = tokio::spawn(async move {
            let call = cache.inner.distributed.set_multi(items, deadline);
            let outcome = match tokio::time::timeout(deadline, call).await {
                Ok(outcome) => outcome,
                Err(_) => Err(DistributedCacheError::Timeout),
            };
            if let Err(err) = outcome {
                cache.record_distributed_failure("set", count, &err);
            }
        });

        let mut background = mutex_lock(&self.inner.background, "tier_cache", "spawn");
        background.retain(|task| !task.is_finished());
        background.push(handle);
    }

    /// Wait for every background distributed-cache write started so far.
    pub async fn wait_for_cache_writes(&self) {
        let tasks = std::mem::take(&mut *mutex_lock(
            &self.inner.background,
            "tier_cache",
            "wait_for_cache_writes",
        ));
        for task in tasks {
            if let Err(err) = task.await {
                error!(operation = "set", error = %err, "distributed cache write task failed");
            }
        }
    }

    fn record_distributed_failure(&self, operation: &'static str, keys: usize, err: &DistributedCacheError) {
        let config = &self.inner.config;
        if err.is_timeout() {
            TierCounters::add(&self.inner.counters.distributed_timeouts, 1);
            if config.log_timeout_errors {
                warn!(operation, keys, error = %err, "distributed cache timeout");
            }
        } else {
            TierCounters::add(&self.inner.counters.distributed_errors, 1);
            if config.log_errors {
                error!(operation, keys, error = %err, "distributed cache failure");
            }
        }
    }

    fn log_error(&self, operation: &'static str, err: &CacheError) {
        if self.inner.config.log_errors {
            error!(operation, error = %err, "tier cache failure");
        }
    }
}

fn not_found_error(key: &Key) -> CacheError {
    StoreError::NotFound { key: key.clone() }.into()
}

/// Unwrap the one-element batch error of a single-entity call.
fn single(err: CacheError) -> CacheError {
    match err {
        CacheError::Multi(multi) if multi.len() == 1 => multi
            .into_inner()
            .pop()
            .flatten()
            .unwrap_or_else(|| CacheError::Multi(Default::default())),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDistributedCache, MockPrimaryStore};
    use std::time::Duration;
    use strata_core::{Schema, ValueType};

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Note {
        id: i64,
        body: String,
    }

    impl Entity for Note {
        fn schema() -> Schema {
            Schema::new("Note")
                .id("id", ValueType::Int)
                .scalar("Body", ValueType::String)
        }

        fn to_record(&self) -> Record {
            Record::new().with("id", self.id).with("Body", self.body.clone())
        }

        fn from_record(mut record: Record) -> CacheResult<Self> {
            Ok(Self {
                id: record.take("id")?,
                body: record.take("Body")?,
            })
        }
    }

    fn note(id: i64, body: &str) -> Note {
        Note {
            id,
            body: body.to_string(),
        }
    }

    fn setup() -> (TierCache, MockPrimaryStore, MockDistributedCache) {
        let store = MockPrimaryStore::new();
        let distributed = MockDistributedCache::new();
        let cache = TierCache::new(Arc::new(store.clone()), Arc::new(distributed.clone())).unwrap();
        (cache, store, distributed)
    }

    #[tokio::test]
    async fn test_get_fills_local_and_distributed() {
        let (cache, store, distributed) = setup();
        store.insert(Key::with_id("Note", 1), Record::new().with("Body", "hi"));

        let mut dst = note(1, "");
        cache.get(&mut dst).await.unwrap();
        assert_eq!(dst, note(1, "hi"));
        cache.wait_for_cache_writes().await;

        let memkey = cache.memkey(&Key::with_id("Note", 1));
        assert_eq!(memkey, "g2:Note,i1");
        assert!(cache.local_tier().contains(&memkey));
        assert!(distributed.contains(&memkey));

        let mut again = note(1, "");
        cache.get(&mut again).await.unwrap();
        assert_eq!(again.body, "hi");
        assert_eq!(store.stats().get_calls, 1);
        assert_eq!(cache.stats().local_hits, 1);
    }

    #[tokio::test]
    async fn test_get_missing_caches_negative_entry() {
        let (cache, store, distributed) = setup();
        let mut dst = note(9, "keep");
        let err = cache.get(&mut dst).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(dst.body, "keep");
        cache.wait_for_cache_writes().await;

        let memkey = cache.memkey(&Key::with_id("Note", 9));
        assert!(cache.local_tier().get(&memkey).unwrap().is_absent());
        assert_eq!(distributed.get_raw(&memkey), Some(vec![strata_core::HEADER_EMPTY]));

        assert!(cache.get(&mut dst).await.unwrap_err().is_not_found());
        assert_eq!(store.stats().get_calls, 1);
    }

    #[tokio::test]
    async fn test_get_incomplete_key_fails() {
        let (cache, store, _) = setup();
        let err = cache.get(&mut note(0, "")).await.unwrap_err();
        assert!(matches!(err, CacheError::Key(KeyError::IncompleteKey { .. })));
        assert_eq!(store.stats().get_calls, 0);
    }

    #[tokio::test]
    async fn test_undecodable_distributed_record_is_fatal() {
        let (cache, store, distributed) = setup();
        distributed.insert_raw(cache.memkey(&Key::with_id("Note", 1)), vec![0x7A]);
        let err = cache.get(&mut note(1, "")).await.unwrap_err();
        assert!(matches!(err, CacheError::Codec(_)));
        assert_eq!(store.stats().get_calls, 0);
    }

    #[tokio::test]
    async fn test_distributed_failure_falls_through() {
        let (cache, store, distributed) = setup();
        store.insert(Key::with_id("Note", 1), Record::new().with("Body", "hi"));
        distributed.set_failure(Some(DistributedCacheError::Transport {
            reason: "refused".into(),
        }));

        let mut dst = note(1, "");
        cache.get(&mut dst).await.unwrap();
        assert_eq!(dst.body, "hi");
        cache.wait_for_cache_writes().await;
        assert_eq!(cache.stats().distributed_errors, 2);
    }

    #[tokio::test]
    async fn test_put_assigns_id_and_invalidates() {
        let (cache, store, distributed) = setup();
        store.set_next_id(7);
        let memkey = cache.memkey(&Key::with_id("Note", 7));
        distributed.insert_raw(memkey.clone(), vec![1, 2, 3]);

        let mut src = note(0, "new");
        let key = cache.put(&mut src).await.unwrap();
        assert_eq!(key, Key::with_id("Note", 7));
        assert_eq!(src.id, 7);
        assert_eq!(
            cache.local_tier().lookup::<Note>(&memkey),
            LocalLookup::Hit(note(7, "new"))
        );
        assert!(!distributed.contains(&memkey));
        assert_eq!(store.record(&key), Some(Record::new().with("Body", "new")));
    }

    #[tokio::test]
    async fn test_delete_clears_every_tier() {
        let (cache, store, distributed) = setup();
        let key = cache.put(&mut note(3, "x")).await.unwrap();
        let memkey = cache.memkey(&key);
        distributed.insert_raw(memkey.clone(), vec![1]);

        cache.delete(&key).await.unwrap();
        cache.delete(&key).await.unwrap();
        assert!(!store.contains(&key));
        assert!(!cache.local_tier().contains(&memkey));
        assert!(!distributed.contains(&memkey));
    }

    #[tokio::test]
    async fn test_delete_incomplete_key_fails() {
        let (cache, _, _) = setup();
        let err = cache.delete(&Key::incomplete("Note")).await.unwrap_err();
        assert!(matches!(err, CacheError::Key(KeyError::IncompleteKey { .. })));
        assert!(cache.delete_multi(&[]).await.is_ok());
    }

    #[tokio::test]
    async fn test_nested_transaction_rejected() {
        let (cache, _, _) = setup();
        let result = cache
            .run_in_transaction(TransactionOptions::new(), |txn| async move {
                txn.run_in_transaction(TransactionOptions::new(), |_| async { Ok(()) })
                    .await
            })
            .await;
        assert_eq!(result, Err(CacheError::NestedTransaction));
    }

    #[tokio::test]
    async fn test_transactional_handle_closed_after_commit() {
        let (cache, _, _) = setup();
        let leaked = cache
            .run_in_transaction(TransactionOptions::new(), |txn| async move { Ok(txn) })
            .await
            .unwrap();
        let err = leaked.put(&mut note(1, "late")).await.unwrap_err();
        assert_eq!(err, CacheError::TransactionClosed);
    }

    #[tokio::test]
    async fn test_slow_distributed_get_times_out() {
        let (cache, store, distributed) = setup();
        store.insert(Key::with_id("Note", 1), Record::new().with("Body", "hi"));
        distributed.set_latency(Duration::from_millis(200));

        let mut dst = note(1, "");
        cache.get(&mut dst).await.unwrap();
        assert_eq!(dst.body, "hi");
        assert_eq!(cache.stats().distributed_timeouts, 1);

        // The back-fill write misses its deadline too and is swallowed.
        cache.wait_for_cache_writes().await;
        assert_eq!(cache.stats().distributed_timeouts, 2);
        assert!(distributed.is_empty());
    }
}
