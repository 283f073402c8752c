//! In-memory collaborators for tests and local development.
//!
//! Both mocks record what they were asked to do and can inject latency and
//! failures, so tier behavior can be asserted call by call.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use strata_core::sync::mutex_lock;
use strata_core::{CacheResult, DistributedCacheError, Key, Record, StoreError};

use crate::query::{Query, QueryRow};
use crate::store::{
    CacheItem, DistributedCache, PrimaryStore, StoreOps, StoreTransaction, TransactionOptions,
};

// ============================================================================
// PRIMARY STORE
// ============================================================================

/// Call counters for [`MockPrimaryStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub get_calls: usize,
    pub put_calls: usize,
    pub delete_calls: usize,
    pub query_calls: usize,
    pub transactions: usize,
    pub commits: usize,
    pub rollbacks: usize,
}

#[derive(Default)]
struct StoreState {
    entities: BTreeMap<String, (Key, Record)>,
    next_id: i64,
    stats: StoreStats,
    get_requests: Vec<Vec<Key>>,
    put_batches: Vec<usize>,
    delete_batches: Vec<usize>,
    delays: VecDeque<Duration>,
    failing_keys: HashMap<String, StoreError>,
    fail_next_batch: Option<StoreError>,
    fail_next_commit: Option<StoreError>,
    max_batch: Option<usize>,
}

impl StoreState {
    fn allocate(&mut self, key: &Key) -> Key {
        self.next_id += 1;
        key.completed(self.next_id)
    }

    fn check_batch(&mut self, len: usize) -> CacheResult<()> {
        if let Some(err) = self.fail_next_batch.take() {
            return Err(err.into());
        }
        match self.max_batch {
            Some(cap) if len > cap => Err(StoreError::Backend {
                reason: format!("batch of {len} exceeds cap of {cap}"),
            }
            .into()),
            _ => Ok(()),
        }
    }

    fn failure_for(&self, key: &Key) -> Option<StoreError> {
        self.failing_keys.get(&key.encode()).cloned()
    }

    fn query_rows(&self, query: &Query, overlay: Option<&Overlay>) -> Vec<QueryRow> {
        let mut visible: BTreeMap<&String, &(Key, Record)> = self.entities.iter().collect();
        for (encoded, write) in overlay.into_iter().flatten() {
            match write {
                Some(entry) => {
                    visible.insert(encoded, entry);
                }
                None => {
                    visible.remove(encoded);
                }
            }
        }
        let mut matched: Vec<&(Key, Record)> = visible
            .into_values()
            .filter(|(key, record)| query.matches(key, record))
            .collect();
        matched.sort_by(|a, b| query.compare((&a.0, &a.1), (&b.0, &b.1)));
        matched
            .into_iter()
            .skip(query.skip())
            .take(query.limit_value().unwrap_or(usize::MAX))
            .map(|(key, record)| QueryRow {
                key: key.clone(),
                record: (!query.is_keys_only()).then(|| record.clone()),
            })
            .collect()
    }
}

/// Primary store backed by an ordered in-memory map.
#[derive(Clone, Default)]
pub struct MockPrimaryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MockPrimaryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any single call carrying more than `cap` items.
    pub fn with_max_batch(self, cap: usize) -> Self {
        self.lock("with_max_batch").max_batch = Some(cap);
        self
    }

    fn lock(&self, op: &'static str) -> std::sync::MutexGuard<'_, StoreState> {
        mutex_lock(&self.state, "mock_store", op)
    }

    /// The next allocated id will be `next`.
    pub fn set_next_id(&self, next: i64) {
        self.lock("set_next_id").next_id = next - 1;
    }

    /// Delays consumed one per batch call, in call order.
    pub fn push_delays(&self, delays: impl IntoIterator<Item = Duration>) {
        self.lock("push_delays").delays.extend(delays);
    }

    /// Every later operation on `key` fails with `err` at its index.
    pub fn fail_key(&self, key: &Key, err: StoreError) {
        self.lock("fail_key").failing_keys.insert(key.encode(), err);
    }

    /// The next batch call fails as a whole with `err`.
    pub fn fail_next_batch(&self, err: StoreError) {
        self.lock("fail_next_batch").fail_next_batch = Some(err);
    }

    pub fn fail_next_commit(&self, err: StoreError) {
        self.lock("fail_next_commit").fail_next_commit = Some(err);
    }

    /// Insert directly, bypassing counters.
    pub fn insert(&self, key: Key, record: Record) {
        self.lock("insert").entities.insert(key.encode(), (key, record));
    }

    pub fn record(&self, key: &Key) -> Option<Record> {
        self.lock("record")
            .entities
            .get(&key.encode())
            .map(|(_, record)| record.clone())
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.lock("contains").entities.contains_key(&key.encode())
    }

    pub fn len(&self) -> usize {
        self.lock("len").entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StoreStats {
        self.lock("stats").stats.clone()
    }

    /// Keys of every get call, one entry per call.
    pub fn get_requests(&self) -> Vec<Vec<Key>> {
        self.lock("get_requests").get_requests.clone()
    }

    /// Size of every put call, in call order.
    pub fn put_batches(&self) -> Vec<usize> {
        self.lock("put_batches").put_batches.clone()
    }

    pub fn delete_batches(&self) -> Vec<usize> {
        self.lock("delete_batches").delete_batches.clone()
    }

    async fn delay(&self) {
        let delay = self.lock("delay").delays.pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn read(&self, keys: &[Key], overlay: Option<&Overlay>) -> CacheResult<Vec<CacheResult<Record>>> {
        let mut state = self.lock("get_multi");
        state.stats.get_calls += 1;
        state.get_requests.push(keys.to_vec());
        state.check_batch(keys.len())?;
        Ok(keys
            .iter()
            .map(|key| {
                if key.is_incomplete() {
                    return Err(StoreError::InvalidKey {
                        key: key.clone(),
                        reason: "incomplete key".to_string(),
                    }
                    .into());
                }
                if let Some(err) = state.failure_for(key) {
                    return Err(err.into());
                }
                let encoded = key.encode();
                let pending = overlay.and_then(|o| o.get(&encoded));
                let found = match pending {
                    Some(write) => write.as_ref().map(|(_, record)| record.clone()),
                    None => state.entities.get(&encoded).map(|(_, r)| r.clone()),
                };
                found.ok_or_else(|| StoreError::NotFound { key: key.clone() }.into())
            })
            .collect())
    }

    fn write(
        &self,
        keys: &[Key],
        records: &[Record],
        overlay: Option<&mut Overlay>,
    ) -> CacheResult<Vec<CacheResult<Key>>> {
        let mut state = self.lock("put_multi");
        state.stats.put_calls += 1;
        state.put_batches.push(keys.len());
        state.check_batch(keys.len())?;
        if keys.len() != records.len() {
            return Err(StoreError::Backend {
                reason: format!("{} keys for {} records", keys.len(), records.len()),
            }
            .into());
        }

        let mut results = Vec::with_capacity(keys.len());
        let mut staged = Vec::with_capacity(keys.len());
        for (key, record) in keys.iter().zip(records) {
            if let Some(err) = state.failure_for(key) {
                results.push(Err(err.into()));
                continue;
            }
            let key = if key.is_incomplete() {
                state.allocate(key)
            } else {
                key.clone()
            };
            staged.push((key.clone(), record.clone()));
            results.push(Ok(key));
        }

        match overlay {
            Some(overlay) => {
                for (key, record) in staged {
                    overlay.insert(key.encode(), Some((key, record)));
                }
            }
            None => {
                for (key, record) in staged {
                    state.entities.insert(key.encode(), (key, record));
                }
            }
        }
        Ok(results)
    }

    fn remove(&self, keys: &[Key], overlay: Option<&mut Overlay>) -> CacheResult<Vec<CacheResult<()>>> {
        let mut state = self.lock("delete_multi");
        state.stats.delete_calls += 1;
        state.delete_batches.push(keys.len());
        state.check_batch(keys.len())?;

        let mut results = Vec::with_capacity(keys.len());
        let mut removed = Vec::new();
        for key in keys {
            if let Some(err) = state.failure_for(key) {
                results.push(Err(err.into()));
                continue;
            }
            removed.push(key.encode());
            results.push(Ok(()));
        }
        match overlay {
            Some(overlay) => {
                for encoded in removed {
                    overlay.insert(encoded, None);
                }
            }
            None => {
                for encoded in removed {
                    state.entities.remove(&encoded);
                }
            }
        }
        Ok(results)
    }

    fn query(&self, query: &Query, overlay: Option<&Overlay>) -> Vec<QueryRow> {
        let mut state = self.lock("run_query");
        state.stats.query_calls += 1;
        state.query_rows(query, overlay)
    }
}

#[async_trait]
impl StoreOps for MockPrimaryStore {
    async fn get_multi(&self, keys: &[Key]) -> CacheResult<Vec<CacheResult<Record>>> {
        self.delay().await;
        self.read(keys, None)
    }

    async fn put_multi(
        &self,
        keys: &[Key],
        records: &[Record],
    ) -> CacheResult<Vec<CacheResult<Key>>> {
        self.delay().await;
        self.write(keys, records, None)
    }

    async fn delete_multi(&self, keys: &[Key]) -> CacheResult<Vec<CacheResult<()>>> {
        self.delay().await;
        self.remove(keys, None)
    }

    async fn run_query(
        &self,
        query: &Query,
    ) -> CacheResult<BoxStream<'static, CacheResult<QueryRow>>> {
        let rows = self.query(query, None);
        Ok(stream::iter(rows.into_iter().map(Ok)).boxed())
    }

    async fn count(&self, query: &Query) -> CacheResult<usize> {
        Ok(self.query(query, None).len())
    }
}

#[async_trait]
impl PrimaryStore for MockPrimaryStore {
    async fn begin_transaction(
        &self,
        options: &TransactionOptions,
    ) -> CacheResult<Arc<dyn StoreTransaction>> {
        self.lock("begin_transaction").stats.transactions += 1;
        Ok(Arc::new(MockTransaction {
            store: self.clone(),
            options: *options,
            inner: Mutex::new(TransactionState::default()),
        }))
    }
}

// ============================================================================
// TRANSACTION
// ============================================================================

/// Pending writes keyed by encoded key; `None` is a pending delete.
type Overlay = BTreeMap<String, Option<(Key, Record)>>;

#[derive(Default)]
struct TransactionState {
    writes: Overlay,
    finished: bool,
}

/// Buffers writes until commit; reads and queries see the buffer first.
pub struct MockTransaction {
    store: MockPrimaryStore,
    options: TransactionOptions,
    inner: Mutex<TransactionState>,
}

impl MockTransaction {
    fn lock(&self, op: &'static str) -> std::sync::MutexGuard<'_, TransactionState> {
        mutex_lock(&self.inner, "mock_transaction", op)
    }

    fn ensure_open(state: &TransactionState) -> CacheResult<()> {
        if state.finished {
            return Err(StoreError::Transaction {
                reason: "transaction already finished".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn ensure_writable(&self) -> CacheResult<()> {
        if self.options.read_only {
            return Err(StoreError::Transaction {
                reason: "write in read-only transaction".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl StoreOps for MockTransaction {
    async fn get_multi(&self, keys: &[Key]) -> CacheResult<Vec<CacheResult<Record>>> {
        self.store.delay().await;
        let state = self.lock("get_multi");
        Self::ensure_open(&state)?;
        self.store.read(keys, Some(&state.writes))
    }

    async fn put_multi(
        &self,
        keys: &[Key],
        records: &[Record],
    ) -> CacheResult<Vec<CacheResult<Key>>> {
        self.ensure_writable()?;
        self.store.delay().await;
        let mut state = self.lock("put_multi");
        Self::ensure_open(&state)?;
        self.store.write(keys, records, Some(&mut state.writes))
    }

    async fn delete_multi(&self, keys: &[Key]) -> CacheResult<Vec<CacheResult<()>>> {
        self.ensure_writable()?;
        self.store.delay().await;
        let mut state = self.lock("delete_multi");
        Self::ensure_open(&state)?;
        self.store.remove(keys, Some(&mut state.writes))
    }

    async fn run_query(
        &self,
        query: &Query,
    ) -> CacheResult<BoxStream<'static, CacheResult<QueryRow>>> {
        let rows = {
            let state = self.lock("run_query");
            Self::ensure_open(&state)?;
            self.store.query(query, Some(&state.writes))
        };
        Ok(stream::iter(rows.into_iter().map(Ok)).boxed())
    }

    async fn count(&self, query: &Query) -> CacheResult<usize> {
        let state = self.lock("count");
        Self::ensure_open(&state)?;
        Ok(self.store.query(query, Some(&state.writes)).len())
    }
}

#[async_trait]
impl StoreTransaction for MockTransaction {
    async fn commit(&self) -> CacheResult<()> {
        let mut txn = self.lock("commit");
        Self::ensure_open(&txn)?;
        txn.finished = true;
        let writes = std::mem::take(&mut txn.writes);

        let mut store = self.store.lock("commit");
        if let Some(err) = store.fail_next_commit.take() {
            store.stats.rollbacks += 1;
            return Err(err.into());
        }
        store.stats.commits += 1;
        for (encoded, write) in writes {
            match write {
                Some(entry) => {
                    store.entities.insert(encoded, entry);
                }
                None => {
                    store.entities.remove(&encoded);
                }
            }
        }
        Ok(())
    }

    async fn rollback(&self) -> CacheResult<()> {
        let mut txn = self.lock("rollback");
        if txn.finished {
            return Ok(());
        }
        txn.finished = true;
        txn.writes.clear();
        self.store.lock("rollback").stats.rollbacks += 1;
        Ok(())
    }
}

// ============================================================================
// DISTRIBUTED CACHE
// ============================================================================

/// Call counters for [`MockDistributedCache`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributedStats {
    pub get_calls: usize,
    pub set_calls: usize,
    pub delete_calls: usize,
    pub keys_set: usize,
    pub keys_deleted: usize,
}

#[derive(Default)]
struct CacheState {
    items: HashMap<String, Vec<u8>>,
    latency: Duration,
    write_latency: Duration,
    failure: Option<DistributedCacheError>,
    stats: DistributedStats,
    get_requests: Vec<Vec<String>>,
    delete_requests: Vec<Vec<String>>,
}

/// Distributed cache backed by a map, with injectable latency and failures.
#[derive(Clone, Default)]
pub struct MockDistributedCache {
    state: Arc<Mutex<CacheState>>,
}

impl MockDistributedCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self, op: &'static str) -> std::sync::MutexGuard<'_, CacheState> {
        mutex_lock(&self.state, "mock_distributed", op)
    }

    /// Every call sleeps this long first; calls past their deadline time out.
    pub fn set_latency(&self, latency: Duration) {
        self.lock("set_latency").latency = latency;
    }

    /// Extra delay for set calls only, applied before the shared latency.
    pub fn set_write_latency(&self, latency: Duration) {
        self.lock("set_write_latency").write_latency = latency;
    }

    /// Every call fails with `err` until cleared with `None`.
    pub fn set_failure(&self, err: Option<DistributedCacheError>) {
        self.lock("set_failure").failure = err;
    }

    pub fn insert_raw(&self, key: impl Into<String>, value: Vec<u8>) {
        self.lock("insert_raw").items.insert(key.into(), value);
    }

    pub fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        self.lock("get_raw").items.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock("contains").items.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock("len").items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock("clear").items.clear();
    }

    pub fn stats(&self) -> DistributedStats {
        self.lock("stats").stats.clone()
    }

    /// Keys of every get call, one entry per call.
    pub fn get_requests(&self) -> Vec<Vec<String>> {
        self.lock("get_requests").get_requests.clone()
    }

    pub fn delete_requests(&self) -> Vec<Vec<String>> {
        self.lock("delete_requests").delete_requests.clone()
    }

    /// Sleep for the configured latency, bounded by `deadline`.
    async fn wait(&self, deadline: Option<Duration>) -> Result<(), DistributedCacheError> {
        let (latency, failure) = {
            let state = self.lock("wait");
            (state.latency, state.failure.clone())
        };
        match deadline {
            Some(deadline) if latency > deadline => {
                tokio::time::sleep(deadline).await;
                return Err(DistributedCacheError::Timeout);
            }
            _ if !latency.is_zero() => tokio::time::sleep(latency).await,
            _ => {}
        }
        failure.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl DistributedCache for MockDistributedCache {
    async fn get_multi(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> Result<HashMap<String, Vec<u8>>, DistributedCacheError> {
        {
            let mut state = self.lock("get_multi");
            state.stats.get_calls += 1;
            state.get_requests.push(keys.to_vec());
        }
        self.wait(Some(timeout)).await?;
        let state = self.lock("get_multi");
        Ok(keys
            .iter()
            .filter_map(|key| state.items.get(key).map(|v| (key.clone(), v.clone())))
            .collect())
    }

    async fn set_multi(
        &self,
        items: Vec<CacheItem>,
        timeout: Duration,
    ) -> Result<(), DistributedCacheError> {
        let write_latency = {
            let mut state = self.lock("set_multi");
            state.stats.set_calls += 1;
            state.write_latency
        };
        if !write_latency.is_zero() {
            tokio::time::sleep(write_latency).await;
        }
        self.wait(Some(timeout)).await?;
        let mut state = self.lock("set_multi");
        state.stats.keys_set += items.len();
        for item in items {
            state.items.insert(item.key, item.value);
        }
        Ok(())
    }

    async fn delete_multi(&self, keys: &[String]) -> Result<(), DistributedCacheError> {
        {
            let mut state = self.lock("delete_multi");
            state.stats.delete_calls += 1;
            state.delete_requests.push(keys.to_vec());
        }
        self.wait(None).await?;
        let mut state = self.lock("delete_multi");
        state.stats.keys_deleted += keys.len();
        for key in keys {
            state.items.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;

    fn record(title: &str) -> Record {
        Record::new().with("Title", title)
    }

    #[tokio::test]
    async fn test_put_allocates_ids_in_order() {
        let store = MockPrimaryStore::new();
        store.set_next_id(7);
        let keys = vec![Key::incomplete("Story"), Key::with_name("Feed", "f")];
        let results = store
            .put_multi(&keys, &[record("a"), record("b")])
            .await
            .unwrap();
        assert_eq!(results[0], Ok(Key::with_id("Story", 7)));
        assert_eq!(results[1], Ok(Key::with_name("Feed", "f")));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_get_reports_missing_per_key() {
        let store = MockPrimaryStore::new();
        store.insert(Key::with_id("Story", 1), record("a"));
        let results = store
            .get_multi(&[Key::with_id("Story", 1), Key::with_id("Story", 2)])
            .await
            .unwrap();
        assert_eq!(results[0], Ok(record("a")));
        assert!(results[1].as_ref().unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_max_batch_rejects_whole_call() {
        let store = MockPrimaryStore::new().with_max_batch(1);
        let err = store
            .delete_multi(&[Key::with_id("S", 1), Key::with_id("S", 2)])
            .await
            .unwrap_err();
        assert!(matches!(err, strata_core::CacheError::Store(StoreError::Backend { .. })));
    }

    #[tokio::test]
    async fn test_transaction_buffers_until_commit() {
        let store = MockPrimaryStore::new();
        let txn = store.begin_transaction(&TransactionOptions::new()).await.unwrap();
        let key = Key::with_id("Story", 1);
        txn.put_multi(&[key.clone()], &[record("a")]).await.unwrap();

        assert!(!store.contains(&key));
        let inside = txn.get_multi(&[key.clone()]).await.unwrap();
        assert_eq!(inside[0], Ok(record("a")));

        txn.commit().await.unwrap();
        assert!(store.contains(&key));
        assert!(txn.commit().await.is_err());
        assert_eq!(store.stats().commits, 1);
    }

    #[tokio::test]
    async fn test_transaction_delete_and_rollback() {
        let store = MockPrimaryStore::new();
        let key = Key::with_id("Story", 1);
        store.insert(key.clone(), record("a"));

        let txn = store.begin_transaction(&TransactionOptions::new()).await.unwrap();
        txn.delete_multi(&[key.clone()]).await.unwrap();
        let inside = txn.get_multi(&[key.clone()]).await.unwrap();
        assert!(inside[0].as_ref().unwrap_err().is_not_found());
        txn.rollback().await.unwrap();
        assert!(store.contains(&key));
        assert_eq!(store.stats().rollbacks, 1);
    }

    #[tokio::test]
    async fn test_read_only_transaction_rejects_writes() {
        let store = MockPrimaryStore::new();
        let txn = store
            .begin_transaction(&TransactionOptions::new().with_read_only(true))
            .await
            .unwrap();
        assert!(txn
            .put_multi(&[Key::with_id("S", 1)], &[record("a")])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_query_orders_limits_and_keys_only() {
        let store = MockPrimaryStore::new();
        for (id, score) in [(1, 5i64), (2, 9), (3, 1)] {
            store.insert(Key::with_id("Story", id), Record::new().with("Score", score));
        }
        store.insert(Key::with_id("Other", 1), Record::new().with("Score", 100i64));

        let query = Query::new("Story").order_desc("Score").limit(2).keys_only();
        let rows: Vec<QueryRow> = store.run_query(&query).await.unwrap().try_collect().await.unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r.key.int_id()).collect();
        assert_eq!(ids, vec![2, 1]);
        assert!(rows.iter().all(|r| r.record.is_none()));
        assert_eq!(store.count(&Query::new("Story")).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_transaction_queries_see_pending_writes() {
        let store = MockPrimaryStore::new();
        store.insert(Key::with_id("Story", 1), record("a"));
        store.insert(Key::with_id("Story", 2), record("b"));

        let txn = store.begin_transaction(&TransactionOptions::new()).await.unwrap();
        txn.put_multi(&[Key::with_id("Story", 3)], &[record("c")]).await.unwrap();
        txn.delete_multi(&[Key::with_id("Story", 1)]).await.unwrap();

        let rows: Vec<QueryRow> = txn
            .run_query(&Query::new("Story"))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r.key.int_id()).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(txn.count(&Query::new("Story")).await.unwrap(), 2);
        assert_eq!(store.count(&Query::new("Story")).await.unwrap(), 2);

        txn.rollback().await.unwrap();
        assert!(txn.count(&Query::new("Story")).await.is_err());
    }

    #[tokio::test]
    async fn test_distributed_timeout_when_slow() {
        let cache = MockDistributedCache::new();
        cache.insert_raw("k", vec![1]);
        cache.set_latency(Duration::from_millis(50));
        let err = cache
            .get_multi(&["k".to_string()], Duration::from_millis(5))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_distributed_set_get_delete() {
        let cache = MockDistributedCache::new();
        cache
            .set_multi(
                vec![CacheItem {
                    key: "a".into(),
                    value: vec![1],
                }],
                Duration::from_millis(5),
            )
            .await
            .unwrap();
        let found = cache
            .get_multi(&["a".to_string(), "b".to_string()], Duration::from_millis(5))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        cache.delete_multi(&["a".to_string()]).await.unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().delete_calls, 1);
    }
}
