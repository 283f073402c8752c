//! Query path: results flow through the same key write-back and local-tier
//! population as reads.

use std::marker::PhantomData;

use futures_util::stream::{BoxStream, TryStreamExt};
use strata_core::{CacheResult, Entity, Key};

use super::{LocalEntry, TierCache};
use crate::query::{Cursor, Query, QueryRow};
use crate::store::StoreOps;

impl TierCache {
    /// Number of entities matching `query`.
    pub async fn count(&self, query: &Query) -> CacheResult<usize> {
        self.inner.backend.count(query).await
    }

    /// Run `query`, append the results to `dst` and return their keys.
    ///
    /// Key fields are set on every appended entity. Keys-only results append
    /// entities with only their key fields set. Full results are cached in
    /// the local tier outside a transaction.
    pub async fn get_all<T: Entity>(&self, query: &Query, dst: &mut Vec<T>) -> CacheResult<Vec<Key>> {
        let rows: Vec<QueryRow> = self.inner.backend.run_query(query).await?.try_collect().await?;
        let fill_cache = self.fills_cache(query);

        let mut keys = Vec::with_capacity(rows.len());
        let mut fill = Vec::new();
        dst.reserve(rows.len());
        for row in rows {
            let entity = self.materialize::<T>(row.record.unwrap_or_default(), &row.key)?;
            if fill_cache {
                fill.push((self.memkey(&row.key), LocalEntry::present(entity.clone())));
            }
            dst.push(entity);
            keys.push(row.key);
        }
        self.inner.local.insert_many(fill);
        Ok(keys)
    }

    /// Stream the results of `query` one entity at a time.
    pub async fn run<T: Entity>(&self, query: &Query) -> CacheResult<QueryIterator<T>> {
        let rows = self.inner.backend.run_query(query).await?;
        Ok(QueryIterator {
            cache: self.clone(),
            rows,
            fill_cache: self.fills_cache(query),
            start: query.skip(),
            yielded: 0,
            _entity: PhantomData,
        })
    }

    fn fills_cache(&self, query: &Query) -> bool {
        !self.is_in_transaction() && !query.is_keys_only()
    }
}

/// Results of a running query.
pub struct QueryIterator<T> {
    cache: TierCache,
    rows: BoxStream<'static, CacheResult<QueryRow>>,
    fill_cache: bool,
    start: usize,
    yielded: usize,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> QueryIterator<T> {
    /// The next key and entity, or `None` when the results are exhausted.
    pub async fn next(&mut self) -> CacheResult<Option<(Key, T)>> {
        let Some(row) = self.rows.try_next().await? else {
            return Ok(None);
        };
        let entity = self
            .cache
            .materialize::<T>(row.record.unwrap_or_default(), &row.key)?;
        if self.fill_cache {
            self.cache
                .inner
                .local
                .insert(self.cache.memkey(&row.key), LocalEntry::present(entity.clone()));
        }
        self.yielded += 1;
        Ok(Some((row.key, entity)))
    }

    /// Position just past the last result returned. Resume with
    /// `query.start(cursor)` on the same query without an offset.
    pub fn cursor(&self) -> Cursor {
        Cursor::new(self.start + self.yielded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDistributedCache, MockPrimaryStore};
    use crate::query::FilterOp;
    use crate::store::TransactionOptions;
    use std::sync::Arc;
    use strata_core::{Record, Schema, ValueType};

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Item {
        id: i64,
        rank: i64,
    }

    impl Entity for Item {
        fn schema() -> Schema {
            Schema::new("Item")
                .id("id", ValueType::Int)
                .scalar("Rank", ValueType::Int)
        }

        fn to_record(&self) -> Record {
            Record::new().with("id", self.id).with("Rank", self.rank)
        }

        fn from_record(mut record: Record) -> CacheResult<Self> {
            Ok(Self {
                id: record.take("id")?,
                rank: record.take("Rank")?,
            })
        }
    }

    fn seeded() -> TierCache {
        let store = MockPrimaryStore::new();
        for id in 1..=5 {
            store.insert(Key::with_id("Item", id), Record::new().with("Rank", id * 10));
        }
        TierCache::new(Arc::new(store), Arc::new(MockDistributedCache::new())).unwrap()
    }

    #[tokio::test]
    async fn test_get_all_appends_and_caches() {
        let cache = seeded();
        let mut items = vec![Item { id: 99, rank: 0 }];
        let query = Query::new("Item").filter("Rank", FilterOp::Ge, 30i64).order("Rank");
        let keys = cache.get_all(&query, &mut items).await.unwrap();

        assert_eq!(keys.len(), 3);
        assert_eq!(items.len(), 4);
        assert_eq!(items[1], Item { id: 3, rank: 30 });
        assert!(cache.local_tier().contains(&cache.memkey(&keys[0])));
        assert_eq!(cache.count(&query).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_keys_only_sets_keys_without_caching() {
        let cache = seeded();
        let mut items: Vec<Item> = Vec::new();
        let keys = cache
            .get_all(&Query::new("Item").keys_only().limit(2), &mut items)
            .await
            .unwrap();
        assert_eq!(items, vec![Item { id: 1, rank: 0 }, Item { id: 2, rank: 0 }]);
        assert_eq!(keys.len(), 2);
        assert!(cache.local_tier().is_empty());
    }

    #[tokio::test]
    async fn test_iterator_cursor_resumes() {
        let cache = seeded();
        let query = Query::new("Item").order("Rank");
        let mut iter = cache.run::<Item>(&query).await.unwrap();
        let (_, first) = iter.next().await.unwrap().unwrap();
        let (_, second) = iter.next().await.unwrap().unwrap();
        assert_eq!((first.id, second.id), (1, 2));
        assert_eq!(iter.cursor(), Cursor::new(2));
        assert_eq!(cache.local_tier().len(), 2);

        let mut rest = cache.run::<Item>(&query.clone().start(iter.cursor())).await.unwrap();
        let mut ids = Vec::new();
        while let Some((key, _)) = rest.next().await.unwrap() {
            ids.push(key.int_id());
        }
        assert_eq!(ids, vec![3, 4, 5]);
        assert_eq!(rest.cursor(), Cursor::new(5));
    }

    #[tokio::test]
    async fn test_query_in_transaction_skips_local_tier() {
        let cache = seeded();
        let found = cache
            .run_in_transaction(TransactionOptions::new(), |txn| async move {
                let mut items: Vec<Item> = Vec::new();
                txn.get_all(&Query::new("Item"), &mut items).await?;
                Ok(items.len())
            })
            .await
            .unwrap();
        assert_eq!(found, 5);
        assert!(cache.local_tier().is_empty());
    }
}
