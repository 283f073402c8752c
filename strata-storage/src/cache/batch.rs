//! Chunked fan-out of batch calls to the primary store.
//!
//! The store caps how many items one call may carry, and the cap differs per
//! operation. Oversized batches are split into chunks that run concurrently;
//! their results are scattered back into one vector aligned with the input.

use std::future::Future;
use std::ops::Range;

use futures_util::future::join_all;
use strata_core::{CacheError, CacheResult, Key, Record, StoreError, TierCacheConfig};
use tracing::debug;

use crate::store::StoreOps;

/// Per-operation chunk limits for primary-store batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchCoordinator {
    get_limit: usize,
    put_limit: usize,
    delete_limit: usize,
}

impl Default for BatchCoordinator {
    fn default() -> Self {
        Self::from_config(&TierCacheConfig::default())
    }
}

impl BatchCoordinator {
    pub fn new(get_limit: usize, put_limit: usize, delete_limit: usize) -> Self {
        Self {
            get_limit: get_limit.max(1),
            put_limit: put_limit.max(1),
            delete_limit: delete_limit.max(1),
        }
    }

    pub fn from_config(config: &TierCacheConfig) -> Self {
        Self::new(
            config.get_batch_limit,
            config.put_batch_limit,
            config.delete_batch_limit,
        )
    }

    /// Consecutive index ranges of at most `limit` items covering `0..len`.
    pub fn chunk_ranges(len: usize, limit: usize) -> Vec<Range<usize>> {
        let limit = limit.max(1);
        (0..len)
            .step_by(limit)
            .map(|start| start..(start + limit).min(len))
            .collect()
    }

    /// Run `call` once per chunk, concurrently, and merge the per-item
    /// results in input order.
    ///
    /// Every chunk runs to completion even when others fail. A chunk-level
    /// error is broadcast to each index of that chunk, except a
    /// [`CacheError::Multi`] of the chunk's length, which is copied index
    /// for index.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &'static str,
        len: usize,
        limit: usize,
        call: F,
    ) -> Vec<CacheResult<T>>
    where
        F: Fn(Range<usize>) -> Fut,
        Fut: Future<Output = CacheResult<Vec<CacheResult<T>>>>,
    {
        let ranges = Self::chunk_ranges(len, limit);
        if ranges.is_empty() {
            return Vec::new();
        }
        debug!(operation, items = len, chunks = ranges.len(), "dispatching batch");

        let outcomes = join_all(ranges.iter().cloned().map(&call)).await;

        let mut results = Vec::with_capacity(len);
        for (range, outcome) in ranges.into_iter().zip(outcomes) {
            scatter(&mut results, range.len(), outcome);
        }
        results
    }

    pub async fn get(&self, ops: &dyn StoreOps, keys: &[Key]) -> Vec<CacheResult<Record>> {
        self.run("get", keys.len(), self.get_limit, |range| {
            ops.get_multi(&keys[range])
        })
        .await
    }

    pub async fn put(
        &self,
        ops: &dyn StoreOps,
        keys: &[Key],
        records: &[Record],
    ) -> Vec<CacheResult<Key>> {
        if keys.len() != records.len() {
            let err = CacheError::from(StoreError::Backend {
                reason: format!("{} keys for {} records", keys.len(), records.len()),
            });
            return keys.iter().map(|_| Err(err.clone())).collect();
        }
        self.run("put", keys.len(), self.put_limit, |range| {
            ops.put_multi(&keys[range.clone()], &records[range])
        })
        .await
    }

    pub async fn delete(&self, ops: &dyn StoreOps, keys: &[Key]) -> Vec<CacheResult<()>> {
        self.run("delete", keys.len(), self.delete_limit, |range| {
            ops.delete_multi(&keys[range])
        })
        .await
    }
}

/// Append one chunk's outcome as exactly `len` per-item results.
fn scatter<T>(results: &mut Vec<CacheResult<T>>, len: usize, outcome: CacheResult<Vec<CacheResult<T>>>) {
    match outcome {
        Ok(items) if items.len() == len => results.extend(items),
        Ok(items) => {
            let err = CacheError::from(StoreError::Backend {
                reason: format!("store returned {} results for {len} items", items.len()),
            });
            results.extend((0..len).map(|_| Err(err.clone())));
        }
        Err(CacheError::Multi(multi)) if multi.len() == len => {
            results.extend(multi.into_inner().into_iter().map(|err| {
                Err(err.unwrap_or_else(|| {
                    StoreError::Backend {
                        reason: "store reported success without a result".to_string(),
                    }
                    .into()
                }))
            }));
        }
        Err(err) => results.extend((0..len).map(|_| Err(err.clone()))),
    }
}
