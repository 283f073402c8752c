//! Collaborator contracts: the primary store and the distributed cache.
//!
//! Batch calls report failures at two levels. An `Err` from the call itself
//! applies to every item in the batch; an `Err` inside the returned vector
//! applies to that item only. Returned vectors are aligned with the input.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use strata_core::{CacheResult, DistributedCacheError, Key, Record};

use crate::query::{Query, QueryRow};

/// Batch operations shared by the primary store and its transactions.
#[async_trait]
pub trait StoreOps: Send + Sync {
    /// Fetch records; a missing key yields `StoreError::NotFound` at its index.
    async fn get_multi(&self, keys: &[Key]) -> CacheResult<Vec<CacheResult<Record>>>;

    /// Store records. Incomplete keys are completed and the final keys
    /// returned in input order.
    async fn put_multi(&self, keys: &[Key], records: &[Record])
        -> CacheResult<Vec<CacheResult<Key>>>;

    /// Delete keys. Deleting a missing key succeeds.
    async fn delete_multi(&self, keys: &[Key]) -> CacheResult<Vec<CacheResult<()>>>;

    /// Stream matching rows. Keys-only queries yield rows without records.
    async fn run_query(&self, query: &Query) -> CacheResult<BoxStream<'static, CacheResult<QueryRow>>>;

    async fn count(&self, query: &Query) -> CacheResult<usize>;
}

/// The durable, strongly consistent store of record.
#[async_trait]
pub trait PrimaryStore: StoreOps {
    /// Open a transaction with read-your-writes isolation.
    async fn begin_transaction(
        &self,
        options: &TransactionOptions,
    ) -> CacheResult<Arc<dyn StoreTransaction>>;
}

/// A transactional view of the primary store.
#[async_trait]
pub trait StoreTransaction: StoreOps {
    async fn commit(&self) -> CacheResult<()>;
    async fn rollback(&self) -> CacheResult<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOptions {
    /// Allow the transaction to span more than one entity group.
    pub cross_group: bool,
    /// Reject writes inside the transaction.
    pub read_only: bool,
}

impl TransactionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cross_group(mut self, enabled: bool) -> Self {
        self.cross_group = enabled;
        self
    }

    pub fn with_read_only(mut self, enabled: bool) -> Self {
        self.read_only = enabled;
        self
    }
}

/// One distributed-cache write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheItem {
    pub key: String,
    pub value: Vec<u8>,
}

/// Best-effort shared cache of encoded records.
///
/// Implementations should honor the deadline they are given and report it
/// as [`DistributedCacheError::Timeout`]; the tier cache also enforces it.
#[async_trait]
pub trait DistributedCache: Send + Sync {
    /// Fetch whatever subset of `keys` is present.
    async fn get_multi(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> Result<HashMap<String, Vec<u8>>, DistributedCacheError>;

    async fn set_multi(
        &self,
        items: Vec<CacheItem>,
        timeout: Duration,
    ) -> Result<(), DistributedCacheError>;

    async fn delete_multi(&self, keys: &[String]) -> Result<(), DistributedCacheError>;
}
