//! strata storage - tier cache, transactions and store collaborators
//!
//! Defines the contracts for the primary store and the distributed cache,
//! the [`TierCache`] that orchestrates reads and writes across them, and
//! in-memory implementations of both collaborators.

pub mod cache;
pub mod mock;
pub mod query;
pub mod store;

pub use cache::{
    BatchCoordinator, CommittedChanges, LocalEntry, LocalLookup, LocalTier, QueryIterator,
    TierCache, TierCacheBuilder, TierStats, TransactionScope,
};
pub use mock::{DistributedStats, MockDistributedCache, MockPrimaryStore, MockTransaction, StoreStats};
pub use query::{Cursor, Filter, FilterOp, Order, Query, QueryRow};
pub use store::{
    CacheItem, DistributedCache, PrimaryStore, StoreOps, StoreTransaction, TransactionOptions,
};
