//! Transaction-scoped buffers.
//!
//! A transactional tier cache reads and writes through the store
//! transaction only. Local-tier changes and distributed-cache invalidations
//! are buffered here and applied to the outer cache once the transaction
//! commits; on rollback they are dropped.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use strata_core::sync::mutex_lock;
use strata_core::{CacheError, CacheResult};

use super::local::LocalEntry;
use crate::store::{StoreTransaction, TransactionOptions};

#[derive(Default)]
struct ScopeState {
    to_set: HashMap<String, LocalEntry>,
    to_delete: HashSet<String>,
    to_delete_distributed: BTreeSet<String>,
    finished: bool,
}

/// Mutations to apply to the outer cache after a successful commit.
#[derive(Debug, Default)]
pub struct CommittedChanges {
    pub to_set: HashMap<String, LocalEntry>,
    pub to_delete: HashSet<String>,
    pub to_delete_distributed: Vec<String>,
}

pub struct TransactionScope {
    txn: Arc<dyn StoreTransaction>,
    options: TransactionOptions,
    state: Mutex<ScopeState>,
}

impl std::fmt::Debug for TransactionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionScope")
            .field("options", &self.options)
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

impl TransactionScope {
    pub fn new(txn: Arc<dyn StoreTransaction>, options: TransactionOptions) -> Self {
        Self {
            txn,
            options,
            state: Mutex::new(ScopeState::default()),
        }
    }

    fn lock(&self, op: &'static str) -> MutexGuard<'_, ScopeState> {
        mutex_lock(&self.state, "transaction_scope", op)
    }

    pub fn options(&self) -> TransactionOptions {
        self.options
    }

    pub fn is_finished(&self) -> bool {
        self.lock("is_finished").finished
    }

    /// The store transaction, or `TransactionClosed` once committed or
    /// rolled back.
    pub fn transaction(&self) -> CacheResult<&dyn StoreTransaction> {
        if self.is_finished() {
            return Err(CacheError::TransactionClosed);
        }
        Ok(self.txn.as_ref())
    }

    /// Buffer local-tier writes. A write cancels an earlier buffered delete.
    pub fn stage_set(&self, entries: Vec<(String, LocalEntry)>) -> CacheResult<()> {
        let mut state = self.lock("stage_set");
        ensure_open(&state)?;
        for (memkey, entry) in entries {
            state.to_delete.remove(&memkey);
            state.to_set.insert(memkey, entry);
        }
        Ok(())
    }

    /// Buffer local-tier removals. A delete cancels an earlier buffered write.
    pub fn stage_delete(&self, memkeys: &[String]) -> CacheResult<()> {
        let mut state = self.lock("stage_delete");
        ensure_open(&state)?;
        for memkey in memkeys {
            state.to_set.remove(memkey);
            state.to_delete.insert(memkey.clone());
        }
        Ok(())
    }

    /// Buffer distributed-cache deletions for commit time.
    pub fn stage_invalidation(&self, cache_keys: impl IntoIterator<Item = String>) -> CacheResult<()> {
        let mut state = self.lock("stage_invalidation");
        ensure_open(&state)?;
        state.to_delete_distributed.extend(cache_keys);
        Ok(())
    }

    /// Commit the store transaction and hand back the buffered changes.
    /// The scope is finished afterwards whatever the outcome.
    pub async fn commit(&self) -> CacheResult<CommittedChanges> {
        let changes = {
            let mut state = self.lock("commit");
            ensure_open(&state)?;
            state.finished = true;
            CommittedChanges {
                to_set: std::mem::take(&mut state.to_set),
                to_delete: std::mem::take(&mut state.to_delete),
                to_delete_distributed: std::mem::take(&mut state.to_delete_distributed)
                    .into_iter()
                    .collect(),
            }
        };
        self.txn.commit().await?;
        Ok(changes)
    }

    /// Roll back and discard every buffer. Rolling back a finished scope is
    /// a no-op.
    pub async fn rollback(&self) -> CacheResult<()> {
        {
            let mut state = self.lock("rollback");
            if state.finished {
                return Ok(());
            }
            *state = ScopeState {
                finished: true,
                ..ScopeState::default()
            };
        }
        self.txn.rollback().await
    }
}

fn ensure_open(state: &ScopeState) -> CacheResult<()> {
    if state.finished {
        Err(CacheError::TransactionClosed)
    } else {
        Ok(())
    }
}
