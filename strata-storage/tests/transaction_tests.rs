//! Transaction isolation for the tier cache.
//!
//! Writes inside a transaction stay invisible to the outer cache until the
//! commit; aborted and failed transactions leave no trace outside.

use strata_core::{CacheError, Key, StoreError};
use strata_storage::TransactionOptions;
use strata_test_utils::fixtures::{new_story, story, story_key};
use strata_test_utils::{Harness, Story};

fn story_id(id: i64) -> Key {
    Key::with_id("Story", id).with_parent(Key::with_name("Feed", "f"))
}

#[tokio::test]
async fn test_uncommitted_write_invisible_then_visible() {
    let h = Harness::new();
    let outer = h.cache.clone();
    let mut original = story(5, "v1");
    outer.put(&mut original).await.unwrap();
    let reader = h.fresh_cache();

    let reader_in_txn = reader.clone();
    let outer_in_txn = outer.clone();
    h.cache
        .run_in_transaction(TransactionOptions::new(), |txn| async move {
            let mut updated = story(5, "v2");
            txn.put(&mut updated).await?;

            let mut seen = story_key(5);
            outer_in_txn.get(&mut seen).await?;
            assert_eq!(seen.title, "v1");

            // Populates the distributed tier with the pre-commit value.
            let mut fetched = story_key(5);
            reader_in_txn.get(&mut fetched).await?;
            assert_eq!(fetched.title, "v1");
            reader_in_txn.wait_for_cache_writes().await;
            Ok(())
        })
        .await
        .unwrap();

    let mut after = story_key(5);
    outer.get(&mut after).await.unwrap();
    assert_eq!(after.title, "v2");

    // The commit invalidated the distributed entry, so a cold cache reads
    // the new value from the store.
    let cold = h.fresh_cache();
    let mut cold_read = story_key(5);
    cold.get(&mut cold_read).await.unwrap();
    assert_eq!(cold_read.title, "v2");
}

#[tokio::test]
async fn test_reads_inside_transaction_bypass_caches() {
    let h = Harness::new();
    let mut s = story(1, "cached");
    h.cache.put(&mut s).await.unwrap();
    let distributed_gets = h.distributed.stats().get_calls;
    let store_gets = h.store.stats().get_calls;

    let title = h
        .cache
        .run_in_transaction(TransactionOptions::new(), |txn| async move {
            let mut dst = story_key(1);
            txn.get(&mut dst).await?;
            assert!(txn.local_tier().is_empty());
            Ok(dst.title)
        })
        .await
        .unwrap();

    assert_eq!(title, "cached");
    assert_eq!(h.store.stats().get_calls, store_gets + 1);
    assert_eq!(h.distributed.stats().get_calls, distributed_gets);
}

#[tokio::test]
async fn test_inserted_ids_merge_into_outer_local_tier() {
    let h = Harness::new();
    h.store.set_next_id(40);
    let key = h
        .cache
        .run_in_transaction(TransactionOptions::new(), |txn| async move {
            let mut fresh = new_story("inside");
            let key = txn.put(&mut fresh).await?;
            assert_eq!(fresh.id, 40);
            Ok(key)
        })
        .await
        .unwrap();

    assert_eq!(key, story_id(40));
    assert!(h.store.contains(&key));
    assert!(h.cache.local_tier().contains(&h.memkey(&key)));
}

#[tokio::test]
async fn test_delete_inside_transaction_applies_on_commit() {
    let h = Harness::new();
    let mut s = story(8, "doomed");
    h.cache.put(&mut s).await.unwrap();
    let memkey = h.memkey(&story_id(8));

    h.cache
        .run_in_transaction(TransactionOptions::new(), |txn| async move {
            txn.delete(&story_id(8)).await
        })
        .await
        .unwrap();

    assert!(!h.store.contains(&story_id(8)));
    assert!(!h.cache.local_tier().contains(&memkey));
    assert!(h.distributed.delete_requests().concat().contains(&memkey));
}

#[tokio::test]
async fn test_body_error_rolls_back() {
    let h = Harness::new();
    let mut s = story(2, "before");
    h.cache.put(&mut s).await.unwrap();

    let result: Result<(), CacheError> = h
        .cache
        .run_in_transaction(TransactionOptions::new(), |txn| async move {
            let mut changed = story(2, "after");
            txn.put(&mut changed).await?;
            Err(StoreError::Backend {
                reason: "caller gave up".into(),
            }
            .into())
        })
        .await;

    assert!(result.is_err());
    assert_eq!(h.store.stats().rollbacks, 1);
    let mut dst = story_key(2);
    h.fresh_cache().get(&mut dst).await.unwrap();
    assert_eq!(dst.title, "before");
    let mut local = story_key(2);
    h.cache.get(&mut local).await.unwrap();
    assert_eq!(local.title, "before");
}

#[tokio::test]
async fn test_commit_failure_leaves_outer_cache_untouched() {
    let h = Harness::new();
    h.store.fail_next_commit(StoreError::Concurrent {
        reason: "entity group contention".into(),
    });

    let result = h
        .cache
        .run_in_transaction(TransactionOptions::new(), |txn| async move {
            let mut s = story(9, "lost");
            txn.put(&mut s).await
        })
        .await;

    assert!(matches!(
        result,
        Err(CacheError::Store(StoreError::Concurrent { .. }))
    ));
    assert!(!h.store.contains(&story_id(9)));
    assert!(h.cache.local_tier().is_empty());
}

#[tokio::test]
async fn test_read_only_transaction_rejects_writes() {
    let h = Harness::new();
    let options = TransactionOptions::new().with_read_only(true);
    let result = h
        .cache
        .run_in_transaction(options, |txn| async move {
            let mut s: Story = story(1, "nope");
            txn.put(&mut s).await
        })
        .await;
    assert!(matches!(
        result,
        Err(CacheError::Store(StoreError::Transaction { .. }))
    ));
    assert!(!h.store.contains(&story_id(1)));
}
