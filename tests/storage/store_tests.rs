//! Store interface tests.
//!
//! Every test uses its own partitions so backends backed by a shared table
//! can run them side by side.

use onair::storage::{query_all, Condition, Item, Key, Query, Store, StorageError, Update};

fn item(pk: &str, sk: &str) -> Item {
    Item::new(Key::new(pk, sk))
}

// =============================================================================
// put / get
// =============================================================================

pub async fn test_put_and_get<S: Store>(store: &S) {
    let stored = item("test_put#a", "PROFILE").with("name", "Ana");
    store.put(stored.clone(), None).await.expect("put should succeed");

    let loaded = store
        .get(&Key::new("test_put#a", "PROFILE"))
        .await
        .expect("get should succeed");
    assert_eq!(loaded, Some(stored));
}

pub async fn test_get_missing<S: Store>(store: &S) {
    let loaded = store
        .get(&Key::new("test_missing#a", "PROFILE"))
        .await
        .expect("get should succeed");
    assert!(loaded.is_none());
}

pub async fn test_conditional_put<S: Store>(store: &S) {
    let first = item("test_cond_put#a", "PROFILE").with("v", 1);
    store
        .put(first.clone(), Some(Condition::NotExists))
        .await
        .expect("first put should succeed");

    let err = store
        .put(
            item("test_cond_put#a", "PROFILE").with("v", 2),
            Some(Condition::NotExists),
        )
        .await
        .expect_err("second put should conflict");
    assert!(err.is_conflict());

    let loaded = store
        .get(&Key::new("test_cond_put#a", "PROFILE"))
        .await
        .expect("get should succeed");
    assert_eq!(loaded, Some(first));
}

// =============================================================================
// update
// =============================================================================

pub async fn test_add_creates_and_increments<S: Store>(store: &S) {
    let key = Key::new("test_add#counter", "CURRENT");
    let first = store
        .update(&key, Update::new().add("value", 1))
        .await
        .expect("first add should succeed");
    assert_eq!(first.get_i64("value"), Some(1));

    let second = store
        .update(&key, Update::new().add("value", 1))
        .await
        .expect("second add should succeed");
    assert_eq!(second.get_i64("value"), Some(2));
}

pub async fn test_update_requires_existing_item<S: Store>(store: &S) {
    let key = Key::new("test_add_guard#ghost", "PROFILE");
    let err = store
        .update(&key, Update::new().add("points", 5).when(Condition::Exists))
        .await
        .expect_err("update of a missing item should conflict");
    assert!(err.is_conflict());
    assert!(store.get(&key).await.expect("get should succeed").is_none());
}

pub async fn test_set_once<S: Store>(store: &S) {
    let key = Key::new("test_set_once#s", "PROFILE");
    store
        .put(Item::new(key.clone()).with("title", "Regret"), None)
        .await
        .expect("put should succeed");

    let guard = || Condition::Exists.and(Condition::attribute_not_exists("playedPosition"));
    let updated = store
        .update(&key, Update::new().set("playedPosition", 1).when(guard()))
        .await
        .expect("first stamp should succeed");
    assert_eq!(updated.get_i64("playedPosition"), Some(1));
    assert_eq!(updated.get_str("title"), Some("Regret"));

    let err = store
        .update(&key, Update::new().set("playedPosition", 2).when(guard()))
        .await
        .expect_err("second stamp should conflict");
    assert!(matches!(err, StorageError::Conflict { .. }));
}

pub async fn test_attribute_equals<S: Store>(store: &S) {
    let key = Key::new("test_equals#g", "PROFILE");
    store
        .put(Item::new(key.clone()).with("ownerId", "u1"), None)
        .await
        .expect("put should succeed");

    let err = store
        .update(
            &key,
            Update::new()
                .set("ownerId", "u3")
                .when(Condition::attribute_equals("ownerId", "u2")),
        )
        .await
        .expect_err("wrong owner should conflict");
    assert!(err.is_conflict());

    let updated = store
        .update(
            &key,
            Update::new()
                .set("ownerId", "u2")
                .when(Condition::attribute_equals("ownerId", "u1")),
        )
        .await
        .expect("right owner should succeed");
    assert_eq!(updated.get_str("ownerId"), Some("u2"));
}

// =============================================================================
// query
// =============================================================================

pub async fn test_query_table_prefix<S: Store>(store: &S) {
    for sk in ["SONG#1", "SONG#2", "GROUP#1"] {
        store
            .put(item("test_query_table#u", sk), None)
            .await
            .expect("put should succeed");
    }

    let items = query_all(store, Query::table("test_query_table#u").begins_with("SONG#"))
        .await
        .expect("query should succeed");
    let sort_keys: Vec<&str> = items.iter().map(|i| i.key.sk.as_str()).collect();
    assert_eq!(sort_keys, vec!["SONG#1", "SONG#2"]);
}

pub async fn test_query_index_pages<S: Store>(store: &S) {
    for user in 0..5 {
        store
            .put(item(&format!("USER#test_idx{}", user), "SONG#test_idx"), None)
            .await
            .expect("put should succeed");
    }

    let first = store
        .query(Query::index("SONG#test_idx").begins_with("USER#").limit(2))
        .await
        .expect("query should succeed");
    assert!(!first.items.is_empty() && first.items.len() <= 2);
    assert!(first.next.is_some());

    let all = query_all(
        store,
        Query::index("SONG#test_idx").begins_with("USER#").limit(2),
    )
    .await
    .expect("query should succeed");
    let mut users: Vec<String> = all.into_iter().map(|i| i.key.pk).collect();
    users.sort();
    users.dedup();
    assert_eq!(users.len(), 5);
}

pub async fn test_unindexed_items_stay_out_of_index<S: Store>(store: &S) {
    store
        .put(Item::unindexed(Key::new("test_unindexed#c", "CURRENT")), None)
        .await
        .expect("put should succeed");

    let page = store
        .query(Query::index("CURRENT"))
        .await
        .expect("query should succeed");
    assert!(page.items.iter().all(|i| i.key.pk != "test_unindexed#c"));
}

// =============================================================================
// delete
// =============================================================================

pub async fn test_delete<S: Store>(store: &S) {
    let key = Key::new("test_delete#a", "PROFILE");
    store
        .put(Item::new(key.clone()), None)
        .await
        .expect("put should succeed");
    store.delete(&key, None).await.expect("delete should succeed");
    assert!(store.get(&key).await.expect("get should succeed").is_none());

    store
        .delete(&key, None)
        .await
        .expect("deleting a missing item should succeed");
    let err = store
        .delete(&key, Some(Condition::Exists))
        .await
        .expect_err("conditional delete of a missing item should conflict");
    assert!(err.is_conflict());
}

/// Run every store contract test against `$store`.
#[macro_export]
macro_rules! run_store_tests {
    ($store:expr) => {
        use $crate::storage::store_tests::*;

        test_put_and_get($store).await;
        println!("  test_put_and_get: PASSED");

        test_get_missing($store).await;
        println!("  test_get_missing: PASSED");

        test_conditional_put($store).await;
        println!("  test_conditional_put: PASSED");

        test_add_creates_and_increments($store).await;
        println!("  test_add_creates_and_increments: PASSED");

        test_update_requires_existing_item($store).await;
        println!("  test_update_requires_existing_item: PASSED");

        test_set_once($store).await;
        println!("  test_set_once: PASSED");

        test_attribute_equals($store).await;
        println!("  test_attribute_equals: PASSED");

        test_query_table_prefix($store).await;
        println!("  test_query_table_prefix: PASSED");

        test_query_index_pages($store).await;
        println!("  test_query_index_pages: PASSED");

        test_unindexed_items_stay_out_of_index($store).await;
        println!("  test_unindexed_items_stay_out_of_index: PASSED");

        test_delete($store).await;
        println!("  test_delete: PASSED");
    };
}
