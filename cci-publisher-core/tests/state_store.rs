mod common;

use cci_publisher_core::contract::{AggregationState, MockStateBackend};
use cci_publisher_core::error::StateStoreError;
use cci_publisher_core::state_store::StateStore;
use common::MemoryBackend;

#[tokio::test]
async fn test_unknown_dataset_reports_changed() {
    let store = StateStore::new(MemoryBackend::default());
    assert_eq!(store.get("esacci.OC.day").await.unwrap(), None);
    assert!(store.has_changed("esacci.OC.day", 0, true, false).await.unwrap());
}

#[tokio::test]
async fn test_upsert_then_compare() {
    let backend = MemoryBackend::default();
    let store = StateStore::new(backend.clone());

    store.upsert("esacci.OC.day", 12, true, false).await.unwrap();
    assert!(!store.has_changed("esacci.OC.day", 12, true, false).await.unwrap());
    assert!(store.has_changed("esacci.OC.day", 13, true, false).await.unwrap());
    assert!(store.has_changed("esacci.OC.day", 12, true, true).await.unwrap());

    // a second upsert overwrites instead of adding a record
    store.upsert("esacci.OC.day", 13, true, true).await.unwrap();
    assert_eq!(backend.len(), 1);
    let state = store.get("esacci.OC.day").await.unwrap().expect("stored");
    assert_eq!(
        state,
        AggregationState {
            id: "esacci.OC.day".to_string(),
            file_count: 13,
            aggregate: true,
            wms: true,
        }
    );
}

#[tokio::test]
async fn test_remove_is_idempotent() {
    let backend = MemoryBackend::default();
    let store = StateStore::new(backend.clone());
    store.upsert("esacci.OC.day", 1, true, false).await.unwrap();

    store.remove("esacci.OC.day").await.unwrap();
    store.remove("esacci.OC.day").await.unwrap();
    assert_eq!(backend.len(), 0);
}

#[tokio::test]
async fn test_backend_outage_is_surfaced() {
    let mut backend = MockStateBackend::new();
    backend.expect_fetch().returning(|_| {
        Err(StateStoreError::Status {
            status: 500,
            body: "boom".to_string(),
        })
    });
    let store = StateStore::new(backend);

    let err = store
        .has_changed("esacci.OC.day", 1, true, false)
        .await
        .expect_err("outage must not read as 'changed'");
    assert!(matches!(err, StateStoreError::Status { status: 500, .. }));
}

#[tokio::test]
async fn test_backend_is_addressed_by_hashed_key() {
    let expected = StateStore::storage_key("esacci.CLOUD.mon");
    let mut backend = MockStateBackend::new();
    backend
        .expect_put()
        .withf(move |key, state| key == expected.as_str() && state.id == "esacci.CLOUD.mon")
        .times(1)
        .returning(|_, _| Ok(()));
    let store = StateStore::new(backend);

    store.upsert("esacci.CLOUD.mon", 4, false, false).await.unwrap();
}
