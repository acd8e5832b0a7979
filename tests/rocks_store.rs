use std::{sync::Arc, time::Duration};

use chrono::Utc;
use futures_util::future::join_all;
use serde_json::json;
use tempfile::TempDir;

use device_authority::{
    auth::AuthService,
    clock::ManualClock,
    config::AuthSettings,
    db::{
        Bounded, DocumentStore, RocksStore, Store, StoreError, Transaction, DEVICE_REGISTRATIONS,
    },
    model::DeviceStatus,
};

fn open() -> (TempDir, RocksStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = RocksStore::open(dir.path().join("db")).unwrap();
    (dir, store)
}

#[tokio::test]
async fn documents_round_trip_within_their_collection() {
    let (_dir, store) = open();

    store.set("devices", "a", json!({ "owner": "x" })).await.unwrap();
    store.set("devices", "b", json!({ "owner": "y" })).await.unwrap();
    store.set("devicesx", "c", json!({ "owner": "x" })).await.unwrap();

    assert_eq!(
        store.get("devices", "a").await.unwrap(),
        Some(json!({ "owner": "x" }))
    );
    assert_eq!(store.get("devices", "missing").await.unwrap(), None);

    // Prefix scans stop at the collection boundary.
    assert_eq!(store.scan("devices").await.unwrap().len(), 2);
    let owned = store
        .find_by_field("devices", "owner", &json!("x"))
        .await
        .unwrap();
    assert_eq!(owned, vec![json!({ "owner": "x" })]);

    store.delete("devices", "a").await.unwrap();
    assert_eq!(store.get("devices", "a").await.unwrap(), None);
}

#[tokio::test]
async fn failed_precondition_applies_no_writes() {
    let (_dir, store) = open();
    store.set("tokens", "t", json!({ "consumed": true })).await.unwrap();

    let txn = Transaction::new()
        .set("bindings", "d", json!({ "email": "a@x.com" }))
        .require_field("tokens", "t", "consumed", json!(false))
        .set("tokens", "t", json!({ "consumed": true, "by": "d" }));

    let err = store.commit(txn).await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict { ref collection, .. } if collection == "tokens"));
    assert_eq!(store.get("bindings", "d").await.unwrap(), None);
    assert_eq!(
        store.get("tokens", "t").await.unwrap(),
        Some(json!({ "consumed": true }))
    );
}

#[tokio::test]
async fn absent_precondition_guards_creation() {
    let (_dir, store) = open();
    let create = || {
        Transaction::new()
            .require_absent("registrations", "r")
            .set("registrations", "r", json!({ "n": 1 }))
    };

    store.commit(create()).await.unwrap();
    assert!(matches!(
        store.commit(create()).await,
        Err(StoreError::Conflict { .. })
    ));
}

#[tokio::test]
async fn records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    {
        let store = RocksStore::open(&path).unwrap();
        store.set("sessions", "s", json!({ "v": 1 })).await.unwrap();
    }
    let store = RocksStore::open(&path).unwrap();
    assert_eq!(
        store.get("sessions", "s").await.unwrap(),
        Some(json!({ "v": 1 }))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn authority_runs_on_bounded_rocks_backend() {
    let (_dir, rocks) = open();
    let store: Store = Arc::new(Bounded::new(rocks, Duration::from_secs(5)));
    let auth = AuthService::new(
        store,
        Arc::new(ManualClock::new(Utc::now())),
        &AuthSettings::with_secret("rocks"),
    );

    let device = auth
        .registry
        .register("AA:BB:CC:DD:EE:FF", "HW-1", "1.0.0")
        .await
        .unwrap();
    let token = auth.tokens.issue("owner@example.com").await.unwrap();

    let (a, b) = tokio::join!(
        auth.bindings
            .claim(&device.device_id, "AA:BB:CC:DD:EE:FF", &token.token),
        auth.bindings
            .claim(&device.device_id, "AA:BB:CC:DD:EE:FF", &token.token),
    );
    assert!(a.is_ok() ^ b.is_ok());

    assert_eq!(
        auth.registry.get(&device.device_id).await.unwrap().status,
        DeviceStatus::Claimed
    );
    let issued = auth
        .sessions
        .authenticate(&device.device_id, "AA:BB:CC:DD:EE:FF")
        .await
        .unwrap();
    assert!(auth
        .sessions
        .heartbeat(&device.device_id, &issued.hashed_device_id)
        .await
        .is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_registrations_converge_on_rocks() {
    let (_dir, rocks) = open();
    let store: Store = Arc::new(Bounded::new(rocks, Duration::from_secs(5)));
    let auth = AuthService::new(
        store.clone(),
        Arc::new(ManualClock::new(Utc::now())),
        &AuthSettings::with_secret("rocks"),
    );

    let attempts = (0..16).map(|_| {
        let auth = auth.clone();
        tokio::spawn(async move {
            auth.registry
                .register("AA:BB:CC:DD:EE:FF", "HW-1", "1.0.0")
                .await
        })
    });

    let registrations: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let first = &registrations[0];
    assert!(registrations.iter().all(|r| r == first));
    assert_eq!(store.scan(DEVICE_REGISTRATIONS).await.unwrap().len(), 1);
}
