//! Queue ordering invariants: dense 1..N positions over the pending set,
//! creation-time order, gap closing, and maintainer idempotence.

use approvd::auth::{Principal, Role};
use approvd::models::action::Decision;
use approvd::models::request::{NewRequest, RequestStatus};
use approvd::store::Store;
use tokio_test::assert_ok;
use uuid::Uuid;

async fn test_store() -> (Store, tempfile::TempDir) {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();

    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!(
        "sqlite://{}?mode=rwc",
        dir.path().join("approvd.db").display()
    );
    let store = Store::connect(&url).await.expect("connect");
    store.migrate().await.expect("migrate");
    (store, dir)
}

fn employee() -> Principal {
    Principal::new(Uuid::new_v4(), Role::Employee)
}

fn approver() -> Principal {
    Principal::new(Uuid::new_v4(), Role::Approver)
}

fn admin() -> Principal {
    Principal::new(Uuid::new_v4(), Role::Admin)
}

fn req(title: &str) -> NewRequest {
    NewRequest {
        title: title.into(),
        content: Some("need it for onboarding".into()),
        department: "engineering".into(),
    }
}

/// Assert the pending queue satisfies density (positions are exactly 1..=n)
/// and ordering (positions follow created_at).
async fn assert_queue_invariants(store: &Store, reader: &Principal) {
    let pending = store.list_pending(reader).await.expect("list_pending");
    for (i, r) in pending.iter().enumerate() {
        assert_eq!(
            r.queue_position,
            Some(i as i64 + 1),
            "position gap at index {i}"
        );
        if i > 0 {
            assert!(
                pending[i - 1].created_at <= r.created_at,
                "queue out of creation order at index {i}"
            );
        }
    }
}

#[tokio::test]
async fn scenario_a_submit_assigns_dense_positions() {
    let (store, _dir) = test_store().await;
    let emp = employee();

    let r1 = assert_ok!(store.submit(&emp, req("r1")).await);
    let r2 = assert_ok!(store.submit(&emp, req("r2")).await);
    let r3 = assert_ok!(store.submit(&emp, req("r3")).await);

    assert_eq!(r1.queue_position, Some(1));
    assert_eq!(r2.queue_position, Some(2));
    assert_eq!(r3.queue_position, Some(3));
    assert_eq!(r1.status, RequestStatus::Pending);

    assert_queue_invariants(&store, &emp).await;
}

#[tokio::test]
async fn concurrent_submits_get_distinct_dense_positions() {
    let (store, _dir) = test_store().await;
    let emp = employee();

    // Inserts race through the single-writer pool; no two may ever compute
    // the same position.
    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        let title = format!("r{i}");
        handles.push(tokio::spawn(
            async move { store.submit(&emp, req(&title)).await },
        ));
    }

    let mut positions = Vec::new();
    for handle in handles {
        let r = handle.await.expect("join").expect("submit");
        positions.push(r.queue_position.expect("pending row has a position"));
    }
    positions.sort_unstable();
    assert_eq!(positions, (1..=8).collect::<Vec<i64>>());

    assert_queue_invariants(&store, &emp).await;
}

#[tokio::test]
async fn scenario_b_deciding_middle_request_closes_the_gap() {
    let (store, _dir) = test_store().await;
    let emp = employee();
    let apr = approver();

    let r1 = store.submit(&emp, req("r1")).await.unwrap();
    let r2 = store.submit(&emp, req("r2")).await.unwrap();
    let r3 = store.submit(&emp, req("r3")).await.unwrap();

    let (decided, action) = store
        .decide(&apr, r2.id, Decision::Approved, None)
        .await
        .unwrap();

    assert_eq!(decided.status, RequestStatus::Approved);
    assert_eq!(decided.queue_position, None);
    assert_eq!(action.request_id, r2.id);

    let r1_after = store.get_request(&emp, r1.id).await.unwrap();
    let r3_after = store.get_request(&emp, r3.id).await.unwrap();
    assert_eq!(r1_after.queue_position, Some(1));
    assert_eq!(r3_after.queue_position, Some(2));

    assert_queue_invariants(&store, &emp).await;
}

#[tokio::test]
async fn positions_stay_dense_after_interleaved_decisions() {
    let (store, _dir) = test_store().await;
    let emp = employee();
    let apr = approver();

    let mut ids = Vec::new();
    for i in 0..5 {
        let r = store.submit(&emp, req(&format!("r{i}"))).await.unwrap();
        ids.push(r.id);
    }

    store
        .decide(&apr, ids[1], Decision::Approved, None)
        .await
        .unwrap();
    store
        .decide(&apr, ids[3], Decision::Rejected, Some("duplicate".into()))
        .await
        .unwrap();

    let pending = store.list_pending(&emp).await.unwrap();
    assert_eq!(pending.len(), 3);
    assert_eq!(
        pending.iter().map(|r| r.id).collect::<Vec<_>>(),
        vec![ids[0], ids[2], ids[4]]
    );
    assert_queue_invariants(&store, &emp).await;
}

#[tokio::test]
async fn maintainer_rerun_touches_zero_rows() {
    let (store, _dir) = test_store().await;
    let emp = employee();
    let apr = approver();

    for i in 0..4 {
        store.submit(&emp, req(&format!("r{i}"))).await.unwrap();
    }
    let pending = store.list_pending(&emp).await.unwrap();
    store
        .decide(&apr, pending[0].id, Decision::Approved, None)
        .await
        .unwrap();

    // Every committed operation leaves the ranking dense, so a maintenance
    // re-rank has nothing to rewrite, twice over.
    assert_eq!(store.reindex_pending().await.unwrap(), 0);
    assert_eq!(store.reindex_pending().await.unwrap(), 0);
}

#[tokio::test]
async fn text_edit_does_not_move_anyone() {
    let (store, _dir) = test_store().await;
    let emp = employee();

    let r1 = store.submit(&emp, req("typo titl")).await.unwrap();
    let r2 = store.submit(&emp, req("r2")).await.unwrap();
    let r3 = store.submit(&emp, req("r3")).await.unwrap();

    let before2 = store.get_request(&emp, r2.id).await.unwrap();
    let before3 = store.get_request(&emp, r3.id).await.unwrap();

    let edited = store
        .update_request_text(&emp, r1.id, Some("typo title".into()), None)
        .await
        .unwrap();
    assert_eq!(edited.title, "typo title");
    assert_eq!(edited.queue_position, Some(1));

    // Unrelated-field updates must not re-trigger the maintainer: the other
    // rows are untouched, down to their updated_at.
    let after2 = store.get_request(&emp, r2.id).await.unwrap();
    let after3 = store.get_request(&emp, r3.id).await.unwrap();
    assert_eq!(before2.queue_position, after2.queue_position);
    assert_eq!(before3.queue_position, after3.queue_position);
    assert_eq!(before2.updated_at, after2.updated_at);
    assert_eq!(before3.updated_at, after3.updated_at);
}

#[tokio::test]
async fn purging_a_pending_request_closes_the_gap() {
    let (store, _dir) = test_store().await;
    let emp = employee();
    let adm = admin();

    let r1 = store.submit(&emp, req("r1")).await.unwrap();
    let r2 = store.submit(&emp, req("r2")).await.unwrap();
    let r3 = store.submit(&emp, req("r3")).await.unwrap();

    store.purge_request(&adm, r2.id).await.unwrap();

    assert!(matches!(
        store.get_request(&emp, r2.id).await,
        Err(e) if e.kind() == "not_found"
    ));
    let r1_after = store.get_request(&emp, r1.id).await.unwrap();
    let r3_after = store.get_request(&emp, r3.id).await.unwrap();
    assert_eq!(r1_after.queue_position, Some(1));
    assert_eq!(r3_after.queue_position, Some(2));
    assert_queue_invariants(&store, &emp).await;
}

#[tokio::test]
async fn purging_a_decided_request_cascades_its_action() {
    let (store, _dir) = test_store().await;
    let emp = employee();
    let apr = approver();
    let adm = admin();

    let r = store.submit(&emp, req("r")).await.unwrap();
    store
        .decide(&apr, r.id, Decision::Rejected, None)
        .await
        .unwrap();
    assert!(store.get_action_for(&emp, r.id).await.unwrap().is_some());

    store.purge_request(&adm, r.id).await.unwrap();
    assert!(store.get_action_for(&emp, r.id).await.unwrap().is_none());
}

#[tokio::test]
async fn purge_requires_admin() {
    let (store, _dir) = test_store().await;
    let emp = employee();
    let apr = approver();

    let r = store.submit(&emp, req("r")).await.unwrap();
    let err = store.purge_request(&apr, r.id).await.unwrap_err();
    assert_eq!(err.kind(), "authorization_error");
    assert!(store.get_request(&emp, r.id).await.is_ok());
}
