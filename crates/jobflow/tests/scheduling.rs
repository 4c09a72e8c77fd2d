mod common;

use chrono::{Duration, Utc};
use common::test_store;
use jobflow::model::NewJob;
use serial_test::serial;

/// E2E scenario 4: one priority-class job jumps ahead of two FIFO jobs
/// enqueued before it.
#[tokio::test]
#[serial]
async fn priority_overtakes_fifo() {
    let store = test_store().await;

    store.enqueue(NewJob::new("exit 0")).await.unwrap(); // a, priority 0
    store.enqueue(NewJob::new("exit 0")).await.unwrap(); // b, priority 0
    let mut urgent = NewJob::new("exit 0");
    urgent.id = Some("u".to_string());
    urgent.priority = 10;
    store.enqueue(urgent).await.unwrap();

    let now = Utc::now();
    let first = store.claim_next_runnable(1, now, 300).await.unwrap().unwrap();
    assert_eq!(first.id, "u");
}

/// P7: within the same class and priority, claims follow ascending
/// created_at (FIFO tie-break).
#[tokio::test]
#[serial]
async fn fifo_tie_break_by_creation_order() {
    let store = test_store().await;

    let mut a = NewJob::new("exit 0");
    a.id = Some("a".to_string());
    store.enqueue(a).await.unwrap();

    let mut b = NewJob::new("exit 0");
    b.id = Some("b".to_string());
    store.enqueue(b).await.unwrap();

    let now = Utc::now();
    let first = store.claim_next_runnable(1, now, 300).await.unwrap().unwrap();
    let second = store.claim_next_runnable(1, now, 300).await.unwrap().unwrap();
    assert_eq!(first.id, "a");
    assert_eq!(second.id, "b");
}

/// A job whose `run_at` is in the future is not runnable yet, even though it
/// would otherwise win on priority.
#[tokio::test]
#[serial]
async fn run_at_gates_first_execution() {
    let store = test_store().await;

    let mut future = NewJob::new("exit 0");
    future.priority = 10;
    future.run_at = Some(Utc::now() + Duration::seconds(30));
    store.enqueue(future).await.unwrap();

    let mut now_job = NewJob::new("exit 0");
    now_job.priority = 0;
    store.enqueue(now_job).await.unwrap();

    let now = Utc::now();
    let claimed = store
        .claim_next_runnable(1, now, 300)
        .await
        .unwrap()
        .expect("the runnable job should be claimed, not the future one");
    assert_eq!(claimed.priority, 0);

    let nothing_else = store.claim_next_runnable(1, now, 300).await.unwrap();
    assert!(nothing_else.is_none(), "the future job must stay unclaimed");
}

/// Two concurrent claimers never see the same row as unclaimed (P2):
/// `claim_next_runnable` serializes under `BEGIN IMMEDIATE`.
#[tokio::test]
#[serial]
async fn concurrent_claims_never_double_assign() {
    let store = test_store().await;
    store.enqueue(NewJob::new("exit 0")).await.unwrap();

    let now = Utc::now();
    let store_a = store.clone();
    let store_b = store.clone();
    let (a, b) = tokio::join!(
        async move { store_a.claim_next_runnable(1, now, 300).await.unwrap() },
        async move { store_b.claim_next_runnable(2, now, 300).await.unwrap() },
    );

    let got_a = a.is_some();
    let got_b = b.is_some();
    assert!(got_a ^ got_b, "exactly one claimer should win the only job");
}
