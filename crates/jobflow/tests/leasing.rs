mod common;

use chrono::Utc;
use common::test_store;
use jobflow::model::{JobState, NewJob};
use serial_test::serial;

/// E2E scenario 5: a lease that expires without the holder reporting back
/// is reclaimed by the sweep, the job goes back to `pending`, and attempts
/// are not incremented — the work simply didn't complete.
#[tokio::test]
#[serial]
async fn expired_lease_is_reclaimed_without_bumping_attempts() {
    let store = test_store().await;
    store.enqueue(NewJob::new("sleep 60")).await.unwrap();

    let claim_time = Utc::now();
    let job = store
        .claim_next_runnable(1, claim_time, 1) // 1-second lease
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.attempts, 0);

    // Simulate the holder vanishing (SIGKILL) without committing anything.
    let past_expiry = claim_time + chrono::Duration::seconds(5);
    let reclaimed = store.reclaim_expired_leases(past_expiry).await.unwrap();
    assert_eq!(reclaimed, 1);

    let refreshed = store.get(&job.id).await.unwrap().unwrap();
    assert_eq!(refreshed.state(), JobState::Pending);
    assert_eq!(refreshed.attempts, 0, "reclaim must not count as an attempt");
    assert!(refreshed.locked_by.is_none());
    assert!(refreshed.locked_until.is_none());

    // The job is runnable again, so a second worker can pick it up.
    let recovered = store
        .claim_next_runnable(2, past_expiry, 300)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(recovered.id, job.id);
    assert_eq!(recovered.locked_by, Some(2));
}

/// A lease that has not yet expired is left alone by the sweep.
#[tokio::test]
#[serial]
async fn reclaim_ignores_leases_still_in_force() {
    let store = test_store().await;
    store.enqueue(NewJob::new("sleep 60")).await.unwrap();

    let now = Utc::now();
    store.claim_next_runnable(1, now, 300).await.unwrap().unwrap();

    let reclaimed = store.reclaim_expired_leases(now).await.unwrap();
    assert_eq!(reclaimed, 0);
}

/// A commit attempted by a worker whose lease was already reclaimed fails
/// with `LeaseLost` rather than silently overwriting whoever claims next.
#[tokio::test]
#[serial]
async fn commit_after_lease_reclaimed_is_rejected() {
    let store = test_store().await;
    store.enqueue(NewJob::new("sleep 60")).await.unwrap();

    let claim_time = Utc::now();
    let job = store
        .claim_next_runnable(1, claim_time, 1)
        .await
        .unwrap()
        .unwrap();

    let past_expiry = claim_time + chrono::Duration::seconds(5);
    store.reclaim_expired_leases(past_expiry).await.unwrap();

    let err = store
        .mark_completed(&job.id, 1, past_expiry)
        .await
        .unwrap_err();
    assert!(matches!(err, jobflow::StoreError::LeaseLost(_, 1)));
}
