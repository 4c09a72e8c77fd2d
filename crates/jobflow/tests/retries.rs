mod common;

use chrono::Utc;
use common::test_store;
use jobflow::executor::ExecutionOutcome;
use jobflow::model::{JobState, NewJob};
use jobflow::runner::commit_outcome;
use jobflow::settings::Settings;
use serial_test::serial;

fn failure(stderr: &str) -> ExecutionOutcome {
    ExecutionOutcome {
        exit_code: 1,
        stdout: Vec::new(),
        stderr: stderr.as_bytes().to_vec(),
        timed_out: false,
    }
}

fn success() -> ExecutionOutcome {
    ExecutionOutcome {
        exit_code: 0,
        stdout: Vec::new(),
        stderr: Vec::new(),
        timed_out: false,
    }
}

/// E2E scenario 2: two failures followed by a success, observing the
/// backoff delays at each step (P5: delay(n) = min(base^n, cap)).
#[tokio::test]
#[serial]
async fn retry_then_success_follows_backoff_schedule() {
    let store = test_store().await;
    let mut job = NewJob::new("irrelevant; outcome is driven by the test");
    job.max_retries = Some(3);
    store.enqueue(job).await.unwrap();

    let settings = Settings {
        backoff_base: 2,
        max_backoff_seconds: 10,
        ..Settings::default()
    };

    let now = Utc::now();
    let claimed = store.claim_next_runnable(1, now, 300).await.unwrap().unwrap();
    commit_outcome(&store, &claimed, &failure("boom"), 1, &settings, now)
        .await
        .unwrap();

    let after_first = store.get(&claimed.id).await.unwrap().unwrap();
    assert_eq!(after_first.state(), JobState::Pending);
    assert_eq!(after_first.attempts, 1);
    let retry_at_1 = after_first.retry_at.expect("retry_at set after first failure");
    assert_eq!((retry_at_1 - now).num_seconds(), 2); // base^1

    let second_attempt_time = retry_at_1;
    let claimed_2 = store
        .claim_next_runnable(1, second_attempt_time, 300)
        .await
        .unwrap()
        .unwrap();
    commit_outcome(
        &store,
        &claimed_2,
        &failure("boom again"),
        1,
        &settings,
        second_attempt_time,
    )
    .await
    .unwrap();

    let after_second = store.get(&claimed.id).await.unwrap().unwrap();
    assert_eq!(after_second.attempts, 2);
    let retry_at_2 = after_second.retry_at.unwrap();
    assert_eq!((retry_at_2 - second_attempt_time).num_seconds(), 4); // base^2

    let third_attempt_time = retry_at_2;
    let claimed_3 = store
        .claim_next_runnable(1, third_attempt_time, 300)
        .await
        .unwrap()
        .unwrap();
    commit_outcome(&store, &claimed_3, &success(), 1, &settings, third_attempt_time)
        .await
        .unwrap();

    let final_job = store.get(&claimed.id).await.unwrap().unwrap();
    assert_eq!(final_job.state(), JobState::Completed);
    assert_eq!(final_job.attempts, 2);
}

/// Boundary case: `max_retries = 0` means a single attempt, straight to DLQ
/// on failure.
#[tokio::test]
#[serial]
async fn max_retries_zero_goes_straight_to_dlq() {
    let store = test_store().await;
    let mut job = NewJob::new("exit 1");
    job.max_retries = Some(0);
    store.enqueue(job).await.unwrap();

    let now = Utc::now();
    let claimed = store.claim_next_runnable(1, now, 300).await.unwrap().unwrap();
    let settings = Settings::default();
    commit_outcome(&store, &claimed, &failure("boom"), 1, &settings, now)
        .await
        .unwrap();

    let refreshed = store.get(&claimed.id).await.unwrap().unwrap();
    assert_eq!(refreshed.state(), JobState::Dead);
    assert_eq!(refreshed.attempts, 1);
}

/// `backoff_base = 1` yields a constant delay of 1 second up to the cap.
#[tokio::test]
#[serial]
async fn backoff_base_one_is_constant_delay() {
    let store = test_store().await;
    let mut job = NewJob::new("exit 1");
    job.max_retries = Some(5);
    store.enqueue(job).await.unwrap();

    let settings = Settings {
        backoff_base: 1,
        max_backoff_seconds: 300,
        ..Settings::default()
    };

    let mut now = Utc::now();
    for _ in 0..3 {
        let claimed = store.claim_next_runnable(1, now, 300).await.unwrap().unwrap();
        commit_outcome(&store, &claimed, &failure("boom"), 1, &settings, now)
            .await
            .unwrap();
        let refreshed = store.get(&claimed.id).await.unwrap().unwrap();
        let retry_at = refreshed.retry_at.unwrap();
        assert_eq!((retry_at - now).num_seconds(), 1);
        now = retry_at;
    }
}
