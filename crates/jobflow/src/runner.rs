use chrono::{DateTime, Utc};

use crate::backoff::delay_seconds;
use crate::error::{StoreError, StoreResult};
use crate::executor::ExecutionOutcome;
use crate::model::Job;
use crate::settings::Settings;
use crate::store::Store;

/// What the worker loop should do after `Store::claim_next_runnable`
/// returned `LeaseLost` on commit: nothing. Logged and swallowed, per
/// §4.5 step 6 — the sweep already gave this job to someone else.
pub const LEASE_LOST_ACTION: &str = "lease lost on commit; not retrying the state change";

/// Applies the outcome of one execution to the Store: completes, reschedules
/// a retry, or moves the job to the DLQ (§4.5 step 5). Returns `Ok(true)` if
/// the commit succeeded, `Ok(false)` if the lease had already been lost
/// (caller should log and move on, not retry), and `Err` for anything else.
pub async fn commit_outcome(
    store: &Store,
    job: &Job,
    outcome: &ExecutionOutcome,
    worker_id: i64,
    settings: &Settings,
    now: DateTime<Utc>,
) -> StoreResult<bool> {
    let result = if outcome.succeeded() {
        store.mark_completed(&job.id, worker_id, now).await
    } else {
        let new_attempts = job.attempts + 1;
        if new_attempts <= job.max_retries {
            let retry_at = now
                + chrono::Duration::seconds(delay_seconds(
                    new_attempts,
                    settings.backoff_base,
                    settings.max_backoff_seconds,
                ));
            store
                .schedule_retry(
                    &job.id,
                    worker_id,
                    new_attempts,
                    retry_at,
                    &outcome.error_snippet(),
                    now,
                )
                .await
        } else {
            store
                .move_to_dlq(&job.id, worker_id, &outcome.error_snippet(), now)
                .await
        }
    };

    match result {
        Ok(()) => Ok(true),
        Err(StoreError::LeaseLost(_, _)) => Ok(false),
        Err(e) => Err(e),
    }
}
