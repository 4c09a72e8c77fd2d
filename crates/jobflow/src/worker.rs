use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::clock::Clock;
use crate::executor::execute;
use crate::log::EventLog;
use crate::runner::commit_outcome;
use crate::settings::{self, Settings};
use crate::store::Store;

/// How often (in idle/claim cycles) the sweep runs. Reclaiming leases and
/// promoting retries on every single iteration would mean one extra write
/// per poll even when nothing is runnable; §4.5 explicitly allows
/// rate-limiting this.
const SWEEP_EVERY_N_ITERATIONS: u64 = 5;

const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Cooperative cancellation, per the design note in §9: the OS signal is
/// translated once (by whoever owns the process) into a flag the loop polls
/// between iterations, rather than a signal handler reaching into the loop
/// directly.
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

pub fn shutdown_channel() -> (ShutdownHandle, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, ShutdownToken { rx })
}

impl ShutdownHandle {
    pub fn request(&self) {
        let _ = self.tx.send(true);
    }
}

impl ShutdownToken {
    pub fn requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves as soon as shutdown is requested; used to cut an idle poll
    /// sleep short instead of waiting out the full interval.
    async fn until_requested(&mut self) {
        let _ = self.rx.wait_for(|requested| *requested).await;
    }
}

/// The long-lived loop described in §4.5, owned by one OS process. `worker_id`
/// is that process's OS pid, per the spec's identification scheme.
pub struct Worker<C: Clock> {
    store: Store,
    clock: Arc<C>,
    worker_id: i64,
    log: Arc<EventLog>,
}

impl<C: Clock> Worker<C> {
    pub fn new(store: Store, clock: Arc<C>, worker_id: i64, log: Arc<EventLog>) -> Self {
        Self {
            store,
            clock,
            worker_id,
            log,
        }
    }

    fn tag(&self) -> String {
        format!("[worker {}]", self.worker_id)
    }

    /// Runs until `shutdown` is requested and the worker is idle. A worker
    /// that has claimed a job always finishes executing it and committing
    /// the result before checking shutdown again (§5: shutdown is
    /// cooperative and job-completing).
    pub async fn run(&self, mut shutdown: ShutdownToken) -> anyhow::Result<()> {
        let mut iterations: u64 = 0;

        loop {
            if shutdown.requested() {
                self.log.line(&self.tag(), "shutdown requested, idle, exiting");
                return Ok(());
            }

            iterations += 1;
            if iterations % SWEEP_EVERY_N_ITERATIONS == 1 {
                self.sweep().await;
            }

            let settings = match settings::load(&self.store).await {
                Ok(s) => s,
                Err(e) => {
                    self.log
                        .line(&self.tag(), &format!("store unavailable reading config: {e}"));
                    self.idle_wait(&mut shutdown).await;
                    continue;
                }
            };

            if let Err(reason) = settings.validate() {
                self.log.line(
                    &self.tag(),
                    &format!("refusing to claim under invalid configuration: {reason}"),
                );
                self.idle_wait(&mut shutdown).await;
                continue;
            }

            let now = self.clock.now();
            let claimed = self
                .store
                .claim_next_runnable(self.worker_id, now, settings.lock_lease_seconds)
                .await;

            let job = match claimed {
                Ok(Some(job)) => job,
                Ok(None) => {
                    self.idle_wait(&mut shutdown).await;
                    continue;
                }
                Err(e) => {
                    self.log
                        .line(&self.tag(), &format!("store unavailable claiming job: {e}"));
                    self.idle_wait(&mut shutdown).await;
                    continue;
                }
            };

            self.log
                .line(&self.tag(), &format!("claimed job {}", job.id));

            let outcome = execute(&job.command, settings.job_timeout_seconds).await?;
            let commit_now = self.clock.now();

            match commit_outcome(&self.store, &job, &outcome, self.worker_id, &settings, commit_now)
                .await
            {
                Ok(true) if outcome.succeeded() => {
                    self.log
                        .line(&self.tag(), &format!("job {} completed", job.id));
                }
                Ok(true) => {
                    self.log.line(
                        &self.tag(),
                        &format!(
                            "job {} failed (exit_code={} timed_out={}): {}",
                            job.id,
                            outcome.exit_code,
                            outcome.timed_out,
                            outcome.error_snippet()
                        ),
                    );
                }
                Ok(false) => {
                    // §4.5 step 6: someone else already owns this job. Do
                    // not retry the state change.
                    self.log.line(
                        &self.tag(),
                        &format!("lease lost for job {}; not retrying the commit", job.id),
                    );
                }
                Err(e) => {
                    self.log.line(
                        &self.tag(),
                        &format!("store unavailable committing job {}: {e}", job.id),
                    );
                }
            }
        }
    }

    async fn sweep(&self) {
        let now = self.clock.now();
        match self.store.reclaim_expired_leases(now).await {
            Ok(n) if n > 0 => self
                .log
                .line(&self.tag(), &format!("reclaimed {n} expired lease(s)")),
            Ok(_) => {}
            Err(e) => self
                .log
                .line(&self.tag(), &format!("store unavailable during reclaim: {e}")),
        }
        match self.store.promote_ready_retries(now).await {
            Ok(_) => {}
            Err(e) => self
                .log
                .line(&self.tag(), &format!("store unavailable during promotion: {e}")),
        }
    }

    async fn idle_wait(&self, shutdown: &mut ShutdownToken) {
        tokio::select! {
            _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => {}
            _ = shutdown.until_requested() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::db::{make_pool, run_migrations};
    use crate::model::NewJob;
    use std::time::Duration as StdDuration;

    async fn test_store() -> Store {
        let pool = make_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        Store::new(pool)
    }

    #[tokio::test]
    async fn worker_processes_one_job_then_shuts_down_idle() {
        let store = test_store().await;
        store.enqueue(NewJob::new("exit 0")).await.unwrap();
        store.set_config("job_timeout_seconds", "5").await.unwrap();
        store.set_config("lock_lease_seconds", "5").await.unwrap();

        let log_dir = tempfile::tempdir().unwrap();
        let log = Arc::new(EventLog::open(&log_dir.path().join("jobflow-test.log")).unwrap());
        let worker = Worker::new(store.clone(), Arc::new(SystemClock), 999, log);
        let (handle, token) = shutdown_channel();

        let run = tokio::spawn(async move { worker.run(token).await });

        // Give the worker a moment to claim and finish the job, then ask it
        // to stop; it should already be idle and exit immediately.
        tokio::time::sleep(StdDuration::from_millis(300)).await;
        handle.request();
        let result = tokio::time::timeout(StdDuration::from_secs(3), run)
            .await
            .expect("worker should exit promptly once idle")
            .unwrap();
        assert!(result.is_ok());

        let jobs = store
            .list(crate::model::ListFilter {
                state: Some(crate::model::JobState::Completed),
                limit: 10,
            })
            .await
            .unwrap();
        assert_eq!(jobs.len(), 1);
    }
}
