use std::sync::Arc;

use jobflow::clock::SystemClock;
use jobflow::config::Config;
use jobflow::db::{make_pool, run_migrations};
use jobflow::log::EventLog;
use jobflow::settings;
use jobflow::store::Store;
use jobflow::worker::{shutdown_channel, Worker};

/// The long-lived worker process described in §4.5. One OS process, one
/// loop, no threads: the worker's identity *is* its pid.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env();
    let log = Arc::new(EventLog::open(&cfg.log_path)?);

    let pool = make_pool(&cfg.database_url()).await?;
    run_migrations(&pool).await?;
    let store = Store::new(pool);

    let worker_id = std::process::id() as i64;
    let settings = settings::load(&store).await?;
    if let Err(reason) = settings.validate() {
        log.line(
            &format!("[worker {worker_id}]"),
            &format!("refusing to start: {reason}"),
        );
        anyhow::bail!(reason);
    }

    log.line(
        &format!("[worker {worker_id}]"),
        &format!(
            "starting: db={} lock_lease_seconds={} job_timeout_seconds={}",
            cfg.db_path.display(),
            settings.lock_lease_seconds,
            settings.job_timeout_seconds
        ),
    );

    let (shutdown_handle, shutdown_token) = shutdown_channel();
    install_signal_handlers(shutdown_handle);

    let worker = Worker::new(store, Arc::new(SystemClock), worker_id, log.clone());
    worker.run(shutdown_token).await?;

    log.line(&format!("[worker {worker_id}]"), "stopped");
    Ok(())
}

/// Translates the process's own SIGTERM/SIGINT into the cancellation token
/// the loop polls — the OS signal crosses into the worker's control flow
/// exactly once, here, per the design note in §9.
#[cfg(unix)]
fn install_signal_handlers(handle: jobflow::worker::ShutdownHandle) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut term = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => return,
        };
        let mut int = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(_) => return,
        };
        tokio::select! {
            _ = term.recv() => {}
            _ = int.recv() => {}
        }
        handle.request();
    });
}

#[cfg(windows)]
fn install_signal_handlers(handle: jobflow::worker::ShutdownHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.request();
        }
    });
}
