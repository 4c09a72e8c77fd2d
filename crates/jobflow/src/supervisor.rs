use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};

use crate::log::EventLog;

/// Parent process that spawns N worker processes, records their PIDs to a
/// well-known file, and relays shutdown signals (§4.6). Does not itself
/// touch the Store or run jobs; it only owns the child processes.
pub struct Supervisor {
    pid_path: PathBuf,
}

impl Supervisor {
    pub fn new(pid_path: PathBuf) -> Self {
        Self { pid_path }
    }

    /// Spawns `count` copies of `worker_bin`, passing `envs` to each, writes
    /// their PIDs to the PID file, then blocks until a termination signal
    /// arrives or every child exits on its own.
    ///
    /// On signal, SIGTERM is relayed to every recorded PID and the call waits
    /// for each child to exit before returning — shutdown is cooperative, not
    /// forced (§5). A worker that crashed on its own is not restarted; its
    /// jobs are picked up by a surviving worker's lease sweep.
    pub async fn start<I, K, V>(
        &self,
        worker_bin: &Path,
        count: usize,
        envs: I,
        log: &EventLog,
    ) -> anyhow::Result<()>
    where
        I: IntoIterator<Item = (K, V)> + Clone,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        let mut children: Vec<Child> = Vec::with_capacity(count);
        for _ in 0..count {
            let mut cmd = Command::new(worker_bin);
            cmd.envs(envs.clone())
                .stdin(Stdio::null())
                .kill_on_drop(false);
            let child = cmd.spawn()?;
            children.push(child);
        }

        let pids: Vec<u32> = children.iter().filter_map(|c| c.id()).collect();
        write_pid_file(&self.pid_path, &pids)?;
        log.line(
            "[supervisor]",
            &format!("started {} worker(s): {:?}", pids.len(), pids),
        );

        let shutdown = wait_for_shutdown_signal();
        tokio::pin!(shutdown);

        let mut join_set = tokio::task::JoinSet::new();
        for (idx, mut child) in children.into_iter().enumerate() {
            join_set.spawn(async move {
                let status = child.wait().await;
                (idx, status)
            });
        }

        let mut signaled = false;
        tokio::select! {
            _ = &mut shutdown => {
                log.line("[supervisor]", "shutdown signal received, stopping workers");
                signal_pids(&pids, TermSignal::Terminate);
                signaled = true;
            }
            _ = async { while join_set.join_next().await.is_some() {} } => {
                log.line("[supervisor]", "all workers exited on their own");
            }
        }

        // Either every child already exited (the second branch drained the
        // set itself) or shutdown was requested and the signal was just
        // sent — in the latter case wait for each child to actually exit
        // before returning, since shutdown is job-completing, not forced.
        if signaled {
            while join_set.join_next().await.is_some() {}
        }

        let _ = fs::remove_file(&self.pid_path);
        Ok(())
    }

    /// Reads the PID file and sends a termination signal to every PID in it.
    /// This is the separate "stop" invocation (§4.6): it does not require the
    /// original supervisor process to still be running, only the file it
    /// left behind.
    pub fn stop(&self) -> anyhow::Result<usize> {
        let pids = read_pid_file(&self.pid_path)?;
        signal_pids(&pids, TermSignal::Terminate);
        let _ = fs::remove_file(&self.pid_path);
        Ok(pids.len())
    }

    pub fn running_pids(&self) -> anyhow::Result<Vec<u32>> {
        read_pid_file(&self.pid_path)
    }
}

fn write_pid_file(path: &Path, pids: &[u32]) -> anyhow::Result<()> {
    let body = pids
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join("\n");
    fs::write(path, body)?;
    Ok(())
}

fn read_pid_file(path: &Path) -> anyhow::Result<Vec<u32>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let body = fs::read_to_string(path)?;
    Ok(body
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .collect())
}

enum TermSignal {
    Terminate,
}

#[cfg(unix)]
fn signal_pids(pids: &[u32], _sig: TermSignal) {
    for &pid in pids {
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }
}

#[cfg(windows)]
fn signal_pids(pids: &[u32], _sig: TermSignal) {
    for &pid in pids {
        let _ = std::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/F"])
            .output();
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut int = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    tokio::select! {
        _ = term.recv() => {}
        _ = int.recv() => {}
    }
}

#[cfg(windows)]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
