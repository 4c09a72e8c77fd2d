use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

/// Result of running one command to completion or timeout.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// Implementation-defined sentinel (distinct from 0) when `timed_out`.
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
}

impl ExecutionOutcome {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }

    /// A short snippet suitable for the Job's `error` column.
    pub fn error_snippet(&self) -> String {
        if self.timed_out {
            return "timed out".to_string();
        }
        let stderr = String::from_utf8_lossy(&self.stderr);
        let snippet: String = stderr.chars().take(500).collect();
        if snippet.is_empty() {
            format!("exit code {}", self.exit_code)
        } else {
            snippet
        }
    }
}

const TIMEOUT_SENTINEL: i32 = -1;

/// Runs `command` through the OS shell, enforcing a wall-clock timeout.
///
/// Performs no retries and no store access — it is purely "run this and
/// tell me what happened". On timeout the whole child process tree is
/// killed, not just the immediate shell.
pub async fn execute(command: &str, timeout_seconds: i64) -> anyhow::Result<ExecutionOutcome> {
    let mut cmd = build_shell_command(command);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    {
        // Put the child in its own process group so a timeout can take down
        // anything it spawned, not just the shell itself.
        cmd.process_group(0);
    }

    let mut child = cmd.spawn()?;
    let mut stdout_pipe = child.stdout.take().expect("stdout was piped");
    let mut stderr_pipe = child.stderr.take().expect("stderr was piped");

    let duration = Duration::from_secs(timeout_seconds.max(0) as u64);

    let run = async {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let (_, _, status) = tokio::join!(
            stdout_pipe.read_to_end(&mut stdout),
            stderr_pipe.read_to_end(&mut stderr),
            child.wait(),
        );
        anyhow::Ok((status?, stdout, stderr))
    };

    match timeout(duration, run).await {
        Ok(Ok((status, stdout, stderr))) => Ok(ExecutionOutcome {
            exit_code: status.code().unwrap_or(TIMEOUT_SENTINEL),
            stdout,
            stderr,
            timed_out: false,
        }),
        Ok(Err(e)) => Err(e),
        Err(_elapsed) => {
            kill_tree(&child);
            let _ = child.wait().await;
            Ok(ExecutionOutcome {
                exit_code: TIMEOUT_SENTINEL,
                stdout: Vec::new(),
                stderr: Vec::new(),
                timed_out: true,
            })
        }
    }
}

#[cfg(unix)]
fn build_shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn build_shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(unix)]
fn kill_tree(child: &tokio::process::Child) {
    if let Some(pid) = child.id() {
        // Negative pid addresses the whole process group created above.
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
}

#[cfg(windows)]
fn kill_tree(child: &tokio::process::Child) {
    if let Some(pid) = child.id() {
        let _ = std::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .output();
    }
}
