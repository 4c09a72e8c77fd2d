use std::path::PathBuf;

/// Process-wide configuration: where the store lives on disk, and how this
/// process identifies itself. Loaded once at startup and passed down
/// explicitly — nothing here is a process global.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub log_path: PathBuf,
    pub pid_path: PathBuf,
}

impl Config {
    /// Reads `.env` (if present) then the process environment. Unset values
    /// fall back to sane defaults rooted at the current directory, so the
    /// tool works out of the box in a scratch directory.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let db_path = env_or_fallback("JOBFLOW_DB", "JOBFLOW_DATABASE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("jobflow.db"));
        let log_path = std::env::var("JOBFLOW_LOG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("jobflow.log"));
        let pid_path = std::env::var("JOBFLOW_PIDFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("jobflow.pid"));

        Self {
            db_path,
            log_path,
            pid_path,
        }
    }

    pub fn database_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path.display())
    }
}

/// Looks up `primary` first, then `fallback`, returning the first value
/// that is set (and non-empty).
fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|v| !v.is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|v| !v.is_empty()))
}
