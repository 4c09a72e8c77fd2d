use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Append-only text log for operator diagnosis (§6). Mirrors the
/// `println!`/`eprintln!` style used elsewhere in this codebase — this just
/// also tees the same line to a file, one line per event.
pub struct EventLog {
    file: Mutex<std::fs::File>,
}

impl EventLog {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Writes `message` to the log file and echoes it to stderr, prefixed
    /// with an RFC3339 timestamp and the caller-supplied tag (typically
    /// `[worker 1234]` or `[supervisor]`).
    pub fn line(&self, tag: &str, message: &str) {
        let stamped = format!("{} {} {}", chrono::Utc::now().to_rfc3339(), tag, message);
        eprintln!("{stamped}");
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{stamped}");
        }
    }
}
