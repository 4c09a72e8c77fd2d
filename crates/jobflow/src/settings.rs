/// Recognized `config` keys and their defaults (§3). Values are stored as
/// strings in the Store and parsed here at read time, so a typed accessor
/// validates ranges instead of trusting whatever was written.
pub const KEY_MAX_RETRIES: &str = "max_retries";
pub const KEY_BACKOFF_BASE: &str = "backoff_base";
pub const KEY_MAX_BACKOFF_SECONDS: &str = "max_backoff_seconds";
pub const KEY_LOCK_LEASE_SECONDS: &str = "lock_lease_seconds";
pub const KEY_JOB_TIMEOUT_SECONDS: &str = "job_timeout_seconds";

pub const ALL_KEYS: &[&str] = &[
    KEY_MAX_RETRIES,
    KEY_BACKOFF_BASE,
    KEY_MAX_BACKOFF_SECONDS,
    KEY_LOCK_LEASE_SECONDS,
    KEY_JOB_TIMEOUT_SECONDS,
];

/// The resolved, typed view of the Config table used by the worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub max_retries: i64,
    pub backoff_base: i64,
    pub max_backoff_seconds: i64,
    pub lock_lease_seconds: i64,
    pub job_timeout_seconds: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: 2,
            max_backoff_seconds: 300,
            lock_lease_seconds: 300,
            job_timeout_seconds: 3600,
        }
    }
}

impl Settings {
    /// Resolves each recognized key from `lookup`, falling back to the
    /// default on a missing or unparsable value.
    pub fn resolve<F>(mut lookup: F) -> Self
    where
        F: FnMut(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            max_retries: parse_or(lookup(KEY_MAX_RETRIES), defaults.max_retries),
            backoff_base: parse_or(lookup(KEY_BACKOFF_BASE), defaults.backoff_base),
            max_backoff_seconds: parse_or(
                lookup(KEY_MAX_BACKOFF_SECONDS),
                defaults.max_backoff_seconds,
            ),
            lock_lease_seconds: parse_or(
                lookup(KEY_LOCK_LEASE_SECONDS),
                defaults.lock_lease_seconds,
            ),
            job_timeout_seconds: parse_or(
                lookup(KEY_JOB_TIMEOUT_SECONDS),
                defaults.job_timeout_seconds,
            ),
        }
    }

    /// §9 open question: a lease shorter than the job timeout lets a job be
    /// double-executed after reclaim. Rather than silently accept that, the
    /// worker calls this at startup and refuses to run on a bad pairing.
    pub fn validate(&self) -> Result<(), String> {
        if self.lock_lease_seconds < self.job_timeout_seconds {
            return Err(format!(
                "lock_lease_seconds ({}) must be >= job_timeout_seconds ({}); \
                 a shorter lease would let a still-running job be reclaimed and re-executed",
                self.lock_lease_seconds, self.job_timeout_seconds
            ));
        }
        Ok(())
    }
}

fn parse_or(raw: Option<String>, default: i64) -> i64 {
    raw.and_then(|s| s.parse::<i64>().ok()).unwrap_or(default)
}

/// Resolves Settings from the live Config table, so a `config set` takes
/// effect on the worker's next iteration without a restart.
pub async fn load(store: &crate::store::Store) -> crate::error::StoreResult<Settings> {
    let mut values = std::collections::HashMap::new();
    for key in ALL_KEYS {
        if let Some(value) = store.get_config(key).await? {
            values.insert(*key, value);
        }
    }
    Ok(Settings::resolve(|k| values.get(k).cloned()))
}
