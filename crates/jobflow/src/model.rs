use chrono::{DateTime, Utc};

/// One of the four resting/in-flight states a job can occupy.
///
/// There is deliberately no `failed` state: a job that failed but still has
/// retries left is represented as `pending` with `retry_at` set in the
/// future, per I3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Dead,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Dead => "dead",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobState::Pending),
            "processing" => Some(JobState::Processing),
            "completed" => Some(JobState::Completed),
            "dead" => Some(JobState::Dead),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
    pub id: String,
    pub command: String,
    pub state: String,
    pub priority: i64,
    pub attempts: i64,
    pub max_retries: i64,
    pub locked_by: Option<i64>,
    pub locked_until: Option<DateTime<Utc>>,
    pub retry_at: Option<DateTime<Utc>>,
    pub run_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn state(&self) -> JobState {
        JobState::from_str(&self.state).expect("state column holds a valid JobState")
    }

    /// I3: a job is runnable at `t` iff pending and both gates have passed.
    pub fn is_runnable_at(&self, t: DateTime<Utc>) -> bool {
        self.state() == JobState::Pending
            && self.retry_at.map(|r| r <= t).unwrap_or(true)
            && self.run_at.map(|r| r <= t).unwrap_or(true)
    }
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: Option<String>,
    pub command: String,
    pub priority: i64,
    pub max_retries: Option<i64>,
    pub run_at: Option<DateTime<Utc>>,
}

impl NewJob {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            id: None,
            command: command.into(),
            priority: 0,
            max_retries: None,
            run_at: None,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DlqRecord {
    pub job_id: String,
    pub reason: String,
    pub moved_at: DateTime<Utc>,
}

/// Optional filter for `Store::list`.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub state: Option<JobState>,
    pub limit: i64,
}
