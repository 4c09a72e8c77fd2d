use clap::{Parser, Subcommand};
use jobflow::config::Config;
use jobflow::db::{make_pool, run_migrations};
use jobflow::model::{JobState, ListFilter, NewJob};
use jobflow::settings;
use jobflow::store::Store;
use jobflow::supervisor::Supervisor;
use jobflow::log::EventLog;

/// Command-line surface for the job queue (§6). A thin collaborator: every
/// mutation here goes through the same Store contract the worker uses, so
/// there is no parallel state-machine logic to keep in sync.
#[derive(Parser)]
#[command(name = "jobflowctl", about = "durable background job queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Insert a new job.
    Enqueue {
        /// Explicit job id; auto-generated (a uuid) when omitted.
        #[arg(long)]
        id: Option<String>,
        /// Shell command to run.
        command: String,
        /// Additional attempts allowed after the first failure.
        #[arg(long)]
        max_retries: Option<i64>,
        /// 0 = FIFO-class, 1-10 = priority-class (higher runs first).
        #[arg(long, default_value_t = 0)]
        priority: i64,
        /// RFC3339 timestamp before which the job is not eligible to run.
        #[arg(long)]
        run_at: Option<chrono::DateTime<chrono::Utc>>,
    },
    /// Show counts per state and which worker PIDs are running.
    Status,
    /// List jobs, optionally filtered by state.
    List {
        #[arg(long)]
        state: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Manage worker processes.
    Worker {
        #[command(subcommand)]
        action: WorkerAction,
    },
    /// Inspect or resurrect dead-lettered jobs.
    Dlq {
        #[command(subcommand)]
        action: DlqAction,
    },
    /// Read or write a runtime config key.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum WorkerAction {
    /// Spawn N worker processes and block relaying shutdown signals to them.
    Start {
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// Send a termination signal to every PID recorded in the PID file.
    Stop,
}

#[derive(Subcommand)]
enum DlqAction {
    /// List dead-lettered jobs.
    List {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Move a dead job back to `pending` with `attempts` reset to 0.
    Retry { id: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    Get { key: String },
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = Config::from_env();

    match run(cli.command, &cfg).await {
        Ok(()) => Ok(()),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

async fn run(command: Command, cfg: &Config) -> anyhow::Result<()> {
    match command {
        Command::Enqueue {
            id,
            command,
            max_retries,
            priority,
            run_at,
        } => {
            if !(0..=10).contains(&priority) {
                anyhow::bail!("priority must be in [0, 10], got {priority}");
            }
            let store = open_store(cfg).await?;
            let job = store
                .enqueue(NewJob {
                    id,
                    command,
                    priority,
                    max_retries,
                    run_at,
                })
                .await?;
            println!("enqueued {} (priority={})", job.id, job.priority);
            Ok(())
        }
        Command::Status => {
            let store = open_store(cfg).await?;
            let counts = store.counts_by_state().await?;
            for state in [
                JobState::Pending,
                JobState::Processing,
                JobState::Completed,
                JobState::Dead,
            ] {
                let n = counts
                    .iter()
                    .find(|(s, _)| *s == state)
                    .map(|(_, n)| *n)
                    .unwrap_or(0);
                println!("{:<10} {}", state.as_str(), n);
            }
            let supervisor = Supervisor::new(cfg.pid_path.clone());
            let pids = supervisor.running_pids().unwrap_or_default();
            println!("workers: {}", pids.len());
            for pid in pids {
                println!("  pid {pid}");
            }
            Ok(())
        }
        Command::List { state, limit } => {
            let store = open_store(cfg).await?;
            let state = state
                .map(|s| {
                    JobState::from_str(&s)
                        .ok_or_else(|| anyhow::anyhow!("unknown state: {s}"))
                })
                .transpose()?;
            let jobs = store.list(ListFilter { state, limit }).await?;
            for job in jobs {
                println!(
                    "{:<36} {:<10} priority={:<2} attempts={:<2} command={}",
                    job.id, job.state, job.priority, job.attempts, job.command
                );
            }
            Ok(())
        }
        Command::Worker { action } => match action {
            WorkerAction::Start { count } => {
                let store = open_store(cfg).await?;
                let settings = settings::load(&store).await?;
                if let Err(reason) = settings.validate() {
                    anyhow::bail!(reason);
                }
                let worker_bin = worker_binary_path()?;
                let log = EventLog::open(&cfg.log_path)?;
                let supervisor = Supervisor::new(cfg.pid_path.clone());
                let envs = vec![
                    ("JOBFLOW_DB".to_string(), cfg.db_path.display().to_string()),
                    ("JOBFLOW_LOG".to_string(), cfg.log_path.display().to_string()),
                ];
                supervisor.start(&worker_bin, count, envs, &log).await?;
                Ok(())
            }
            WorkerAction::Stop => {
                let supervisor = Supervisor::new(cfg.pid_path.clone());
                let n = supervisor.stop()?;
                println!("signaled {n} worker(s)");
                Ok(())
            }
        },
        Command::Dlq { action } => match action {
            DlqAction::List { limit } => {
                let store = open_store(cfg).await?;
                let rows = store.list_dlq(limit).await?;
                for row in rows {
                    println!("{} {} {}", row.job_id, row.reason, row.moved_at);
                }
                Ok(())
            }
            DlqAction::Retry { id } => {
                let store = open_store(cfg).await?;
                store.retry_from_dlq(&id).await?;
                println!("requeued {id}");
                Ok(())
            }
        },
        Command::Config { action } => match action {
            ConfigAction::Get { key } => {
                let store = open_store(cfg).await?;
                match store.get_config(&key).await? {
                    Some(value) => println!("{value}"),
                    None => println!("(unset; default applies)"),
                }
                Ok(())
            }
            ConfigAction::Set { key, value } => {
                if !settings::ALL_KEYS.contains(&key.as_str()) {
                    anyhow::bail!("unknown config key: {key}");
                }
                let store = open_store(cfg).await?;
                store.set_config(&key, &value).await?;
                println!("{key} = {value}");
                Ok(())
            }
        },
    }
}

async fn open_store(cfg: &Config) -> anyhow::Result<Store> {
    let pool = make_pool(&cfg.database_url()).await?;
    run_migrations(&pool).await?;
    Ok(Store::new(pool))
}

/// The worker binary is expected to live alongside `jobflowctl` in the same
/// build output directory.
fn worker_binary_path() -> anyhow::Result<std::path::PathBuf> {
    let mut exe = std::env::current_exe()?;
    exe.pop();
    let name = if cfg!(windows) {
        "jobflow-worker.exe"
    } else {
        "jobflow-worker"
    };
    exe.push(name);
    if !exe.exists() {
        anyhow::bail!(
            "worker binary not found at {}; build the jobflow-worker crate first",
            exe.display()
        );
    }
    Ok(exe)
}
