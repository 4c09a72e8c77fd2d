use sqlx::sqlite::{SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;

/// Builds the connection pool backing the Store.
///
/// A single writer connection is the whole point: SQLite serializes writers
/// at the file level anyway, and capping the pool at one connection turns
/// "acquire the write lock before reading" (§4.1) into a property of
/// connection acquisition rather than something each query has to reason
/// about. Readers (`get`, `list`) share the same connection; there is no
/// reader/writer split in the baseline.
pub async fn make_pool(database_url: &str) -> anyhow::Result<SqlitePool> {
    let opts = sqlx::sqlite::SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .synchronous(SqliteSynchronous::Normal)
        // Cross-process claim contention resolves as a brief wait rather than
        // an immediate SQLITE_BUSY error (§4.1: readers/writers may block on
        // the write lock, they must not spuriously fail).
        .busy_timeout(Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await?;

    Ok(pool)
}

pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
