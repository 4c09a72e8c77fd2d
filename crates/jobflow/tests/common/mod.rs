use jobflow::db::{make_pool, run_migrations};
use jobflow::store::Store;

#[allow(dead_code)]
pub async fn test_store() -> Store {
    let pool = make_pool("sqlite::memory:").await.expect("open in-memory store");
    run_migrations(&pool).await.expect("run migrations");
    Store::new(pool)
}
