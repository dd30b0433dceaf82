//! Database connection pool management.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Type alias for the database pool.
pub type Pool = PgPool;

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<Pool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Run database migrations.
pub async fn run_migrations(pool: &Pool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Check if a SQL error is a unique constraint violation.
pub fn is_unique_violation(e: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = e {
        // PostgreSQL unique violation code is "23505"
        db_err.code().map(|c| c == "23505").unwrap_or(false)
    } else {
        false
    }
}

/// Pool on the scratch database named by `DATABASE_URL`, migrated.
#[cfg(test)]
pub async fn test_pool() -> Pool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must name a scratch database");
    let pool = create_pool(&url, 2).await.expect("connect to test database");
    run_migrations(&pool).await.expect("migrate test database");
    pool
}
