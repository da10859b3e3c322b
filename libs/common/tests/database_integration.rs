//! Integration tests for the database helpers
//!
//! These tests need a reachable PostgreSQL instance configured through
//! `DATABASE_URL`, so they are ignored by default.

use common::database::{DatabaseConfig, health_check, init_pool};
use sqlx::Row;

#[tokio::test]
#[ignore = "requires a running PostgreSQL instance"]
async fn test_database_roundtrip() -> Result<(), Box<dyn std::error::Error>> {
    let db_config = DatabaseConfig::from_env()?;
    let pool = init_pool(&db_config).await?;

    assert!(health_check(&pool).await?, "Database health check failed");

    let row = sqlx::query("SELECT 1 as result").fetch_one(&pool).await?;
    let result: i32 = row.get("result");
    assert_eq!(result, 1, "PostgreSQL simple query test failed");

    pool.close().await;
    Ok(())
}
