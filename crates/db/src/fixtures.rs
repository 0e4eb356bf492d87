use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Small deterministic sales history used by `seed`, demos and tests.
pub struct DemoSalesDataset;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedResult {
    pub products: i64,
    pub rows: i64,
}

impl DemoSalesDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_sales.sql");
    pub const EXPECTED_PRODUCTS: i64 = 4;
    pub const EXPECTED_ROWS: i64 = 24;

    /// Loads the dataset. Re-running replaces the same rows.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;
        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        Self::counts(pool).await
    }

    pub async fn verify(pool: &DbPool) -> Result<bool, RepositoryError> {
        let counts = Self::counts(pool).await?;
        Ok(counts.products >= Self::EXPECTED_PRODUCTS && counts.rows >= Self::EXPECTED_ROWS)
    }

    async fn counts(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let products: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT product_id) FROM products")
            .fetch_one(pool)
            .await?;
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products").fetch_one(pool).await?;
        Ok(SeedResult { products, rows })
    }
}
