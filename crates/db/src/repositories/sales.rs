use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::Row;

use salescope_core::domain::forecast::{ForecastMetric, SeriesPoint, AGGREGATE_SERIES_ID};

use super::{RepositoryError, SalesRepository};
use crate::DbPool;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSummary {
    pub product_id: String,
    pub product_name: String,
    pub category: String,
}

pub struct SqlSalesRepository {
    pool: DbPool,
}

impl SqlSalesRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Number of monthly sales rows; used by readiness probes.
    pub async fn row_count(&self) -> Result<i64, RepositoryError> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM products").fetch_one(&self.pool).await?)
    }
}

#[async_trait]
impl SalesRepository for SqlSalesRepository {
    async fn product_catalogue(&self) -> Result<Vec<ProductSummary>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT product_id, MAX(product_name) AS product_name, MAX(category) AS category
             FROM products
             GROUP BY product_id
             ORDER BY product_name ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(ProductSummary {
                    product_id: row.try_get("product_id")?,
                    product_name: row.try_get("product_name")?,
                    category: row.try_get("category")?,
                })
            })
            .collect()
    }

    async fn monthly_series(
        &self,
        product_id: Option<&str>,
        metric: ForecastMetric,
    ) -> Result<Vec<SeriesPoint>, RepositoryError> {
        let column = metric.column();
        let rows = match product_id {
            None => {
                sqlx::query(&format!(
                    "SELECT period, CAST(SUM({column}) AS REAL) AS total
                     FROM products
                     GROUP BY period
                     ORDER BY period ASC"
                ))
                .fetch_all(&self.pool)
                .await?
            }
            Some(product_id) => {
                sqlx::query(&format!(
                    "SELECT period, CAST(SUM({column}) AS REAL) AS total
                     FROM products
                     WHERE product_id = ?1
                     GROUP BY period
                     ORDER BY period ASC"
                ))
                .bind(product_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let series_id = product_id.unwrap_or(AGGREGATE_SERIES_ID);
        rows.into_iter()
            .map(|row| {
                Ok(SeriesPoint {
                    series_id: series_id.to_string(),
                    period: row.try_get("period")?,
                    target: row.try_get::<f64, _>("total")?,
                })
            })
            .collect()
    }
}
