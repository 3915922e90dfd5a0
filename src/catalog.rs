//! Catalog of published reports.
//!
//! One row per `(ticker, year, period)`; the triple is unique, so the
//! database itself decides whether a report is new. [`Catalog::create`]
//! maps a uniqueness violation to [`CreateOutcome::AlreadyExists`] rather
//! than an error, which makes re-runs of the pipeline idempotent.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::CatalogError;
use crate::models::CatalogRecord;

/// Result of an insert attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(CatalogRecord),
    AlreadyExists,
}

/// Insert-with-uniqueness store of catalog records.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn create(
        &self,
        ticker: &str,
        year: i32,
        period: &str,
        address: &str,
    ) -> Result<CreateOutcome, CatalogError>;
}

/// [`Catalog`] over the SQLite `reports` table.
#[derive(Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
}

const COLUMNS: &str = "id, ticker, year, period, address, created_at";

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn get(&self, id: i64) -> Result<Option<CatalogRecord>, CatalogError> {
        let row = sqlx::query(&format!("SELECT {} FROM reports WHERE id = ?", COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_record))
    }

    pub async fn find(
        &self,
        ticker: &str,
        year: i32,
        period: &str,
    ) -> Result<Option<CatalogRecord>, CatalogError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM reports WHERE ticker = ? AND year = ? AND period = ?",
            COLUMNS
        ))
        .bind(ticker)
        .bind(year)
        .bind(period)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_record))
    }

    pub async fn exists(&self, ticker: &str, year: i32, period: &str) -> Result<bool, CatalogError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM reports WHERE ticker = ? AND year = ? AND period = ?",
        )
        .bind(ticker)
        .bind(year)
        .bind(period)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Page through all records, newest year first.
    pub async fn list(&self, skip: i64, limit: i64) -> Result<Vec<CatalogRecord>, CatalogError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM reports ORDER BY year DESC, ticker ASC, CAST(period AS INTEGER) DESC, id ASC LIMIT ? OFFSET ?",
            COLUMNS
        ))
        .bind(limit.max(0))
        .bind(skip.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    pub async fn list_by_ticker(&self, ticker: &str) -> Result<Vec<CatalogRecord>, CatalogError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM reports WHERE ticker = ? ORDER BY year DESC, CAST(period AS INTEGER) DESC",
            COLUMNS
        ))
        .bind(ticker)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    /// One page of a company's records, in [`list_by_ticker`](Self::list_by_ticker) order.
    pub async fn list_by_ticker_page(
        &self,
        ticker: &str,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<CatalogRecord>, CatalogError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM reports WHERE ticker = ? ORDER BY year DESC, CAST(period AS INTEGER) DESC LIMIT ? OFFSET ?",
            COLUMNS
        ))
        .bind(ticker)
        .bind(limit.max(0))
        .bind(skip.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    pub async fn list_by_year(&self, year: i32) -> Result<Vec<CatalogRecord>, CatalogError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM reports WHERE year = ? ORDER BY ticker ASC, CAST(period AS INTEGER) DESC",
            COLUMNS
        ))
        .bind(year)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    /// Correct the stored address. Returns `false` if no such record.
    pub async fn update_address(&self, id: i64, address: &str) -> Result<bool, CatalogError> {
        let result = sqlx::query("UPDATE reports SET address = ? WHERE id = ?")
            .bind(address)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove a record (admin action). Returns `false` if no such record.
    pub async fn delete(&self, id: i64) -> Result<bool, CatalogError> {
        let result = sqlx::query("DELETE FROM reports WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn create(
        &self,
        ticker: &str,
        year: i32,
        period: &str,
        address: &str,
    ) -> Result<CreateOutcome, CatalogError> {
        let created_at = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "INSERT INTO reports (ticker, year, period, address, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(ticker)
        .bind(year)
        .bind(period)
        .bind(address)
        .bind(created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(CreateOutcome::Created(CatalogRecord {
                id: done.last_insert_rowid(),
                ticker: ticker.to_string(),
                year,
                period: period.to_string(),
                address: address.to_string(),
                created_at,
            })),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Ok(CreateOutcome::AlreadyExists)
            }
            Err(sqlx::Error::Database(db)) if db.is_check_violation() => {
                Err(CatalogError::Rejected(db.message().to_string()))
            }
            Err(e) => Err(CatalogError::Database(e)),
        }
    }
}

fn row_to_record(row: &SqliteRow) -> CatalogRecord {
    CatalogRecord {
        id: row.get("id"),
        ticker: row.get("ticker"),
        year: row.get("year"),
        period: row.get("period"),
        address: row.get("address"),
        created_at: row.get("created_at"),
    }
}
