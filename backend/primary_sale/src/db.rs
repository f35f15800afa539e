//! Database layer: migrations, tracked purchases and stored sale snapshots.

use serde::Serialize;
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};
use tracing::info;

use crate::errors::Result;
use crate::persist::SaleSnapshot;
use crate::types::{Address, TxHash};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    // Every connection to an in-memory database gets its own database.
    let max_connections = if url.contains(":memory:") { 1 } else { 5 };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(&url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

// ─────────────────────────────────────────────────────────
// Purchases
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseStatus {
    Submitted,
    Confirmed,
    Reverted,
}

impl PurchaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Confirmed => "confirmed",
            Self::Reverted => "reverted",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PurchaseRecord {
    pub id: i64,
    pub project_id: String,
    pub tx_hash: String,
    pub purchase_to: String,
    pub status: String,
    pub block_number: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

/// Record a submitted purchase. Re-recording the same transaction is a
/// no-op; returns whether a row was inserted.
pub async fn insert_purchase(
    pool: &SqlitePool,
    project_id: &str,
    tx_hash: &TxHash,
    purchase_to: &Address,
) -> Result<bool> {
    let rows_affected = sqlx::query(
        r#"
        INSERT OR IGNORE INTO purchases (project_id, tx_hash, purchase_to, status)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(project_id)
    .bind(tx_hash.to_string())
    .bind(purchase_to.to_string())
    .bind(PurchaseStatus::Submitted.as_str())
    .execute(pool)
    .await?
    .rows_affected();
    Ok(rows_affected > 0)
}

pub async fn mark_purchase_mined(
    pool: &SqlitePool,
    tx_hash: &TxHash,
    status: PurchaseStatus,
    block_number: u64,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE purchases
        SET    status = ?1, block_number = ?2, updated_at = datetime('now')
        WHERE  tx_hash = ?3
        "#,
    )
    .bind(status.as_str())
    .bind(block_number as i64)
    .bind(tx_hash.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// All purchases, newest first, optionally for one project.
pub async fn get_purchases(
    pool: &SqlitePool,
    project_id: Option<&str>,
) -> Result<Vec<PurchaseRecord>> {
    let rows = sqlx::query_as::<_, PurchaseRecord>(
        r#"
        SELECT id, project_id, tx_hash, purchase_to, status, block_number,
               created_at, updated_at
        FROM   purchases
        WHERE  ?1 IS NULL OR project_id = ?1
        ORDER  BY id DESC
        "#,
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Hashes of purchases still waiting for a receipt, oldest first.
pub async fn pending_purchases(pool: &SqlitePool) -> Result<Vec<TxHash>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT tx_hash FROM purchases WHERE status = ?1 ORDER BY id ASC")
            .bind(PurchaseStatus::Submitted.as_str())
            .fetch_all(pool)
            .await?;
    rows.into_iter().map(|(hash,)| hash.parse()).collect()
}

// ─────────────────────────────────────────────────────────
// Sale snapshots
// ─────────────────────────────────────────────────────────

pub async fn save_snapshot(pool: &SqlitePool, project_id: &str, snapshot: &SaleSnapshot) -> Result<()> {
    let serialized = crate::persist::dehydrate(snapshot)?;
    sqlx::query(
        r#"
        INSERT INTO sale_snapshots (project_id, snapshot, updated_at)
        VALUES (?1, ?2, datetime('now'))
        ON CONFLICT(project_id) DO UPDATE
        SET snapshot = excluded.snapshot, updated_at = excluded.updated_at
        "#,
    )
    .bind(project_id)
    .bind(serialized)
    .execute(pool)
    .await?;
    Ok(())
}

/// The stored serialized snapshot, for [`crate::persist::hydrate`].
pub async fn load_snapshot(pool: &SqlitePool, project_id: &str) -> Result<Option<String>> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT snapshot FROM sale_snapshots WHERE project_id = ?1")
            .bind(project_id)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|(snapshot,)| snapshot))
}
