// SQLite history of numeric sample fields, keyed by (source_id, recorded_at).
// Writes arrive in batches from the writer task; reads go straight to the pool.

mod blob;
pub mod retention;
pub mod writer;

use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::instrument;

use crate::models::{HistoryRecord, Sample};

/// SQLite integers are signed; timestamps past `i64::MAX` are stored as `i64::MAX`.
fn to_sql_ts(ts: u64) -> i64 {
    i64::try_from(ts).unwrap_or(i64::MAX)
}

pub struct HistoryStore {
    pool: SqlitePool,
    retention_ms: i64,
    sweep_batch_limit: u32,
}

impl HistoryStore {
    pub async fn connect(
        path: &str,
        max_connections: u32,
        retention: Duration,
    ) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(opts)
            .await?;
        Ok(Self {
            pool,
            retention_ms: retention.as_millis() as i64,
            sweep_batch_limit: 50_000,
        })
    }

    /// Most rows a single sweep deletes.
    pub fn with_sweep_batch_limit(mut self, limit: u32) -> Self {
        self.sweep_batch_limit = limit.max(1);
        self
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS history_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_id TEXT NOT NULL,
                recorded_at INTEGER NOT NULL,
                numeric_fields BLOB NOT NULL,
                UNIQUE (source_id, recorded_at)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_history_recorded_at ON history_records(recorded_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Append the numeric fields of `sample`. Returns false when there is nothing to
    /// record (not Ok, or no numeric fields).
    pub async fn record(&self, sample: &Sample) -> anyhow::Result<bool> {
        let Some(record) = HistoryRecord::from_sample(sample) else {
            return Ok(false);
        };
        self.save_records(std::slice::from_ref(&record)).await?;
        Ok(true)
    }

    /// Insert a batch in one transaction. A record already stored for the same source and
    /// timestamp is kept as is.
    #[instrument(skip(self, records), fields(repo = "history", operation = "save_records", records_count = records.len()))]
    pub async fn save_records(&self, records: &[HistoryRecord]) -> anyhow::Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for r in records {
            let data = blob::encode_fields(&r.numeric_fields)?;
            sqlx::query(
                "INSERT OR IGNORE INTO history_records (source_id, recorded_at, numeric_fields) VALUES ($1, $2, $3)",
            )
            .bind(&r.source_id)
            .bind(to_sql_ts(r.timestamp))
            .bind(&data)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Records for `source_id` with `from_ts <= timestamp <= to_ts`, oldest first.
    #[instrument(skip(self), fields(repo = "history", operation = "query"))]
    pub async fn query(
        &self,
        source_id: &str,
        from_ts: u64,
        to_ts: u64,
    ) -> anyhow::Result<Vec<HistoryRecord>> {
        let rows = sqlx::query(
            "SELECT recorded_at, numeric_fields FROM history_records
             WHERE source_id = $1 AND recorded_at >= $2 AND recorded_at <= $3
             ORDER BY recorded_at ASC",
        )
        .bind(source_id)
        .bind(to_sql_ts(from_ts))
        .bind(to_sql_ts(to_ts))
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let recorded_at: i64 = row.try_get("recorded_at")?;
            let data: Vec<u8> = row.try_get("numeric_fields")?;
            out.push(HistoryRecord {
                source_id: source_id.to_string(),
                timestamp: recorded_at.max(0) as u64,
                numeric_fields: blob::decode_fields(&data)?,
            });
        }
        Ok(out)
    }

    /// Delete records older than the retention window relative to `now_ms`, oldest first,
    /// at most `sweep_batch_limit` rows in one transaction. Returns rows deleted.
    #[instrument(skip(self), fields(repo = "history", operation = "sweep"))]
    pub async fn sweep(&self, now_ms: u64) -> anyhow::Result<u64> {
        let cutoff = to_sql_ts(now_ms).saturating_sub(self.retention_ms);
        let mut tx = self.pool.begin().await?;
        let r = sqlx::query(
            "DELETE FROM history_records WHERE id IN (
                SELECT id FROM history_records WHERE recorded_at < $1
                ORDER BY recorded_at ASC LIMIT $2
            )",
        )
        .bind(cutoff)
        .bind(self.sweep_batch_limit as i64)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(r.rows_affected())
    }

    pub async fn count(&self) -> anyhow::Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM history_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(n.max(0) as u64)
    }

    #[instrument(skip(self), fields(repo = "history", operation = "vacuum"))]
    pub async fn vacuum(&self) -> anyhow::Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    /// Close the pool; later writes fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
