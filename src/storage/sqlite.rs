use chrono::{DateTime, Utc};
use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode},
};
use std::path::Path;
use std::str::FromStr;

use crate::error::StorageError;
use crate::model::{Side, TradeRecord};
use crate::position::OpenBucket;
use crate::position::bucket::RsiBucket;
use crate::storage::{Storage, StoredBucket};

type BucketRow = (String, i64, f64, f64, f64, String);

type TradeRow = (
    String,
    String,
    f64,
    f64,
    Option<f64>,
    Option<i64>,
    String,
    String,
    String,
);

pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path` and run migrations.
    pub async fn open(path: &Path) -> Result<Self, Report<StorageError>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .change_context(StorageError::Migration)
                .attach_with(|| format!("cannot create data directory: {}", parent.display()))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .change_context(StorageError::Migration)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(opts)
            .await
            .change_context(StorageError::Migration)
            .attach_with(|| format!("database path: {}", path.display()))?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self, Report<StorageError>> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .change_context(StorageError::Migration)?;
        Ok(Self { pool })
    }
}

impl Storage for SqliteStorage {
    fn save_bucket(
        &self,
        instrument: &str,
        bucket: RsiBucket,
        entry: OpenBucket,
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        let instrument = instrument.to_string();
        Box::pin(async move {
            let level = bucket_level(bucket)?;
            sqlx::query(
                "INSERT OR REPLACE INTO open_buckets \
                 (instrument, bucket, quantity, entry_price, rsi, opened_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&instrument)
            .bind(level)
            .bind(entry.quantity)
            .bind(entry.entry_price)
            .bind(entry.rsi)
            .bind(entry.opened_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .change_context(StorageError::Insert)
            .attach_with(|| format!("bucket {bucket} of {instrument}"))?;
            Ok(())
        })
    }

    fn delete_bucket(
        &self,
        instrument: &str,
        bucket: RsiBucket,
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        let instrument = instrument.to_string();
        Box::pin(async move {
            let level = bucket_level(bucket)?;
            sqlx::query("DELETE FROM open_buckets WHERE instrument = ? AND bucket = ?")
                .bind(&instrument)
                .bind(level)
                .execute(&self.pool)
                .await
                .change_context(StorageError::Delete)?;
            Ok(())
        })
    }

    fn clear_buckets(&self, instrument: &str) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        let instrument = instrument.to_string();
        Box::pin(async move {
            sqlx::query("DELETE FROM open_buckets WHERE instrument = ?")
                .bind(&instrument)
                .execute(&self.pool)
                .await
                .change_context(StorageError::Delete)?;
            Ok(())
        })
    }

    fn load_buckets(&self) -> BoxFuture<'_, Result<Vec<StoredBucket>, Report<StorageError>>> {
        Box::pin(async move {
            let rows: Vec<BucketRow> = sqlx::query_as(
                "SELECT instrument, bucket, quantity, entry_price, rsi, opened_at \
                 FROM open_buckets \
                 ORDER BY instrument, bucket",
            )
            .fetch_all(&self.pool)
            .await
            .change_context(StorageError::Query)?;

            rows.into_iter().map(map_bucket_row).collect()
        })
    }

    fn save_halt(
        &self,
        instrument: &str,
        reason: &str,
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        let instrument = instrument.to_string();
        let reason = reason.to_string();
        Box::pin(async move {
            sqlx::query(
                "INSERT OR REPLACE INTO halted_instruments (instrument, reason, halted_at) \
                 VALUES (?, ?, ?)",
            )
            .bind(&instrument)
            .bind(&reason)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .change_context(StorageError::Insert)
            .attach_with(|| format!("halt of {instrument}"))?;
            Ok(())
        })
    }

    fn clear_halt(&self, instrument: &str) -> BoxFuture<'_, Result<bool, Report<StorageError>>> {
        let instrument = instrument.to_string();
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM halted_instruments WHERE instrument = ?")
                .bind(&instrument)
                .execute(&self.pool)
                .await
                .change_context(StorageError::Delete)?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn load_halts(&self) -> BoxFuture<'_, Result<Vec<String>, Report<StorageError>>> {
        Box::pin(async move {
            let rows: Vec<(String,)> =
                sqlx::query_as("SELECT instrument FROM halted_instruments ORDER BY instrument")
                    .fetch_all(&self.pool)
                    .await
                    .change_context(StorageError::Query)?;
            Ok(rows.into_iter().map(|(instrument,)| instrument).collect())
        })
    }

    fn record_trade(&self, trade: TradeRecord) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO trades \
                 (instrument, side, price, quantity, rsi, bucket, reason, order_id, executed_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&trade.instrument)
            .bind(trade.side.as_str())
            .bind(trade.price)
            .bind(trade.quantity)
            .bind(trade.rsi)
            .bind(trade.bucket.map(i64::from))
            .bind(&trade.reason)
            .bind(&trade.order_id)
            .bind(trade.executed_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .change_context(StorageError::Insert)?;
            Ok(())
        })
    }

    fn recent_trades(
        &self,
        instrument: &str,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<TradeRecord>, Report<StorageError>>> {
        let instrument = instrument.to_string();
        Box::pin(async move {
            let rows: Vec<TradeRow> = sqlx::query_as(
                "SELECT instrument, side, price, quantity, rsi, bucket, reason, order_id, executed_at \
                 FROM trades \
                 WHERE instrument = ? \
                 ORDER BY executed_at DESC, id DESC \
                 LIMIT ?",
            )
            .bind(&instrument)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .change_context(StorageError::Query)?;

            rows.into_iter().map(map_trade_row).collect()
        })
    }
}

fn bucket_level(bucket: RsiBucket) -> Result<i64, Report<StorageError>> {
    bucket.level().map(i64::from).ok_or_else(|| {
        Report::new(StorageError::Insert).attach("the neutral bucket is never persisted")
    })
}

fn map_bucket_row(row: BucketRow) -> Result<StoredBucket, Report<StorageError>> {
    let (instrument, level, quantity, entry_price, rsi, opened_at) = row;
    let bucket = u8::try_from(level)
        .ok()
        .and_then(RsiBucket::from_level)
        .ok_or_else(|| {
            Report::new(StorageError::Query).attach(format!("unknown bucket level {level}"))
        })?;
    Ok(StoredBucket {
        instrument,
        bucket,
        entry: OpenBucket {
            quantity,
            entry_price,
            rsi,
            opened_at: parse_time_utc(&opened_at)?,
        },
    })
}

fn map_trade_row(row: TradeRow) -> Result<TradeRecord, Report<StorageError>> {
    let (instrument, side, price, quantity, rsi, bucket, reason, order_id, executed_at) = row;
    let side = match side.as_str() {
        "buy" => Side::Buy,
        "sell" => Side::Sell,
        other => {
            return Err(Report::new(StorageError::Query).attach(format!("unknown side {other:?}")));
        }
    };
    Ok(TradeRecord {
        instrument,
        side,
        price,
        quantity,
        rsi,
        bucket: bucket.and_then(|b| u8::try_from(b).ok()),
        reason,
        order_id,
        executed_at: parse_time_utc(&executed_at)?,
    })
}

fn parse_time_utc(value: &str) -> Result<DateTime<Utc>, Report<StorageError>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .change_context(StorageError::Query)
        .attach_with(|| format!("timestamp: {value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn in_memory_storage() -> SqliteStorage {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .create_if_missing(true);
        // one connection: every in-memory connection is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .unwrap();
        SqliteStorage::migrate(pool).await.unwrap()
    }

    fn entry(quantity: f64) -> OpenBucket {
        OpenBucket {
            quantity,
            entry_price: 50_000_000.0,
            rsi: 19.5,
            opened_at: DateTime::parse_from_rfc3339("2024-03-01T09:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        }
    }

    fn trade(instrument: &str, side: Side, minute: u32) -> TradeRecord {
        TradeRecord {
            instrument: instrument.into(),
            side,
            price: 100.0,
            quantity: 1.5,
            rsi: Some(30.0),
            bucket: Some(30),
            reason: "rsi".into(),
            order_id: format!("order-{minute}"),
            executed_at: DateTime::parse_from_rfc3339(&format!("2024-03-01T09:{minute:02}:00Z"))
                .unwrap()
                .with_timezone(&Utc),
        }
    }

    #[tokio::test]
    async fn save_and_load_buckets() {
        let storage = in_memory_storage().await;
        storage.save_bucket("KRW-BTC", RsiBucket::B20, entry(0.01)).await.unwrap();
        storage.save_bucket("KRW-BTC", RsiBucket::B30, entry(0.02)).await.unwrap();
        storage.save_bucket("KRW-ETH", RsiBucket::B25, entry(0.5)).await.unwrap();

        let loaded = storage.load_buckets().await.unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].instrument, "KRW-BTC");
        assert_eq!(loaded[0].bucket, RsiBucket::B20);
        assert_eq!(loaded[0].entry, entry(0.01));
    }

    #[tokio::test]
    async fn delete_and_clear_buckets() {
        let storage = in_memory_storage().await;
        storage.save_bucket("KRW-BTC", RsiBucket::B20, entry(0.01)).await.unwrap();
        storage.save_bucket("KRW-BTC", RsiBucket::B35, entry(0.02)).await.unwrap();
        storage.save_bucket("KRW-ETH", RsiBucket::B25, entry(0.5)).await.unwrap();

        storage.delete_bucket("KRW-BTC", RsiBucket::B20).await.unwrap();
        assert_eq!(storage.load_buckets().await.unwrap().len(), 2);

        storage.clear_buckets("KRW-BTC").await.unwrap();
        let loaded = storage.load_buckets().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].instrument, "KRW-ETH");
    }

    #[tokio::test]
    async fn neutral_bucket_not_persisted() {
        let storage = in_memory_storage().await;
        assert!(
            storage
                .save_bucket("KRW-BTC", RsiBucket::Neutral, entry(1.0))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn trade_journal_newest_first() {
        let storage = in_memory_storage().await;
        storage.record_trade(trade("KRW-BTC", Side::Buy, 1)).await.unwrap();
        storage.record_trade(trade("KRW-BTC", Side::Sell, 5)).await.unwrap();
        storage.record_trade(trade("KRW-ETH", Side::Buy, 3)).await.unwrap();

        let trades = storage.recent_trades("KRW-BTC", 10).await.unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].side, Side::Sell);
        assert_eq!(trades[0].order_id, "order-5");
        assert_eq!(trades[1].bucket, Some(30));

        assert_eq!(storage.recent_trades("KRW-BTC", 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn halts_persist_until_cleared() {
        let storage = in_memory_storage().await;
        storage.save_halt("KRW-BTC", "sell filled nothing").await.unwrap();
        storage.save_halt("KRW-BTC", "again").await.unwrap();
        storage.save_halt("KRW-ETH", "duplicate bucket").await.unwrap();
        assert_eq!(storage.load_halts().await.unwrap(), vec!["KRW-BTC", "KRW-ETH"]);

        assert!(storage.clear_halt("KRW-BTC").await.unwrap());
        assert!(!storage.clear_halt("KRW-BTC").await.unwrap());
        assert_eq!(storage.load_halts().await.unwrap(), vec!["KRW-ETH"]);
    }

    #[tokio::test]
    async fn trade_without_rsi_or_bucket() {
        let storage = in_memory_storage().await;
        let mut record = trade("KRW-BTC", Side::Sell, 7);
        record.rsi = None;
        record.bucket = None;
        storage.record_trade(record).await.unwrap();
        let trades = storage.recent_trades("KRW-BTC", 10).await.unwrap();
        assert_eq!(trades[0].rsi, None);
        assert_eq!(trades[0].bucket, None);
    }
}
