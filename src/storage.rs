pub mod sqlite;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::StorageError;
use crate::model::TradeRecord;
use crate::position::OpenBucket;
use crate::position::bucket::RsiBucket;

/// A persisted open bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBucket {
    pub instrument: String,
    pub bucket: RsiBucket,
    pub entry: OpenBucket,
}

/// Durable copy of the bucket book and the trade journal.
pub trait Storage: Send + Sync {
    fn save_bucket(
        &self,
        instrument: &str,
        bucket: RsiBucket,
        entry: OpenBucket,
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>>;

    fn delete_bucket(
        &self,
        instrument: &str,
        bucket: RsiBucket,
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>>;

    fn clear_buckets(&self, instrument: &str) -> BoxFuture<'_, Result<(), Report<StorageError>>>;

    fn load_buckets(&self) -> BoxFuture<'_, Result<Vec<StoredBucket>, Report<StorageError>>>;

    fn record_trade(&self, trade: TradeRecord) -> BoxFuture<'_, Result<(), Report<StorageError>>>;

    /// Mark an instrument halted until an operator clears it.
    fn save_halt(
        &self,
        instrument: &str,
        reason: &str,
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>>;

    /// Returns whether the instrument was halted.
    fn clear_halt(&self, instrument: &str) -> BoxFuture<'_, Result<bool, Report<StorageError>>>;

    fn load_halts(&self) -> BoxFuture<'_, Result<Vec<String>, Report<StorageError>>>;

    /// Most recent trades of an instrument, newest first.
    fn recent_trades(
        &self,
        instrument: &str,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<TradeRecord>, Report<StorageError>>>;
}
