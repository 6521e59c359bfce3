use derive_more::{Display, Error};

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display("failed to read config file")]
    ReadFile,
    #[display("failed to parse config: {reason}")]
    Parse { reason: String },
    #[display("invalid config: {field}")]
    Validation { field: String },
}

#[derive(Debug, Display, Error)]
pub enum ExchangeError {
    #[display("request to {exchange} failed")]
    Request { exchange: String },
    #[display("failed to parse response from {exchange}")]
    ResponseParse { exchange: String },
    #[display("failed to authenticate with {exchange}")]
    Auth { exchange: String },
    #[display("{exchange} rejected the order: {reason}")]
    Rejected { exchange: String, reason: String },
    #[display("order {id} not found on {exchange}")]
    OrderNotFound { exchange: String, id: String },
}

#[derive(Debug, Display, Error)]
pub enum StorageError {
    #[display("database migration failed")]
    Migration,
    #[display("failed to insert data")]
    Insert,
    #[display("failed to delete data")]
    Delete,
    #[display("failed to query data")]
    Query,
}

#[derive(Debug, Display, Error)]
pub enum IndicatorError {
    #[display("insufficient data: need {required}, got {available}")]
    InsufficientData { required: usize, available: usize },
    #[display("invalid parameter: {name}")]
    InvalidParameter { name: String },
}

#[derive(Debug, Display, Error)]
pub enum SeriesError {
    #[display("bar at {got} is not after the last bar at {last}")]
    OutOfOrder { last: String, got: String },
    #[display("bar for {got} pushed into the {expected} series")]
    SymbolMismatch { expected: String, got: String },
}

#[derive(Debug, Display, Error)]
pub enum MarketDataError {
    #[display("stale or missing market data for {instrument}")]
    Stale { instrument: String },
}

/// Violations of the one-position-per-bucket bookkeeping.
///
/// These indicate that the tracked state has diverged from the exchange and
/// must be surfaced, never skipped over.
#[derive(Debug, Display, Error)]
pub enum BucketError {
    #[display("bucket {bucket} is already open for {instrument}")]
    DuplicateBucket { instrument: String, bucket: String },
    #[display("bucket {bucket} is not open for {instrument}")]
    UnknownBucket { instrument: String, bucket: String },
    #[display("the neutral bucket cannot hold a position ({instrument})")]
    NeutralBucket { instrument: String },
    #[display("trading is halted for {instrument}")]
    Halted { instrument: String },
}

#[derive(Debug, Display, Error)]
pub enum NotifierError {
    #[display("failed to deliver message to the {channel} channel")]
    Send { channel: String },
}

/// Failure of one instrument's trading cycle.
#[derive(Debug, Display, Error)]
pub enum TradeError {
    #[display("stale market data for {instrument}, skipping cycle")]
    StaleMarketData { instrument: String },
    #[display("not enough candles for {instrument}, skipping cycle")]
    InsufficientData { instrument: String },
    #[display("indicator evaluation for {instrument} failed")]
    Indicator { instrument: String },
    #[display("position bucket state for {instrument} diverged")]
    BucketInvariant { instrument: String },
    #[display("exchange call for {instrument} failed")]
    Exchange { instrument: String },
    #[display("failed to restore trader state")]
    Restore,
}

impl TradeError {
    /// Whether the instrument must stop trading until an operator reconciles it.
    pub fn halts_instrument(&self) -> bool {
        matches!(self, Self::BucketInvariant { .. })
    }
}

#[derive(Debug, Display, Error)]
pub enum BacktestError {
    #[display("backtest needs at least {required} candles, got {available}")]
    NotEnoughCandles { required: usize, available: usize },
    #[display("indicator evaluation failed during backtest")]
    Indicator,
    #[display("bucket bookkeeping failed during backtest")]
    Bucket,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_bucket_invariant_halts() {
        let instrument = "KRW-BTC".to_string();
        assert!(
            TradeError::BucketInvariant {
                instrument: instrument.clone()
            }
            .halts_instrument()
        );
        assert!(
            !TradeError::StaleMarketData {
                instrument: instrument.clone()
            }
            .halts_instrument()
        );
        assert!(!TradeError::InsufficientData { instrument }.halts_instrument());
    }

    #[test]
    fn bucket_error_messages_name_the_bucket() {
        let err = BucketError::DuplicateBucket {
            instrument: "KRW-ETH".into(),
            bucket: "25".into(),
        };
        assert_eq!(err.to_string(), "bucket 25 is already open for KRW-ETH");
    }
}
