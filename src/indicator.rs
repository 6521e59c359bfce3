pub mod atr;
pub mod bollinger;
pub mod cci;
pub mod engine;
pub mod ma;
pub mod obv;
pub mod rsi;
pub mod score;
pub mod stochastic;

use error_stack::{Report, bail};

use crate::error::IndicatorError;
use crate::model::Candle;

/// A technical analysis indicator that operates on a slice of candles.
///
/// Candles must be in ascending chronological order (oldest first).
pub trait Indicator: Send {
    /// Unique name of this indicator (e.g., "rsi", "sma").
    fn name(&self) -> &str;

    /// Minimum number of candles required to produce at least one output value.
    fn required_candles(&self) -> usize;

    /// Calculate indicator values from candles.
    ///
    /// Returns one value per output point. The number of values may be less
    /// than the number of input candles depending on the indicator's lookback.
    fn calculate(&self, candles: &[Candle]) -> Result<Vec<f64>, Report<IndicatorError>>;
}

/// Extract close prices from a slice of candles.
pub fn close_prices(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

/// Extract volumes from a slice of candles.
pub fn volumes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.volume).collect()
}

pub(crate) fn ensure_len(
    required: usize,
    available: usize,
) -> Result<(), Report<IndicatorError>> {
    if available < required {
        bail!(IndicatorError::InsufficientData {
            required,
            available,
        });
    }
    Ok(())
}

pub(crate) fn ensure_period(name: &str, period: usize) -> Result<(), Report<IndicatorError>> {
    if period == 0 {
        bail!(IndicatorError::InvalidParameter {
            name: format!("{name} must be > 0"),
        });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{TimeZone, Utc};

    use crate::model::{Candle, TimeFrame};

    /// Flat bars (open = high = low = close) one minute apart.
    pub fn candles_from_closes(closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| bar(i, c, c, c, 1.0))
            .collect()
    }

    pub fn candles_from_ohlcv(rows: &[(f64, f64, f64, f64)]) -> Vec<Candle> {
        rows.iter()
            .enumerate()
            .map(|(i, &(high, low, close, volume))| bar(i, high, low, close, volume))
            .collect()
    }

    fn bar(i: usize, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Candle {
            symbol: "TEST".into(),
            timeframe: TimeFrame::Min1,
            open_time: start + chrono::Duration::minutes(i as i64),
            open: close,
            high,
            low,
            close,
            volume,
        }
    }
}
