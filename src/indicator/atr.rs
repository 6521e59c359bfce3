use error_stack::Report;

use crate::error::IndicatorError;
use crate::indicator::{Indicator, ensure_len, ensure_period};
use crate::model::Candle;

/// Average True Range as a simple rolling mean of the true range.
pub struct Atr {
    period: usize,
}

impl Atr {
    pub fn new(period: usize) -> Result<Self, Report<IndicatorError>> {
        ensure_period("atr period", period)?;
        Ok(Self { period })
    }
}

/// Greatest of the bar range and the gaps from the previous close.
fn true_ranges(candles: &[Candle]) -> Vec<f64> {
    candles
        .windows(2)
        .map(|w| {
            let (prev, cur) = (&w[0], &w[1]);
            (cur.high - cur.low)
                .max((cur.high - prev.close).abs())
                .max((cur.low - prev.close).abs())
        })
        .collect()
}

impl Indicator for Atr {
    fn name(&self) -> &str {
        "atr"
    }

    fn required_candles(&self) -> usize {
        self.period + 1
    }

    fn calculate(&self, candles: &[Candle]) -> Result<Vec<f64>, Report<IndicatorError>> {
        ensure_len(self.required_candles(), candles.len())?;
        Ok(true_ranges(candles)
            .windows(self.period)
            .map(|w| w.iter().sum::<f64>() / self.period as f64)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::test_support::{candles_from_closes, candles_from_ohlcv};

    #[test]
    fn atr_needs_period_plus_one() {
        let atr = Atr::new(3).unwrap();
        assert!(atr.calculate(&candles_from_closes(&[1.0; 3])).is_err());
        assert_eq!(atr.calculate(&candles_from_closes(&[1.0; 4])).unwrap().len(), 1);
    }

    #[test]
    fn atr_uses_gaps_from_previous_close() {
        // (high, low, close, volume)
        let candles = candles_from_ohlcv(&[
            (10.0, 9.0, 10.0, 1.0),
            (12.0, 11.0, 11.5, 1.0), // gap: 12 - 10 = 2
            (11.0, 8.5, 9.0, 1.0),   // gap: |8.5 - 11.5| = 3
        ]);
        let values = Atr::new(2).unwrap().calculate(&candles).unwrap();
        assert_eq!(values.len(), 1);
        assert!((values[0] - 2.5).abs() < 1e-9);
    }

    #[test]
    fn flat_market_has_zero_atr() {
        let values = Atr::new(5).unwrap().calculate(&candles_from_closes(&[7.0; 10])).unwrap();
        assert!(values.iter().all(|v| v.abs() < 1e-12));
    }
}
