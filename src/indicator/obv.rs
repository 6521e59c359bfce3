use error_stack::Report;

use crate::error::IndicatorError;
use crate::indicator::{Indicator, ensure_len};
use crate::model::Candle;

/// On-Balance Volume, starting from 0 at the first candle.
pub struct Obv;

impl Indicator for Obv {
    fn name(&self) -> &str {
        "obv"
    }

    fn required_candles(&self) -> usize {
        1
    }

    fn calculate(&self, candles: &[Candle]) -> Result<Vec<f64>, Report<IndicatorError>> {
        ensure_len(1, candles.len())?;
        let mut obv = 0.0;
        let mut results = Vec::with_capacity(candles.len());
        results.push(obv);
        for w in candles.windows(2) {
            if w[1].close > w[0].close {
                obv += w[1].volume;
            } else if w[1].close < w[0].close {
                obv -= w[1].volume;
            }
            results.push(obv);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::test_support::candles_from_ohlcv;

    #[test]
    fn obv_accumulates_signed_volume() {
        let candles = candles_from_ohlcv(&[
            (10.0, 10.0, 10.0, 5.0),
            (11.0, 11.0, 11.0, 3.0),
            (11.0, 11.0, 11.0, 7.0),
            (9.0, 9.0, 9.0, 2.0),
        ]);
        let values = Obv.calculate(&candles).unwrap();
        assert_eq!(values, vec![0.0, 3.0, 3.0, 1.0]);
    }

    #[test]
    fn obv_empty_input() {
        assert!(Obv.calculate(&[]).is_err());
    }
}
