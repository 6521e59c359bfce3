use error_stack::Report;

use crate::error::IndicatorError;
use crate::indicator::{Indicator, ensure_len, ensure_period};
use crate::model::Candle;

const LAMBERT_CONSTANT: f64 = 0.015;

/// Commodity Channel Index over the typical price `(high + low + close) / 3`.
pub struct Cci {
    period: usize,
}

impl Cci {
    pub fn new(period: usize) -> Result<Self, Report<IndicatorError>> {
        ensure_period("cci period", period)?;
        Ok(Self { period })
    }
}

impl Indicator for Cci {
    fn name(&self) -> &str {
        "cci"
    }

    fn required_candles(&self) -> usize {
        self.period
    }

    /// A window with zero mean deviation yields 0.
    fn calculate(&self, candles: &[Candle]) -> Result<Vec<f64>, Report<IndicatorError>> {
        ensure_len(self.period, candles.len())?;
        let typical: Vec<f64> = candles
            .iter()
            .map(|c| (c.high + c.low + c.close) / 3.0)
            .collect();

        let n = self.period as f64;
        Ok(typical
            .windows(self.period)
            .map(|w| {
                let mean = w.iter().sum::<f64>() / n;
                let mad = w.iter().map(|&tp| (tp - mean).abs()).sum::<f64>() / n;
                let current = w[w.len() - 1];
                if mad == 0.0 {
                    0.0
                } else {
                    (current - mean) / (LAMBERT_CONSTANT * mad)
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::test_support::candles_from_closes;

    #[test]
    fn flat_window_is_zero() {
        let values = Cci::new(5).unwrap().calculate(&candles_from_closes(&[3.0; 8])).unwrap();
        assert_eq!(values.len(), 4);
        assert!(values.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn cci_known_value() {
        // tp = close; window [1, 2, 3]: mean 2, mad 2/3 -> (3 - 2) / (0.015 * 2/3) = 100
        let values = Cci::new(3).unwrap().calculate(&candles_from_closes(&[1.0, 2.0, 3.0])).unwrap();
        assert!((values[0] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn cci_insufficient_data() {
        assert!(Cci::new(20).unwrap().calculate(&candles_from_closes(&[1.0; 19])).is_err());
    }
}
