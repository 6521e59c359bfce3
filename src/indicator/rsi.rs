use error_stack::Report;

use crate::error::IndicatorError;
use crate::indicator::{Indicator, close_prices, ensure_len, ensure_period};
use crate::model::Candle;

/// RSI (Relative Strength Index) using Wilder's smoothing method.
///
/// The first average is the plain mean of the first `period` gains and
/// losses; later values use `(prev * (period - 1) + x) / period`.
pub struct Rsi {
    period: usize,
}

impl Rsi {
    pub fn new(period: usize) -> Result<Self, Report<IndicatorError>> {
        ensure_period("rsi period", period)?;
        Ok(Self { period })
    }

    pub fn calculate_prices(&self, prices: &[f64]) -> Result<Vec<f64>, Report<IndicatorError>> {
        ensure_len(self.required_candles(), prices.len())?;

        let n = self.period as f64;
        let deltas: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();

        let mut avg_gain = deltas[..self.period].iter().map(|&d| d.max(0.0)).sum::<f64>() / n;
        let mut avg_loss = deltas[..self.period]
            .iter()
            .map(|&d| (-d).max(0.0))
            .sum::<f64>()
            / n;

        let mut results = Vec::with_capacity(deltas.len() - self.period + 1);
        results.push(rsi_value(avg_gain, avg_loss));

        for &delta in &deltas[self.period..] {
            avg_gain = (avg_gain * (n - 1.0) + delta.max(0.0)) / n;
            avg_loss = (avg_loss * (n - 1.0) + (-delta).max(0.0)) / n;
            results.push(rsi_value(avg_gain, avg_loss));
        }

        Ok(results)
    }
}

impl Indicator for Rsi {
    fn name(&self) -> &str {
        "rsi"
    }

    fn required_candles(&self) -> usize {
        self.period + 1
    }

    fn calculate(&self, candles: &[Candle]) -> Result<Vec<f64>, Report<IndicatorError>> {
        self.calculate_prices(&close_prices(candles))
    }
}

// No losses (including a completely flat window) reads as fully overbought.
fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::test_support::candles_from_closes;

    #[test]
    fn rsi_insufficient_data() {
        let rsi = Rsi::new(14).unwrap();
        let candles = candles_from_closes(&[1.0; 14]);
        assert!(rsi.calculate(&candles).is_err());
    }

    #[test]
    fn rsi_period_zero_invalid() {
        assert!(Rsi::new(0).is_err());
    }

    #[test]
    fn rising_series_is_100() {
        let rsi = Rsi::new(14).unwrap();
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let values = rsi.calculate(&candles_from_closes(&closes)).unwrap();
        assert!(values.iter().all(|&v| v == 100.0));
    }

    #[test]
    fn falling_series_is_0() {
        let rsi = Rsi::new(14).unwrap();
        let closes: Vec<f64> = (0..40).map(|i| 200.0 - i as f64).collect();
        let values = rsi.calculate(&candles_from_closes(&closes)).unwrap();
        assert!(values.iter().all(|&v| v.abs() < 1e-9));
    }

    #[test]
    fn flat_series_resolves_to_100() {
        let rsi = Rsi::new(3).unwrap();
        let values = rsi.calculate(&candles_from_closes(&[5.0; 6])).unwrap();
        assert!(values.iter().all(|&v| v == 100.0));
    }

    #[test]
    fn values_stay_in_range() {
        let rsi = Rsi::new(14).unwrap();
        let closes: Vec<f64> = (0..120)
            .map(|i| 100.0 + (i as f64 * 0.7).sin() * 10.0 + (i % 7) as f64)
            .collect();
        for v in rsi.calculate(&candles_from_closes(&closes)).unwrap() {
            assert!((0.0..=100.0).contains(&v), "rsi out of range: {v}");
        }
    }

    #[test]
    fn wilder_smoothing_known_value() {
        // deltas: +1, -1, +1 seed -> gain 2/3, loss 1/3; then -2:
        // gain = (2/3 * 2 + 0) / 3 = 4/9, loss = (1/3 * 2 + 2) / 3 = 8/9
        let rsi = Rsi::new(3).unwrap();
        let values = rsi
            .calculate(&candles_from_closes(&[10.0, 11.0, 10.0, 11.0, 9.0]))
            .unwrap();
        assert_eq!(values.len(), 2);
        assert!((values[0] - (100.0 - 100.0 / 3.0)).abs() < 1e-9);
        assert!((values[1] - (100.0 - 100.0 / 1.5)).abs() < 1e-9);
    }

    #[test]
    fn flat_then_drop_is_oversold() {
        let rsi = Rsi::new(14).unwrap();
        let mut closes = vec![100.0; 14];
        closes.extend([90.0; 5]);
        let values = rsi.calculate(&candles_from_closes(&closes)).unwrap();
        let last = *values.last().unwrap();
        assert!((0.0..50.0).contains(&last));
    }

    #[test]
    fn output_length() {
        let rsi = Rsi::new(14).unwrap();
        let values = rsi.calculate(&candles_from_closes(&[100.0_f64; 20])).unwrap();
        assert_eq!(values.len(), 20 - 14);
    }
}
