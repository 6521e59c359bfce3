use error_stack::Report;

use crate::error::IndicatorError;
use crate::indicator::{Indicator, close_prices, ensure_len, ensure_period};
use crate::model::Candle;

/// Simple Moving Average.
pub struct Sma {
    period: usize,
}

impl Sma {
    pub fn new(period: usize) -> Result<Self, Report<IndicatorError>> {
        ensure_period("sma period", period)?;
        Ok(Self { period })
    }

    pub fn calculate_prices(&self, prices: &[f64]) -> Result<Vec<f64>, Report<IndicatorError>> {
        ensure_len(self.period, prices.len())?;
        Ok(prices
            .windows(self.period)
            .map(|w| w.iter().sum::<f64>() / self.period as f64)
            .collect())
    }
}

impl Indicator for Sma {
    fn name(&self) -> &str {
        "sma"
    }

    fn required_candles(&self) -> usize {
        self.period
    }

    fn calculate(&self, candles: &[Candle]) -> Result<Vec<f64>, Report<IndicatorError>> {
        self.calculate_prices(&close_prices(candles))
    }
}

/// Exponential Moving Average with `alpha = 2 / (span + 1)`.
///
/// Seeded from the first price without bias adjustment, so it yields one
/// value per input from the first bar on.
pub struct Ema {
    span: usize,
}

impl Ema {
    pub fn new(span: usize) -> Result<Self, Report<IndicatorError>> {
        ensure_period("ema span", span)?;
        Ok(Self { span })
    }

    pub fn calculate_prices(&self, prices: &[f64]) -> Result<Vec<f64>, Report<IndicatorError>> {
        ensure_len(1, prices.len())?;

        let k = 2.0 / (self.span as f64 + 1.0);
        let mut ema = prices[0];
        let mut results = Vec::with_capacity(prices.len());
        results.push(ema);

        for &price in &prices[1..] {
            ema = price * k + ema * (1.0 - k);
            results.push(ema);
        }

        Ok(results)
    }
}

impl Indicator for Ema {
    fn name(&self) -> &str {
        "ema"
    }

    fn required_candles(&self) -> usize {
        1
    }

    fn calculate(&self, candles: &[Candle]) -> Result<Vec<f64>, Report<IndicatorError>> {
        self.calculate_prices(&close_prices(candles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::test_support::candles_from_closes;

    #[test]
    fn sma_period_zero_invalid() {
        assert!(Sma::new(0).is_err());
    }

    #[test]
    fn sma_insufficient_data() {
        let sma = Sma::new(5).unwrap();
        assert!(sma.calculate(&candles_from_closes(&[1.0; 4])).is_err());
    }

    #[test]
    fn sma_known_value() {
        let sma = Sma::new(3).unwrap();
        let values = sma.calculate(&candles_from_closes(&[1.0, 2.0, 3.0, 4.0])).unwrap();
        assert_eq!(values.len(), 2);
        assert!((values[0] - 2.0).abs() < 1e-9);
        assert!((values[1] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn ema_span_zero_invalid() {
        assert!(Ema::new(0).is_err());
    }

    #[test]
    fn ema_empty_input() {
        let ema = Ema::new(3).unwrap();
        assert!(ema.calculate(&[]).is_err());
    }

    #[test]
    fn ema_seeded_from_first_value() {
        // span 3 -> alpha 0.5
        let ema = Ema::new(3).unwrap();
        let values = ema.calculate(&candles_from_closes(&[2.0, 4.0, 8.0])).unwrap();
        assert_eq!(values.len(), 3);
        assert!((values[0] - 2.0).abs() < 1e-9);
        assert!((values[1] - 3.0).abs() < 1e-9);
        assert!((values[2] - 5.5).abs() < 1e-9);
    }

    #[test]
    fn ema_flat_prices() {
        let ema = Ema::new(10).unwrap();
        for v in ema.calculate(&candles_from_closes(&[10.0; 6])).unwrap() {
            assert!((v - 10.0).abs() < 1e-9);
        }
    }
}
