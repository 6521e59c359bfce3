use error_stack::Report;

use crate::error::IndicatorError;
use crate::indicator::{Indicator, ensure_len, ensure_period};
use crate::model::Candle;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StochasticPoint {
    /// `None` when the window's high equals its low.
    pub k: Option<f64>,
    /// `None` while any %K in the smoothing window is undefined.
    pub d: Option<f64>,
}

/// Stochastic oscillator %K over `k_period` bars with a `d_period` mean as %D.
pub struct Stochastic {
    k_period: usize,
    d_period: usize,
}

impl Stochastic {
    pub fn new(k_period: usize, d_period: usize) -> Result<Self, Report<IndicatorError>> {
        ensure_period("stochastic k period", k_period)?;
        ensure_period("stochastic d period", d_period)?;
        Ok(Self { k_period, d_period })
    }

    /// One point per full %K window, aligned to the window's last candle.
    pub fn calculate_full(
        &self,
        candles: &[Candle],
    ) -> Result<Vec<StochasticPoint>, Report<IndicatorError>> {
        ensure_len(self.k_period, candles.len())?;

        let ks: Vec<Option<f64>> = candles
            .windows(self.k_period)
            .map(|w| {
                let high = w.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
                let low = w.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
                let range = high - low;
                if range == 0.0 {
                    None
                } else {
                    Some((w[w.len() - 1].close - low) / range * 100.0)
                }
            })
            .collect();

        Ok(ks
            .iter()
            .enumerate()
            .map(|(i, &k)| {
                let d = if i + 1 < self.d_period {
                    None
                } else {
                    ks[i + 1 - self.d_period..=i]
                        .iter()
                        .copied()
                        .sum::<Option<f64>>()
                        .map(|sum| sum / self.d_period as f64)
                };
                StochasticPoint { k, d }
            })
            .collect())
    }
}

impl Indicator for Stochastic {
    fn name(&self) -> &str {
        "stochastic"
    }

    fn required_candles(&self) -> usize {
        self.k_period
    }

    /// Returns %K values, NaN where undefined.
    fn calculate(&self, candles: &[Candle]) -> Result<Vec<f64>, Report<IndicatorError>> {
        Ok(self
            .calculate_full(candles)?
            .into_iter()
            .map(|p| p.k.unwrap_or(f64::NAN))
            .collect())
    }
}
