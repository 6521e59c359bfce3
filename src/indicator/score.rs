use error_stack::{Report, bail};

use crate::error::IndicatorError;
use crate::indicator::bollinger::{BollingerBands, Deviation};
use crate::indicator::obv::Obv;
use crate::indicator::ma::Sma;
use crate::indicator::{Indicator, ensure_len, ensure_period, volumes};
use crate::model::Candle;

/// Points awarded by each component of the auxiliary score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreBreakdown {
    pub volume: u8,
    pub obv: u8,
    pub band_width: u8,
}

impl ScoreBreakdown {
    pub fn total(&self) -> u8 {
        self.volume + self.obv + self.band_width
    }
}

/// Auxiliary 0..=6 score: volume against its rolling average, OBV direction
/// and Bollinger band width against its own rolling average.
pub struct CompositeScore {
    window: usize,
    bollinger_period: usize,
    low_ratio: f64,
    high_ratio: f64,
    volume_ma: Sma,
    bands: BollingerBands,
}

impl CompositeScore {
    pub fn new(
        window: usize,
        bollinger_period: usize,
        bollinger_k: f64,
        deviation: Deviation,
        low_ratio: f64,
        high_ratio: f64,
    ) -> Result<Self, Report<IndicatorError>> {
        ensure_period("score window", window)?;
        if low_ratio.is_nan() || high_ratio.is_nan() || low_ratio <= 0.0 || low_ratio > high_ratio {
            bail!(IndicatorError::InvalidParameter {
                name: format!("score ratios must satisfy 0 < low <= high (got {low_ratio}, {high_ratio})"),
            });
        }
        Ok(Self {
            window,
            bollinger_period,
            low_ratio,
            high_ratio,
            volume_ma: Sma::new(window)?,
            bands: BollingerBands::new(bollinger_period, bollinger_k, deviation)?,
        })
    }

    fn ratio_points(&self, current: f64, average: f64) -> u8 {
        if average == 0.0 {
            return if current == 0.0 { 1 } else { 2 };
        }
        let ratio = current / average;
        if ratio < self.low_ratio {
            0
        } else if ratio > self.high_ratio {
            2
        } else {
            1
        }
    }

    /// One breakdown per candle from `required_candles() - 1` on.
    pub fn breakdowns(
        &self,
        candles: &[Candle],
    ) -> Result<Vec<ScoreBreakdown>, Report<IndicatorError>> {
        let required = self.required_candles();
        ensure_len(required, candles.len())?;

        let volume_ma = self.volume_ma.calculate_prices(&volumes(candles))?;
        let obv = Obv.calculate(candles)?;
        let widths: Vec<f64> = self
            .bands
            .calculate_bands(candles)?
            .iter()
            .map(|b| b.width())
            .collect();
        let width_ma: Vec<f64> = widths
            .windows(self.window)
            .map(|w| w.iter().sum::<f64>() / self.window as f64)
            .collect();

        Ok((required - 1..candles.len())
            .map(|t| {
                let width_idx = t + 1 - self.bollinger_period;
                let obv_change = obv[t] - obv[t - 1];
                ScoreBreakdown {
                    volume: self
                        .ratio_points(candles[t].volume, volume_ma[t + 1 - self.window]),
                    obv: if obv_change > 0.0 {
                        2
                    } else if obv_change == 0.0 {
                        1
                    } else {
                        0
                    },
                    band_width: self
                        .ratio_points(widths[width_idx], width_ma[width_idx + 1 - self.window]),
                }
            })
            .collect())
    }
}

impl Indicator for CompositeScore {
    fn name(&self) -> &str {
        "score"
    }

    fn required_candles(&self) -> usize {
        (self.bollinger_period + self.window - 1).max(2)
    }

    fn calculate(&self, candles: &[Candle]) -> Result<Vec<f64>, Report<IndicatorError>> {
        Ok(self
            .breakdowns(candles)?
            .iter()
            .map(|b| f64::from(b.total()))
            .collect())
    }
}
