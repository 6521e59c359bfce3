use chrono::{DateTime, Utc};
use error_stack::{Report, ResultExt, bail};
use serde::Deserialize;

use crate::error::IndicatorError;
use crate::indicator::Indicator;
use crate::indicator::atr::Atr;
use crate::indicator::bollinger::{Band, BollingerBands, Deviation};
use crate::indicator::cci::Cci;
use crate::indicator::ma::Ema;
use crate::indicator::obv::Obv;
use crate::indicator::rsi::Rsi;
use crate::indicator::score::{CompositeScore, ScoreBreakdown};
use crate::indicator::stochastic::Stochastic;
use crate::model::Candle;
use crate::series::PriceSeries;

/// Periods and cut-offs for every indicator in a snapshot.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndicatorSettings {
    pub rsi_period: usize,
    pub bollinger_period: usize,
    pub bollinger_k: f64,
    pub bollinger_deviation: Deviation,
    pub ema_short: usize,
    pub ema_long: usize,
    pub cci_period: usize,
    pub stoch_k_period: usize,
    pub stoch_d_period: usize,
    pub atr_period: usize,
    pub score_window: usize,
    pub score_low_ratio: f64,
    pub score_high_ratio: f64,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            bollinger_period: 20,
            bollinger_k: 2.0,
            bollinger_deviation: Deviation::Sample,
            ema_short: 10,
            ema_long: 20,
            cci_period: 20,
            stoch_k_period: 14,
            stoch_d_period: 3,
            atr_period: 14,
            score_window: 20,
            score_low_ratio: 0.8,
            score_high_ratio: 1.2,
        }
    }
}

/// Indicator values at the latest bar of a series.
///
/// Rolling indicators that do not have enough bars yet are `None`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorSnapshot {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    pub rsi: f64,
    /// RSI as of the previous bar.
    pub rsi_prev: f64,
    pub bands: Option<Band>,
    pub ema_short: Option<f64>,
    pub ema_long: Option<f64>,
    pub cci: Option<f64>,
    pub stoch_k: Option<f64>,
    pub stoch_d: Option<f64>,
    pub obv: Option<f64>,
    pub atr: Option<f64>,
    pub score: Option<ScoreBreakdown>,
}

pub struct IndicatorEngine {
    rsi: Rsi,
    bands: BollingerBands,
    ema_short: Ema,
    ema_long: Ema,
    cci: Cci,
    stochastic: Stochastic,
    atr: Atr,
    score: CompositeScore,
}

impl IndicatorEngine {
    pub fn new(settings: &IndicatorSettings) -> Result<Self, Report<IndicatorError>> {
        if settings.ema_short >= settings.ema_long {
            bail!(IndicatorError::InvalidParameter {
                name: format!(
                    "ema_short ({}) must be < ema_long ({})",
                    settings.ema_short, settings.ema_long
                ),
            });
        }
        Ok(Self {
            rsi: Rsi::new(settings.rsi_period)?,
            bands: BollingerBands::new(
                settings.bollinger_period,
                settings.bollinger_k,
                settings.bollinger_deviation,
            )?,
            ema_short: Ema::new(settings.ema_short)?,
            ema_long: Ema::new(settings.ema_long)?,
            cci: Cci::new(settings.cci_period)?,
            stochastic: Stochastic::new(settings.stoch_k_period, settings.stoch_d_period)?,
            atr: Atr::new(settings.atr_period)?,
            score: CompositeScore::new(
                settings.score_window,
                settings.bollinger_period,
                settings.bollinger_k,
                settings.bollinger_deviation,
                settings.score_low_ratio,
                settings.score_high_ratio,
            )?,
        })
    }

    /// Bars needed for the mandatory fields (current and previous RSI).
    pub fn required_candles(&self) -> usize {
        self.rsi.required_candles() + 1
    }

    pub fn snapshot(&self, series: &PriceSeries) -> Result<IndicatorSnapshot, Report<IndicatorError>> {
        self.evaluate_candles(series.as_slice())
    }

    /// Snapshot at the last of `candles` (oldest first).
    pub fn evaluate_candles(
        &self,
        candles: &[Candle],
    ) -> Result<IndicatorSnapshot, Report<IndicatorError>> {
        if candles.len() < self.required_candles() {
            bail!(IndicatorError::InsufficientData {
                required: self.required_candles(),
                available: candles.len(),
            });
        }

        let rsi = self.rsi.calculate(candles)?;
        let last = &candles[candles.len() - 1];
        let stochastic = if candles.len() >= self.stochastic.required_candles() {
            self.stochastic.calculate_full(candles)?.last().copied()
        } else {
            None
        };
        let bands = if candles.len() >= self.bands.required_candles() {
            self.bands.calculate_bands(candles)?.last().copied()
        } else {
            None
        };
        let score = if candles.len() >= self.score.required_candles() {
            self.score.breakdowns(candles)?.last().copied()
        } else {
            None
        };

        Ok(IndicatorSnapshot {
            timestamp: last.open_time,
            close: last.close,
            rsi: rsi[rsi.len() - 1],
            rsi_prev: rsi[rsi.len() - 2],
            bands,
            ema_short: latest(&self.ema_short, candles)?,
            ema_long: latest(&self.ema_long, candles)?,
            cci: latest(&self.cci, candles)?,
            stoch_k: stochastic.and_then(|p| p.k),
            stoch_d: stochastic.and_then(|p| p.d),
            obv: latest(&Obv, candles)?,
            atr: latest(&self.atr, candles)?,
            score,
        })
    }
}

fn latest(indicator: &dyn Indicator, candles: &[Candle]) -> Result<Option<f64>, Report<IndicatorError>> {
    if candles.len() < indicator.required_candles() {
        return Ok(None);
    }
    let values = indicator
        .calculate(candles)
        .attach_with(|| format!("indicator: {}", indicator.name()))?;
    Ok(values.last().copied())
}
