use error_stack::{Report, bail};
use serde::Deserialize;

use crate::error::IndicatorError;
use crate::indicator::ma::Sma;
use crate::indicator::{Indicator, close_prices, ensure_len, ensure_period};
use crate::model::Candle;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl Band {
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// Divisor used for the rolling standard deviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Deviation {
    /// `n - 1`, the usual rolling-window estimate.
    #[default]
    Sample,
    Population,
}

pub struct BollingerBands {
    period: usize,
    std_dev_multiplier: f64,
    deviation: Deviation,
}

impl BollingerBands {
    pub fn new(
        period: usize,
        std_dev_multiplier: f64,
        deviation: Deviation,
    ) -> Result<Self, Report<IndicatorError>> {
        ensure_period("bollinger period", period)?;
        if deviation == Deviation::Sample && period < 2 {
            bail!(IndicatorError::InvalidParameter {
                name: "bollinger period must be >= 2 for sample deviation".into(),
            });
        }
        if std_dev_multiplier.is_nan() || std_dev_multiplier <= 0.0 {
            bail!(IndicatorError::InvalidParameter {
                name: "std_dev_multiplier must be > 0".into(),
            });
        }
        Ok(Self {
            period,
            std_dev_multiplier,
            deviation,
        })
    }

    /// One band per full window, aligned to the window's last candle.
    pub fn calculate_bands(&self, candles: &[Candle]) -> Result<Vec<Band>, Report<IndicatorError>> {
        let prices = close_prices(candles);
        ensure_len(self.period, prices.len())?;

        let sma = Sma::new(self.period)?.calculate_prices(&prices)?;
        let divisor = match self.deviation {
            Deviation::Sample => (self.period - 1) as f64,
            Deviation::Population => self.period as f64,
        };

        let bands = prices
            .windows(self.period)
            .zip(sma.iter())
            .map(|(window, &middle)| {
                let variance =
                    window.iter().map(|&p| (p - middle).powi(2)).sum::<f64>() / divisor;
                let std_dev = variance.sqrt();
                Band {
                    upper: middle + self.std_dev_multiplier * std_dev,
                    middle,
                    lower: middle - self.std_dev_multiplier * std_dev,
                }
            })
            .collect();

        Ok(bands)
    }
}

impl Indicator for BollingerBands {
    fn name(&self) -> &str {
        "bollinger"
    }

    fn required_candles(&self) -> usize {
        self.period
    }

    /// Returns middle band (SMA) values only.
    fn calculate(&self, candles: &[Candle]) -> Result<Vec<f64>, Report<IndicatorError>> {
        Ok(self
            .calculate_bands(candles)?
            .into_iter()
            .map(|b| b.middle)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::test_support::candles_from_closes;

    #[test]
    fn bollinger_period_zero_invalid() {
        assert!(BollingerBands::new(0, 2.0, Deviation::Population).is_err());
        assert!(BollingerBands::new(1, 2.0, Deviation::Sample).is_err());
    }

    #[test]
    fn bollinger_negative_multiplier_invalid() {
        assert!(BollingerBands::new(20, -1.0, Deviation::Sample).is_err());
        assert!(BollingerBands::new(20, f64::NAN, Deviation::Sample).is_err());
    }

    #[test]
    fn bollinger_insufficient_data() {
        let bb = BollingerBands::new(5, 2.0, Deviation::Sample).unwrap();
        assert!(bb.calculate(&candles_from_closes(&[1.0; 4])).is_err());
    }

    #[test]
    fn bollinger_flat_prices_zero_width() {
        let bb = BollingerBands::new(3, 2.0, Deviation::Sample).unwrap();
        let bands = bb.calculate_bands(&candles_from_closes(&[10.0_f64; 5])).unwrap();
        for band in &bands {
            assert!((band.upper - 10.0).abs() < 1e-9);
            assert!((band.lower - 10.0).abs() < 1e-9);
            assert!(band.width().abs() < 1e-9);
        }
    }

    #[test]
    fn bands_are_ordered() {
        let bb = BollingerBands::new(20, 2.0, Deviation::Sample).unwrap();
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + (i as f64 * 0.3).cos() * 7.0).collect();
        for band in bb.calculate_bands(&candles_from_closes(&closes)).unwrap() {
            assert!(band.upper >= band.middle && band.middle >= band.lower);
            assert!((band.upper - band.middle - (band.middle - band.lower)).abs() < 1e-9);
        }
    }

    #[test]
    fn sample_and_population_deviation() {
        // window [1, 2, 3]: mean 2, squared deviations sum to 2
        let candles = candles_from_closes(&[1.0, 2.0, 3.0]);
        let sample = BollingerBands::new(3, 1.0, Deviation::Sample)
            .unwrap()
            .calculate_bands(&candles)
            .unwrap();
        let population = BollingerBands::new(3, 1.0, Deviation::Population)
            .unwrap()
            .calculate_bands(&candles)
            .unwrap();
        assert!((sample[0].upper - 3.0).abs() < 1e-9);
        assert!((population[0].upper - (2.0 + (2.0_f64 / 3.0).sqrt())).abs() < 1e-9);
    }
}
