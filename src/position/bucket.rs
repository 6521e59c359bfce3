use std::fmt;

use error_stack::{Report, bail};
use serde::Deserialize;

use crate::error::ConfigError;

/// Discretised RSI extreme used to dedupe and size entries.
///
/// RSI at or above 50 is reflected through `100 - rsi` first, so 82 and 18
/// land in the same bucket. Ordered from the most extreme bucket to neutral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RsiBucket {
    B20,
    B25,
    B30,
    B35,
    Neutral,
}

impl RsiBucket {
    pub const TRADABLE: [RsiBucket; 4] = [Self::B20, Self::B25, Self::B30, Self::B35];

    pub fn from_rsi(rsi: f64) -> Self {
        if rsi.is_nan() {
            return Self::Neutral;
        }
        let reflected = if rsi >= 50.0 { 100.0 - rsi } else { rsi };
        if reflected <= 20.0 {
            Self::B20
        } else if reflected <= 25.0 {
            Self::B25
        } else if reflected <= 30.0 {
            Self::B30
        } else if reflected <= 35.0 {
            Self::B35
        } else {
            Self::Neutral
        }
    }

    /// Threshold level as persisted (`None` for neutral).
    pub fn level(self) -> Option<u8> {
        match self {
            Self::B20 => Some(20),
            Self::B25 => Some(25),
            Self::B30 => Some(30),
            Self::B35 => Some(35),
            Self::Neutral => None,
        }
    }

    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            20 => Some(Self::B20),
            25 => Some(Self::B25),
            30 => Some(Self::B30),
            35 => Some(Self::B35),
            _ => None,
        }
    }

    pub fn is_neutral(self) -> bool {
        self == Self::Neutral
    }
}

impl fmt::Display for RsiBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level() {
            Some(level) => write!(f, "{level}"),
            None => write!(f, "neutral"),
        }
    }
}

/// Share of the per-instrument limit amount committed by each bucket.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct BucketFractions {
    pub b20: f64,
    pub b25: f64,
    pub b30: f64,
    pub b35: f64,
}

impl Default for BucketFractions {
    fn default() -> Self {
        Self {
            b20: 0.4,
            b25: 0.3,
            b30: 0.2,
            b35: 0.1,
        }
    }
}

impl BucketFractions {
    pub fn fraction(&self, bucket: RsiBucket) -> f64 {
        match bucket {
            RsiBucket::B20 => self.b20,
            RsiBucket::B25 => self.b25,
            RsiBucket::B30 => self.b30,
            RsiBucket::B35 => self.b35,
            RsiBucket::Neutral => 0.0,
        }
    }

    /// Each fraction must lie in `[0, 1]` and together they may not commit
    /// more than the whole limit.
    pub fn validate(&self) -> Result<(), Report<ConfigError>> {
        for bucket in RsiBucket::TRADABLE {
            let fraction = self.fraction(bucket);
            if !(0.0..=1.0).contains(&fraction) {
                bail!(ConfigError::Validation {
                    field: format!("strategy.bucket_fractions.b{bucket} must be within [0, 1]"),
                });
            }
        }
        let total: f64 = RsiBucket::TRADABLE.iter().map(|&b| self.fraction(b)).sum();
        if total > 1.0 + 1e-9 {
            bail!(ConfigError::Validation {
                field: format!("strategy.bucket_fractions sum to {total}, must be <= 1"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reflected_thresholds() {
        assert_eq!(RsiBucket::from_rsi(18.0), RsiBucket::B20);
        assert_eq!(RsiBucket::from_rsi(82.0), RsiBucket::B20);
        assert_eq!(RsiBucket::from_rsi(50.0), RsiBucket::Neutral);
        assert_eq!(RsiBucket::from_rsi(20.0), RsiBucket::B20);
        assert_eq!(RsiBucket::from_rsi(22.5), RsiBucket::B25);
        assert_eq!(RsiBucket::from_rsi(71.0), RsiBucket::B30);
        assert_eq!(RsiBucket::from_rsi(35.0), RsiBucket::B35);
        assert_eq!(RsiBucket::from_rsi(35.1), RsiBucket::Neutral);
        assert_eq!(RsiBucket::from_rsi(0.0), RsiBucket::B20);
        assert_eq!(RsiBucket::from_rsi(100.0), RsiBucket::B20);
        assert_eq!(RsiBucket::from_rsi(f64::NAN), RsiBucket::Neutral);
    }

    #[test]
    fn default_fractions_strictly_decrease() {
        let fractions = BucketFractions::default();
        let ordered = [
            RsiBucket::B20,
            RsiBucket::B25,
            RsiBucket::B30,
            RsiBucket::B35,
            RsiBucket::Neutral,
        ];
        for pair in ordered.windows(2) {
            assert!(fractions.fraction(pair[0]) > fractions.fraction(pair[1]));
        }
        assert_eq!(fractions.fraction(RsiBucket::Neutral), 0.0);
        assert!(fractions.validate().is_ok());
    }

    #[test]
    fn oversized_fractions_rejected() {
        let fractions = BucketFractions {
            b20: 0.6,
            ..BucketFractions::default()
        };
        assert!(fractions.validate().is_err());
        let negative = BucketFractions {
            b35: -0.1,
            ..BucketFractions::default()
        };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn level_round_trip_and_display() {
        for bucket in RsiBucket::TRADABLE {
            assert_eq!(RsiBucket::from_level(bucket.level().unwrap()), Some(bucket));
        }
        assert_eq!(RsiBucket::from_level(40), None);
        assert_eq!(RsiBucket::B25.to_string(), "25");
        assert_eq!(RsiBucket::Neutral.to_string(), "neutral");
    }
}
