use error_stack::{Report, bail};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::indicator::engine::IndicatorSnapshot;
use crate::position::bucket::RsiBucket;

/// Which rule turns a snapshot into a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalRule {
    /// RSI extreme confirmed by a turn of the RSI.
    #[default]
    RsiReversal,
    /// Weighted vote of EMA trend, RSI extreme and Bollinger touch.
    WeightedScore,
}

/// Votes of the weighted-score rule.
///
/// A side fires once its summed weight reaches `threshold` of the total.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub ema: f64,
    pub rsi: f64,
    pub bollinger: f64,
    pub threshold: f64,
    /// RSI strictly below this votes buy.
    pub rsi_low: f64,
    /// RSI strictly above this votes sell.
    pub rsi_high: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            ema: 1.0,
            rsi: 1.0,
            bollinger: 1.5,
            threshold: 0.6,
            rsi_low: 30.0,
            rsi_high: 70.0,
        }
    }
}

impl ScoreWeights {
    pub fn total(&self) -> f64 {
        self.ema + self.rsi + self.bollinger
    }

    /// `(buy, sell)` scores of a snapshot. Undefined indicators do not vote.
    pub fn scores(&self, snapshot: &IndicatorSnapshot) -> (f64, f64) {
        let mut buy = 0.0;
        let mut sell = 0.0;

        if let (Some(short), Some(long)) = (snapshot.ema_short, snapshot.ema_long) {
            if short > long {
                buy += self.ema;
            } else if short < long {
                sell += self.ema;
            }
        }
        if snapshot.rsi < self.rsi_low {
            buy += self.rsi;
        } else if snapshot.rsi > self.rsi_high {
            sell += self.rsi;
        }
        if let Some(bands) = snapshot.bands {
            if snapshot.close <= bands.lower {
                buy += self.bollinger;
            } else if snapshot.close >= bands.upper {
                sell += self.bollinger;
            }
        }
        (buy, sell)
    }

    pub fn validate(&self) -> Result<(), Report<ConfigError>> {
        let weights = [self.ema, self.rsi, self.bollinger];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) || self.total() <= 0.0 {
            bail!(ConfigError::Validation {
                field: "strategy.score_weights: weights must be >= 0 with a positive sum".into(),
            });
        }
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            bail!(ConfigError::Validation {
                field: format!(
                    "strategy.score_weights.threshold ({}) must be within (0, 1]",
                    self.threshold
                ),
            });
        }
        if !(0.0..=100.0).contains(&self.rsi_low)
            || !(0.0..=100.0).contains(&self.rsi_high)
            || self.rsi_low >= self.rsi_high
        {
            bail!(ConfigError::Validation {
                field: "strategy.score_weights: need 0 <= rsi_low < rsi_high <= 100".into(),
            });
        }
        Ok(())
    }
}

/// Thresholds of the signal rules.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalParams {
    pub rule: SignalRule,
    pub weights: ScoreWeights,
    pub oversold: f64,
    pub overbought: f64,
    /// Minimum unrealised profit, in percent, before a sell.
    pub min_profit_rate: f64,
    /// Require RSI to have turned since the previous bar.
    pub require_reversal: bool,
    /// Require the close to be outside the Bollinger band on the signal side.
    pub require_bollinger: bool,
}

impl Default for SignalParams {
    fn default() -> Self {
        Self {
            rule: SignalRule::RsiReversal,
            weights: ScoreWeights::default(),
            oversold: 35.0,
            overbought: 65.0,
            min_profit_rate: 0.5,
            require_reversal: true,
            require_bollinger: false,
        }
    }
}

impl SignalParams {
    pub fn validate(&self) -> Result<(), Report<ConfigError>> {
        if !(0.0..=100.0).contains(&self.oversold) || !(0.0..=100.0).contains(&self.overbought) {
            bail!(ConfigError::Validation {
                field: "strategy.oversold and strategy.overbought must be within [0, 100]".into(),
            });
        }
        if self.oversold >= self.overbought {
            bail!(ConfigError::Validation {
                field: format!(
                    "strategy.oversold ({}) must be < strategy.overbought ({})",
                    self.oversold, self.overbought
                ),
            });
        }
        self.weights.validate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub buy: bool,
    pub sell: bool,
    pub bucket: RsiBucket,
    pub rsi: f64,
}

impl Decision {
    pub fn action(&self) -> SignalAction {
        match (self.buy, self.sell) {
            (true, _) => SignalAction::Buy,
            (false, true) => SignalAction::Sell,
            (false, false) => SignalAction::Hold,
        }
    }
}

/// Decide on the latest snapshot; `profit_rate` is the instrument's
/// unrealised profit in percent.
pub fn evaluate(params: &SignalParams, snapshot: &IndicatorSnapshot, profit_rate: f64) -> Decision {
    let rsi = snapshot.rsi;
    let hold = Decision {
        buy: false,
        sell: false,
        bucket: RsiBucket::from_rsi(rsi),
        rsi,
    };
    if rsi.is_nan() {
        return hold;
    }

    match params.rule {
        SignalRule::RsiReversal => rsi_reversal(params, snapshot, profit_rate, hold),
        SignalRule::WeightedScore => weighted_score(params, snapshot, profit_rate, hold),
    }
}

fn rsi_reversal(
    params: &SignalParams,
    snapshot: &IndicatorSnapshot,
    profit_rate: f64,
    hold: Decision,
) -> Decision {
    let rsi = snapshot.rsi;
    let prev = snapshot.rsi_prev;

    let buy_confirmed = !params.require_bollinger
        || snapshot
            .bands
            .is_some_and(|b| snapshot.close <= b.lower);
    let sell_confirmed = !params.require_bollinger
        || snapshot
            .bands
            .is_some_and(|b| snapshot.close >= b.upper);

    // Comparisons against NaN are false, so an undefined previous RSI
    // blocks reversal-gated signals.
    let buy = rsi <= params.oversold
        && (!params.require_reversal || rsi >= prev)
        && buy_confirmed;
    let sell = !buy
        && rsi >= params.overbought
        && (!params.require_reversal || rsi <= prev)
        && profit_rate >= params.min_profit_rate
        && sell_confirmed;

    Decision {
        buy,
        sell,
        ..hold
    }
}

/// The vote can fire with RSI in the neutral band; such trades go to the
/// smallest bucket.
fn weighted_score(
    params: &SignalParams,
    snapshot: &IndicatorSnapshot,
    profit_rate: f64,
    hold: Decision,
) -> Decision {
    let weights = &params.weights;
    let (buy_score, sell_score) = weights.scores(snapshot);
    let needed = weights.total() * weights.threshold;

    let buy = buy_score >= needed;
    let sell = !buy && sell_score >= needed && profit_rate >= params.min_profit_rate;
    let bucket = match hold.bucket {
        RsiBucket::Neutral => RsiBucket::B35,
        bucket => bucket,
    };

    Decision {
        buy,
        sell,
        bucket,
        ..hold
    }
}
