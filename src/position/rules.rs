/// Thresholds for selling a holding that predates the bot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegacyRule {
    pub min_rsi: f64,
    /// Minimum profit over the starting average cost, in percent.
    pub min_profit_rate: f64,
}

impl Default for LegacyRule {
    fn default() -> Self {
        Self {
            min_rsi: 70.0,
            min_profit_rate: 0.5,
        }
    }
}

/// Balance an instrument held when trading started.
///
/// Liquidated at most once, independently of the bucket tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegacyHolding {
    pub quantity: f64,
    pub avg_cost: f64,
    active: bool,
}

impl LegacyHolding {
    pub fn new(quantity: f64, avg_cost: f64) -> Self {
        Self {
            quantity,
            avg_cost,
            active: quantity > 0.0 && avg_cost > 0.0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn should_liquidate(&self, rsi: f64, price: f64, rule: &LegacyRule) -> bool {
        self.active
            && rsi >= rule.min_rsi
            && price >= self.avg_cost * (1.0 + rule.min_profit_rate / 100.0)
    }

    pub fn mark_liquidated(&mut self) {
        self.active = false;
    }

    /// Account for a partial liquidation; the rule stays armed for the rest.
    pub fn reduce(&mut self, sold: f64) {
        self.quantity = (self.quantity - sold).max(0.0);
        if self.quantity <= crate::position::DUST_QUANTITY {
            self.mark_liquidated();
        }
    }
}

/// Sell everything once the price falls below `avg_cost * factor`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopLoss {
    pub factor: f64,
}

impl Default for StopLoss {
    fn default() -> Self {
        Self { factor: 0.9 }
    }
}

impl StopLoss {
    pub fn triggered(&self, avg_cost: f64, price: f64) -> bool {
        avg_cost > 0.0 && price < avg_cost * self.factor
    }
}
