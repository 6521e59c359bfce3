use std::collections::HashMap;

use chrono::{DateTime, Utc};
use error_stack::{Report, ResultExt, bail};

use crate::config::{AppConfig, BacktestConfig};
use crate::error::{BacktestError, IndicatorError};
use crate::indicator::engine::{IndicatorEngine, IndicatorSnapshot};
use crate::model::Candle;
use crate::position::bucket::{BucketFractions, RsiBucket};
use crate::position::rules::StopLoss;
use crate::position::{BucketTracker, OpenBucket};
use crate::strategy::{SignalAction, SignalParams, evaluate};

#[derive(Debug, Clone)]
pub struct BacktestSettings {
    pub initial_capital: f64,
    pub fee_bps: f64,
    /// Bars handed to the indicator engine at each step.
    pub window: usize,
    pub min_order_krw: f64,
    pub signal: SignalParams,
    pub stop_loss: StopLoss,
    pub fractions: BucketFractions,
}

impl BacktestSettings {
    pub fn from_config(config: &AppConfig, backtest: &BacktestConfig) -> Self {
        Self {
            initial_capital: backtest.initial_capital,
            fee_bps: backtest.fee_bps,
            window: config.general.retention,
            min_order_krw: config.general.min_order_krw,
            signal: config.strategy.signal_params(),
            stop_loss: config.strategy.stop_loss(),
            fractions: config.strategy.bucket_fractions,
        }
    }
}

/// One closed bucket position.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestTrade {
    pub bucket: RsiBucket,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    /// Profit after both fees.
    pub net_pnl: f64,
    pub reason: &'static str,
}

#[derive(Debug, Clone)]
pub struct BacktestReport {
    pub initial_capital: f64,
    pub final_equity: f64,
    pub total_return_pct: f64,
    pub max_drawdown_pct: f64,
    pub win_rate_pct: f64,
    pub trade_count: usize,
    pub trades: Vec<BacktestTrade>,
}

/// Replay the live rules over `candles` (oldest first), filling every order
/// at the close of the bar that signalled it.
pub fn run(
    candles: &[Candle],
    engine: &IndicatorEngine,
    settings: &BacktestSettings,
) -> Result<BacktestReport, Report<BacktestError>> {
    let required = engine.required_candles();
    if candles.len() < required {
        bail!(BacktestError::NotEnoughCandles {
            required,
            available: candles.len(),
        });
    }

    let mut book = Book::new(settings);
    for index in 0..candles.len() {
        let start = (index + 1).saturating_sub(settings.window.max(required));
        let window = &candles[start..=index];
        let candle = &candles[index];

        let snapshot = match engine.evaluate_candles(window) {
            Ok(snapshot) => Some(snapshot),
            Err(e) if matches!(e.current_context(), IndicatorError::InsufficientData { .. }) => None,
            Err(e) => return Err(e.change_context(BacktestError::Indicator)),
        };

        if let Some(snapshot) = snapshot {
            book.step(candle, &snapshot)?;
        }
        book.record_equity(candle.close);
    }

    if let Some(last) = candles.last() {
        book.close_all(last, "end of data");
    }
    Ok(book.into_report())
}

struct Book<'a> {
    settings: &'a BacktestSettings,
    fee_rate: f64,
    cash: f64,
    /// Equity the bucket sizes are taken from; reset whenever flat.
    limit: f64,
    tracker: BucketTracker,
    /// KRW spent per open bucket, entry fee included.
    costs: HashMap<RsiBucket, f64>,
    trades: Vec<BacktestTrade>,
    equity_curve: Vec<f64>,
}

const SYMBOL: &str = "backtest";

impl<'a> Book<'a> {
    fn new(settings: &'a BacktestSettings) -> Self {
        Self {
            settings,
            fee_rate: settings.fee_bps / 10_000.0,
            cash: settings.initial_capital,
            limit: settings.initial_capital,
            tracker: BucketTracker::new(settings.fractions),
            costs: HashMap::new(),
            trades: Vec::new(),
            equity_curve: Vec::new(),
        }
    }

    fn step(
        &mut self,
        candle: &Candle,
        snapshot: &IndicatorSnapshot,
    ) -> Result<(), Report<BacktestError>> {
        let price = candle.close;
        let avg_cost = self.average_cost();

        if self.settings.stop_loss.triggered(avg_cost, price) {
            self.close_all(candle, "stop-loss");
            return Ok(());
        }

        let profit_rate = if avg_cost > 0.0 {
            (price / avg_cost - 1.0) * 100.0
        } else {
            0.0
        };
        let decision = evaluate(&self.settings.signal, snapshot, profit_rate);
        match decision.action() {
            SignalAction::Buy => self.buy(candle, decision.bucket, decision.rsi),
            SignalAction::Sell => self.sell(candle, decision.bucket),
            SignalAction::Hold => Ok(()),
        }
    }

    fn buy(
        &mut self,
        candle: &Candle,
        bucket: RsiBucket,
        rsi: f64,
    ) -> Result<(), Report<BacktestError>> {
        if self.tracker.is_open(SYMBOL, bucket) {
            return Ok(());
        }
        if self.tracker.is_empty() {
            self.limit = self.cash;
        }

        let amount = self.tracker.position_size(bucket, self.limit);
        let cost = amount * (1.0 + self.fee_rate);
        if amount < self.settings.min_order_krw || cost > self.cash {
            return Ok(());
        }

        self.tracker
            .open(
                SYMBOL,
                bucket,
                OpenBucket {
                    quantity: amount / candle.close,
                    entry_price: candle.close,
                    rsi,
                    opened_at: candle.open_time,
                },
            )
            .change_context(BacktestError::Bucket)?;
        self.cash -= cost;
        self.costs.insert(bucket, cost);
        Ok(())
    }

    fn sell(&mut self, candle: &Candle, bucket: RsiBucket) -> Result<(), Report<BacktestError>> {
        let Some(entry) = self.tracker.get(SYMBOL, bucket).copied() else {
            return Ok(());
        };
        self.tracker
            .close(SYMBOL, bucket)
            .change_context(BacktestError::Bucket)?;
        self.settle(candle, bucket, entry, "rsi overbought reversal");
        Ok(())
    }

    fn close_all(&mut self, candle: &Candle, reason: &'static str) {
        for (bucket, entry) in self.tracker.clear(SYMBOL) {
            self.settle(candle, bucket, entry, reason);
        }
    }

    fn settle(&mut self, candle: &Candle, bucket: RsiBucket, entry: OpenBucket, reason: &'static str) {
        let proceeds = entry.quantity * candle.close * (1.0 - self.fee_rate);
        let cost = self.costs.remove(&bucket).unwrap_or(entry.quantity * entry.entry_price);
        self.cash += proceeds;
        self.trades.push(BacktestTrade {
            bucket,
            entry_time: entry.opened_at,
            exit_time: candle.open_time,
            entry_price: entry.entry_price,
            exit_price: candle.close,
            quantity: entry.quantity,
            net_pnl: proceeds - cost,
            reason,
        });
    }

    /// Quantity-weighted entry price of the open buckets; 0 when flat.
    fn average_cost(&self) -> f64 {
        let quantity = self.tracker.open_quantity(SYMBOL);
        if quantity <= 0.0 {
            return 0.0;
        }
        let notional: f64 = self
            .tracker
            .buckets(SYMBOL)
            .iter()
            .map(|(_, e)| e.quantity * e.entry_price)
            .sum();
        notional / quantity
    }

    fn record_equity(&mut self, mark_price: f64) {
        let position = self.tracker.open_quantity(SYMBOL) * mark_price;
        self.equity_curve.push(self.cash + position);
    }

    fn into_report(mut self) -> BacktestReport {
        self.equity_curve.push(self.cash);
        let wins = self.trades.iter().filter(|t| t.net_pnl > 0.0).count();
        let win_rate_pct = if self.trades.is_empty() {
            0.0
        } else {
            wins as f64 / self.trades.len() as f64 * 100.0
        };

        let initial_capital = self.settings.initial_capital;
        BacktestReport {
            initial_capital,
            final_equity: self.cash,
            total_return_pct: (self.cash / initial_capital - 1.0) * 100.0,
            max_drawdown_pct: calculate_max_drawdown_pct(&self.equity_curve),
            win_rate_pct,
            trade_count: self.trades.len(),
            trades: self.trades,
        }
    }
}

fn calculate_max_drawdown_pct(equity_curve: &[f64]) -> f64 {
    if equity_curve.is_empty() {
        return 0.0;
    }

    let mut peak = equity_curve[0];
    let mut max_drawdown = 0.0;
    for equity in equity_curve {
        if *equity > peak {
            peak = *equity;
        }
        if peak <= 0.0 {
            continue;
        }
        let drawdown = (peak - *equity) / peak;
        if drawdown > max_drawdown {
            max_drawdown = drawdown;
        }
    }
    max_drawdown * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::engine::IndicatorSettings;
    use crate::indicator::test_support::candles_from_closes;

    fn engine() -> IndicatorEngine {
        IndicatorEngine::new(&IndicatorSettings::default()).unwrap()
    }

    fn settings() -> BacktestSettings {
        BacktestSettings {
            initial_capital: 1_000_000.0,
            fee_bps: 0.0,
            window: 200,
            min_order_krw: 5_000.0,
            signal: SignalParams::default(),
            stop_loss: StopLoss::default(),
            fractions: BucketFractions::default(),
        }
    }

    #[test]
    fn max_drawdown_detects_peak_to_trough() {
        let curve = vec![100.0, 120.0, 90.0, 110.0];
        let drawdown = calculate_max_drawdown_pct(&curve);
        assert!((drawdown - 25.0).abs() < 1e-9);
    }

    #[test]
    fn too_few_candles_rejected() {
        let err = run(&candles_from_closes(&[100.0; 10]), &engine(), &settings()).unwrap_err();
        assert!(matches!(
            err.current_context(),
            BacktestError::NotEnoughCandles {
                required: 16,
                available: 10
            }
        ));
    }

    #[test]
    fn flat_market_never_trades() {
        let report = run(&candles_from_closes(&[100.0; 60]), &engine(), &settings()).unwrap();
        assert_eq!(report.trade_count, 0);
        assert_eq!(report.final_equity, 1_000_000.0);
        assert_eq!(report.max_drawdown_pct, 0.0);
    }

    /// Choppy market, a steady decline, then a single uptick: the only
    /// oversold reversal is the last bar.
    fn decline_then_uptick() -> Vec<f64> {
        let mut closes: Vec<f64> = (0..20).map(|i| 100.0 + (i % 2) as f64).collect();
        closes.extend((1..=15).map(|i| 100.0 - i as f64));
        closes.push(85.5);
        closes
    }

    #[test]
    fn dip_and_recovery_round_trip_is_profitable() {
        let mut closes = decline_then_uptick();
        closes.extend((1..=40).map(|i| 85.5 + i as f64));
        closes.push(125.0);

        let report = run(&candles_from_closes(&closes), &engine(), &settings()).unwrap();
        assert!(report.trade_count >= 1);
        let first_entry = report
            .trades
            .iter()
            .map(|t| t.entry_price)
            .fold(f64::INFINITY, f64::min);
        assert_eq!(first_entry, 85.5);
        assert!(report.trades.iter().all(|t| t.net_pnl > 0.0));
        assert!(report.total_return_pct > 0.0);
        assert_eq!(report.win_rate_pct, 100.0);
    }

    #[test]
    fn crash_after_entry_stops_out() {
        let mut closes = decline_then_uptick();
        closes.extend([84.0, 78.0, 70.0]);

        let report = run(&candles_from_closes(&closes), &engine(), &settings()).unwrap();
        let stop = report
            .trades
            .iter()
            .find(|t| t.reason == "stop-loss")
            .unwrap();
        assert_eq!(stop.exit_price, 70.0);
        assert!(stop.net_pnl < 0.0);
        assert!(report.max_drawdown_pct > 0.0);
    }

    #[test]
    fn fees_charged_on_entry_and_exit() {
        let with_fee = BacktestSettings {
            fee_bps: 50.0,
            ..settings()
        };
        let report = run(&candles_from_closes(&decline_then_uptick()), &engine(), &with_fee).unwrap();
        // bought on the last bar, force-closed at the same price
        assert_eq!(report.trade_count, 1);
        let trade = &report.trades[0];
        assert_eq!(trade.reason, "end of data");
        let amount = trade.quantity * trade.entry_price;
        assert!((report.final_equity - (1_000_000.0 - amount * 0.01)).abs() < 1e-6);
    }
}
