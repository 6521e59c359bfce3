use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Timelike, Utc};
use error_stack::{Report, ResultExt, bail};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::allocation::limit_amounts;
use crate::config::{AppConfig, OrderType};
use crate::error::{IndicatorError, MarketDataError, TradeError};
use crate::exchange::Exchange;
use crate::indicator::engine::{IndicatorEngine, IndicatorSnapshot};
use crate::model::{AssetSnapshot, Fill, Order, OrderState, Side, TimeFrame, TradeRecord};
use crate::notifier::report::{TradeReport, asset_report, error_report, trade_report};
use crate::notifier::{Channel, Notifier};
use crate::position::bucket::{BucketFractions, RsiBucket};
use crate::position::rules::{LegacyHolding, LegacyRule, StopLoss};
use crate::position::{BucketTracker, DUST_QUANTITY, OpenBucket};
use crate::series::PriceSeries;
use crate::storage::Storage;
use crate::strategy::{SignalAction, SignalParams, evaluate};

const LIMIT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct TraderSettings {
    pub instruments: Vec<String>,
    pub timeframe: TimeFrame,
    pub candle_count: usize,
    pub retention: usize,
    pub poll_interval: Duration,
    pub settle_wait: Duration,
    pub min_order_krw: f64,
    pub status_report_minutes: Vec<u32>,
    pub signal: SignalParams,
    pub legacy: LegacyRule,
    pub stop_loss: StopLoss,
    pub fractions: BucketFractions,
    pub order_type: OrderType,
    pub limit_premium: f64,
    pub limit_wait: Duration,
    /// Exchange fee as a fraction of the notional, reserved on buys.
    pub fee_rate: f64,
}

impl TraderSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let general = &config.general;
        let strategy = &config.strategy;
        Self {
            instruments: config.coins.clone(),
            timeframe: general.timeframe,
            candle_count: general.candle_count,
            retention: general.retention,
            poll_interval: Duration::from_secs(general.poll_interval_secs),
            settle_wait: Duration::from_secs(general.settle_wait_secs),
            min_order_krw: general.min_order_krw,
            status_report_minutes: general.status_report_minutes.clone(),
            signal: strategy.signal_params(),
            legacy: strategy.legacy_rule(),
            stop_loss: strategy.stop_loss(),
            fractions: strategy.bucket_fractions,
            order_type: strategy.order_type,
            limit_premium: strategy.limit_premium,
            limit_wait: Duration::from_secs(strategy.limit_wait_secs),
            fee_rate: general.fee_bps / 10_000.0,
        }
    }
}

/// What one instrument's cycle did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    Halted,
    LegacyLiquidated,
    StopLoss,
    Bought(RsiBucket),
    Sold(RsiBucket),
    /// Buy signal for a bucket that already holds a position.
    AlreadyOpen(RsiBucket),
    /// A sell executed only part of its quantity; the rest stays tracked.
    PartialFill,
    Hold,
}

/// Polling loop over the configured instruments.
///
/// Owns the bucket book; instruments are processed one after another and
/// every order is awaited until it settles.
pub struct Trader {
    exchange: Arc<dyn Exchange>,
    notifier: Arc<dyn Notifier>,
    storage: Arc<dyn Storage>,
    engine: IndicatorEngine,
    tracker: BucketTracker,
    legacy: HashMap<String, LegacyHolding>,
    limits: HashMap<String, f64>,
    /// Halts recorded in storage; lifted when an operator clears them there.
    persisted_halts: HashSet<String>,
    status_sent: bool,
    settings: TraderSettings,
}

impl Trader {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        notifier: Arc<dyn Notifier>,
        storage: Arc<dyn Storage>,
        engine: IndicatorEngine,
        settings: TraderSettings,
    ) -> Self {
        Self {
            exchange,
            notifier,
            storage,
            engine,
            tracker: BucketTracker::new(settings.fractions),
            legacy: HashMap::new(),
            limits: HashMap::new(),
            persisted_halts: HashSet::new(),
            status_sent: false,
            settings,
        }
    }

    /// Restore persisted buckets, carve out pre-existing balances as legacy
    /// holdings and compute the first limit amounts.
    pub async fn initialize(&mut self) -> Result<(), Report<TradeError>> {
        let stored = self
            .storage
            .load_buckets()
            .await
            .change_context(TradeError::Restore)?;
        for entry in stored {
            if !self.settings.instruments.contains(&entry.instrument) {
                warn!(instrument = %entry.instrument, bucket = %entry.bucket, "persisted bucket for untracked instrument");
            }
            self.tracker
                .restore(&entry.instrument, entry.bucket, entry.entry)
                .change_context(TradeError::Restore)?;
        }

        let halts = self
            .storage
            .load_halts()
            .await
            .change_context(TradeError::Restore)?;
        for instrument in halts {
            warn!(instrument = %instrument, "instrument halted until cleared with `resume`");
            self.tracker.halt(&instrument);
            self.persisted_halts.insert(instrument);
        }

        for instrument in &self.settings.instruments {
            match self.storage.recent_trades(instrument, 1).await {
                Ok(trades) => {
                    if let Some(last) = trades.first() {
                        info!(
                            instrument = %instrument,
                            side = %last.side,
                            price = last.price,
                            quantity = last.quantity,
                            executed_at = %last.executed_at,
                            "last journaled trade"
                        );
                    }
                }
                Err(e) => warn!(instrument = %instrument, error = ?e, "trade journal unreadable"),
            }
        }

        let assets = self
            .asset_snapshot()
            .await
            .change_context(TradeError::Restore)?;

        for coin in &assets.coins {
            let quantity = coin.quantity - self.tracker.open_quantity(&coin.instrument);
            let holding = LegacyHolding::new(round_quantity(quantity), coin.avg_cost);
            if holding.is_active() {
                info!(
                    instrument = %coin.instrument,
                    quantity = holding.quantity,
                    avg_cost = holding.avg_cost,
                    "legacy holding detected"
                );
                self.legacy.insert(coin.instrument.clone(), holding);
            }
        }

        self.limits = limit_amounts(&assets, &self.settings.instruments);
        info!(
            instruments = ?self.settings.instruments,
            limits = ?self.limits,
            "trader initialized"
        );
        self.notify(Channel::Asset, &asset_report(&assets)).await;
        Ok(())
    }

    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), Report<TradeError>> {
        self.initialize().await?;

        loop {
            self.run_cycle(&cancel).await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }

        info!("trader stopped");
        Ok(())
    }

    pub async fn run_cycle(&mut self, cancel: &CancellationToken) {
        self.sync_halts().await;

        let assets = match self.asset_snapshot().await {
            Ok(assets) => assets,
            Err(e) => {
                warn!(error = ?e, "asset snapshot unavailable, skipping cycle");
                return;
            }
        };

        if self.report_due(Local::now().minute()) {
            self.notify(Channel::Asset, &asset_report(&assets)).await;
        }

        if self.tracker.is_empty() {
            self.limits = limit_amounts(&assets, &self.settings.instruments);
            debug!(limits = ?self.limits, "limit amounts recomputed");
        }

        let instruments = self.settings.instruments.clone();
        for instrument in &instruments {
            if cancel.is_cancelled() {
                break;
            }
            match self.process_instrument(instrument, &assets).await {
                Ok(outcome) => debug!(instrument = %instrument, ?outcome, "cycle done"),
                Err(e) => self.handle_error(instrument, e).await,
            }
        }
    }

    /// Resume instruments whose persisted halt an operator has cleared.
    async fn sync_halts(&mut self) {
        if self.persisted_halts.is_empty() {
            return;
        }
        let halts = match self.storage.load_halts().await {
            Ok(halts) => halts,
            Err(e) => {
                warn!(error = ?e, "halt table unreadable");
                return;
            }
        };

        let cleared: Vec<String> = self
            .persisted_halts
            .iter()
            .filter(|instrument| !halts.contains(instrument))
            .cloned()
            .collect();
        for instrument in cleared {
            self.persisted_halts.remove(&instrument);
            if self.tracker.resume(&instrument) {
                info!(instrument = %instrument, "halt cleared, trading resumed");
                let text = format!("{instrument}: halt cleared, trading resumed");
                self.notify(Channel::Error, &text).await;
            }
        }
    }

    /// Whether the asset report is due at `minute`; fires once per matching minute.
    fn report_due(&mut self, minute: u32) -> bool {
        if self.settings.status_report_minutes.contains(&minute) {
            let due = !self.status_sent;
            self.status_sent = true;
            due
        } else {
            self.status_sent = false;
            false
        }
    }

    async fn asset_snapshot(&self) -> Result<AssetSnapshot, Report<MarketDataError>> {
        let balances = self
            .exchange
            .get_balances()
            .await
            .change_context_lazy(|| MarketDataError::Stale {
                instrument: "balances".into(),
            })?;

        let mut prices = Vec::with_capacity(self.settings.instruments.len());
        for instrument in &self.settings.instruments {
            let price = self
                .exchange
                .get_current_price(instrument)
                .await
                .change_context_lazy(|| MarketDataError::Stale {
                    instrument: instrument.clone(),
                })?;
            prices.push((instrument.clone(), price));
        }

        AssetSnapshot::from_balances(&balances, &self.settings.instruments, &prices)
    }

    async fn process_instrument(
        &mut self,
        instrument: &str,
        assets: &AssetSnapshot,
    ) -> Result<CycleOutcome, Report<TradeError>> {
        if self.tracker.is_halted(instrument) {
            debug!(instrument, "instrument halted, skipping");
            return Ok(CycleOutcome::Halted);
        }

        let snapshot = self.indicators(instrument).await?;
        debug!(
            instrument,
            close = snapshot.close,
            rsi = snapshot.rsi,
            rsi_prev = snapshot.rsi_prev,
            bb_lower = ?snapshot.bands.as_ref().map(|b| b.lower),
            bb_upper = ?snapshot.bands.as_ref().map(|b| b.upper),
            ema_short = ?snapshot.ema_short,
            ema_long = ?snapshot.ema_long,
            cci = ?snapshot.cci,
            stoch_k = ?snapshot.stoch_k,
            stoch_d = ?snapshot.stoch_d,
            obv = ?snapshot.obv,
            atr = ?snapshot.atr,
            score = ?snapshot.score.as_ref().map(|s| s.total()),
            "indicator snapshot"
        );
        let price = self
            .exchange
            .get_current_price(instrument)
            .await
            .change_context_lazy(|| TradeError::Exchange {
                instrument: instrument.to_string(),
            })?
            .filter(|p| *p > 0.0)
            .ok_or_else(|| {
                Report::new(TradeError::StaleMarketData {
                    instrument: instrument.to_string(),
                })
            })?;
        let Some(coin) = assets.coin(instrument) else {
            bail!(TradeError::StaleMarketData {
                instrument: instrument.to_string(),
            });
        };

        if let Some(holding) = self.legacy.get(instrument).copied() {
            if holding.should_liquidate(snapshot.rsi, price, &self.settings.legacy) {
                return self
                    .liquidate_legacy(instrument, holding, coin.quantity, snapshot.rsi)
                    .await;
            }
        }

        if coin.quantity * price >= self.settings.min_order_krw
            && self.settings.stop_loss.triggered(coin.avg_cost, price)
        {
            return self
                .stop_loss(instrument, coin.quantity, coin.avg_cost, price, snapshot.rsi)
                .await;
        }

        let decision = evaluate(&self.settings.signal, &snapshot, coin.profit_rate);
        debug!(
            instrument,
            rsi = decision.rsi,
            rsi_prev = snapshot.rsi_prev,
            bucket = %decision.bucket,
            profit_rate = coin.profit_rate,
            action = ?decision.action(),
            "signal evaluated"
        );

        match decision.action() {
            SignalAction::Buy => self.buy(instrument, decision.bucket, price, snapshot.rsi).await,
            SignalAction::Sell => {
                self.sell(instrument, decision.bucket, coin.quantity, snapshot.rsi)
                    .await
            }
            SignalAction::Hold => Ok(CycleOutcome::Hold),
        }
    }

    async fn indicators(&self, instrument: &str) -> Result<IndicatorSnapshot, Report<TradeError>> {
        let candles = self
            .exchange
            .get_candles(instrument, self.settings.timeframe, self.settings.candle_count)
            .await
            .change_context_lazy(|| TradeError::Exchange {
                instrument: instrument.to_string(),
            })?;
        let series = PriceSeries::from_candles(instrument, self.settings.retention, candles)
            .change_context_lazy(|| TradeError::StaleMarketData {
                instrument: instrument.to_string(),
            })?;

        self.engine.snapshot(&series).map_err(|e| {
            let context = match e.current_context() {
                IndicatorError::InsufficientData { .. } => TradeError::InsufficientData {
                    instrument: instrument.to_string(),
                },
                IndicatorError::InvalidParameter { .. } => TradeError::Indicator {
                    instrument: instrument.to_string(),
                },
            };
            e.change_context(context)
        })
    }

    async fn liquidate_legacy(
        &mut self,
        instrument: &str,
        holding: LegacyHolding,
        balance: f64,
        rsi: f64,
    ) -> Result<CycleOutcome, Report<TradeError>> {
        let quantity = round_quantity(holding.quantity.min(balance));
        info!(instrument, quantity, avg_cost = holding.avg_cost, rsi, "liquidating legacy holding");

        if quantity <= 0.0 {
            if let Some(holding) = self.legacy.get_mut(instrument) {
                holding.mark_liquidated();
            }
            return Ok(CycleOutcome::LegacyLiquidated);
        }

        let Some(execution) = self.market_order(instrument, Side::Sell, quantity).await? else {
            return Err(unfilled(instrument, "legacy liquidation"));
        };
        let sold = execution.fill.quantity;
        let outcome = match self.legacy.get_mut(instrument) {
            Some(holding) if sold + DUST_QUANTITY < quantity => {
                holding.reduce(sold);
                warn!(instrument, sold, remaining = holding.quantity, "legacy liquidation partially filled");
                CycleOutcome::PartialFill
            }
            Some(holding) => {
                holding.mark_liquidated();
                CycleOutcome::LegacyLiquidated
            }
            None => CycleOutcome::LegacyLiquidated,
        };

        self.record(instrument, Side::Sell, &execution, Some(rsi), None, "legacy holding liquidation")
            .await;
        Ok(outcome)
    }

    /// Sell the whole balance. Buckets are released only once the order
    /// filled completely; after a partial fill the rule fires again next cycle.
    async fn stop_loss(
        &mut self,
        instrument: &str,
        quantity: f64,
        avg_cost: f64,
        price: f64,
        rsi: f64,
    ) -> Result<CycleOutcome, Report<TradeError>> {
        warn!(instrument, avg_cost, price, quantity, "stop-loss triggered");
        let quantity = round_quantity(quantity);
        let Some(execution) = self.market_order(instrument, Side::Sell, quantity).await? else {
            return Err(unfilled(instrument, "stop-loss"));
        };
        self.record(instrument, Side::Sell, &execution, Some(rsi), None, "stop-loss")
            .await;

        if execution.fill.quantity + DUST_QUANTITY < quantity {
            warn!(
                instrument,
                sold = execution.fill.quantity,
                requested = quantity,
                "stop-loss partially filled, buckets kept"
            );
            return Ok(CycleOutcome::PartialFill);
        }

        let cleared = self.tracker.clear(instrument);
        if let Some(holding) = self.legacy.get_mut(instrument) {
            holding.mark_liquidated();
        }
        if let Err(e) = self.storage.clear_buckets(instrument).await {
            warn!(instrument, error = ?e, "failed to clear persisted buckets");
        }
        info!(instrument, cleared = cleared.len(), "buckets cleared by stop-loss");
        Ok(CycleOutcome::StopLoss)
    }

    async fn buy(
        &mut self,
        instrument: &str,
        bucket: RsiBucket,
        price: f64,
        rsi: f64,
    ) -> Result<CycleOutcome, Report<TradeError>> {
        if self.tracker.is_open(instrument, bucket) {
            debug!(instrument, %bucket, "bucket already open, skipping buy");
            return Ok(CycleOutcome::AlreadyOpen(bucket));
        }

        let limit = self.limits.get(instrument).copied().unwrap_or(0.0);
        let amount = self.tracker.position_size(bucket, limit).floor();
        if amount < self.settings.min_order_krw {
            debug!(instrument, %bucket, amount, limit, "position below minimum order, skipping buy");
            return Ok(CycleOutcome::Hold);
        }

        // other instruments may have spent KRW earlier in this cycle
        let krw = self.krw_balance(instrument).await?;
        let required = amount * (1.0 + self.settings.fee_rate);
        if krw < required {
            warn!(instrument, %bucket, amount, required, krw, "insufficient KRW, skipping buy");
            return Ok(CycleOutcome::Hold);
        }

        info!(instrument, %bucket, amount, price, rsi, "buying");
        let execution = match self.settings.order_type {
            OrderType::Market => self.market_order(instrument, Side::Buy, amount).await?,
            OrderType::Limit => self.limit_buy(instrument, amount, price).await?,
        };
        let Some(execution) = execution else {
            warn!(instrument, %bucket, "buy order executed nothing");
            return Ok(CycleOutcome::Hold);
        };

        let entry = OpenBucket {
            quantity: round_quantity(execution.fill.quantity),
            entry_price: execution.fill.price,
            rsi,
            opened_at: Utc::now(),
        };
        self.tracker
            .open(instrument, bucket, entry)
            .change_context_lazy(|| TradeError::BucketInvariant {
                instrument: instrument.to_string(),
            })?;
        if let Err(e) = self.storage.save_bucket(instrument, bucket, entry).await {
            warn!(instrument, %bucket, error = ?e, "failed to persist bucket");
        }

        self.record(instrument, Side::Buy, &execution, Some(rsi), Some(bucket), "rsi oversold reversal")
            .await;
        Ok(CycleOutcome::Bought(bucket))
    }

    async fn sell(
        &mut self,
        instrument: &str,
        bucket: RsiBucket,
        balance: f64,
        rsi: f64,
    ) -> Result<CycleOutcome, Report<TradeError>> {
        let Some(entry) = self.tracker.get(instrument, bucket).copied() else {
            debug!(instrument, %bucket, "sell signal without open bucket");
            return Ok(CycleOutcome::Hold);
        };

        let quantity = round_quantity(entry.quantity.min(balance));
        if quantity <= 0.0 {
            bail!(TradeError::BucketInvariant {
                instrument: instrument.to_string(),
            });
        }

        info!(instrument, %bucket, quantity, entry_price = entry.entry_price, rsi, "selling");
        let Some(execution) = self.market_order(instrument, Side::Sell, quantity).await? else {
            return Err(unfilled(instrument, &format!("sell of bucket {bucket}")));
        };

        let sold = execution.fill.quantity;
        let remaining = if sold + DUST_QUANTITY < quantity {
            self.tracker.reduce(instrument, bucket, sold)
        } else {
            self.tracker.close(instrument, bucket).map(|_| None)
        }
        .change_context_lazy(|| TradeError::BucketInvariant {
            instrument: instrument.to_string(),
        })?;

        let persisted = match remaining {
            Some(left) => {
                warn!(instrument, %bucket, sold, remaining = left.quantity, "sell partially filled");
                self.storage.save_bucket(instrument, bucket, left).await
            }
            None => self.storage.delete_bucket(instrument, bucket).await,
        };
        if let Err(e) = persisted {
            warn!(instrument, %bucket, error = ?e, "failed to persist bucket");
        }

        self.record(instrument, Side::Sell, &execution, Some(rsi), Some(bucket), "rsi overbought reversal")
            .await;
        Ok(match remaining {
            Some(_) => CycleOutcome::PartialFill,
            None => CycleOutcome::Sold(bucket),
        })
    }

    async fn krw_balance(&self, instrument: &str) -> Result<f64, Report<TradeError>> {
        let balances = self
            .exchange
            .get_balances()
            .await
            .change_context_lazy(|| TradeError::Exchange {
                instrument: instrument.to_string(),
            })?;
        Ok(balances
            .iter()
            .find(|b| b.currency == "KRW")
            .map(|b| b.quantity)
            .unwrap_or(0.0))
    }

    /// Place a market order and read back its fills after the settle wait.
    async fn market_order(
        &self,
        instrument: &str,
        side: Side,
        amount: f64,
    ) -> Result<Option<Execution>, Report<TradeError>> {
        let to_trade_error = || TradeError::Exchange {
            instrument: instrument.to_string(),
        };
        let order = self
            .exchange
            .place_market_order(instrument, side, amount)
            .await
            .change_context_lazy(to_trade_error)?;
        debug!(instrument, %side, amount, order_id = %order.id, "market order placed");

        tokio::time::sleep(self.settings.settle_wait).await;
        let order = self
            .exchange
            .get_order(&order.id)
            .await
            .change_context_lazy(to_trade_error)?;
        Ok(executed(&order))
    }

    /// Limit buy slightly above the market; cancelled if still open after
    /// `limit_wait`.
    async fn limit_buy(
        &self,
        instrument: &str,
        amount: f64,
        price: f64,
    ) -> Result<Option<Execution>, Report<TradeError>> {
        let to_trade_error = || TradeError::Exchange {
            instrument: instrument.to_string(),
        };
        let limit_price = price * (1.0 + self.settings.limit_premium);
        let quantity = round_quantity(amount / limit_price);
        let mut order = self
            .exchange
            .place_limit_order(instrument, Side::Buy, limit_price, quantity)
            .await
            .change_context_lazy(to_trade_error)?;
        debug!(instrument, limit_price, quantity, order_id = %order.id, "limit order placed");

        let deadline = Instant::now() + self.settings.limit_wait;
        while order.state == OrderState::Wait && Instant::now() < deadline {
            tokio::time::sleep(LIMIT_POLL_INTERVAL).await;
            order = self
                .exchange
                .get_order(&order.id)
                .await
                .change_context_lazy(to_trade_error)?;
        }

        if order.state == OrderState::Wait {
            info!(instrument, order_id = %order.id, "limit order unfilled, cancelling");
            if let Err(e) = self.exchange.cancel_order(&order.id).await {
                warn!(instrument, order_id = %order.id, error = ?e, "cancel failed");
            }
            order = self
                .exchange
                .get_order(&order.id)
                .await
                .change_context_lazy(to_trade_error)?;
        }
        Ok(executed(&order))
    }

    async fn record(
        &self,
        instrument: &str,
        side: Side,
        execution: &Execution,
        rsi: Option<f64>,
        bucket: Option<RsiBucket>,
        reason: &str,
    ) {
        let fill = execution.fill;
        let text = trade_report(&TradeReport {
            instrument,
            side,
            price: fill.price,
            quantity: fill.quantity,
            rsi,
            bucket,
            reason,
        });
        info!(instrument, %side, price = fill.price, quantity = fill.quantity, reason, "trade executed");

        let trade = TradeRecord {
            instrument: instrument.to_string(),
            side,
            price: fill.price,
            quantity: fill.quantity,
            rsi,
            bucket: bucket.and_then(RsiBucket::level),
            reason: reason.to_string(),
            order_id: execution.order_id.clone(),
            executed_at: Utc::now(),
        };
        if let Err(e) = self.storage.record_trade(trade).await {
            warn!(instrument, error = ?e, "failed to journal trade");
        }
        self.notify(Channel::Trade, &text).await;
    }

    async fn handle_error(&mut self, instrument: &str, report: Report<TradeError>) {
        let context = report.current_context();
        if context.halts_instrument() {
            self.tracker.halt(instrument);
            error!(instrument, error = ?report, "bucket state diverged, instrument halted");
            match self.storage.save_halt(instrument, &context.to_string()).await {
                Ok(()) => {
                    self.persisted_halts.insert(instrument.to_string());
                }
                Err(e) => warn!(instrument, error = ?e, "failed to persist halt"),
            }
            let text = error_report(
                instrument,
                "trading halted until reconciled",
                &format!("{report:?}"),
            );
            self.notify(Channel::Error, &text).await;
            return;
        }

        match context {
            TradeError::InsufficientData { .. } => {
                debug!(instrument, "not enough candles yet");
            }
            TradeError::StaleMarketData { .. } => {
                warn!(instrument, error = ?report, "stale market data, skipping");
            }
            _ => {
                warn!(instrument, error = ?report, "cycle failed");
                let text = error_report(instrument, &context.to_string(), &format!("{report:?}"));
                self.notify(Channel::Error, &text).await;
            }
        }
    }

    async fn notify(&self, channel: Channel, text: &str) {
        if let Err(e) = self.notifier.notify(channel, text).await {
            warn!(%channel, error = ?e, "notification failed");
        }
    }
}

/// An exit order executed nothing: the book still holds the position the
/// exchange reports, but the exit the strategy decided on did not happen.
fn unfilled(instrument: &str, what: &str) -> Report<TradeError> {
    Report::new(TradeError::BucketInvariant {
        instrument: instrument.to_string(),
    })
    .attach(format!("{what} executed nothing; position kept"))
}

/// What an order actually filled.
#[derive(Debug, Clone)]
struct Execution {
    order_id: String,
    fill: Fill,
}

fn executed(order: &Order) -> Option<Execution> {
    order.average_price().map(|price| Execution {
        order_id: order.id.clone(),
        fill: Fill {
            price,
            quantity: order.executed_quantity(),
        },
    })
}

/// Floor to the 8 decimals exchanges accept for coin quantities.
fn round_quantity(quantity: f64) -> f64 {
    if quantity <= 0.0 {
        return 0.0;
    }
    (quantity * 1e8).floor() / 1e8
}
