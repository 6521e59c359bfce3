use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use error_stack::{Report, bail};
use futures::future::BoxFuture;
use tracing::info;
use uuid::Uuid;

use crate::error::ExchangeError;
use crate::exchange::Exchange;
use crate::model::{Balance, Candle, Fill, Order, OrderState, Side, TimeFrame, currency_of};

const EXCHANGE: &str = "paper";

#[derive(Debug, Default)]
struct PaperState {
    krw: f64,
    /// currency -> (quantity, average cost)
    holdings: HashMap<String, (f64, f64)>,
    candles: HashMap<String, Vec<Candle>>,
    orders: HashMap<String, Order>,
}

/// In-memory exchange that fills orders at the latest close.
///
/// Built with [`with_market`](Self::with_market), candles and prices come
/// from a live exchange's public data; tests seed them directly.
pub struct PaperExchange {
    market: Option<Arc<dyn Exchange>>,
    fee_rate: f64,
    state: Mutex<PaperState>,
}

impl PaperExchange {
    pub fn new(krw: f64, fee_bps: f64) -> Self {
        Self {
            market: None,
            fee_rate: fee_bps / 10_000.0,
            state: Mutex::new(PaperState {
                krw,
                ..PaperState::default()
            }),
        }
    }

    pub fn with_market(krw: f64, fee_bps: f64, market: Arc<dyn Exchange>) -> Self {
        Self {
            market: Some(market),
            ..Self::new(krw, fee_bps)
        }
    }

    #[cfg(test)]
    pub fn set_candles(&self, instrument: &str, candles: Vec<Candle>) {
        self.lock().candles.insert(instrument.to_owned(), candles);
    }

    /// Credit a coin holding, e.g. one that predates the bot.
    #[cfg(test)]
    pub fn deposit(&self, currency: &str, quantity: f64, avg_cost: f64) {
        self.lock()
            .holdings
            .insert(currency.to_owned(), (quantity, avg_cost));
    }

    #[cfg(test)]
    pub fn krw(&self) -> f64 {
        self.lock().krw
    }

    #[cfg(test)]
    pub fn holding(&self, currency: &str) -> f64 {
        self.lock()
            .holdings
            .get(currency)
            .map(|(q, _)| *q)
            .unwrap_or(0.0)
    }

    fn lock(&self) -> MutexGuard<'_, PaperState> {
        // state stays consistent across a panicking test thread
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn last_price(&self, instrument: &str) -> Result<f64, Report<ExchangeError>> {
        let stored = self
            .lock()
            .candles
            .get(instrument)
            .and_then(|c| c.last())
            .map(|c| c.close);
        let price = match (stored, &self.market) {
            (Some(price), _) => Some(price),
            (None, Some(market)) => market.get_current_price(instrument).await?,
            (None, None) => None,
        };
        price.ok_or_else(|| {
            Report::new(ExchangeError::Rejected {
                exchange: EXCHANGE.into(),
                reason: format!("no price for {instrument}"),
            })
        })
    }

    fn rejected(reason: String) -> Report<ExchangeError> {
        Report::new(ExchangeError::Rejected {
            exchange: EXCHANGE.into(),
            reason,
        })
    }

    /// Apply a fill to the balances; the caller has checked it is affordable.
    fn settle(&self, state: &mut PaperState, instrument: &str, side: Side, fill: Fill) {
        let currency = currency_of(instrument).to_owned();
        let notional = fill.price * fill.quantity;
        match side {
            Side::Buy => {
                state.krw -= notional * (1.0 + self.fee_rate);
                let (quantity, avg_cost) = state.holdings.entry(currency).or_insert((0.0, 0.0));
                let total = *quantity + fill.quantity;
                *avg_cost = (*quantity * *avg_cost + notional) / total;
                *quantity = total;
            }
            Side::Sell => {
                state.krw += notional * (1.0 - self.fee_rate);
                if let Some((quantity, _)) = state.holdings.get_mut(&currency) {
                    *quantity -= fill.quantity;
                    if *quantity <= 1e-12 {
                        state.holdings.remove(&currency);
                    }
                }
            }
        }
    }

    fn check_affordable(
        &self,
        state: &PaperState,
        instrument: &str,
        side: Side,
        price: f64,
        quantity: f64,
    ) -> Result<(), Report<ExchangeError>> {
        if !(quantity > 0.0 && price > 0.0) {
            bail!(ExchangeError::Rejected {
                exchange: EXCHANGE.into(),
                reason: format!("invalid order size {quantity} @ {price}"),
            });
        }
        match side {
            Side::Buy => {
                let cost = price * quantity * (1.0 + self.fee_rate);
                if cost > state.krw + 1e-9 {
                    return Err(Self::rejected(format!(
                        "insufficient KRW: need {cost:.0}, have {:.0}",
                        state.krw
                    )));
                }
            }
            Side::Sell => {
                let held = state
                    .holdings
                    .get(currency_of(instrument))
                    .map(|(q, _)| *q)
                    .unwrap_or(0.0);
                if quantity > held + 1e-12 {
                    return Err(Self::rejected(format!(
                        "insufficient {}: need {quantity}, have {held}",
                        currency_of(instrument)
                    )));
                }
            }
        }
        Ok(())
    }

    fn record(&self, state: &mut PaperState, order: Order) -> Order {
        info!(
            exchange = EXCHANGE,
            symbol = %order.instrument,
            side = %order.side,
            quantity = order.executed_quantity(),
            price = order.average_price().unwrap_or(0.0),
            "paper order"
        );
        state.orders.insert(order.id.clone(), order.clone());
        order
    }
}

impl Exchange for PaperExchange {
    fn name(&self) -> &str {
        EXCHANGE
    }

    fn get_candles(
        &self,
        instrument: &str,
        timeframe: TimeFrame,
        count: usize,
    ) -> BoxFuture<'_, Result<Vec<Candle>, Report<ExchangeError>>> {
        let instrument = instrument.to_owned();
        Box::pin(async move {
            let stored = self.lock().candles.get(&instrument).map(|candles| {
                let start = candles.len().saturating_sub(count);
                candles[start..].to_vec()
            });
            match (stored, &self.market) {
                (Some(candles), _) => Ok(candles),
                (None, Some(market)) => market.get_candles(&instrument, timeframe, count).await,
                (None, None) => Ok(Vec::new()),
            }
        })
    }

    fn get_current_price(
        &self,
        instrument: &str,
    ) -> BoxFuture<'_, Result<Option<f64>, Report<ExchangeError>>> {
        let instrument = instrument.to_owned();
        Box::pin(async move {
            match self.last_price(&instrument).await {
                Ok(price) => Ok(Some(price)),
                Err(e) if matches!(e.current_context(), ExchangeError::Rejected { .. }) => Ok(None),
                Err(e) => Err(e),
            }
        })
    }

    fn get_balances(&self) -> BoxFuture<'_, Result<Vec<Balance>, Report<ExchangeError>>> {
        Box::pin(async move {
            let state = self.lock();
            let mut balances = vec![Balance {
                currency: "KRW".into(),
                quantity: state.krw,
                avg_cost: 0.0,
            }];
            balances.extend(state.holdings.iter().map(|(currency, (quantity, avg_cost))| {
                Balance {
                    currency: currency.clone(),
                    quantity: *quantity,
                    avg_cost: *avg_cost,
                }
            }));
            Ok(balances)
        })
    }

    fn place_market_order(
        &self,
        instrument: &str,
        side: Side,
        amount: f64,
    ) -> BoxFuture<'_, Result<Order, Report<ExchangeError>>> {
        let instrument = instrument.to_owned();
        Box::pin(async move {
            let price = self.last_price(&instrument).await?;
            let quantity = match side {
                Side::Buy => amount / price,
                Side::Sell => amount,
            };

            let mut state = self.lock();
            self.check_affordable(&state, &instrument, side, price, quantity)?;
            let fill = Fill { price, quantity };
            self.settle(&mut state, &instrument, side, fill);
            let order = Order {
                id: Uuid::new_v4().to_string(),
                instrument,
                side,
                state: OrderState::Done,
                fills: vec![fill],
            };
            Ok(self.record(&mut state, order))
        })
    }

    /// Fills immediately at the limit price when marketable, otherwise
    /// rests until cancelled.
    fn place_limit_order(
        &self,
        instrument: &str,
        side: Side,
        price: f64,
        quantity: f64,
    ) -> BoxFuture<'_, Result<Order, Report<ExchangeError>>> {
        let instrument = instrument.to_owned();
        Box::pin(async move {
            let last = self.last_price(&instrument).await?;
            let marketable = match side {
                Side::Buy => price >= last,
                Side::Sell => price <= last,
            };

            let mut state = self.lock();
            self.check_affordable(&state, &instrument, side, price, quantity)?;
            let mut order = Order {
                id: Uuid::new_v4().to_string(),
                instrument,
                side,
                state: OrderState::Wait,
                fills: vec![],
            };
            if marketable {
                let fill = Fill { price, quantity };
                self.settle(&mut state, &order.instrument, side, fill);
                order.state = OrderState::Done;
                order.fills.push(fill);
            }
            Ok(self.record(&mut state, order))
        })
    }

    fn get_order(&self, id: &str) -> BoxFuture<'_, Result<Order, Report<ExchangeError>>> {
        let id = id.to_owned();
        Box::pin(async move {
            let order = self.lock().orders.get(&id).cloned();
            order.ok_or_else(|| {
                Report::new(ExchangeError::OrderNotFound {
                    exchange: EXCHANGE.into(),
                    id,
                })
            })
        })
    }

    fn cancel_order(&self, id: &str) -> BoxFuture<'_, Result<(), Report<ExchangeError>>> {
        let id = id.to_owned();
        Box::pin(async move {
            let mut state = self.lock();
            let Some(order) = state.orders.get_mut(&id) else {
                bail!(ExchangeError::OrderNotFound {
                    exchange: EXCHANGE.into(),
                    id,
                });
            };
            if order.state != OrderState::Wait {
                bail!(ExchangeError::Rejected {
                    exchange: EXCHANGE.into(),
                    reason: format!("order {id} is not open"),
                });
            }
            order.state = OrderState::Cancel;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::test_support::candles_from_closes;

    fn exchange(krw: f64) -> PaperExchange {
        let exchange = PaperExchange::new(krw, 0.0);
        let mut candles = candles_from_closes(&[90.0, 100.0]);
        for c in &mut candles {
            c.symbol = "KRW-BTC".into();
        }
        exchange.set_candles("KRW-BTC", candles);
        exchange
    }

    #[tokio::test]
    async fn market_buy_spends_krw_at_last_close() {
        let exchange = exchange(10_000.0);
        let order = exchange
            .place_market_order("KRW-BTC", Side::Buy, 5_000.0)
            .await
            .unwrap();
        assert_eq!(order.state, OrderState::Done);
        assert!((order.executed_quantity() - 50.0).abs() < 1e-9);
        assert!((exchange.krw() - 5_000.0).abs() < 1e-9);
        assert!((exchange.holding("BTC") - 50.0).abs() < 1e-9);
        assert_eq!(exchange.get_order(&order.id).await.unwrap().state, OrderState::Done);
    }

    #[tokio::test]
    async fn buys_average_cost() {
        let exchange = exchange(100_000.0);
        exchange.deposit("BTC", 10.0, 80.0);
        exchange
            .place_market_order("KRW-BTC", Side::Buy, 1_000.0)
            .await
            .unwrap();
        let balances = exchange.get_balances().await.unwrap();
        let btc = balances.iter().find(|b| b.currency == "BTC").unwrap();
        assert!((btc.quantity - 20.0).abs() < 1e-9);
        assert!((btc.avg_cost - 90.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn insufficient_funds_rejected() {
        let exchange = exchange(1_000.0);
        let err = exchange
            .place_market_order("KRW-BTC", Side::Buy, 5_000.0)
            .await
            .unwrap_err();
        assert!(matches!(err.current_context(), ExchangeError::Rejected { .. }));
        assert!(
            exchange
                .place_market_order("KRW-BTC", Side::Sell, 1.0)
                .await
                .is_err()
        );
        assert_eq!(exchange.krw(), 1_000.0);
    }

    #[tokio::test]
    async fn fee_is_charged_on_both_sides() {
        let exchange = PaperExchange::new(10_000.0, 50.0);
        let mut candles = candles_from_closes(&[100.0]);
        candles[0].symbol = "KRW-BTC".into();
        exchange.set_candles("KRW-BTC", candles);

        exchange
            .place_market_order("KRW-BTC", Side::Buy, 1_000.0)
            .await
            .unwrap();
        assert!((exchange.krw() - 8_995.0).abs() < 1e-9);
        exchange
            .place_market_order("KRW-BTC", Side::Sell, 10.0)
            .await
            .unwrap();
        assert!((exchange.krw() - 9_990.0).abs() < 1e-9);
        assert_eq!(exchange.holding("BTC"), 0.0);
    }

    #[tokio::test]
    async fn resting_limit_order_can_be_cancelled() {
        let exchange = exchange(10_000.0);
        let order = exchange
            .place_limit_order("KRW-BTC", Side::Buy, 95.0, 10.0)
            .await
            .unwrap();
        assert_eq!(order.state, OrderState::Wait);
        exchange.cancel_order(&order.id).await.unwrap();
        assert_eq!(exchange.get_order(&order.id).await.unwrap().state, OrderState::Cancel);
        assert!(exchange.cancel_order(&order.id).await.is_err());
        assert_eq!(exchange.krw(), 10_000.0);
    }

    #[tokio::test]
    async fn marketable_limit_order_fills() {
        let exchange = exchange(10_000.0);
        let order = exchange
            .place_limit_order("KRW-BTC", Side::Buy, 100.5, 10.0)
            .await
            .unwrap();
        assert_eq!(order.state, OrderState::Done);
        assert!((exchange.krw() - 8_995.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unknown_instrument_has_no_price() {
        let exchange = exchange(10_000.0);
        assert_eq!(exchange.get_current_price("KRW-XRP").await.unwrap(), None);
        assert!(exchange.get_candles("KRW-XRP", TimeFrame::Min1, 10).await.unwrap().is_empty());
        assert!(exchange.get_order("missing").await.is_err());
    }
}
