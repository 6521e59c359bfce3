pub mod auth;
pub mod paper;
pub mod upbit;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::ExchangeError;
use crate::model::{Balance, Candle, Order, Side, TimeFrame};

/// Abstraction over a KRW spot exchange.
///
/// Uses `BoxFuture` (from `futures` crate) instead of `async fn` in trait
/// to keep the trait object-safe (`dyn Exchange`).
pub trait Exchange: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch the most recent `count` candles, oldest first.
    fn get_candles(
        &self,
        instrument: &str,
        timeframe: TimeFrame,
        count: usize,
    ) -> BoxFuture<'_, Result<Vec<Candle>, Report<ExchangeError>>>;

    /// Last traded price, `None` if the market reports none.
    fn get_current_price(
        &self,
        instrument: &str,
    ) -> BoxFuture<'_, Result<Option<f64>, Report<ExchangeError>>>;

    fn get_balances(&self) -> BoxFuture<'_, Result<Vec<Balance>, Report<ExchangeError>>>;

    /// Market order. `amount` is KRW to spend for a buy and coin quantity
    /// for a sell.
    fn place_market_order(
        &self,
        instrument: &str,
        side: Side,
        amount: f64,
    ) -> BoxFuture<'_, Result<Order, Report<ExchangeError>>>;

    fn place_limit_order(
        &self,
        instrument: &str,
        side: Side,
        price: f64,
        quantity: f64,
    ) -> BoxFuture<'_, Result<Order, Report<ExchangeError>>>;

    fn get_order(&self, id: &str) -> BoxFuture<'_, Result<Order, Report<ExchangeError>>>;

    fn cancel_order(&self, id: &str) -> BoxFuture<'_, Result<(), Report<ExchangeError>>>;
}
