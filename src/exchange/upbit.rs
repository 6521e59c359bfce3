use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use error_stack::{Report, ResultExt, bail};
use futures::future::BoxFuture;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::ExchangeError;
use crate::exchange::Exchange;
use crate::exchange::auth::Credentials;
use crate::model::{Balance, Candle, Fill, Order, OrderState, Side, TimeFrame};

const UPBIT_BASE_URL: &str = "https://api.upbit.com";
const MAX_CANDLES_PER_REQUEST: usize = 200;
const EXCHANGE: &str = "upbit";

pub struct UpbitExchange {
    client: reqwest::Client,
    credentials: Option<Credentials>,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl UpbitExchange {
    /// Public endpoints only; private calls fail with an auth error.
    pub fn public() -> Self {
        Self::with_credentials(None)
    }

    pub fn new(credentials: Credentials) -> Self {
        Self::with_credentials(Some(credentials).filter(|c| !c.is_empty()))
    }

    fn with_credentials(credentials: Option<Credentials>) -> Self {
        // Upbit allows 10 req/s; stay under it
        let quota = Quota::per_second(nonzero!(8u32));
        Self {
            client: reqwest::Client::new(),
            credentials,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    fn credentials(&self) -> Result<&Credentials, Report<ExchangeError>> {
        self.credentials.as_ref().ok_or_else(|| {
            Report::new(ExchangeError::Auth {
                exchange: EXCHANGE.into(),
            })
            .attach("no Upbit API keys configured")
        })
    }

    /// Build a request whose URL query (or JSON body, for POST) is exactly
    /// `params`, signed when `private`.
    fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        private: bool,
    ) -> Result<RequestBuilder, Report<ExchangeError>> {
        let query = encode_query(params);
        let mut url = format!("{UPBIT_BASE_URL}{path}");
        if method != Method::POST && !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }

        let mut builder = self.client.request(method.clone(), &url);
        if method == Method::POST {
            let body: serde_json::Map<String, serde_json::Value> = params
                .iter()
                .map(|(k, v)| ((*k).to_owned(), serde_json::Value::String(v.clone())))
                .collect();
            builder = builder.json(&body);
        }
        if private {
            let header = self.credentials()?.authorization(Some(&query))?;
            builder = builder.header(reqwest::header::AUTHORIZATION, header);
        }
        Ok(builder)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<T, Report<ExchangeError>> {
        self.rate_limiter.until_ready().await;

        let response = builder.send().await.change_context(ExchangeError::Request {
            exchange: EXCHANGE.into(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.is_client_error() {
                if let Ok(err) = serde_json::from_str::<UpbitErrorBody>(&body) {
                    bail!(ExchangeError::Rejected {
                        exchange: EXCHANGE.into(),
                        reason: format!("{}: {}", err.error.name, err.error.message),
                    });
                }
            }
            return Err(Report::new(ExchangeError::Request {
                exchange: EXCHANGE.into(),
            })
            .attach(format!("HTTP status: {status}"))
            .attach(body));
        }

        response.json().await.change_context(ExchangeError::ResponseParse {
            exchange: EXCHANGE.into(),
        })
    }

    async fn fetch_candles_page(
        &self,
        instrument: &str,
        timeframe: TimeFrame,
        count: usize,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<UpbitCandle>, Report<ExchangeError>> {
        let mut params = vec![
            ("market", instrument.to_owned()),
            ("count", count.to_string()),
        ];
        if let Some(to) = to {
            params.push(("to", to.format("%Y-%m-%dT%H:%M:%SZ").to_string()));
        }
        let request = self.request(Method::GET, timeframe.upbit_endpoint(), &params, false)?;
        self.send(request).await
    }
}

impl Exchange for UpbitExchange {
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
            let mut all_candles: Vec<Candle> = Vec::with_capacity(count);
            let mut to: Option<DateTime<Utc>> = None;
            let mut remaining = count;

            while remaining > 0 {
                let page_size = remaining.min(MAX_CANDLES_PER_REQUEST);
                let page = self
                    .fetch_candles_page(&instrument, timeframe, page_size, to)
                    .await?;
                if page.is_empty() {
                    break;
                }

                let fetched = page.len();
                for raw in page {
                    all_candles.push(raw.into_candle(&instrument, timeframe)?);
                }
                remaining = remaining.saturating_sub(fetched);
                if fetched < page_size {
                    break;
                }
                // pages run newest to oldest
                to = all_candles.last().map(|c| c.open_time);

                info!(
                    symbol = %instrument,
                    timeframe = %timeframe,
                    fetched = all_candles.len(),
                    total = count,
                    "upbit candle fetch progress"
                );
            }

            all_candles.reverse();
            Ok(all_candles)
        })
    }

    fn get_current_price(
        &self,
        instrument: &str,
    ) -> BoxFuture<'_, Result<Option<f64>, Report<ExchangeError>>> {
        let instrument = instrument.to_owned();
        Box::pin(async move {
            let request = self.request(
                Method::GET,
                "/v1/ticker",
                &[("markets", instrument.clone())],
                false,
            )?;
            let tickers: Vec<UpbitTicker> = self.send(request).await?;
            Ok(tickers
                .into_iter()
                .find(|t| t.market == instrument)
                .map(|t| t.trade_price))
        })
    }

    fn get_balances(&self) -> BoxFuture<'_, Result<Vec<Balance>, Report<ExchangeError>>> {
        Box::pin(async move {
            let request = self.request(Method::GET, "/v1/accounts", &[], true)?;
            let accounts: Vec<UpbitAccount> = self.send(request).await?;
            accounts.into_iter().map(UpbitAccount::into_balance).collect()
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
            let mut params = vec![
                ("market", instrument.clone()),
                ("side", side.upbit_side().to_owned()),
            ];
            match side {
                Side::Buy => {
                    params.push(("price", format_decimal(amount.floor())));
                    params.push(("ord_type", "price".to_owned()));
                }
                Side::Sell => {
                    params.push(("volume", format_decimal(amount)));
                    params.push(("ord_type", "market".to_owned()));
                }
            }
            debug!(symbol = %instrument, side = %side, amount, "upbit market order");
            let request = self.request(Method::POST, "/v1/orders", &params, true)?;
            let order: UpbitOrder = self.send(request).await?;
            order.into_order()
        })
    }

    fn place_limit_order(
        &self,
        instrument: &str,
        side: Side,
        price: f64,
        quantity: f64,
    ) -> BoxFuture<'_, Result<Order, Report<ExchangeError>>> {
        let instrument = instrument.to_owned();
        Box::pin(async move {
            let params = vec![
                ("market", instrument.clone()),
                ("side", side.upbit_side().to_owned()),
                ("volume", format_decimal(quantity)),
                ("price", format_decimal(round_to_tick(price))),
                ("ord_type", "limit".to_owned()),
            ];
            debug!(symbol = %instrument, side = %side, price, quantity, "upbit limit order");
            let request = self.request(Method::POST, "/v1/orders", &params, true)?;
            let order: UpbitOrder = self.send(request).await?;
            order.into_order()
        })
    }

    fn get_order(&self, id: &str) -> BoxFuture<'_, Result<Order, Report<ExchangeError>>> {
        let id = id.to_owned();
        Box::pin(async move {
            let request = self.request(Method::GET, "/v1/order", &[("uuid", id.clone())], true)?;
            let order: UpbitOrder = self.send(request).await.map_err(|e| {
                if matches!(e.current_context(), ExchangeError::Rejected { .. }) {
                    e.change_context(ExchangeError::OrderNotFound {
                        exchange: EXCHANGE.into(),
                        id: id.clone(),
                    })
                } else {
                    e
                }
            })?;
            order.into_order()
        })
    }

    fn cancel_order(&self, id: &str) -> BoxFuture<'_, Result<(), Report<ExchangeError>>> {
        let id = id.to_owned();
        Box::pin(async move {
            let request = self.request(Method::DELETE, "/v1/order", &[("uuid", id)], true)?;
            let _: UpbitOrder = self.send(request).await?;
            Ok(())
        })
    }
}

fn encode_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn format_decimal(value: f64) -> String {
    // f64 Display never switches to exponent notation
    let s = format!("{value}");
    s.strip_suffix(".0").map(str::to_owned).unwrap_or(s)
}

/// Round a KRW price to the exchange's price unit.
pub fn round_to_tick(price: f64) -> f64 {
    let tick = match price {
        p if p >= 2_000_000.0 => 1_000.0,
        p if p >= 1_000_000.0 => 500.0,
        p if p >= 500_000.0 => 100.0,
        p if p >= 100_000.0 => 50.0,
        p if p >= 10_000.0 => 10.0,
        p if p >= 1_000.0 => 5.0,
        p if p >= 100.0 => 1.0,
        p if p >= 10.0 => 0.1,
        p if p >= 1.0 => 0.01,
        _ => 0.0001,
    };
    let rounded = (price / tick).round() * tick;
    // trim float noise from fractional ticks
    (rounded * 10_000.0).round() / 10_000.0
}

fn parse_decimal(value: &str, field: &str) -> Result<f64, Report<ExchangeError>> {
    value
        .parse::<f64>()
        .change_context(ExchangeError::ResponseParse {
            exchange: EXCHANGE.into(),
        })
        .attach_with(|| format!("{field}: {value:?}"))
}

// ── REST response types ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct UpbitErrorBody {
    error: UpbitErrorDetail,
}

#[derive(Debug, Deserialize)]
struct UpbitErrorDetail {
    name: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct UpbitCandle {
    candle_date_time_utc: String,
    opening_price: f64,
    high_price: f64,
    low_price: f64,
    trade_price: f64,
    candle_acc_trade_volume: f64,
}

impl UpbitCandle {
    fn into_candle(self, symbol: &str, timeframe: TimeFrame) -> Result<Candle, Report<ExchangeError>> {
        let open_time = NaiveDateTime::parse_from_str(&self.candle_date_time_utc, "%Y-%m-%dT%H:%M:%S")
            .change_context(ExchangeError::ResponseParse {
                exchange: EXCHANGE.into(),
            })
            .attach_with(|| format!("candle_date_time_utc: {}", self.candle_date_time_utc))?
            .and_utc();

        Ok(Candle {
            symbol: symbol.to_owned(),
            timeframe,
            open_time,
            open: self.opening_price,
            high: self.high_price,
            low: self.low_price,
            close: self.trade_price,
            volume: self.candle_acc_trade_volume,
        })
    }
}

#[derive(Debug, Deserialize)]
struct UpbitTicker {
    market: String,
    trade_price: f64,
}

#[derive(Debug, Deserialize)]
struct UpbitAccount {
    currency: String,
    balance: String,
    avg_buy_price: String,
}

impl UpbitAccount {
    fn into_balance(self) -> Result<Balance, Report<ExchangeError>> {
        Ok(Balance {
            quantity: parse_decimal(&self.balance, "balance")?,
            avg_cost: parse_decimal(&self.avg_buy_price, "avg_buy_price")?,
            currency: self.currency,
        })
    }
}

#[derive(Debug, Deserialize)]
struct UpbitOrder {
    uuid: String,
    side: String,
    state: String,
    market: String,
    #[serde(default)]
    trades: Vec<UpbitOrderTrade>,
}

#[derive(Debug, Deserialize)]
struct UpbitOrderTrade {
    price: String,
    volume: String,
}

impl UpbitOrder {
    fn into_order(self) -> Result<Order, Report<ExchangeError>> {
        let side = match self.side.as_str() {
            "bid" => Side::Buy,
            "ask" => Side::Sell,
            other => bail!(ExchangeError::ResponseParse {
                exchange: format!("{EXCHANGE} (order side {other:?})"),
            }),
        };
        let state = OrderState::from_upbit(&self.state).ok_or_else(|| {
            Report::new(ExchangeError::ResponseParse {
                exchange: EXCHANGE.into(),
            })
            .attach(format!("order state: {:?}", self.state))
        })?;
        let fills = self
            .trades
            .iter()
            .map(|t| {
                Ok(Fill {
                    price: parse_decimal(&t.price, "trade price")?,
                    quantity: parse_decimal(&t.volume, "trade volume")?,
                })
            })
            .collect::<Result<Vec<_>, Report<ExchangeError>>>()?;

        Ok(Order {
            id: self.uuid,
            instrument: self.market,
            side,
            state,
            fills,
        })
    }
}
