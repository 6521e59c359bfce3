use std::fmt;

use chrono::{DateTime, Utc};
use error_stack::Report;
use serde::Deserialize;

use crate::error::MarketDataError;

/// Candle timeframe supported by the application.
///
/// String representations match the config file format (e.g. `"1m"`, `"1h"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum TimeFrame {
    Min1,
    Min3,
    Min5,
    Min15,
    Min30,
    Hour1,
    Hour4,
    Day1,
}

impl TimeFrame {
    /// Parse a config-format string into a `TimeFrame`.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Self::Min1),
            "3m" => Some(Self::Min3),
            "5m" => Some(Self::Min5),
            "15m" => Some(Self::Min15),
            "30m" => Some(Self::Min30),
            "1h" => Some(Self::Hour1),
            "4h" => Some(Self::Hour4),
            "1d" => Some(Self::Day1),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Min1 => "1m",
            Self::Min3 => "3m",
            Self::Min5 => "5m",
            Self::Min15 => "15m",
            Self::Min30 => "30m",
            Self::Hour1 => "1h",
            Self::Hour4 => "4h",
            Self::Day1 => "1d",
        }
    }

    /// Upbit REST path for candles of this timeframe.
    pub fn upbit_endpoint(self) -> &'static str {
        match self {
            Self::Min1 => "/v1/candles/minutes/1",
            Self::Min3 => "/v1/candles/minutes/3",
            Self::Min5 => "/v1/candles/minutes/5",
            Self::Min15 => "/v1/candles/minutes/15",
            Self::Min30 => "/v1/candles/minutes/30",
            Self::Hour1 => "/v1/candles/minutes/60",
            Self::Hour4 => "/v1/candles/minutes/240",
            Self::Day1 => "/v1/candles/days",
        }
    }
}

impl TryFrom<String> for TimeFrame {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_str(&value).ok_or_else(|| format!("unknown timeframe \"{value}\""))
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One OHLCV bar. `open_time` is the start of the interval in UTC.
#[derive(Debug, Clone)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: TimeFrame,
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Upbit order side (`bid` / `ask`).
    pub fn upbit_side(self) -> &'static str {
        match self {
            Self::Buy => "bid",
            Self::Sell => "ask",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    /// Accepted and still waiting to be (fully) filled.
    Wait,
    Done,
    Cancel,
}

impl OrderState {
    pub fn from_upbit(s: &str) -> Option<Self> {
        match s {
            "wait" | "watch" => Some(Self::Wait),
            "done" => Some(Self::Done),
            "cancel" => Some(Self::Cancel),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fill {
    pub price: f64,
    pub quantity: f64,
}

#[derive(Debug, Clone)]
pub struct Order {
    pub id: String,
    pub instrument: String,
    pub side: Side,
    pub state: OrderState,
    pub fills: Vec<Fill>,
}

impl Order {
    pub fn executed_quantity(&self) -> f64 {
        self.fills.iter().map(|f| f.quantity).sum()
    }

    /// Volume-weighted fill price, `None` when nothing was executed.
    pub fn average_price(&self) -> Option<f64> {
        let quantity = self.executed_quantity();
        if quantity <= 0.0 {
            return None;
        }
        let notional: f64 = self.fills.iter().map(|f| f.price * f.quantity).sum();
        Some(notional / quantity)
    }
}

/// Holding of one currency as reported by the exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Balance {
    pub currency: String,
    pub quantity: f64,
    /// Average acquisition cost in KRW (0 for KRW itself).
    pub avg_cost: f64,
}

/// Valuation of a single coin holding.
#[derive(Debug, Clone, PartialEq)]
pub struct CoinInfo {
    pub instrument: String,
    pub currency: String,
    pub quantity: f64,
    pub avg_cost: f64,
    pub current_price: f64,
    /// Current value in KRW.
    pub value: f64,
    /// Unrealised profit in percent of the cost basis.
    pub profit_rate: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssetSnapshot {
    pub krw_balance: f64,
    pub coins: Vec<CoinInfo>,
    pub total_asset: f64,
}

impl AssetSnapshot {
    /// Value the tracked instruments against current prices.
    ///
    /// Instruments without a balance are reported with zero quantity. A
    /// missing price for any tracked instrument makes the whole snapshot
    /// stale.
    pub fn from_balances(
        balances: &[Balance],
        instruments: &[String],
        prices: &[(String, Option<f64>)],
    ) -> Result<Self, Report<MarketDataError>> {
        let krw_balance = balances
            .iter()
            .find(|b| b.currency == "KRW")
            .map(|b| b.quantity)
            .unwrap_or(0.0);

        let mut coins = Vec::with_capacity(instruments.len());
        for instrument in instruments {
            let currency = currency_of(instrument);
            let current_price = prices
                .iter()
                .find(|(name, _)| name == instrument)
                .and_then(|(_, price)| *price)
                .filter(|p| p.is_finite() && *p > 0.0)
                .ok_or_else(|| {
                    Report::new(MarketDataError::Stale {
                        instrument: instrument.clone(),
                    })
                })?;

            let (quantity, avg_cost) = balances
                .iter()
                .find(|b| b.currency == currency)
                .map(|b| (b.quantity, b.avg_cost))
                .unwrap_or((0.0, 0.0));

            let profit_rate = if avg_cost > 0.0 {
                (current_price / avg_cost - 1.0) * 100.0
            } else {
                0.0
            };

            coins.push(CoinInfo {
                instrument: instrument.clone(),
                currency: currency.to_string(),
                quantity,
                avg_cost,
                current_price,
                value: quantity * current_price,
                profit_rate,
            });
        }

        let total_asset = krw_balance + coins.iter().map(|c| c.value).sum::<f64>();
        Ok(Self {
            krw_balance,
            coins,
            total_asset,
        })
    }

    pub fn coin(&self, instrument: &str) -> Option<&CoinInfo> {
        self.coins.iter().find(|c| c.instrument == instrument)
    }
}

/// Journal entry for an executed order.
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub instrument: String,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    pub rsi: Option<f64>,
    /// Bucket level (20/25/30/35) the trade opened or closed, if any.
    pub bucket: Option<u8>,
    pub reason: String,
    pub order_id: String,
    pub executed_at: DateTime<Utc>,
}

/// `"KRW-BTC"` -> `"BTC"`.
pub fn currency_of(instrument: &str) -> &str {
    instrument
        .split_once('-')
        .map(|(_, coin)| coin)
        .unwrap_or(instrument)
}
