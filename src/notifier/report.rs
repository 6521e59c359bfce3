//! Plain-text bodies for operator messages.

use std::fmt::Write;

use crate::model::{AssetSnapshot, Side};
use crate::position::bucket::RsiBucket;

pub fn asset_report(snapshot: &AssetSnapshot) -> String {
    let mut out = String::from("[asset report]\n");
    for coin in &snapshot.coins {
        if coin.quantity <= 0.0 {
            continue;
        }
        let _ = writeln!(
            out,
            "{}: {:.8} @ avg {:.2} / now {:.2} = {:.0} KRW ({:+.2}%)",
            coin.currency, coin.quantity, coin.avg_cost, coin.current_price, coin.value, coin.profit_rate
        );
    }
    let _ = writeln!(out, "KRW: {:.0}", snapshot.krw_balance);
    let _ = write!(out, "total: {:.0} KRW", snapshot.total_asset);
    out
}

#[derive(Debug, Clone)]
pub struct TradeReport<'a> {
    pub instrument: &'a str,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    pub rsi: Option<f64>,
    pub bucket: Option<RsiBucket>,
    pub reason: &'a str,
}

pub fn trade_report(trade: &TradeReport<'_>) -> String {
    let mut out = format!(
        "[{}] {} {:.8} @ {:.2} ({:.0} KRW)",
        trade.side,
        trade.instrument,
        trade.quantity,
        trade.price,
        trade.price * trade.quantity
    );
    if let Some(rsi) = trade.rsi {
        let _ = write!(out, " rsi {rsi:.2}");
    }
    if let Some(bucket) = trade.bucket {
        let _ = write!(out, " bucket {bucket}");
    }
    let _ = write!(out, " - {}", trade.reason);
    out
}

pub fn error_report(instrument: &str, summary: &str, detail: &str) -> String {
    format!("[error] {instrument}: {summary}\n{detail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CoinInfo;

    #[test]
    fn asset_report_skips_empty_holdings() {
        let snapshot = AssetSnapshot {
            krw_balance: 50_000.0,
            coins: vec![
                CoinInfo {
                    instrument: "KRW-BTC".into(),
                    currency: "BTC".into(),
                    quantity: 0.001,
                    avg_cost: 50_000_000.0,
                    current_price: 51_000_000.0,
                    value: 51_000.0,
                    profit_rate: 2.0,
                },
                CoinInfo {
                    instrument: "KRW-ETH".into(),
                    currency: "ETH".into(),
                    quantity: 0.0,
                    avg_cost: 0.0,
                    current_price: 3_000_000.0,
                    value: 0.0,
                    profit_rate: 0.0,
                },
            ],
            total_asset: 101_000.0,
        };
        let text = asset_report(&snapshot);
        assert!(text.contains("BTC"));
        assert!(text.contains("+2.00%"));
        assert!(!text.contains("ETH"));
        assert!(text.ends_with("total: 101000 KRW"));
    }

    #[test]
    fn trade_report_names_bucket() {
        let text = trade_report(&TradeReport {
            instrument: "KRW-BTC",
            side: Side::Buy,
            price: 100.0,
            quantity: 2.0,
            rsi: Some(18.5),
            bucket: Some(RsiBucket::B20),
            reason: "rsi buy",
        });
        assert_eq!(
            text,
            "[buy] KRW-BTC 2.00000000 @ 100.00 (200 KRW) rsi 18.50 bucket 20 - rsi buy"
        );
    }
}
