use std::collections::HashMap;

use crate::model::AssetSnapshot;

/// KRW each instrument may still commit to new buckets.
///
/// Every instrument's target is an equal share of the total asset; its limit
/// is that share minus what it already holds. Instruments already above
/// their share get 0, and the overshoot is taken evenly from the others.
pub fn limit_amounts(snapshot: &AssetSnapshot, instruments: &[String]) -> HashMap<String, f64> {
    if instruments.is_empty() {
        return HashMap::new();
    }

    let share = snapshot.total_asset / instruments.len() as f64;
    let raw: Vec<(String, f64)> = instruments
        .iter()
        .map(|instrument| {
            let held = snapshot.coin(instrument).map(|c| c.value).unwrap_or(0.0);
            (instrument.clone(), share - held)
        })
        .collect();

    let overshoot: f64 = raw.iter().filter(|(_, v)| *v < 0.0).map(|(_, v)| -v).sum();
    let positive = raw.iter().filter(|(_, v)| *v > 0.0).count();
    let deduction = if positive > 0 {
        overshoot / positive as f64
    } else {
        0.0
    };

    raw.into_iter()
        .map(|(instrument, v)| {
            let limit = if v > 0.0 { (v - deduction).max(0.0) } else { 0.0 };
            (instrument, limit)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CoinInfo;

    fn coin(instrument: &str, value: f64) -> CoinInfo {
        CoinInfo {
            instrument: instrument.into(),
            currency: instrument.trim_start_matches("KRW-").into(),
            quantity: value / 100.0,
            avg_cost: 100.0,
            current_price: 100.0,
            value,
            profit_rate: 0.0,
        }
    }

    fn snapshot(krw: f64, coins: Vec<CoinInfo>) -> AssetSnapshot {
        let total_asset = krw + coins.iter().map(|c| c.value).sum::<f64>();
        AssetSnapshot {
            krw_balance: krw,
            coins,
            total_asset,
        }
    }

    #[test]
    fn cash_only_splits_evenly() {
        let instruments = vec!["KRW-BTC".to_string(), "KRW-ETH".to_string()];
        let limits = limit_amounts(&snapshot(100_000.0, vec![]), &instruments);
        assert!((limits["KRW-BTC"] - 50_000.0).abs() < 1e-9);
        assert!((limits["KRW-ETH"] - 50_000.0).abs() < 1e-9);
    }

    #[test]
    fn overweight_coin_redistributes() {
        // total 300k, share 100k: BTC holds 160k -> -60k, ETH 20k -> 80k, XRP 0 -> 100k
        let instruments = vec![
            "KRW-BTC".to_string(),
            "KRW-ETH".to_string(),
            "KRW-XRP".to_string(),
        ];
        let snap = snapshot(
            120_000.0,
            vec![coin("KRW-BTC", 160_000.0), coin("KRW-ETH", 20_000.0)],
        );
        let limits = limit_amounts(&snap, &instruments);
        assert_eq!(limits["KRW-BTC"], 0.0);
        assert!((limits["KRW-ETH"] - 50_000.0).abs() < 1e-9);
        assert!((limits["KRW-XRP"] - 70_000.0).abs() < 1e-9);
        let total: f64 = limits.values().sum();
        assert!((total - snap.krw_balance).abs() < 1e-6);
    }

    #[test]
    fn no_instruments() {
        assert!(limit_amounts(&snapshot(1_000.0, vec![]), &[]).is_empty());
    }
}
