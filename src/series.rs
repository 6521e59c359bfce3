use error_stack::{Report, bail};

use crate::error::{MarketDataError, SeriesError};
use crate::model::Candle;

pub const DEFAULT_RETENTION: usize = 200;

/// Time-ordered bars of one instrument, capped at `retention` entries.
///
/// Timestamps are strictly increasing; pushing past the cap drops the oldest
/// bar.
#[derive(Debug, Clone)]
pub struct PriceSeries {
    symbol: String,
    retention: usize,
    bars: Vec<Candle>,
}

impl PriceSeries {
    pub fn new(symbol: impl Into<String>, retention: usize) -> Self {
        Self {
            symbol: symbol.into(),
            retention: retention.max(1),
            bars: Vec::new(),
        }
    }

    /// Build a series from an exchange page.
    ///
    /// The page is sorted and de-duplicated by open time, keeping the last
    /// report of each bar. An empty page means there is nothing to trade on.
    pub fn from_candles(
        symbol: &str,
        retention: usize,
        mut candles: Vec<Candle>,
    ) -> Result<Self, Report<MarketDataError>> {
        if candles.is_empty() {
            bail!(MarketDataError::Stale {
                instrument: symbol.to_string(),
            });
        }

        // Stable sort keeps exchange order among equal timestamps, so the
        // later report wins below.
        candles.sort_by_key(|c| c.open_time);
        let mut series = Self::new(symbol, retention);
        for candle in candles {
            if candle.symbol != symbol {
                continue;
            }
            series.upsert(candle).map_err(|e| {
                e.change_context(MarketDataError::Stale {
                    instrument: symbol.to_string(),
                })
            })?;
        }

        if series.is_empty() {
            bail!(MarketDataError::Stale {
                instrument: symbol.to_string(),
            });
        }
        Ok(series)
    }

    /// Append a bar strictly newer than the last one.
    pub fn push(&mut self, candle: Candle) -> Result<(), Report<SeriesError>> {
        if candle.symbol != self.symbol {
            bail!(SeriesError::SymbolMismatch {
                expected: self.symbol.clone(),
                got: candle.symbol,
            });
        }
        if let Some(last) = self.bars.last() {
            if candle.open_time <= last.open_time {
                bail!(SeriesError::OutOfOrder {
                    last: last.open_time.to_rfc3339(),
                    got: candle.open_time.to_rfc3339(),
                });
            }
        }

        self.bars.push(candle);
        if self.bars.len() > self.retention {
            let excess = self.bars.len() - self.retention;
            self.bars.drain(..excess);
        }
        Ok(())
    }

    /// Like [`push`](Self::push), but a bar with the same open time as the
    /// last one replaces it (the in-progress candle being re-reported).
    pub fn upsert(&mut self, candle: Candle) -> Result<(), Report<SeriesError>> {
        if let Some(last) = self.bars.last_mut() {
            if candle.symbol == self.symbol && candle.open_time == last.open_time {
                *last = candle;
                return Ok(());
            }
        }
        self.push(candle)
    }

    #[cfg(test)]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn as_slice(&self) -> &[Candle] {
        &self.bars
    }

    #[cfg(test)]
    pub fn last(&self) -> Option<&Candle> {
        self.bars.last()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::test_support::candles_from_closes;

    #[test]
    fn push_rejects_duplicate_and_older_bars() {
        let candles = candles_from_closes(&[1.0, 2.0]);
        let mut series = PriceSeries::new("TEST", 10);
        series.push(candles[1].clone()).unwrap();

        assert!(series.push(candles[1].clone()).is_err());
        assert!(series.push(candles[0].clone()).is_err());
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn push_rejects_other_symbol() {
        let mut candle = candles_from_closes(&[1.0]).remove(0);
        candle.symbol = "OTHER".into();
        let mut series = PriceSeries::new("TEST", 10);
        assert!(series.push(candle).is_err());
        assert!(series.is_empty());
    }

    #[test]
    fn retention_drops_oldest_bars() {
        let candles = candles_from_closes(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let mut series = PriceSeries::new("TEST", 3);
        for candle in candles {
            series.push(candle).unwrap();
        }
        assert_eq!(series.len(), 3);
        assert_eq!(series.as_slice()[0].close, 3.0);
        assert_eq!(series.last().unwrap().close, 5.0);
    }

    #[test]
    fn upsert_replaces_in_progress_bar() {
        let candles = candles_from_closes(&[1.0, 2.0]);
        let mut series = PriceSeries::new("TEST", 10);
        series.push(candles[0].clone()).unwrap();
        series.push(candles[1].clone()).unwrap();

        let mut updated = candles[1].clone();
        updated.close = 2.5;
        series.upsert(updated).unwrap();

        assert_eq!(series.len(), 2);
        assert_eq!(series.last().unwrap().close, 2.5);
    }

    #[test]
    fn from_candles_sorts_and_dedups_newest_first_page() {
        let candles = candles_from_closes(&[1.0, 2.0, 3.0]);
        let mut page: Vec<Candle> = candles.iter().rev().cloned().collect();
        let mut repeat = candles[2].clone();
        repeat.close = 3.5;
        page.push(repeat);

        let series = PriceSeries::from_candles("TEST", 200, page).unwrap();
        let closes: Vec<f64> = series.as_slice().iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![1.0, 2.0, 3.5]);
    }

    #[test]
    fn empty_page_is_stale() {
        assert!(PriceSeries::from_candles("TEST", 200, vec![]).is_err());
    }
}
