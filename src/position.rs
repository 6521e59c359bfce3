pub mod bucket;
pub mod rules;

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use error_stack::{Report, bail};

use crate::error::BucketError;
use crate::position::bucket::{BucketFractions, RsiBucket};

/// Quantities at or below this are treated as nothing left (exchange precision).
pub const DUST_QUANTITY: f64 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpenBucket {
    pub quantity: f64,
    pub entry_price: f64,
    /// RSI that triggered the entry.
    pub rsi: f64,
    pub opened_at: DateTime<Utc>,
}

/// Open positions per instrument, at most one per RSI bucket.
///
/// Errors leave the tracker untouched.
#[derive(Debug, Default)]
pub struct BucketTracker {
    fractions: BucketFractions,
    open: HashMap<String, BTreeMap<RsiBucket, OpenBucket>>,
    halted: HashSet<String>,
}

impl BucketTracker {
    pub fn new(fractions: BucketFractions) -> Self {
        Self {
            fractions,
            open: HashMap::new(),
            halted: HashSet::new(),
        }
    }

    pub fn open(
        &mut self,
        instrument: &str,
        bucket: RsiBucket,
        entry: OpenBucket,
    ) -> Result<(), Report<BucketError>> {
        if self.is_halted(instrument) {
            bail!(BucketError::Halted {
                instrument: instrument.to_string(),
            });
        }
        if bucket.is_neutral() {
            bail!(BucketError::NeutralBucket {
                instrument: instrument.to_string(),
            });
        }
        if self.is_open(instrument, bucket) {
            bail!(BucketError::DuplicateBucket {
                instrument: instrument.to_string(),
                bucket: bucket.to_string(),
            });
        }

        self.open
            .entry(instrument.to_string())
            .or_default()
            .insert(bucket, entry);
        Ok(())
    }

    /// Re-insert a persisted entry at startup. Ignores the halted flag.
    pub fn restore(
        &mut self,
        instrument: &str,
        bucket: RsiBucket,
        entry: OpenBucket,
    ) -> Result<(), Report<BucketError>> {
        let halted = self.halted.remove(instrument);
        let result = self.open(instrument, bucket, entry);
        if halted {
            self.halted.insert(instrument.to_string());
        }
        result
    }

    /// Release a bucket, returning the quantity it held.
    pub fn close(&mut self, instrument: &str, bucket: RsiBucket) -> Result<f64, Report<BucketError>> {
        let removed = self
            .open
            .get_mut(instrument)
            .and_then(|buckets| buckets.remove(&bucket));
        let Some(entry) = removed else {
            bail!(BucketError::UnknownBucket {
                instrument: instrument.to_string(),
                bucket: bucket.to_string(),
            });
        };

        if self.open.get(instrument).is_some_and(BTreeMap::is_empty) {
            self.open.remove(instrument);
        }
        Ok(entry.quantity)
    }

    /// Take `quantity` out of a bucket after a partial exit.
    ///
    /// Closes the bucket once only dust is left; returns the entry that
    /// stays open, if any.
    pub fn reduce(
        &mut self,
        instrument: &str,
        bucket: RsiBucket,
        quantity: f64,
    ) -> Result<Option<OpenBucket>, Report<BucketError>> {
        let Some(entry) = self
            .open
            .get_mut(instrument)
            .and_then(|buckets| buckets.get_mut(&bucket))
        else {
            bail!(BucketError::UnknownBucket {
                instrument: instrument.to_string(),
                bucket: bucket.to_string(),
            });
        };

        let remaining = entry.quantity - quantity;
        if remaining <= DUST_QUANTITY {
            self.close(instrument, bucket)?;
            return Ok(None);
        }
        entry.quantity = remaining;
        Ok(Some(*entry))
    }

    /// Drop every bucket of an instrument (stop-loss, liquidation).
    pub fn clear(&mut self, instrument: &str) -> Vec<(RsiBucket, OpenBucket)> {
        self.open
            .remove(instrument)
            .map(|buckets| buckets.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn is_open(&self, instrument: &str, bucket: RsiBucket) -> bool {
        self.get(instrument, bucket).is_some()
    }

    pub fn get(&self, instrument: &str, bucket: RsiBucket) -> Option<&OpenBucket> {
        self.open.get(instrument).and_then(|b| b.get(&bucket))
    }

    /// Open buckets of an instrument, most extreme first.
    pub fn buckets(&self, instrument: &str) -> Vec<(RsiBucket, OpenBucket)> {
        self.open
            .get(instrument)
            .map(|b| b.iter().map(|(k, v)| (*k, *v)).collect())
            .unwrap_or_default()
    }

    pub fn open_quantity(&self, instrument: &str) -> f64 {
        self.open
            .get(instrument)
            .map(|b| b.values().map(|e| e.quantity).sum())
            .unwrap_or(0.0)
    }

    /// No bucket open for any instrument.
    pub fn is_empty(&self) -> bool {
        self.open.values().all(BTreeMap::is_empty)
    }

    pub fn halt(&mut self, instrument: &str) {
        self.halted.insert(instrument.to_string());
    }

    pub fn resume(&mut self, instrument: &str) -> bool {
        self.halted.remove(instrument)
    }

    pub fn is_halted(&self, instrument: &str) -> bool {
        self.halted.contains(instrument)
    }

    /// KRW committed by an entry in `bucket`; zero for neutral.
    pub fn position_size(&self, bucket: RsiBucket, limit_amount: f64) -> f64 {
        limit_amount * self.fractions.fraction(bucket)
    }
}
