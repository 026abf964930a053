use std::collections::BTreeMap;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use crate::types::hour::HourKey;

/// Percent reported for any hour nothing better is known about.
pub const DEFAULT_PERCENT: f64 = 50.0;

/// Normalized prices, 0 (cheapest) to 100 (most expensive) per hour.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FusedRecord {
    #[serde(alias = "retrieved")]
    pub retrieved_at: DateTime<FixedOffset>,
    pub prices: BTreeMap<HourKey, f64>,
}

impl FusedRecord {
    pub fn new(retrieved_at: DateTime<FixedOffset>, prices: BTreeMap<HourKey, f64>) -> Self {
        FusedRecord { retrieved_at, prices }
    }

    /// The static last-resort record: every given hour at [`DEFAULT_PERCENT`].
    pub fn fallback_default(
        retrieved_at: DateTime<FixedOffset>,
        hours: impl IntoIterator<Item = HourKey>,
    ) -> Self {
        FusedRecord {
            retrieved_at,
            prices: hours.into_iter().map(|h| (h, DEFAULT_PERCENT)).collect(),
        }
    }

    pub fn percent_for(&self, hour: &HourKey) -> f64 {
        self.prices.get(hour).copied().unwrap_or(DEFAULT_PERCENT)
    }

    /// Every value finite and within 0..=100.
    pub fn is_valid(&self) -> bool {
        self.prices.values().all(|p| p.is_finite() && (0.0..=100.0).contains(p))
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}
