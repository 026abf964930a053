use std::collections::BTreeMap;
use std::fmt;
use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use crate::types::hour::HourKey;
use crate::types::price::Price;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Tibber,
    Entsoe,
}

impl ProviderId {
    pub const ALL: [ProviderId; 2] = [ProviderId::Tibber, ProviderId::Entsoe];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Tibber => "tibber",
            ProviderId::Entsoe => "entsoe",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PricePoint {
    pub hour: HourKey,
    pub value: Price,
}

/// Hourly prices from a single provider.
///
/// Holds at most one value per hour; inserting an hour twice keeps the later value.
#[derive(Clone, Debug, PartialEq)]
pub struct PriceSeries {
    pub source: ProviderId,
    pub retrieved_at: DateTime<FixedOffset>,
    prices: BTreeMap<HourKey, Price>,
}

impl PriceSeries {
    pub fn new(source: ProviderId, retrieved_at: DateTime<FixedOffset>) -> Self {
        PriceSeries {
            source,
            retrieved_at,
            prices: BTreeMap::new(),
        }
    }

    pub fn from_points(
        source: ProviderId,
        retrieved_at: DateTime<FixedOffset>,
        points: impl IntoIterator<Item = PricePoint>,
    ) -> Self {
        let mut series = Self::new(source, retrieved_at);
        for point in points {
            series.insert(point.hour, point.value);
        }
        series
    }

    pub fn insert(&mut self, hour: HourKey, value: Price) -> Option<Price> {
        self.prices.insert(hour, value)
    }

    pub fn get(&self, hour: &HourKey) -> Option<Price> {
        self.prices.get(hour).copied()
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn prices(&self) -> &BTreeMap<HourKey, Price> {
        &self.prices
    }

    pub fn has_hour_on(&self, date: NaiveDate) -> bool {
        self.prices.keys().any(|h| h.date() == date)
    }

    /// Last-write-wins per hour: hours in `newer` overwrite, every other hour is kept.
    pub fn merge(&mut self, newer: &PriceSeries) {
        for (hour, value) in &newer.prices {
            self.prices.insert(*hour, *value);
        }
        self.retrieved_at = newer.retrieved_at;
    }
}
