use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;
use chrono::{DateTime, Duration, NaiveTime};
use chrono_tz::Tz;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::Instrument;
use crate::config::{FusionConfig, WindowPolicy};
use crate::observability::metrics::{FUSED_HOURS, FUSION_RUNS};
use crate::observability::tracing::trace_fusion;
use crate::store::{FusedStore, SourceCache};
use crate::types::fused::{FusedRecord, DEFAULT_PERCENT};
use crate::types::hour::HourKey;
use crate::types::price::Price;
use crate::types::series::PriceSeries;
use crate::utils::helper::latest_occurrence;

/// Which path produced the published record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FusionOutcome {
    /// Enough combined hours; a new record was normalized and written.
    Fresh,
    /// Too few hours; the previously published record was kept as is.
    ReusedPrevious,
    /// Too few hours and nothing usable on disk; every hour reads 50.
    Default,
}

impl FusionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            FusionOutcome::Fresh => "fresh",
            FusionOutcome::ReusedPrevious => "reused_previous",
            FusionOutcome::Default => "default",
        }
    }
}

impl fmt::Display for FusionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FusionResult {
    pub record: FusedRecord,
    pub outcome: FusionOutcome,
    /// Hours available in the window before the completeness check.
    pub available_hours: usize,
}

/// Fusion Engine - combines provider caches into one normalized record
///
/// ## Algorithm
/// 1. Load every cache; unreadable caches count as empty
/// 2. Combine hour by hour; a higher-precedence cache wins where both have a value
/// 3. Keep the hours inside the configured window
/// 4. Enough hours: min-max normalize to 0..=100 and publish
/// 5. Otherwise keep the previous record, or publish 50 for every window hour
///
/// `fuse` never fails. A write failure is logged and the computed record is
/// still returned.
pub struct FusionEngine {
    caches: Vec<SourceCache>,
    store: FusedStore,
    completeness_threshold: usize,
    window: WindowPolicy,
    publication_time: NaiveTime,
}

impl FusionEngine {
    /// `caches` may come in any order; they are ranked by `config.precedence`.
    /// Providers missing from the precedence list rank last.
    pub fn new(mut caches: Vec<SourceCache>, store: FusedStore, config: &FusionConfig) -> Self {
        caches.sort_by_key(|cache| {
            config.precedence
                .iter()
                .position(|p| *p == cache.provider())
                .unwrap_or(usize::MAX)
        });

        FusionEngine {
            caches,
            store,
            completeness_threshold: config.completeness_threshold,
            window: config.window,
            publication_time: config.publication_time,
        }
    }

    pub fn store(&self) -> &FusedStore {
        &self.store
    }

    /// Modification times of every cache, in precedence order.
    pub async fn cache_versions(&self) -> Vec<Option<SystemTime>> {
        let mut versions = Vec::with_capacity(self.caches.len());
        for cache in &self.caches {
            versions.push(cache.modified().await);
        }
        versions
    }

    pub async fn fuse(&self, now: DateTime<Tz>) -> FusionResult {
        let result = self.fuse_inner(now).instrument(trace_fusion()).await;

        FUSION_RUNS.with_label_values(&[result.outcome.as_str()]).inc();
        FUSED_HOURS.set(result.record.len() as i64);
        result
    }

    async fn fuse_inner(&self, now: DateTime<Tz>) -> FusionResult {
        let mut series = Vec::with_capacity(self.caches.len());
        for cache in &self.caches {
            series.push(cache.load().await);
        }

        let combined = combine(&series);
        let window = self.window_bounds(now);
        let windowed = restrict(combined, window);
        let available_hours = windowed.len();
        let retrieved_at = now.fixed_offset();

        if available_hours >= self.completeness_threshold {
            let record = FusedRecord::new(retrieved_at, normalize(&windowed));
            self.publish(&record).await;
            tracing::info!(hours = available_hours, "Published fused prices");
            return FusionResult { record, outcome: FusionOutcome::Fresh, available_hours };
        }

        tracing::warn!(
            hours = available_hours,
            required = self.completeness_threshold,
            "Not enough combined price hours"
        );

        match self.store.load().await {
            Ok(Some(previous)) => {
                tracing::info!(retrieved_at = %previous.retrieved_at, "Keeping previously fused prices");
                return FusionResult {
                    record: previous,
                    outcome: FusionOutcome::ReusedPrevious,
                    available_hours,
                };
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Previous fused record unusable: {}", e),
        }

        let record = FusedRecord::fallback_default(retrieved_at, self.default_hours(now, window));
        self.publish(&record).await;
        tracing::warn!(hours = record.len(), "Published default prices");
        FusionResult { record, outcome: FusionOutcome::Default, available_hours }
    }

    async fn publish(&self, record: &FusedRecord) {
        if let Err(e) = self.store.save(record).await {
            tracing::error!(path = ?self.store.path(), "Failed to write fused prices: {}", e);
        }
    }

    /// Inclusive hour bounds for the configured window, `None` when unbounded.
    fn window_bounds(&self, now: DateTime<Tz>) -> Option<(HourKey, HourKey)> {
        match self.window {
            WindowPolicy::Unbounded => None,
            WindowPolicy::SincePublication => {
                let published = latest_occurrence(now, self.publication_time);
                let start = HourKey::from_naive(published.naive_local());
                let end = HourKey::at(published.date_naive() + Duration::days(1), 23)?;
                Some((start, end))
            }
        }
    }

    fn default_hours(&self, now: DateTime<Tz>, window: Option<(HourKey, HourKey)>) -> Vec<HourKey> {
        let (start, end) = match window {
            Some(bounds) => bounds,
            None => {
                let today = now.date_naive();
                match (HourKey::at(today, 0), HourKey::at(today + Duration::days(1), 23)) {
                    (Some(start), Some(end)) => (start, end),
                    _ => return Vec::new(),
                }
            }
        };
        HourKey::range_inclusive(start, end).collect()
    }
}

/// Combine series hour by hour. `by_precedence[0]` wins every conflict; later
/// series only fill hours the earlier ones lack.
pub fn combine(by_precedence: &[PriceSeries]) -> BTreeMap<HourKey, Price> {
    let mut combined = BTreeMap::new();
    for series in by_precedence {
        for (hour, price) in series.prices() {
            combined.entry(*hour).or_insert(*price);
        }
    }
    combined
}

fn restrict(
    prices: BTreeMap<HourKey, Price>,
    window: Option<(HourKey, HourKey)>,
) -> BTreeMap<HourKey, Price> {
    match window {
        None => prices,
        Some((start, end)) => prices.range(start..=end).map(|(h, p)| (*h, *p)).collect(),
    }
}

/// Min-max normalize every hour to a percent of the series range.
pub fn normalize(prices: &BTreeMap<HourKey, Price>) -> BTreeMap<HourKey, f64> {
    let (Some(min), Some(max)) = (prices.values().min().copied(), prices.values().max().copied()) else {
        return BTreeMap::new();
    };
    prices.iter().map(|(hour, price)| (*hour, percent(*price, min, max))).collect()
}

/// Position of `value` between `min` (0) and `max` (100), rounded to 2 places.
/// A flat range maps everything to 50.
pub fn percent(value: Price, min: Price, max: Price) -> f64 {
    if max <= min {
        return DEFAULT_PERCENT;
    }
    if value <= min {
        return 0.0;
    }
    if value >= max {
        return 100.0;
    }

    let scaled = (value.value() - min.value()) / (max.value() - min.value()) * Decimal::ONE_HUNDRED;
    scaled.round_dp(2).to_f64().unwrap_or(DEFAULT_PERCENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Europe::Amsterdam;
    use rust_decimal_macros::dec;
    use crate::types::series::ProviderId;

    fn p(v: Decimal) -> Price {
        Price::new(v)
    }

    fn key(s: &str) -> HourKey {
        s.parse().unwrap()
    }

    fn series(provider: ProviderId, prices: &[(&str, Decimal)]) -> PriceSeries {
        let mut s = PriceSeries::new(provider, Amsterdam.with_ymd_and_hms(2024, 1, 15, 13, 0, 0).unwrap().fixed_offset());
        for (hour, value) in prices {
            s.insert(key(hour), p(*value));
        }
        s
    }

    #[test]
    fn test_percent_scales_between_bounds() {
        assert_eq!(percent(p(dec!(0.10)), p(dec!(0.10)), p(dec!(0.40))), 0.0);
        assert_eq!(percent(p(dec!(0.40)), p(dec!(0.10)), p(dec!(0.40))), 100.0);
        assert_eq!(percent(p(dec!(0.20)), p(dec!(0.10)), p(dec!(0.40))), 33.33);
        assert_eq!(percent(p(dec!(0.30)), p(dec!(0.10)), p(dec!(0.40))), 66.67);
    }

    #[test]
    fn test_flat_range_is_fifty() {
        assert_eq!(percent(p(dec!(0.25)), p(dec!(0.25)), p(dec!(0.25))), DEFAULT_PERCENT);
    }

    #[test]
    fn test_higher_precedence_wins_conflicts() {
        let tibber = series(ProviderId::Tibber, &[("2024-01-15T14:00", dec!(0.30))]);
        let entsoe = series(ProviderId::Entsoe, &[
            ("2024-01-15T14:00", dec!(0.10)),
            ("2024-01-15T15:00", dec!(0.12)),
        ]);

        let combined = combine(&[tibber, entsoe]);

        assert_eq!(combined.len(), 2);
        assert_eq!(combined[&key("2024-01-15T14:00")], p(dec!(0.30)));
        assert_eq!(combined[&key("2024-01-15T15:00")], p(dec!(0.12)));
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize(&BTreeMap::new()).is_empty());
    }

    #[test]
    fn test_normalize_uses_series_range() {
        let prices: BTreeMap<HourKey, Price> = [
            (key("2024-01-15T13:00"), p(dec!(0.10))),
            (key("2024-01-15T14:00"), p(dec!(0.20))),
            (key("2024-01-15T15:00"), p(dec!(0.40))),
        ]
        .into_iter()
        .collect();

        let normalized = normalize(&prices);

        assert_eq!(normalized[&key("2024-01-15T13:00")], 0.0);
        assert_eq!(normalized[&key("2024-01-15T14:00")], 33.33);
        assert_eq!(normalized[&key("2024-01-15T15:00")], 100.0);
    }

    fn engine(dir: &std::path::Path, config: &FusionConfig) -> FusionEngine {
        let caches = vec![
            SourceCache::new(ProviderId::Entsoe, dir.join("prices_entsoe.json")),
            SourceCache::new(ProviderId::Tibber, dir.join("prices_tibber.json")),
        ];
        FusionEngine::new(caches, FusedStore::new(dir.join("prices_percent.json"), Amsterdam), config)
    }

    /// Every hour from 13:00 on the 15th through 23:00 on the 16th.
    fn full_window(provider: ProviderId) -> PriceSeries {
        let hours = HourKey::range_inclusive(key("2024-01-15T13:00"), key("2024-01-16T23:00"));
        let mut s = series(provider, &[]);
        for (i, hour) in hours.enumerate() {
            s.insert(hour, p(Decimal::from(i as u32) / dec!(100)));
        }
        s
    }

    #[tokio::test]
    async fn test_precedence_follows_config_not_argument_order() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), &FusionConfig::default());
        assert_eq!(engine.caches[0].provider(), ProviderId::Tibber);
        assert_eq!(engine.caches[1].provider(), ProviderId::Entsoe);
    }

    #[tokio::test]
    async fn test_complete_window_is_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), &FusionConfig::default());
        SourceCache::new(ProviderId::Entsoe, dir.path().join("prices_entsoe.json"))
            .merge(&full_window(ProviderId::Entsoe))
            .await
            .unwrap();

        let now = Amsterdam.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap();
        let result = engine.fuse(now).await;

        assert_eq!(result.outcome, FusionOutcome::Fresh);
        assert_eq!(result.record.len(), 35);
        assert_eq!(result.record.percent_for(&key("2024-01-15T13:00")), 0.0);
        assert_eq!(result.record.percent_for(&key("2024-01-16T23:00")), 100.0);
        assert_eq!(engine.store().load().await.unwrap(), Some(result.record));
    }

    #[tokio::test]
    async fn test_hours_outside_window_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), &FusionConfig::default());
        let mut stale = full_window(ProviderId::Entsoe);
        stale.insert(key("2024-01-10T12:00"), p(dec!(9.99)));
        SourceCache::new(ProviderId::Entsoe, dir.path().join("prices_entsoe.json"))
            .merge(&stale)
            .await
            .unwrap();

        let now = Amsterdam.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap();
        let result = engine.fuse(now).await;

        assert_eq!(result.record.len(), 35);
        assert_eq!(result.record.percent_for(&key("2024-01-16T23:00")), 100.0);
    }

    #[tokio::test]
    async fn test_unbounded_window_uses_every_hour() {
        let dir = tempfile::tempdir().unwrap();
        let config = FusionConfig { window: WindowPolicy::Unbounded, ..FusionConfig::default() };
        let engine = engine(dir.path(), &config);
        let mut all = full_window(ProviderId::Entsoe);
        all.insert(key("2024-01-10T12:00"), p(dec!(9.99)));
        SourceCache::new(ProviderId::Entsoe, dir.path().join("prices_entsoe.json"))
            .merge(&all)
            .await
            .unwrap();

        let now = Amsterdam.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap();
        let result = engine.fuse(now).await;

        assert_eq!(result.record.len(), 36);
        assert_eq!(result.record.percent_for(&key("2024-01-10T12:00")), 100.0);
    }

    #[tokio::test]
    async fn test_incomplete_without_previous_publishes_default() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), &FusionConfig::default());
        let now = Amsterdam.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap();

        let result = engine.fuse(now).await;

        assert_eq!(result.outcome, FusionOutcome::Default);
        assert_eq!(result.available_hours, 0);
        assert_eq!(result.record.len(), 35);
        assert!(result.record.prices.values().all(|v| *v == DEFAULT_PERCENT));
        assert_eq!(result.record.retrieved_at, now.fixed_offset());
        assert!(engine.store().load().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_incomplete_keeps_previous_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path(), &FusionConfig::default());
        SourceCache::new(ProviderId::Entsoe, dir.path().join("prices_entsoe.json"))
            .merge(&full_window(ProviderId::Entsoe))
            .await
            .unwrap();
        let first = Amsterdam.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap();
        let published = engine.fuse(first).await.record;
        let bytes_before = std::fs::read(engine.store().path()).unwrap();

        // Next day at 14:00 the window has moved past everything cached.
        let later = Amsterdam.with_ymd_and_hms(2024, 1, 17, 14, 0, 0).unwrap();
        let result = engine.fuse(later).await;

        assert_eq!(result.outcome, FusionOutcome::ReusedPrevious);
        assert_eq!(result.record, published);
        assert_eq!(std::fs::read(engine.store().path()).unwrap(), bytes_before);
    }

    #[tokio::test]
    async fn test_unwritable_store_still_returns_record() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let engine = FusionEngine::new(
            vec![SourceCache::new(ProviderId::Tibber, dir.path().join("prices_tibber.json"))],
            FusedStore::new(blocker.join("prices_percent.json"), Amsterdam),
            &FusionConfig::default(),
        );

        let now = Amsterdam.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap();
        let result = engine.fuse(now).await;

        assert_eq!(result.outcome, FusionOutcome::Default);
        assert_eq!(result.record.len(), 35);
    }
}
