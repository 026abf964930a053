use std::sync::Arc;
use std::time::{Duration, SystemTime};
use crate::config::{FusionConfig, TriggerKind};
use crate::observability::metrics;
use crate::price_infra::aggregator::FusionEngine;
use crate::scheduler::clock::Clock;

/// When the fusion engine runs. Both variants fuse once at start.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FusionTrigger {
    /// Fuse on a fixed period.
    Interval(Duration),
    /// Fuse whenever a source cache file changes, checked every `poll`.
    OnCacheChange { poll: Duration },
}

impl FusionTrigger {
    pub fn from_config(config: &FusionConfig) -> Self {
        match config.trigger {
            TriggerKind::Interval => FusionTrigger::Interval(config.interval()),
            TriggerKind::OnCacheChange => FusionTrigger::OnCacheChange { poll: config.poll() },
        }
    }
}

/// Tracks cache file modification times between polls.
pub struct CacheWatcher {
    seen: Option<Vec<Option<SystemTime>>>,
}

impl CacheWatcher {
    pub fn new() -> Self {
        CacheWatcher { seen: None }
    }

    /// True when any cache changed since the previous call. The first call
    /// records the current state and reports no change.
    pub async fn changed(&mut self, engine: &FusionEngine) -> bool {
        let current = engine.cache_versions().await;
        match self.seen.replace(current) {
            Some(previous) => self.seen.as_ref() != Some(&previous),
            None => false,
        }
    }
}

impl Default for CacheWatcher {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn run_fusion(engine: FusionEngine, trigger: FusionTrigger, clock: Arc<dyn Clock>) {
    tracing::info!(?trigger, "Starting fusion task");

    match trigger {
        FusionTrigger::Interval(period) => loop {
            fuse_and_report(&engine, clock.as_ref()).await;
            clock.sleep(period).await;
        },
        FusionTrigger::OnCacheChange { poll } => {
            let mut watcher = CacheWatcher::new();
            watcher.changed(&engine).await;
            fuse_and_report(&engine, clock.as_ref()).await;
            loop {
                clock.sleep(poll).await;
                if watcher.changed(&engine).await {
                    tracing::debug!("Source cache changed");
                    fuse_and_report(&engine, clock.as_ref()).await;
                }
            }
        }
    }
}

async fn fuse_and_report(engine: &FusionEngine, clock: &dyn Clock) {
    let result = engine.fuse(clock.now()).await;
    tracing::info!(
        outcome = %result.outcome,
        hours = result.record.len(),
        available = result.available_hours,
        "Fusion run finished"
    );
    tracing::debug!("Metrics:\n{}", metrics::render());
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone};
    use chrono_tz::Europe::Amsterdam;
    use chrono_tz::Tz;
    use crate::store::{FusedStore, SourceCache};
    use crate::types::series::{PriceSeries, ProviderId};

    fn now() -> DateTime<Tz> {
        Amsterdam.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap()
    }

    #[test]
    fn test_trigger_from_config() {
        let interval = FusionConfig::default();
        assert_eq!(FusionTrigger::from_config(&interval), FusionTrigger::Interval(Duration::from_secs(3600)));

        let on_change = FusionConfig { trigger: TriggerKind::OnCacheChange, ..FusionConfig::default() };
        assert_eq!(
            FusionTrigger::from_config(&on_change),
            FusionTrigger::OnCacheChange { poll: Duration::from_secs(30) }
        );
    }

    #[tokio::test]
    async fn test_watcher_reports_new_cache_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SourceCache::new(ProviderId::Entsoe, dir.path().join("prices_entsoe.json"));
        let engine = FusionEngine::new(
            vec![cache.clone()],
            FusedStore::new(dir.path().join("prices_percent.json"), Amsterdam),
            &FusionConfig::default(),
        );
        let mut watcher = CacheWatcher::new();

        assert!(!watcher.changed(&engine).await);
        assert!(!watcher.changed(&engine).await);

        cache.merge(&PriceSeries::new(ProviderId::Entsoe, now().fixed_offset())).await.unwrap();

        assert!(watcher.changed(&engine).await);
        assert!(!watcher.changed(&engine).await);
    }
}
