use std::time::Duration;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use crate::config::time_of_day;
use crate::types::series::ProviderId;

/// Which cached hours take part in a fusion run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowPolicy {
    /// From the latest publication time through 23:00 the next day.
    SincePublication,
    /// Every hour either cache holds.
    Unbounded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Interval,
    OnCacheChange,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct FusionConfig {
    pub trigger: TriggerKind,
    pub interval_secs: u64,
    pub poll_secs: u64,
    pub completeness_threshold: usize,
    pub window: WindowPolicy,
    #[serde(with = "time_of_day")]
    pub publication_time: NaiveTime,
    /// Highest priority first.
    pub precedence: Vec<ProviderId>,
}

impl FusionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_secs(self.poll_secs)
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        FusionConfig {
            trigger: TriggerKind::Interval,
            interval_secs: 3600,
            poll_secs: 30,
            completeness_threshold: 34,
            window: WindowPolicy::SincePublication,
            publication_time: NaiveTime::from_hms_opt(13, 0, 0).unwrap_or_default(),
            precedence: vec![ProviderId::Tibber, ProviderId::Entsoe],
        }
    }
}
