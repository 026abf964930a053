use async_trait::async_trait;
use chrono::DateTime;
use chrono_tz::Tz;

/// Read-only view decision consumers use to look up normalized prices.
///
/// Returns a percent in `0..=100`; any hour without a fused value reads as
/// [`DEFAULT_PERCENT`](crate::types::fused::DEFAULT_PERCENT).
#[async_trait]
pub trait PercentReader: Send + Sync {
    async fn get_percent_for_hour(&self, timestamp: DateTime<Tz>) -> f64;
}
