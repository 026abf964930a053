pub mod entsoe;
pub mod tibber;

use std::time::Duration;
use async_trait::async_trait;
use chrono::DateTime;
use chrono_tz::Tz;
use reqwest::Client;
use crate::error::FetchError;
use crate::types::series::{PriceSeries, ProviderId};

pub use entsoe::EntsoeConnector;
pub use tibber::TibberConnector;

/// One external day-ahead price source.
///
/// `fetch` makes a single request and never retries; side effects stop at the
/// outbound call. Retry and persistence belong to the acquisition scheduler.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceProvider: Send + Sync {
    fn provider_id(&self) -> ProviderId;

    /// Fetch the provider's current view of today and tomorrow.
    ///
    /// `reference_time` is the wall-clock time in the market timezone; providers
    /// derive their request window from it.
    async fn fetch(&self, reference_time: DateTime<Tz>) -> Result<PriceSeries, FetchError>;
}

pub(crate) fn http_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}
