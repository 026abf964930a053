use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use chrono_tz::Tz;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use crate::config::TibberConfig;
use crate::error::FetchError;
use crate::price_infra::connectors::{http_client, PriceProvider};
use crate::types::hour::HourKey;
use crate::types::price::Price;
use crate::types::series::{PricePoint, PriceSeries, ProviderId};

const PROVIDER: ProviderId = ProviderId::Tibber;

const PRICE_QUERY: &str = "{ viewer { homes { currentSubscription { priceInfo { \
    today { total startsAt } tomorrow { total startsAt } } } } } }";

/// Retail prices from the Tibber GraphQL API.
///
/// The API always answers with today's prices and, once published, tomorrow's.
pub struct TibberConnector {
    client: Client,
    base_url: String,
    token: String,
    timezone: Tz,
}

impl TibberConnector {
    pub fn new(config: &TibberConfig, timezone: Tz) -> Self {
        TibberConnector {
            client: http_client(config.request_timeout()),
            base_url: config.base_url.clone(),
            token: config.token.clone(),
            timezone,
        }
    }

    fn to_series(
        &self,
        response: TibberResponse,
        reference_time: DateTime<Tz>,
    ) -> Result<PriceSeries, FetchError> {
        if !response.errors.is_empty() {
            let messages: Vec<&str> = response.errors.iter().map(|e| e.message.as_str()).collect();
            return Err(FetchError::Provider {
                provider: PROVIDER,
                reason: messages.join("; "),
            });
        }

        let price_info = response
            .data
            .and_then(|d| d.viewer.homes.into_iter().next())
            .and_then(|home| home.current_subscription)
            .map(|sub| sub.price_info)
            .ok_or_else(|| FetchError::Parse {
                provider: PROVIDER,
                reason: "response has no home with an active subscription".to_string(),
            })?;

        let points = price_info
            .today
            .unwrap_or_default()
            .into_iter()
            .chain(price_info.tomorrow.unwrap_or_default())
            .map(|p| PricePoint {
                hour: HourKey::from_datetime(&p.starts_at, self.timezone),
                value: Price::new(p.total),
            });

        Ok(PriceSeries::from_points(PROVIDER, reference_time.fixed_offset(), points))
    }
}

#[async_trait]
impl PriceProvider for TibberConnector {
    fn provider_id(&self) -> ProviderId {
        PROVIDER
    }

    async fn fetch(&self, reference_time: DateTime<Tz>) -> Result<PriceSeries, FetchError> {
        let response = self.client
            .post(&self.base_url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "query": PRICE_QUERY }))
            .send()
            .await
            .map_err(|e| FetchError::from_transport(PROVIDER, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_transport(PROVIDER, e))?;

        if !status.is_success() {
            return Err(FetchError::from_status(PROVIDER, status, &body));
        }

        let parsed: TibberResponse = serde_json::from_str(&body).map_err(|e| FetchError::Parse {
            provider: PROVIDER,
            reason: e.to_string(),
        })?;

        let series = self.to_series(parsed, reference_time)?;
        tracing::info!(provider = %PROVIDER, hours = series.len(), "Fetched prices");
        Ok(series)
    }
}

#[derive(Debug, Deserialize)]
struct TibberResponse {
    data: Option<TibberData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct TibberData {
    viewer: Viewer,
}

#[derive(Debug, Deserialize)]
struct Viewer {
    #[serde(default)]
    homes: Vec<Home>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Home {
    current_subscription: Option<Subscription>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Subscription {
    price_info: PriceInfo,
}

#[derive(Debug, Deserialize)]
struct PriceInfo {
    today: Option<Vec<TibberPrice>>,
    tomorrow: Option<Vec<TibberPrice>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TibberPrice {
    total: Decimal,
    starts_at: DateTime<FixedOffset>,
}
