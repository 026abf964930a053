use std::collections::BTreeMap;
use std::str::FromStr;
use async_trait::async_trait;
use chrono::{DateTime, Days, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use crate::config::EntsoeConfig;
use crate::error::FetchError;
use crate::price_infra::connectors::{http_client, PriceProvider};
use crate::types::hour::HourKey;
use crate::types::price::Price;
use crate::types::series::{PricePoint, PriceSeries, ProviderId};

const PROVIDER: ProviderId = ProviderId::Entsoe;

/// Day-ahead auction prices document type.
const DOCUMENT_TYPE: &str = "A44";
const PERIOD_FORMAT: &str = "%Y%m%d%H%M";

/// Wholesale day-ahead prices from the ENTSO-E transparency platform.
///
/// The platform answers with a `Publication_MarketDocument` of position-indexed
/// points per period, priced in EUR/MWh, or an `Acknowledgement_MarketDocument`
/// explaining why there is no data.
pub struct EntsoeConnector {
    client: Client,
    base_url: String,
    token: String,
    region: String,
    publication_time: NaiveTime,
    timezone: Tz,
}

impl EntsoeConnector {
    pub fn new(config: &EntsoeConfig, timezone: Tz) -> Self {
        EntsoeConnector {
            client: http_client(config.request_timeout()),
            base_url: config.base_url.clone(),
            token: config.token.clone(),
            region: config.region.clone(),
            publication_time: config.schedule.publication_time,
            timezone,
        }
    }

    /// Local midnight today through the end of today, or of tomorrow once the
    /// day's auction results are due.
    pub fn request_window(&self, reference_time: DateTime<Tz>) -> (DateTime<Utc>, DateTime<Utc>) {
        let today = reference_time.date_naive();
        let days = if reference_time.time() >= self.publication_time { 2 } else { 1 };
        let end_date = today.checked_add_days(Days::new(days)).unwrap_or(today);
        (self.local_midnight(today), self.local_midnight(end_date))
    }

    fn local_midnight(&self, date: NaiveDate) -> DateTime<Utc> {
        let midnight = date.and_time(NaiveTime::MIN);
        self.timezone
            .from_local_datetime(&midnight)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| midnight.and_utc())
    }

    pub fn parse_document(&self, xml: &str) -> Result<Vec<PricePoint>, FetchError> {
        if xml.contains("Acknowledgement_MarketDocument") {
            let ack: AcknowledgementDocument = quick_xml::de::from_str(xml).map_err(parse_error)?;
            let reason = ack
                .reasons
                .iter()
                .filter_map(|r| r.text.as_deref())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(FetchError::Provider {
                provider: PROVIDER,
                reason: if reason.is_empty() { "acknowledgement without reason".to_string() } else { reason },
            });
        }

        if !xml.contains("Publication_MarketDocument") {
            return Err(FetchError::Parse {
                provider: PROVIDER,
                reason: "body is not a publication document".to_string(),
            });
        }
        let document: PublicationDocument = quick_xml::de::from_str(xml).map_err(parse_error)?;

        // Sub-hourly points are averaged into their hour.
        let mut hourly: BTreeMap<HourKey, (Decimal, u32)> = BTreeMap::new();
        for period in document.time_series.iter().flat_map(|ts| ts.periods.iter()) {
            let start = parse_utc(&period.time_interval.start)?;
            let step = parse_resolution(&period.resolution)?;
            let slots = match &period.time_interval.end {
                Some(end) => ((parse_utc(end)? - start).num_minutes() / step.num_minutes()).max(0) as u32,
                None => 0,
            };

            let mut amounts: BTreeMap<u32, Decimal> = BTreeMap::new();
            for point in &period.points {
                if point.position == 0 {
                    return Err(FetchError::Parse {
                        provider: PROVIDER,
                        reason: "point position starts at 1".to_string(),
                    });
                }
                let amount = Decimal::from_str(point.price_amount.trim()).map_err(|e| FetchError::Parse {
                    provider: PROVIDER,
                    reason: format!("price.amount {:?}: {}", point.price_amount, e),
                })?;
                amounts.insert(point.position, amount);
            }

            // Curve type A03 omits a position whose price equals the one before it.
            let last = amounts.keys().next_back().copied().unwrap_or(0).max(slots);
            let mut carried = None;
            for position in 1..=last {
                if let Some(amount) = amounts.get(&position) {
                    carried = Some(*amount);
                }
                let Some(amount) = carried else { continue };
                let instant = start + step * (position as i32 - 1);
                let entry = hourly
                    .entry(HourKey::from_datetime(&instant, self.timezone))
                    .or_insert((Decimal::ZERO, 0));
                entry.0 += amount;
                entry.1 += 1;
            }
        }

        Ok(hourly
            .into_iter()
            .map(|(hour, (sum, count))| PricePoint {
                hour,
                value: Price::from_per_mwh(sum / Decimal::from(count)),
            })
            .collect())
    }
}

#[async_trait]
impl PriceProvider for EntsoeConnector {
    fn provider_id(&self) -> ProviderId {
        PROVIDER
    }

    async fn fetch(&self, reference_time: DateTime<Tz>) -> Result<PriceSeries, FetchError> {
        let (start, end) = self.request_window(reference_time);
        let period_start = start.format(PERIOD_FORMAT).to_string();
        let period_end = end.format(PERIOD_FORMAT).to_string();

        let response = self.client
            .get(&self.base_url)
            .query(&[
                ("securityToken", self.token.as_str()),
                ("documentType", DOCUMENT_TYPE),
                ("in_Domain", self.region.as_str()),
                ("out_Domain", self.region.as_str()),
                ("periodStart", period_start.as_str()),
                ("periodEnd", period_end.as_str()),
            ])
            .send()
            .await
            .map_err(|e| FetchError::from_transport(PROVIDER, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::from_transport(PROVIDER, e))?;

        if !status.is_success() {
            // The platform reports "no data" as an acknowledgement on HTTP 400.
            if status == reqwest::StatusCode::BAD_REQUEST && body.contains("Acknowledgement_MarketDocument") {
                self.parse_document(&body)?;
            }
            return Err(FetchError::from_status(PROVIDER, status, &body));
        }

        let points = self.parse_document(&body)?;
        let series = PriceSeries::from_points(PROVIDER, reference_time.fixed_offset(), points);
        tracing::info!(provider = %PROVIDER, hours = series.len(), %period_start, %period_end, "Fetched prices");
        Ok(series)
    }
}

fn parse_error(e: quick_xml::DeError) -> FetchError {
    FetchError::Parse {
        provider: PROVIDER,
        reason: e.to_string(),
    }
}

fn parse_utc(raw: &str) -> Result<DateTime<Utc>, FetchError> {
    NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%dT%H:%MZ")
        .map(|dt| dt.and_utc())
        .map_err(|e| FetchError::Parse {
            provider: PROVIDER,
            reason: format!("period start {:?}: {}", raw, e),
        })
}

/// `PT60M`, `PT30M`, `PT15M`: any whole-minute step that divides an hour.
fn parse_resolution(raw: &str) -> Result<Duration, FetchError> {
    let minutes = raw
        .trim()
        .strip_prefix("PT")
        .and_then(|r| r.strip_suffix('M'))
        .and_then(|m| m.parse::<i64>().ok())
        .filter(|m| *m > 0 && 60 % *m == 0);

    minutes.map(Duration::minutes).ok_or_else(|| FetchError::Parse {
        provider: PROVIDER,
        reason: format!("unsupported resolution {:?}", raw),
    })
}

#[derive(Debug, Deserialize)]
struct PublicationDocument {
    #[serde(rename = "TimeSeries", default)]
    time_series: Vec<TimeSeries>,
}

#[derive(Debug, Deserialize)]
struct TimeSeries {
    #[serde(rename = "Period", default)]
    periods: Vec<Period>,
}

#[derive(Debug, Deserialize)]
struct Period {
    #[serde(rename = "timeInterval")]
    time_interval: TimeInterval,
    resolution: String,
    #[serde(rename = "Point", default)]
    points: Vec<Point>,
}

#[derive(Debug, Deserialize)]
struct TimeInterval {
    start: String,
    end: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Point {
    position: u32,
    #[serde(rename = "price.amount")]
    price_amount: String,
}

#[derive(Debug, Deserialize)]
struct AcknowledgementDocument {
    #[serde(rename = "Reason", default)]
    reasons: Vec<Reason>,
}

#[derive(Debug, Deserialize)]
struct Reason {
    text: Option<String>,
}
