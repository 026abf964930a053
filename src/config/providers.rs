use std::time::Duration;
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use crate::config::time_of_day;

/// Daily acquisition window of one provider.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ScheduleConfig {
    #[serde(with = "time_of_day")]
    pub publication_time: NaiveTime,
    #[serde(with = "time_of_day")]
    pub deadline: NaiveTime,
    pub retry_interval_secs: u64,
    /// Hours a fetch must return, tomorrow included, to count as complete.
    pub min_hours: usize,
    pub fetch_on_start: bool,
    pub fail_fast_on_permanent: bool,
}

impl ScheduleConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        ScheduleConfig {
            publication_time: NaiveTime::from_hms_opt(13, 0, 0).unwrap_or_default(),
            deadline: NaiveTime::from_hms_opt(15, 0, 0).unwrap_or_default(),
            retry_interval_secs: 300,  // 5 minutes
            min_hours: 34,
            fetch_on_start: true,
            fail_fast_on_permanent: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct TibberConfig {
    pub enabled: bool,
    pub base_url: String,
    pub token: String,
    pub request_timeout_secs: u64,
    pub schedule: ScheduleConfig,
}

impl TibberConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for TibberConfig {
    fn default() -> Self {
        TibberConfig {
            enabled: true,
            base_url: "https://api.tibber.com/v1-beta/gql".to_string(),
            token: String::new(),
            request_timeout_secs: 10,
            schedule: ScheduleConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct EntsoeConfig {
    pub enabled: bool,
    pub base_url: String,
    pub token: String,
    /// EIC bidding zone code, used as both in and out domain.
    pub region: String,
    pub request_timeout_secs: u64,
    pub schedule: ScheduleConfig,
}

impl EntsoeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for EntsoeConfig {
    fn default() -> Self {
        EntsoeConfig {
            enabled: true,
            base_url: "https://web-api.tp.entsoe.eu/api".to_string(),
            token: String::new(),
            region: "10YNL----------L".to_string(),
            request_timeout_secs: 10,
            schedule: ScheduleConfig::default(),
        }
    }
}
