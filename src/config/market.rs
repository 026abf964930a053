use std::path::PathBuf;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use crate::types::series::ProviderId;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Timezone the hour keys and daily schedules are expressed in.
    pub timezone: Tz,
}

impl Default for MarketConfig {
    fn default() -> Self {
        MarketConfig {
            timezone: chrono_tz::Europe::Amsterdam,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl StorageConfig {
    pub fn cache_path(&self, provider: ProviderId) -> PathBuf {
        self.data_dir.join(format!("prices_{}.json", provider))
    }

    pub fn fused_path(&self) -> PathBuf {
        self.data_dir.join("prices_percent.json")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            data_dir: PathBuf::from("data"),
        }
    }
}
