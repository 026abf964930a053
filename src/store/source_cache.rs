use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs as async_fs;
use crate::error::{Error, Result};
use crate::store::atomic::write_atomic;
use crate::types::hour::HourKey;
use crate::types::price::Price;
use crate::types::series::{PriceSeries, ProviderId};

/// Durable, merge-accumulated price series of one provider.
///
/// ## File Format
/// `{ "retrieved_at": ISO-8601, "source": "tibber", "prices": { "YYYY-MM-DDTHH:00": 0.235 } }`.
/// Files written by older fetchers use `retrieved` and omit `source`; both load.
///
/// ## Ownership
/// The provider's acquisition scheduler is the only writer. Any number of readers
/// may load concurrently; writes go through [`write_atomic`], so a reader never
/// observes a partial file.
///
/// ## Staleness
/// Not enforced here. Hours are kept until overwritten.
#[derive(Clone, Debug)]
pub struct SourceCache {
    provider: ProviderId,
    path: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    #[serde(alias = "retrieved")]
    retrieved_at: DateTime<FixedOffset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<ProviderId>,
    #[serde(default)]
    prices: BTreeMap<HourKey, Price>,
}

impl SourceCache {
    pub fn new(provider: ProviderId, path: impl AsRef<Path>) -> Self {
        SourceCache {
            provider,
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cached series; a missing or unreadable file loads as empty.
    pub async fn load(&self) -> PriceSeries {
        match self.try_load().await {
            Ok(Some(series)) => series,
            Ok(None) => self.empty(),
            Err(e) => {
                tracing::warn!(provider = %self.provider, path = ?self.path, "Unreadable price cache, treating as empty: {}", e);
                self.empty()
            }
        }
    }

    /// Like [`load`](Self::load) but reports why a present file could not be read.
    pub async fn try_load(&self) -> Result<Option<PriceSeries>> {
        let data = match async_fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::IoError(e)),
        };

        let file: CacheFile = serde_json::from_slice(&data)
            .map_err(|e| Error::DeserializationError(e.to_string()))?;

        if let Some(source) = file.source {
            if source != self.provider {
                return Err(Error::DeserializationError(format!(
                    "cache at {:?} belongs to {}, expected {}",
                    self.path, source, self.provider
                )));
            }
        }

        let mut series = PriceSeries::new(self.provider, file.retrieved_at);
        for (hour, price) in file.prices {
            series.insert(hour, price);
        }
        Ok(Some(series))
    }

    /// Merge `fresh` into the stored series and persist the result.
    ///
    /// Hours in `fresh` overwrite stored ones; every other stored hour is kept.
    /// A corrupt file is replaced; a file that cannot be read is left alone.
    pub async fn merge(&self, fresh: &PriceSeries) -> Result<PriceSeries> {
        let mut current = match self.try_load().await {
            Ok(stored) => stored.unwrap_or_else(|| self.empty()),
            Err(Error::DeserializationError(e)) => {
                tracing::warn!(provider = %self.provider, path = ?self.path, "Replacing corrupt price cache: {}", e);
                self.empty()
            }
            Err(e) => return Err(e),
        };
        current.merge(fresh);

        let file = CacheFile {
            retrieved_at: current.retrieved_at,
            source: Some(self.provider),
            prices: current.prices().clone(),
        };
        let data = serde_json::to_vec(&file)
            .map_err(|e| Error::SerializationError(e.to_string()))?;
        write_atomic(&self.path, &data).await?;

        tracing::info!(
            provider = %self.provider,
            merged = fresh.len(),
            total = current.len(),
            "Saved price cache"
        );
        Ok(current)
    }

    /// Modification time of the cache file, if it exists.
    pub async fn modified(&self) -> Option<SystemTime> {
        async_fs::metadata(&self.path).await.ok()?.modified().ok()
    }

    fn empty(&self) -> PriceSeries {
        PriceSeries::new(self.provider, DateTime::<Utc>::UNIX_EPOCH.fixed_offset())
    }
}
