use std::path::{Path, PathBuf};
use async_trait::async_trait;
use chrono::DateTime;
use chrono_tz::Tz;
use tokio::fs as async_fs;
use crate::error::{Error, Result};
use crate::interfaces::price_reader::PercentReader;
use crate::store::atomic::write_atomic;
use crate::types::fused::{FusedRecord, DEFAULT_PERCENT};
use crate::types::hour::HourKey;

/// Durable copy of the latest fusion result.
///
/// The fusion engine is the only writer; decision consumers read through
/// [`PercentReader`]. A record is only ever written whole via [`write_atomic`].
#[derive(Clone, Debug)]
pub struct FusedStore {
    path: PathBuf,
    timezone: Tz,
}

impl FusedStore {
    pub fn new(path: impl AsRef<Path>, timezone: Tz) -> Self {
        FusedStore {
            path: path.as_ref().to_path_buf(),
            timezone,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when nothing has been written yet.
    pub async fn load(&self) -> Result<Option<FusedRecord>> {
        let data = match async_fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::IoError(e)),
        };

        let record: FusedRecord = serde_json::from_slice(&data)
            .map_err(|e| Error::DeserializationError(e.to_string()))?;

        if !record.is_valid() {
            return Err(Error::DeserializationError(format!(
                "fused record at {:?} holds values outside 0..=100",
                self.path
            )));
        }
        Ok(Some(record))
    }

    pub async fn save(&self, record: &FusedRecord) -> Result<()> {
        let data = serde_json::to_vec(record)
            .map_err(|e| Error::SerializationError(e.to_string()))?;
        write_atomic(&self.path, &data).await?;
        tracing::debug!(path = ?self.path, hours = record.len(), "Saved fused record");
        Ok(())
    }
}

#[async_trait]
impl PercentReader for FusedStore {
    async fn get_percent_for_hour(&self, timestamp: DateTime<Tz>) -> f64 {
        let hour = HourKey::from_datetime(&timestamp, self.timezone);
        match self.load().await {
            Ok(Some(record)) => record.percent_for(&hour),
            Ok(None) => DEFAULT_PERCENT,
            Err(e) => {
                tracing::warn!(path = ?self.path, "Fused record unreadable, reporting default: {}", e);
                DEFAULT_PERCENT
            }
        }
    }
}
