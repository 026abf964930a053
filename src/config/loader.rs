use crate::config::fusion::FusionConfig;
use crate::config::market::{MarketConfig, StorageConfig};
use crate::config::providers::{EntsoeConfig, ScheduleConfig, TibberConfig};
use crate::config::LoggingConfig;
use crate::error::{Error, Result};
use crate::types::series::ProviderId;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub market: MarketConfig,
    pub storage: StorageConfig,
    pub tibber: TibberConfig,
    pub entsoe: EntsoeConfig,
    pub fusion: FusionConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Layers `config/default`, `config/<env>` and `DYNPRICES__*` environment variables.
    pub fn load(env: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                Environment::with_prefix("DYNPRICES")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::ConfigError(e.to_string()))?;

        Self::finish(config)
    }

    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .map_err(|e| Error::ConfigError(e.to_string()))?;

        Self::finish(config)
    }

    fn finish(config: Config) -> Result<Self> {
        let app: AppConfig = config.try_deserialize()
            .map_err(|e| Error::ConfigError(e.to_string()))?;
        app.validate()?;
        Ok(app)
    }

    pub fn validate(&self) -> Result<()> {
        validate_schedule(ProviderId::Tibber, &self.tibber.schedule)?;
        validate_schedule(ProviderId::Entsoe, &self.entsoe.schedule)?;
        validate_timeout(ProviderId::Tibber, self.tibber.request_timeout_secs)?;
        validate_timeout(ProviderId::Entsoe, self.entsoe.request_timeout_secs)?;

        if self.fusion.completeness_threshold == 0 {
            return Err(Error::ConfigError("fusion.completeness_threshold must be positive".to_string()));
        }
        if self.fusion.interval_secs == 0 || self.fusion.poll_secs == 0 {
            return Err(Error::ConfigError("fusion intervals must be positive".to_string()));
        }
        if self.fusion.precedence.is_empty() {
            return Err(Error::ConfigError("fusion.precedence must name at least one provider".to_string()));
        }
        for (i, provider) in self.fusion.precedence.iter().enumerate() {
            if self.fusion.precedence[..i].contains(provider) {
                return Err(Error::ConfigError(format!("fusion.precedence lists {} twice", provider)));
            }
        }

        if self.tibber.enabled && self.tibber.token.is_empty() {
            tracing::warn!("tibber is enabled without a token; requests will be rejected");
        }
        if self.entsoe.enabled && self.entsoe.token.is_empty() {
            tracing::warn!("entsoe is enabled without a token; requests will be rejected");
        }

        Ok(())
    }
}

fn validate_schedule(provider: ProviderId, schedule: &ScheduleConfig) -> Result<()> {
    if schedule.deadline <= schedule.publication_time {
        return Err(Error::ConfigError(format!(
            "{}: deadline {} must be after publication time {}",
            provider, schedule.deadline, schedule.publication_time
        )));
    }
    if schedule.retry_interval_secs == 0 {
        return Err(Error::ConfigError(format!("{}: retry interval must be positive", provider)));
    }
    if schedule.min_hours == 0 {
        return Err(Error::ConfigError(format!("{}: min_hours must be positive", provider)));
    }
    Ok(())
}

fn validate_timeout(provider: ProviderId, secs: u64) -> Result<()> {
    if secs == 0 {
        return Err(Error::ConfigError(format!("{}: request_timeout_secs must be positive", provider)));
    }
    Ok(())
}
