use std::sync::Arc;
use std::time::Duration;
use anyhow::Context;
use dynamic_prices::config::AppConfig;
use dynamic_prices::observability::{init_tracing, metrics};
use dynamic_prices::price_infra::{EntsoeConnector, FusionEngine, PriceProvider, TibberConnector};
use dynamic_prices::scheduler::{run_fusion, AcquisitionScheduler, Clock, FusionTrigger, SystemClock};
use dynamic_prices::store::{FusedStore, SourceCache};
use dynamic_prices::types::ProviderId;
use dynamic_prices::utils::TaskSupervisor;

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = std::env::var("DYNPRICES_ENV").unwrap_or_else(|_| "development".to_string());
    let config = AppConfig::load(&env).context("failed to load configuration")?;

    init_tracing(&config.logging);
    metrics::register_metrics();
    tracing::info!(env = %env, timezone = %config.market.timezone, "Starting dynamic price service");

    let timezone = config.market.timezone;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(timezone));
    let mut supervisor = TaskSupervisor::new();

    if config.tibber.enabled {
        let provider: Arc<dyn PriceProvider> = Arc::new(TibberConnector::new(&config.tibber, timezone));
        let scheduler = AcquisitionScheduler::new(
            provider,
            SourceCache::new(ProviderId::Tibber, config.storage.cache_path(ProviderId::Tibber)),
            clock.clone(),
            config.tibber.schedule.clone(),
            config.tibber.request_timeout(),
        );
        supervisor.spawn("acquisition_tibber", scheduler.run());
    }

    if config.entsoe.enabled {
        let provider: Arc<dyn PriceProvider> = Arc::new(EntsoeConnector::new(&config.entsoe, timezone));
        let scheduler = AcquisitionScheduler::new(
            provider,
            SourceCache::new(ProviderId::Entsoe, config.storage.cache_path(ProviderId::Entsoe)),
            clock.clone(),
            config.entsoe.schedule.clone(),
            config.entsoe.request_timeout(),
        );
        supervisor.spawn("acquisition_entsoe", scheduler.run());
    }

    // Disabled providers still contribute whatever their cache already holds.
    let caches = ProviderId::ALL
        .iter()
        .map(|p| SourceCache::new(*p, config.storage.cache_path(*p)))
        .collect();
    let engine = FusionEngine::new(
        caches,
        FusedStore::new(config.storage.fused_path(), timezone),
        &config.fusion,
    );
    supervisor.spawn(
        "price_fusion",
        run_fusion(engine, FusionTrigger::from_config(&config.fusion), clock.clone()),
    );

    let mut health = tokio::time::interval(HEALTH_CHECK_INTERVAL);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = health.tick() => {
                if let Err(e) = supervisor.check_health().await {
                    tracing::error!("Health check failed: {}", e);
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown requested");
                break;
            }
        }
    }

    supervisor.shutdown_all().await;
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
