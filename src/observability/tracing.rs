use tracing::Span;
use tracing_subscriber::EnvFilter;
use crate::config::{LogFormat, LoggingConfig};
use crate::types::series::ProviderId;

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level when set. Calling this twice is
/// harmless; the second install is ignored.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };

    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

pub fn trace_fetch(provider: ProviderId, attempt: u32) -> Span {
    tracing::info_span!(
        "price_fetch",
        provider = %provider,
        attempt = attempt,
    )
}

pub fn trace_fusion() -> Span {
    tracing::info_span!("price_fusion")
}
