use lazy_static::lazy_static;
use prometheus::{
    Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Acquisition metrics
    pub static ref FETCH_ATTEMPTS: IntCounterVec = IntCounterVec::new(
        Opts::new("price_fetch_attempts_total", "Total number of provider fetch attempts"),
        &["provider"]
    ).unwrap();

    pub static ref FETCH_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("price_fetch_failures_total", "Total number of failed provider fetches"),
        &["provider"]
    ).unwrap();

    pub static ref CYCLES_SETTLED: IntCounterVec = IntCounterVec::new(
        Opts::new("price_cycles_settled_total", "Acquisition cycles settled, by outcome"),
        &["provider", "outcome"]
    ).unwrap();

    // Fusion metrics
    pub static ref FUSION_RUNS: IntCounterVec = IntCounterVec::new(
        Opts::new("price_fusion_runs_total", "Fusion runs, by outcome"),
        &["outcome"]
    ).unwrap();

    pub static ref FUSED_HOURS: IntGauge = IntGauge::new(
        "price_fused_hours",
        "Hours in the most recent fused record"
    ).unwrap();
}

pub fn register_metrics() {
    REGISTRY.register(Box::new(FETCH_ATTEMPTS.clone())).unwrap();
    REGISTRY.register(Box::new(FETCH_FAILURES.clone())).unwrap();
    REGISTRY.register(Box::new(CYCLES_SETTLED.clone())).unwrap();
    REGISTRY.register(Box::new(FUSION_RUNS.clone())).unwrap();
    REGISTRY.register(Box::new(FUSED_HOURS.clone())).unwrap();
}

/// Text exposition of everything in [`REGISTRY`].
pub fn render() -> String {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
